//! Component Assembler (spec §4.4): for each `(project, env, service)`
//! composes one [`Component`] from the kustomization, CI build details and
//! the VCS commit history of the kustomization path.

use std::cell::Cell;

use chrono::Utc;
use estate_ci::CiAdapter;
use estate_kustomize::{self as kustomize, ExtractedComponent};
use estate_types::warning::reason;
use estate_types::{Component, EstateError, GlobalAlert, ServiceConfig, Warning, WarningLevel};
use estate_vcs::VcsAdapter;

/// Tracks whether the CI adapter has gone "down" for the remainder of a run
/// (spec §4.4: "Mark CI down on first exception and stop calling it this
/// run"). Shared by reference across every component assembled in one run.
#[derive(Debug, Default)]
pub struct CiState {
    down: Cell<bool>,
}

impl CiState {
    pub fn new() -> Self {
        Self { down: Cell::new(false) }
    }

    pub fn is_down(&self) -> bool {
        self.down.get()
    }

    /// Mark CI down; returns `true` the first time this transitions from up
    /// to down, so the caller emits exactly one global alert.
    pub fn mark_down(&self) -> bool {
        let was_down = self.down.replace(true);
        !was_down
    }
}

/// Split an `owner/repo` config string. Malformed values (no slash) are
/// treated as `(value, value)` so callers degrade rather than panic.
fn split_owner_repo(full: &str) -> (&str, &str) {
    full.split_once('/').unwrap_or((full, full))
}

fn warn(reason: &str, message: impl Into<String>) -> Warning {
    Warning::new(WarningLevel::Warn, "component", reason, "assembler", message)
}

/// Assemble every Component for one `(service, env)` pair (spec §4.4 steps
/// 1-6). Returns the finished components (usually one, but a kustomization
/// can list more than one image) plus any global alert raised this call
/// (CI going down).
pub fn assemble(
    service: &ServiceConfig,
    env_key: &str,
    infra_ref_default: Option<&str>,
    vcs: &VcsAdapter,
    ci: Option<&CiAdapter>,
    ci_state: &CiState,
) -> (Vec<Component>, Option<GlobalAlert>) {
    let infra_ref = service.resolve_infra_ref(infra_ref_default);
    let (owner, repo) = split_owner_repo(&service.infra_repo);

    // Step 2: fetch kustomization text, trying each candidate path in order.
    let mut kustomization_path = None;
    let mut text = None;
    for candidate in kustomize::candidate_paths(env_key) {
        match vcs.fetch_file(owner, repo, &candidate, &infra_ref) {
            Ok(Some(found)) => {
                kustomization_path = Some(candidate);
                text = Some(found);
                break;
            }
            Ok(None) => continue,
            Err(_) => continue,
        }
    }

    let Some(text) = text else {
        return (
            vec![Component::placeholder(
                service.key.clone(),
                warn(reason::NO_KUSTOMIZATION, "no kustomization found on any candidate path")
                    .with_env(env_key),
            )],
            None,
        );
    };
    let kustomization_path = kustomization_path.expect("text implies path");

    // Step 3: extract components.
    let mut extracted = match kustomize::parse(&text) {
        Ok(components) if !components.is_empty() => components,
        _ => {
            return (
                vec![Component::placeholder(
                    service.key.clone(),
                    warn(reason::NO_TAG_FOUND, "kustomization has no image tags").with_env(env_key),
                )],
                None,
            );
        }
    };

    // Step 4: a single extracted component takes the configured service key.
    if extracted.len() == 1 {
        extracted[0].service_key = service.key.clone();
    }

    let current_signature = kustomize::signature(&extracted);
    let deployer =
        find_deployer_commit(vcs, owner, repo, &kustomization_path, &infra_ref, &current_signature);

    let mut alert = None;
    let components = extracted
        .into_iter()
        .map(|extracted_component| {
            build_component(
                extracted_component,
                env_key,
                owner,
                repo,
                &service.infra_repo,
                &kustomization_path,
                &infra_ref,
                &deployer,
                service.teamcity_build_type_id.as_deref(),
                ci,
                ci_state,
                &mut alert,
            )
        })
        .collect();

    (components, alert)
}

struct DeployerInfo {
    author: Option<String>,
    authored_at: Option<chrono::DateTime<Utc>>,
    html_url: String,
}

/// Step 5: find the commit whose signature changed *to* `current_signature`
/// by walking up to 12 recent commits on the kustomization path (spec
/// §4.4).
fn find_deployer_commit(
    vcs: &VcsAdapter,
    owner: &str,
    repo: &str,
    path: &str,
    git_ref: &str,
    current_signature: &str,
) -> Option<DeployerInfo> {
    let commits = vcs.list_commits(owner, repo, path, git_ref, 12, 1).ok()?;
    if commits.is_empty() {
        return None;
    }

    let signatures: Vec<Option<String>> = commits
        .iter()
        .map(|c| {
            vcs.fetch_file(owner, repo, path, &c.sha)
                .ok()
                .flatten()
                .and_then(|text| kustomize::parse(&text).ok())
                .map(|components| kustomize::signature(&components))
        })
        .collect();

    let mut chosen = None;
    for i in 0..commits.len().saturating_sub(1) {
        let here = signatures[i].as_deref();
        let next = signatures[i + 1].as_deref();
        if here == Some(current_signature) && next != Some(current_signature) {
            chosen = Some(i);
            break;
        }
    }
    let chosen = chosen.or_else(|| {
        signatures
            .iter()
            .position(|s| s.as_deref() == Some(current_signature))
    });
    let index = chosen.unwrap_or(0);

    let commit = &commits[index];
    Some(DeployerInfo {
        author: commit.author.clone(),
        authored_at: commit.authored_at,
        html_url: commit.html_url.clone(),
    })
}

#[allow(clippy::too_many_arguments)]
fn build_component(
    extracted: ExtractedComponent,
    env_key: &str,
    owner: &str,
    repo: &str,
    infra_repo: &str,
    kustomization_path: &str,
    infra_ref: &str,
    deployer: &Option<DeployerInfo>,
    build_type_id: Option<&str>,
    ci: Option<&CiAdapter>,
    ci_state: &CiState,
    alert: &mut Option<GlobalAlert>,
) -> Component {
    let mut warnings = Vec::new();
    let mut component = Component {
        service_key: extracted.service_key.clone(),
        image: None,
        tag: None,
        build_number: None,
        repo: None,
        repo_url: None,
        branch: None,
        branch_url: None,
        build_url: None,
        build_started_at: None,
        build_finished_at: None,
        triggered_by: None,
        deployer: None,
        deployer_commit_url: None,
        deployed_at: None,
        infra_repo: None,
        infra_repo_url: None,
        kustomization_url: None,
        warnings: Vec::new(),
        argo_app: None,
        argo_app_url: None,
        argo_health: None,
        argo_sync: None,
    };

    component.image = Some(extracted.image.clone());
    component.tag = Some(extracted.tag.clone());
    component.build_number = Some(extracted.build_number.clone());
    component.repo = Some(infra_repo.to_string());
    component.repo_url = Some(format!("https://github.com/{owner}/{repo}"));
    component.infra_repo = Some(infra_repo.to_string());
    component.infra_repo_url = Some(format!("https://github.com/{owner}/{repo}"));
    component.kustomization_url = Some(format!(
        "https://github.com/{owner}/{repo}/blob/{infra_ref}/{kustomization_path}"
    ));

    if let Some(info) = deployer {
        component.deployer = info.author.clone();
        component.deployed_at = info.authored_at;
        component.deployer_commit_url = Some(info.html_url.clone());
    }

    // Step 6: CI enrichment.
    match (ci, build_type_id) {
        (_, None) => warnings.push(
            warn(reason::NO_TEAMCITY_BUILDTYPE, "service has no teamcityBuildTypeId configured")
                .with_env(env_key)
                .with_component(&extracted.service_key),
        ),
        (None, Some(_)) => warnings.push(
            warn(reason::NO_TEAMCITY, "CI adapter disabled for this run")
                .with_env(env_key)
                .with_component(&extracted.service_key),
        ),
        (Some(_), Some(_)) if ci_state.is_down() => warnings.push(
            warn(reason::NO_TEAMCITY, "CI adapter marked down earlier this run")
                .with_env(env_key)
                .with_component(&extracted.service_key),
        ),
        (Some(ci), Some(build_type)) => {
            match lookup_build(ci, build_type, &extracted.build_number) {
                Ok(Some(details)) => {
                    component.branch = details.branch_name.clone();
                    component.build_url = Some(details.web_url.clone());
                    component.build_started_at = details.start_date;
                    component.build_finished_at = details.finish_date;
                    component.triggered_by = details.triggered_by.clone();
                    if details.branch_name.is_none() {
                        warnings.push(
                            warn(reason::NO_BRANCH_INFO, "build has no branch name")
                                .with_env(env_key)
                                .with_component(&extracted.service_key),
                        );
                    }
                }
                Ok(None) => warnings.push(
                    warn(reason::NO_TEAMCITY, "no build found for this build number")
                        .with_env(env_key)
                        .with_component(&extracted.service_key),
                ),
                Err(_) => {
                    warnings.push(
                        warn(reason::NO_TEAMCITY, "CI lookup failed")
                            .with_env(env_key)
                            .with_component(&extracted.service_key),
                    );
                    if ci_state.mark_down() {
                        *alert = Some(GlobalAlert::new(
                            reason::TEAMCITY_DOWN.to_string(),
                            "TeamCity adapter failed and was disabled for the rest of this run",
                            WarningLevel::Warn,
                        ));
                    }
                }
            }
        }
    }

    component.warnings = warnings;
    component
}

fn lookup_build(
    ci: &CiAdapter,
    build_type_id: &str,
    build_number: &str,
) -> Result<Option<estate_ci::BuildDetails>, EstateError> {
    if build_number.is_empty() {
        return Ok(None);
    }
    match ci.get_build_id_by_number(build_type_id, build_number)? {
        Some(id) => Ok(Some(ci.get_build_details(id)?)),
        None => Ok(None),
    }
}
