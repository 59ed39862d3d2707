//! Orchestrates one snapshot run (spec §2, §4.10): resolve credentials and
//! config, fan out to the four upstream integrations per project/env/
//! service, correlate tickets against deployments, derive history events
//! and write the new `data/latest.json`.
//!
//! Every step that can fail without aborting the run (an adapter refusing
//! to construct, a monitor listing call, a single repo's PR listing) is
//! caught locally and turned into a [`Warning`]/[`IntegrationStatus`]/
//! [`GlobalAlert`] instead of propagating, matching spec §7's "degrade, never
//! abort" policy for everything except `Config` and a missing VCS token.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;

use estate_assembler::{CiState, Thresholds, assemble, collect_signals, derive_status, global_alerts, news_items, observability_warning};
use estate_ci::CiAdapter;
use estate_credentials::Credentials;
use estate_history::{ComponentSnapshotFacts, HistoryStore};
use estate_monitoring::MonitoringAdapter;
use estate_snapshot::SnapshotWriter;
use estate_tickets::DeployedBranch;
use estate_tracker::TrackerAdapter;
use estate_types::warning::reason;
use estate_types::{
    Component, Environment, EstateError, EventKind, GlobalAlert, IntegrationStatus,
    IntegrationsSection, NewsEntry, ObservabilityEnvSummary, ObservabilitySection, Project,
    ProjectConfig, Snapshot, Stage, Ticket, TimeAwareDeployment, Warning, WarningLevel,
};
use estate_vcs::VcsAdapter;

const DEFAULT_TICKET_REGEX: &str = r"\b[A-Z][A-Z0-9]+-\d+\b";
const RELEASE_HISTORY_DIR: &str = "release_history";
const DEPLOYMENT_HISTORY_DIR: &str = "deployment_history";

/// Everything one pipeline run needs, resolved once at process start
/// (spec §6).
pub struct PipelineConfig {
    pub configs_dir: PathBuf,
    pub data_dir: PathBuf,
    pub credentials: Credentials,
    pub ticket_window_days: u32,
    pub per_repo_limit: u32,
    pub tracker_enrichment_cap: usize,
    pub release_history_retention_days: u32,
    pub deployment_history_retention_days: u32,
    pub global_alert_cap: usize,
    pub news_cap: usize,
    /// Override for the VCS adapter's base URL. `None` in production; tests
    /// point this at a [`wiremock`] server instead of `api.github.com`.
    pub vcs_base_url: Option<String>,
}

impl PipelineConfig {
    pub fn from_env(configs_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            configs_dir: configs_dir.into(),
            data_dir: data_dir.into(),
            credentials: Credentials::from_env(),
            ticket_window_days: estate_credentials::env_u32("TICKET_TRACKER_DAYS", 120),
            per_repo_limit: estate_credentials::env_u32("TICKET_TRACKER_PER_REPO_LIMIT", 120),
            tracker_enrichment_cap: estate_credentials::env_u32("TICKET_TRACKER_ENRICH_CAP", 250) as usize,
            release_history_retention_days: estate_credentials::env_u32("RELEASE_HISTORY_RETENTION_DAYS", 90),
            deployment_history_retention_days: estate_credentials::env_u32("DEPLOYMENT_HISTORY_RETENTION_DAYS", 90),
            global_alert_cap: estate_credentials::env_u32("GLOBAL_ALERT_CAP", 20) as usize,
            news_cap: estate_credentials::env_u32("OBSERVABILITY_NEWS_CAP", 20) as usize,
            vcs_base_url: None,
        }
    }
}

fn to_estate_error(e: anyhow::Error) -> EstateError {
    EstateError::DataQuality(e.to_string())
}

fn severity_to_level(s: estate_assembler::AlertSeverity) -> WarningLevel {
    match s {
        estate_assembler::AlertSeverity::Info => WarningLevel::Info,
        estate_assembler::AlertSeverity::Warn => WarningLevel::Warn,
        estate_assembler::AlertSeverity::Error => WarningLevel::Error,
    }
}

fn build_ci_adapter(cfg: &PipelineConfig, integrations: &mut IntegrationsSection) -> Option<CiAdapter> {
    if !cfg.credentials.ci_enabled() {
        integrations.ci = Some(IntegrationStatus::disabled("TEAMCITY_URL/TEAMCITY_TOKEN not set"));
        return None;
    }
    let base_url = cfg.credentials.ci.base_url.clone().unwrap_or_default();
    let token = cfg.credentials.ci.token.clone().unwrap_or_default();
    match CiAdapter::new(base_url, token) {
        Ok(adapter) => {
            integrations.ci = Some(IntegrationStatus::connected("teamcity", Utc::now()));
            Some(adapter)
        }
        Err(e) => {
            integrations.ci = Some(IntegrationStatus::down(e.to_string()));
            None
        }
    }
}

fn build_tracker_adapter(cfg: &PipelineConfig, integrations: &mut IntegrationsSection) -> Option<TrackerAdapter> {
    if !cfg.credentials.tracker_enabled() {
        integrations.tracker = Some(IntegrationStatus::disabled("JIRA_BASE/JIRA_API_TOKEN not set"));
        return None;
    }
    let base_url = cfg.credentials.tracker.base_url.clone().unwrap_or_default();
    let email = cfg.credentials.tracker.email.clone().unwrap_or_default();
    let token = cfg.credentials.tracker.token.clone().unwrap_or_default();
    match TrackerAdapter::new(base_url, &email, &token) {
        Ok(adapter) => {
            integrations.tracker = Some(IntegrationStatus::connected("jira", Utc::now()));
            Some(adapter)
        }
        Err(e) => {
            integrations.tracker = Some(IntegrationStatus::down(e.to_string()));
            None
        }
    }
}

fn build_monitoring_adapter(cfg: &PipelineConfig, integrations: &mut IntegrationsSection) -> Option<MonitoringAdapter> {
    if !cfg.credentials.monitoring_enabled() {
        integrations.monitoring = Some(IntegrationStatus::disabled("DATADOG_API_KEY/DATADOG_APP_KEY not set"));
        return None;
    }
    let api_key = cfg.credentials.monitoring.api_key.clone().unwrap_or_default();
    let app_key = cfg.credentials.monitoring.app_key.clone().unwrap_or_default();
    let site = cfg.credentials.monitoring.site.clone().unwrap_or_else(|| "datadoghq.com".to_string());
    match MonitoringAdapter::new(&api_key, &app_key, &site) {
        Ok(adapter) => {
            integrations.monitoring = Some(IntegrationStatus::connected("datadog", Utc::now()));
            Some(adapter)
        }
        Err(e) => {
            integrations.monitoring = Some(IntegrationStatus::down(e.to_string()));
            None
        }
    }
}

/// Derive `Component.argoApp`/`argoAppUrl` as a static link when the project
/// config names an ArgoCD host for this env (spec §6 `argocd.envHosts`).
/// There is no ArgoCD adapter in this workspace, so `argoHealth`/
/// `argoSync` are deliberately left unset rather than invented; see
/// DESIGN.md.
fn apply_argo_links(component: &mut Component, service_key: &str, env_key: &str, project_cfg: &ProjectConfig) {
    let Some(host) = project_cfg.argocd.env_hosts.get(env_key) else { return };
    let app_name = project_cfg
        .argocd
        .app_name_rules
        .get(service_key)
        .cloned()
        .unwrap_or_else(|| service_key.to_string());
    component.argo_app = Some(app_name.clone());
    component.argo_app_url = Some(format!("https://{host}/applications/{app_name}"));
}

fn facts_from_snapshot(snapshot: &Snapshot) -> Vec<ComponentSnapshotFacts> {
    let mut facts = Vec::new();
    for project in &snapshot.projects {
        for env in &project.environments {
            for component in &env.components {
                facts.push(ComponentSnapshotFacts {
                    project_key: project.key.clone(),
                    env_key: env.env_key.clone(),
                    env_name: env.display_name.clone(),
                    component: component.service_key.clone(),
                    repo: component.repo.clone(),
                    branch: component.branch.clone(),
                    tag: component.tag.clone().unwrap_or_default(),
                    build: component.build_number.clone().unwrap_or_default(),
                    deployed_at: component.deployed_at,
                    commit_sha: None,
                    commit_url: component.deployer_commit_url.clone(),
                    kustomization_url: component.kustomization_url.clone(),
                });
            }
        }
    }
    facts
}

fn merge_tickets(global: &mut HashMap<String, Ticket>, incoming: HashMap<String, Ticket>) {
    for (key, ticket) in incoming {
        global.entry(key).or_insert(ticket);
    }
}

/// Component facts keyed on the code repo (`service.code_repo`), not
/// `Component.repo` (which holds the infra repo) — what the Time-Aware
/// Correlator's Rule 2 (PR → Build) and Rule 3 (Build → Deployment) need
/// (spec §4.7).
struct TimeAwareComponentFact {
    repo: String,
    env_key: String,
    service_key: String,
    build_number: Option<String>,
    build_started_at: Option<DateTime<Utc>>,
    build_finished_at: Option<DateTime<Utc>>,
    deployed_at: Option<DateTime<Utc>>,
}

/// Run the three deterministic Time-Aware Correlator rules (spec §4.7) for
/// every PR of every ticket in `tickets`, ahead of the heuristic fallback
/// `run_once` applies afterwards. Rule 1 (PR → Branch) needs a VCS round
/// trip per candidate branch (`commitInRef` for reachability, the branch
/// tip commit's `authoredAt` as a proxy for `branch.createdAt`, since
/// GitHub's API exposes no direct branch-creation timestamp); Rules 2 and 3
/// are pure lookups against `facts`, which already carries `build.startedAt`/
/// `finishedAt` and `deployedAt` together per component. Tickets that gain a
/// time-aware deployment this way are left for `run_once` to recognize via
/// `ticket.time_aware_deployments` being non-empty, so it can skip the
/// heuristic pass for them.
fn attach_time_aware_correlations(
    vcs: &VcsAdapter,
    tickets: &mut HashMap<String, Ticket>,
    deployed_branches: &[DeployedBranch],
    facts: &[TimeAwareComponentFact],
) {
    for ticket in tickets.values_mut() {
        for pr in ticket.prs.clone() {
            let Some((owner, repo)) = pr.repo.split_once('/') else { continue };
            let Some(merge_sha) = pr.merge_sha.clone() else { continue };

            let mut candidate_branches: Vec<&str> = deployed_branches
                .iter()
                .filter(|d| d.repo == pr.repo)
                .map(|d| d.branch.as_str())
                .collect();
            candidate_branches.sort_unstable();
            candidate_branches.dedup();

            for branch_name in candidate_branches {
                let reachable = vcs.commit_in_ref(owner, repo, &merge_sha, branch_name).unwrap_or(false);
                if !reachable {
                    continue;
                }
                let Ok(Some(tip)) = vcs.get_last_commit_for_file(owner, repo, "", branch_name) else { continue };
                let Some(created_at) = tip.authored_at else { continue };
                if let Some(attached) = estate_correlator::attach_branch(&pr, branch_name, created_at, &pr.repo, true) {
                    ticket.time_aware_branches.push(attached);
                }
            }

            for fact in facts.iter().filter(|f| f.repo == pr.repo) {
                let (Some(build_number), Some(started_at)) = (&fact.build_number, fact.build_started_at) else { continue };
                let Some(build) =
                    estate_correlator::attach_build(&pr, build_number, started_at, fact.build_finished_at, &pr.repo, true)
                else {
                    continue;
                };
                if let Some(deployed_at) = fact.deployed_at {
                    if let Some(deployment) =
                        estate_correlator::attach_deployment(build.finished_at, deployed_at, &fact.env_key, &fact.service_key, true)
                    {
                        estate_correlator::apply_time_aware_deployments(ticket, vec![deployment], &HashMap::new());
                    }
                }
                ticket.time_aware_builds.push(build);
            }
        }
    }
}

/// Run one full snapshot pipeline and write it to `cfg.data_dir` (spec §4.9,
/// §4.10). Returns the written [`Snapshot`] so `estate-cli` can print a
/// summary; the scheduler only cares about the `Result`.
pub fn run_once(cfg: &PipelineConfig) -> Result<Snapshot, EstateError> {
    let generated_at = Utc::now();
    let projects_cfg = estate_config::load_all(&cfg.configs_dir)?;

    let vcs_token = cfg.credentials.require_vcs_token().map_err(EstateError::CredentialMissing)?;
    let mut vcs = VcsAdapter::new(vcs_token)?;
    if let Some(base) = &cfg.vcs_base_url {
        vcs = vcs.with_base_url(base.clone());
    }

    let mut integrations = IntegrationsSection::default();
    integrations.vcs = Some(IntegrationStatus::connected("github", generated_at));

    let ci_adapter = build_ci_adapter(cfg, &mut integrations);
    let tracker_adapter = build_tracker_adapter(cfg, &mut integrations);
    let monitoring_adapter = build_monitoring_adapter(cfg, &mut integrations);

    if !cfg.credentials.ci_enabled() && projects_cfg.iter().any(|p| p.services.iter().any(|s| s.teamcity_build_type_id.is_some())) {
        tracing::info!("TeamCity credentials absent; CI enrichment skipped for this run");
    }

    let snapshot_writer = SnapshotWriter::new(&cfg.data_dir);
    let prev_snapshot = snapshot_writer.read_latest();
    let prev_facts = prev_snapshot.as_ref().map(facts_from_snapshot).unwrap_or_default();

    let mut all_warnings: Vec<Warning> = Vec::new();
    let mut collected_alerts: Vec<GlobalAlert> = Vec::new();
    let mut projects: Vec<Project> = Vec::new();
    let mut ticket_index: HashMap<String, Ticket> = HashMap::new();
    let mut current_facts: Vec<ComponentSnapshotFacts> = Vec::new();
    let mut observability_summary: Vec<ObservabilityEnvSummary> = Vec::new();
    let mut observability_warnings: Vec<Warning> = Vec::new();
    let mut observability_news: Vec<NewsEntry> = Vec::new();
    let mut known_env_keys: Vec<String> = Vec::new();

    let ci_state = CiState::new();

    for project_cfg in &projects_cfg {
        let infra_ref_default = project_cfg.default_infra_ref();
        let owner_default = if project_cfg.project.github_owner.trim().is_empty() {
            cfg.credentials.vcs.org.clone()
        } else {
            Some(project_cfg.project.github_owner.clone())
        };

        let mut environments: Vec<Environment> = Vec::new();
        let mut project_repos: Vec<String> = Vec::new();
        let mut project_deployed_branches: Vec<DeployedBranch> = Vec::new();
        let mut project_fallback_strings: Vec<String> = Vec::new();
        let mut project_time_aware_facts: Vec<TimeAwareComponentFact> = Vec::new();

        for service in &project_cfg.services {
            if let Some(owner) = &owner_default {
                let full_repo = format!("{owner}/{}", service.code_repo);
                if !project_repos.contains(&full_repo) {
                    project_repos.push(full_repo);
                }
            }
        }

        for env_cfg in &project_cfg.environments {
            let Some(env_key) = env_cfg.normalized_key() else { continue };
            known_env_keys.push(env_key.clone());

            let mut components: Vec<Component> = Vec::new();
            for service in &project_cfg.services {
                if !service.applies_to_env(&env_key) {
                    continue;
                }
                let (mut assembled, alert) =
                    assemble(service, &env_key, infra_ref_default, &vcs, ci_adapter.as_ref(), &ci_state);
                if let Some(alert) = alert {
                    collected_alerts.push(alert);
                }

                for component in &mut assembled {
                    apply_argo_links(component, &service.key, &env_key, project_cfg);

                    if let (Some(owner), Some(branch)) = (&owner_default, &component.branch) {
                        project_deployed_branches.push(DeployedBranch {
                            project_key: project_cfg.key().to_string(),
                            env_key: env_key.clone(),
                            repo: format!("{owner}/{}", service.code_repo),
                            branch: branch.clone(),
                        });
                    }
                    if let Some(owner) = &owner_default {
                        project_time_aware_facts.push(TimeAwareComponentFact {
                            repo: format!("{owner}/{}", service.code_repo),
                            env_key: env_key.clone(),
                            service_key: component.service_key.clone(),
                            build_number: component.build_number.clone(),
                            build_started_at: component.build_started_at,
                            build_finished_at: component.build_finished_at,
                            deployed_at: component.deployed_at,
                        });
                    }
                    // Fallback ticket-key extraction source (spec §4.6): tag,
                    // branch, component name and build strings of every
                    // component, used only when the VCS returns no PRs at all.
                    let mut fallback_parts = vec![component.service_key.clone()];
                    if let Some(tag) = &component.tag {
                        fallback_parts.push(tag.clone());
                    }
                    if let Some(branch) = &component.branch {
                        fallback_parts.push(branch.clone());
                    }
                    if let Some(build) = &component.build_number {
                        fallback_parts.push(build.clone());
                    }
                    if fallback_parts.len() > 1 {
                        project_fallback_strings.push(fallback_parts.join(" "));
                    }

                    current_facts.push(ComponentSnapshotFacts {
                        project_key: project_cfg.key().to_string(),
                        env_key: env_key.clone(),
                        env_name: env_cfg.name.clone(),
                        component: component.service_key.clone(),
                        repo: component.repo.clone(),
                        branch: component.branch.clone(),
                        tag: component.tag.clone().unwrap_or_default(),
                        build: component.build_number.clone().unwrap_or_default(),
                        deployed_at: component.deployed_at,
                        commit_sha: None,
                        commit_url: component.deployer_commit_url.clone(),
                        kustomization_url: component.kustomization_url.clone(),
                    });
                }
                components.extend(assembled);
            }

            let mut env = Environment {
                env_key: env_key.clone(),
                display_name: env_cfg.name.clone(),
                status: estate_types::EnvironmentStatus::Healthy,
                argo_status: String::new(),
                health: None,
                last_deploy: None,
                deployer: None,
                build: None,
                components,
                warnings: Vec::new(),
            };
            env.status = env.derive_status();
            let (last_deploy, build, deployer) = env.derive_headline();
            env.last_deploy = last_deploy;
            env.build = build;
            env.deployer = deployer;
            env.argo_status = if env.components.iter().any(|c| c.argo_app.is_some()) {
                "configured".to_string()
            } else {
                String::new()
            };

            if project_cfg.datadog.enabled {
                if let Some(monitoring) = &monitoring_adapter {
                    let thresholds = Thresholds::from_config(&project_cfg.datadog);
                    let signals = collect_signals(monitoring, &project_cfg.datadog, &env_key, None, project_cfg.datadog.status_window_minutes());
                    let status = derive_status(&signals, &thresholds);
                    observability_summary.push(ObservabilityEnvSummary {
                        env_key: env_key.clone(),
                        status: status.as_str().to_string(),
                        cpu_pct: signals.cpu_pct,
                        mem_pct: signals.mem_pct,
                        pods: signals.pods,
                        error_rate_pct: signals.error_rate_pct,
                        p95_ms: signals.p95_ms,
                    });
                }
            }

            environments.push(env);
        }

        if !project_cfg.argocd.env_hosts.is_empty() && cfg.credentials.argocd.default_token.is_none() {
            collected_alerts.push(GlobalAlert::new(
                format!("argocd-disabled-{}", project_cfg.key()),
                format!(
                    "ArgoCD live status unavailable for project '{}': ARGOCD_TOKEN not set, only config-derived links are shown",
                    project_cfg.key()
                ),
                WarningLevel::Info,
            ));
        }

        let ticket_regex = Regex::new(project_cfg.ticket_regex()).unwrap_or_else(|_| Regex::new(DEFAULT_TICKET_REGEX).unwrap());
        let mut project_tickets = estate_tickets::build_index(
            &vcs,
            &project_repos,
            cfg.ticket_window_days,
            cfg.per_repo_limit,
            &ticket_regex,
            &project_deployed_branches,
            &project_fallback_strings,
            tracker_adapter.as_ref(),
            cfg.tracker_enrichment_cap,
        );
        attach_time_aware_correlations(&vcs, &mut project_tickets, &project_deployed_branches, &project_time_aware_facts);
        merge_tickets(&mut ticket_index, project_tickets);

        projects.push(Project {
            key: project_cfg.key().to_string(),
            display_name: project_cfg.display_name().to_string(),
            generated_at,
            environments,
        });
    }

    let mut monitors: Vec<estate_monitoring::Monitor> = Vec::new();
    if let Some(monitoring) = &monitoring_adapter {
        match monitoring.list_monitors() {
            Ok(list) => monitors = list,
            Err(e) => observability_warnings.push(observability_warning(e.to_string())),
        }
    }
    for project_cfg in &projects_cfg {
        if !project_cfg.datadog.enabled {
            continue;
        }
        for alert in global_alerts(&monitors, &project_cfg.datadog, &known_env_keys, cfg.global_alert_cap) {
            collected_alerts.push(GlobalAlert::new(alert.code, alert.title, severity_to_level(alert.severity)));
        }
        for item in news_items(&monitors, generated_at, cfg.news_cap) {
            observability_news.push(NewsEntry {
                ts: item.ts,
                title: item.title,
                msg: item.msg,
                level: item.level,
                source: item.source,
                url: item.url,
            });
        }
    }

    let release_store = HistoryStore::new(cfg.data_dir.join(RELEASE_HISTORY_DIR), EventKind::TagChange)
        .with_retention_days(cfg.release_history_retention_days);
    let deployment_store = HistoryStore::new(cfg.data_dir.join(DEPLOYMENT_HISTORY_DIR), EventKind::Deployment)
        .with_retention_days(cfg.deployment_history_retention_days);

    let _ = release_store.migrate_legacy(&cfg.data_dir.join("release_history_legacy.json"));
    let _ = deployment_store.migrate_legacy(&cfg.data_dir.join("deployment_history_legacy.json"));

    let (release_events, release_warnings) =
        estate_history::derive_tag_change_events(&prev_facts, &current_facts, EventKind::TagChange, false, generated_at);
    let (deployment_events, deployment_warnings) =
        estate_history::derive_tag_change_events(&prev_facts, &current_facts, EventKind::Deployment, false, generated_at);
    all_warnings.extend(release_warnings);
    all_warnings.extend(deployment_warnings);

    let existing_deployment_events = deployment_store.read_all().map_err(to_estate_error)?;
    let combined_events: Vec<_> = existing_deployment_events.into_iter().chain(deployment_events.clone()).collect();

    for (key, ticket) in ticket_index.iter_mut() {
        let prev_ticket = prev_snapshot.as_ref().and_then(|s| s.ticket_index.get(key));
        estate_correlator::apply_persistence_floor(ticket, prev_ticket);

        // Time-aware data for this ticket, if any, was already attached by
        // `attach_time_aware_correlations` above; the heuristic fallback
        // only runs when that left no time-aware deployment behind (spec
        // §4.7 "heuristic mode ... used when time-aware data is absent").
        let has_time_aware = !ticket.time_aware_deployments.is_empty();

        if !has_time_aware {
            for pr in ticket.prs.clone() {
                let matches = estate_correlator::heuristic_presence_from_events(&pr, &combined_events);
                let had_any_match = !matches.is_empty();
                for (stage, meta) in matches {
                    ticket.set_env_present(stage, meta);
                }
                if let Some(warning) = estate_correlator::conservative_window_warning(&pr, generated_at, had_any_match) {
                    all_warnings.push(warning);
                }
            }
        }

        if has_time_aware {
            if let Some(newest_pr) = ticket.prs.first().cloned() {
                let deployments: Vec<(Stage, TimeAwareDeployment)> = ticket
                    .time_aware_deployments
                    .iter()
                    .cloned()
                    .map(|d| (estate_types::derive_stage(&d.env_key), d))
                    .collect();
                ticket.timeline = estate_correlator::build_timeline(
                    &newest_pr,
                    &ticket.time_aware_branches,
                    &ticket.time_aware_builds,
                    &deployments,
                    false,
                );
            }
        } else if let Some(newest_pr) = ticket.prs.first().cloned() {
            let deployments: Vec<(Stage, TimeAwareDeployment)> = Stage::ALL
                .iter()
                .filter_map(|stage| {
                    let meta = ticket.env_presence_meta.get(stage.as_str())?;
                    if meta.source == "persisted_prev_snapshot" {
                        return None;
                    }
                    let when: DateTime<Utc> = meta.when?;
                    Some((*stage, TimeAwareDeployment { env_key: stage.as_str().to_string(), component: String::new(), at: when }))
                })
                .collect();
            let from_history = deployments.is_empty();
            ticket.timeline = estate_correlator::build_timeline(&newest_pr, &[], &[], &deployments, from_history);
        }
    }

    release_store.append(release_events).map_err(to_estate_error)?;
    deployment_store.append(deployment_events).map_err(to_estate_error)?;
    release_store.run_retention(generated_at).map_err(to_estate_error)?;
    deployment_store.run_retention(generated_at).map_err(to_estate_error)?;
    if release_store.needs_backfill(generated_at).unwrap_or(false) {
        let _ = release_store.mark_backfill_complete();
    }
    if deployment_store.needs_backfill(generated_at).unwrap_or(false) {
        let _ = deployment_store.mark_backfill_complete();
    }

    let mut snapshot = Snapshot::new(generated_at);
    snapshot.projects = projects;
    snapshot.ticket_index = ticket_index;
    snapshot.warnings = all_warnings;
    snapshot.observability = ObservabilitySection {
        summary: observability_summary,
        warnings: observability_warnings,
        news: observability_news,
    };
    snapshot.integrations = integrations;
    snapshot.global_alerts = collected_alerts;

    if !cfg.credentials.ci_enabled() && projects_cfg.iter().any(|p| p.services.iter().any(|s| s.teamcity_build_type_id.is_some())) {
        snapshot.global_alerts.push(GlobalAlert::new(
            reason::TEAMCITY_DISABLED,
            "TeamCity credentials not configured; CI enrichment skipped for all builds",
            WarningLevel::Info,
        ));
    }

    snapshot_writer.write(&snapshot).map_err(to_estate_error)?;
    Ok(snapshot)
}

/// Wrap [`run_once`] into the closure shape `estate_scheduler::Scheduler`
/// requires: `Arc<dyn Fn() -> Result<(), EstateError> + Send + Sync>`.
pub fn scheduler_closure(cfg: Arc<PipelineConfig>) -> Arc<dyn Fn() -> Result<(), EstateError> + Send + Sync> {
    Arc::new(move || run_once(&cfg).map(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use estate_types::assembled::EnvironmentStatus;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn facts_from_snapshot_walks_all_components() {
        let generated_at: DateTime<Utc> = "2026-01-19T12:00:00Z".parse().unwrap();
        let mut snapshot = Snapshot::new(generated_at);
        let component = Component {
            tag: Some("v1".to_string()),
            build_number: Some("3".to_string()),
            repo: Some("acme/web".to_string()),
            ..Component::placeholder("web", Warning::new(WarningLevel::Info, "component", "x", "test", "x"))
        };
        snapshot.projects.push(Project {
            key: "acme".to_string(),
            display_name: "Acme".to_string(),
            generated_at,
            environments: vec![Environment {
                env_key: "qa".to_string(),
                display_name: "QA".to_string(),
                status: EnvironmentStatus::Healthy,
                argo_status: String::new(),
                health: None,
                last_deploy: None,
                deployer: None,
                build: None,
                components: vec![component],
                warnings: Vec::new(),
            }],
        });

        let facts = facts_from_snapshot(&snapshot);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].tag, "v1");
        assert_eq!(facts[0].component, "web");
    }

    #[test]
    fn merge_tickets_keeps_first_project_on_key_collision() {
        let mut global = HashMap::new();
        let mut first = Ticket::new("ABC-1");
        first.repos.push("acme/web".to_string());
        global.insert("ABC-1".to_string(), first);

        let mut incoming = HashMap::new();
        let mut second = Ticket::new("ABC-1");
        second.repos.push("acme/other".to_string());
        incoming.insert("ABC-1".to_string(), second);

        merge_tickets(&mut global, incoming);
        assert_eq!(global["ABC-1"].repos, vec!["acme/web".to_string()]);
    }

    #[test]
    #[serial]
    fn missing_vcs_token_is_a_fatal_credential_error() {
        temp_env::with_var("GITHUB_TOKEN", None::<&str>, || {
            let td = TempDir::new().unwrap();
            let cfg = PipelineConfig::from_env(td.path().join("configs"), td.path().join("data"));
            let err = run_once(&cfg).unwrap_err();
            assert!(matches!(err, EstateError::CredentialMissing(_)));
        });
    }

    #[test]
    #[serial]
    fn missing_configs_dir_is_a_fatal_config_error() {
        temp_env::with_var("GITHUB_TOKEN", Some("ghp_xxx"), || {
            let td = TempDir::new().unwrap();
            let cfg = PipelineConfig::from_env(td.path().join("nonexistent"), td.path().join("data"));
            let err = run_once(&cfg).unwrap_err();
            assert!(matches!(err, EstateError::Config(_)));
            assert!(err.is_fatal());
        });
    }
}
