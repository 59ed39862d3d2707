//! Read-only runbook views (spec §4.11 `POST /runbooks/*`): pure
//! compare/branch queries against the VCS adapter, no pipeline side
//! effects. Grounded on
//! `original_source/MVP1/snapshot/snapshot_api_server.py`'s `runbook_*`
//! handlers — same branch-pattern matching and release-pick strategies,
//! re-expressed over [`estate_vcs::VcsAdapter`] instead of raw `requests`
//! calls.

use std::collections::BTreeSet;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use estate_types::{BranchingConfig, ProjectConfig, ReleaseBranchPickStrategy};
use estate_vcs::VcsAdapter;
use regex::Regex;
use serde_json::{json, Value};

use crate::state::AppState;

const DEFAULT_TICKET_REGEX: &str = r"(?i)[A-Z][A-Z0-9]+[-\s]\d+";
const BRANCH_FETCH_LIMIT: u32 = 100;

fn is_frontend_repo(repo: &str) -> bool {
    let lower = repo.to_lowercase();
    lower.contains("frontend") || lower.contains("-fe") || lower.ends_with("-fe")
}

fn branch_matches(name: &str, pattern: &str, is_frontend: bool) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }
    let looks_like_regex = pattern.chars().any(|c| "\\^$[(?+{|".contains(c));
    if looks_like_regex {
        if let Ok(re) = Regex::new(&format!("^(?:{pattern})")) {
            if re.is_match(name) {
                if pattern.contains("BE") || pattern.contains("FE") {
                    return (is_frontend && pattern.contains("FE")) || (!is_frontend && pattern.contains("BE"));
                }
                return true;
            }
        }
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if name.starts_with(prefix) {
            if prefix == "release/" && (name.contains("BE") || name.contains("FE")) {
                return (is_frontend && name.starts_with("release/FE.")) || (!is_frontend && name.starts_with("release/BE."));
            }
            return true;
        }
        return false;
    }
    name == pattern
}

/// Turn a digit run into a sortable tuple; non-numeric suffixes sort as
/// `(0,)` (spec mirrors `original_source`'s lexicographic fallback).
fn version_sort_key(suffix: &str) -> Vec<u32> {
    let digits: Vec<u32> = Regex::new(r"\d+")
        .unwrap()
        .find_iter(suffix)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if digits.is_empty() { vec![0] } else { digits }
}

fn extract_semver(name: &str, version_regex: Option<&str>) -> (u32, u32, u32) {
    if let Some(pattern) = version_regex {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(caps) = re.captures(name) {
                let g = |i: usize| caps.get(i).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
                return (g(1), g(2), g(3));
            }
        }
    }
    if let Some(caps) = Regex::new(r"(?:BE|FE)\.(\d+)\.(\d+)").unwrap().captures(name) {
        return (caps[1].parse().unwrap_or(0), caps[2].parse().unwrap_or(0), 0);
    }
    if let Some(caps) = Regex::new(r"(\d+)\.(\d+)\.(\d+)").unwrap().captures(name) {
        return (caps[1].parse().unwrap_or(0), caps[2].parse().unwrap_or(0), caps[3].parse().unwrap_or(0));
    }
    if let Some(caps) = Regex::new(r"(\d+)\.(\d+)").unwrap().captures(name) {
        return (caps[1].parse().unwrap_or(0), caps[2].parse().unwrap_or(0), 0);
    }
    (0, 0, 0)
}

/// Merge a project's base branching config with any per-repo override
/// (spec §4.11 via `original_source`'s `_load_branching_strategy`).
pub fn merged_branching(cfg: &BranchingConfig, repo: &str) -> (String, Vec<String>, ReleaseBranchPickStrategy, Option<String>) {
    let default_branch = cfg
        .repo_overrides
        .get(repo)
        .and_then(|o| o.default_branch.clone())
        .unwrap_or_else(|| cfg.default_branch.clone());

    let mut patterns = cfg
        .repo_overrides
        .get(repo)
        .map(|o| o.release_branch_patterns.clone())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| cfg.release_branch_patterns.clone());
    if patterns.is_empty() {
        patterns = vec![
            "release/.*".to_string(),
            r"release/\d+\.\d+(\.\d+)?".to_string(),
            r"release/v?\d+\.\d+".to_string(),
        ];
    }

    (default_branch, patterns, cfg.release_branch_pick_strategy.clone(), cfg.version_extraction_regex.clone())
}

fn pick_release_branch(
    vcs: &VcsAdapter,
    owner: &str,
    repo: &str,
    patterns: &[String],
    strategy: &ReleaseBranchPickStrategy,
    version_regex: Option<&str>,
) -> Option<String> {
    let branches = vcs.list_branches(owner, repo, BRANCH_FETCH_LIMIT).ok()?;
    let is_frontend = is_frontend_repo(repo);
    let mut candidates: Vec<String> = branches
        .into_iter()
        .map(|b| b.name)
        .filter(|name| patterns.iter().any(|p| branch_matches(name, p, is_frontend)))
        .collect();
    if candidates.is_empty() {
        return None;
    }
    match strategy {
        ReleaseBranchPickStrategy::Semver => {
            candidates.sort_by_key(|n| std::cmp::Reverse(extract_semver(n, version_regex)));
            candidates.into_iter().next()
        }
        ReleaseBranchPickStrategy::Recent => {
            candidates.sort();
            candidates.into_iter().next_back()
        }
    }
}

fn latest_branch_with_prefix(vcs: &VcsAdapter, owner: &str, repo: &str, prefix: &str) -> Option<String> {
    if prefix.is_empty() {
        return None;
    }
    let branches = vcs.list_branches(owner, repo, BRANCH_FETCH_LIMIT).ok()?;
    let mut matching: Vec<String> = branches.into_iter().map(|b| b.name).filter(|n| n.starts_with(prefix)).collect();
    if matching.is_empty() {
        return None;
    }
    matching.sort_by_key(|name| {
        let suffix = name.strip_prefix(prefix).unwrap_or(name).trim_start_matches('/');
        version_sort_key(suffix)
    });
    matching.into_iter().next_back()
}

fn extract_tickets(regex: &Regex, text: &str) -> BTreeSet<String> {
    regex.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

fn extract_prs(text: &str) -> Vec<String> {
    let mut nums: BTreeSet<u64> = Regex::new(r"#(\d+)")
        .unwrap()
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    nums.drain(..).map(|n| format!("#{n}")).collect()
}

fn ticket_regex_from_body(body: &Value) -> Regex {
    let pattern = body.get("ticketRegex").and_then(Value::as_str).unwrap_or(DEFAULT_TICKET_REGEX);
    Regex::new(pattern).unwrap_or_else(|_| Regex::new(DEFAULT_TICKET_REGEX).unwrap())
}

fn project_key_from_body(body: &Value) -> Option<String> {
    body.get("projectKey").and_then(Value::as_str).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn find_project<'a>(configs: &'a [ProjectConfig], key: &str) -> Option<&'a ProjectConfig> {
    configs.iter().find(|c| c.key().eq_ignore_ascii_case(key))
}

fn code_repos(cfg: &ProjectConfig) -> Vec<&str> {
    cfg.services.iter().map(|s| s.code_repo.as_str()).filter(|r| !r.is_empty()).collect()
}

fn owner_for(cfg: &ProjectConfig, state: &AppState) -> Option<String> {
    if !cfg.project.github_owner.trim().is_empty() {
        return Some(cfg.project.github_owner.clone());
    }
    state.credentials.vcs.org.clone()
}

/// Resolve the VCS adapter or a ready-made `503` response (spec: "runbooks
/// require GitHub access").
fn resolve_vcs(state: &AppState) -> Result<VcsAdapter, axum::response::Response> {
    let token = state.credentials.vcs.token.clone().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "error", "message": "GITHUB_TOKEN is missing. Runbooks require GitHub access."})),
        )
            .into_response()
    })?;
    VcsAdapter::new(token).map_err(|e| {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "message": e.to_string()}))).into_response()
    })
}

fn resolve_project(state: &AppState, key: &str) -> Result<(Vec<ProjectConfig>, usize), axum::response::Response> {
    let configs = estate_config::load_all(&state.configs_dir).map_err(|e| {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "message": e.to_string()}))).into_response()
    })?;
    let idx = find_project(&configs, key).map(|_| ()).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "message": format!("Project config not found for key '{key}'")})),
        )
            .into_response()
    });
    idx?;
    let pos = configs.iter().position(|c| c.key().eq_ignore_ascii_case(key)).unwrap();
    Ok((configs, pos))
}

pub async fn scope(State(state): State<AppState>, Json(body): Json<Value>) -> axum::response::Response {
    let Some(project_key) = project_key_from_body(&body) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "message": "projectKey is required"}))).into_response();
    };
    let vcs = match resolve_vcs(&state) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (configs, idx) = match resolve_project(&state, &project_key) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cfg = &configs[idx];
    let Some(owner) = owner_for(cfg, &state) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "message": "no GitHub owner configured for this project"}))).into_response();
    };
    let repos = code_repos(cfg);
    if repos.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "message": "No services with codeRepo defined for this project"})),
        )
            .into_response();
    }

    let ticket_regex = ticket_regex_from_body(&body);
    let head_ref_override = body.get("headRef").and_then(Value::as_str);
    let baseline_override = body.get("baselineRef").and_then(Value::as_str);
    let baseline_prefix = body.get("baselinePrefix").and_then(Value::as_str).filter(|s| !s.is_empty());

    let mut repos_out = Vec::new();
    let mut all_tickets: BTreeSet<String> = BTreeSet::new();
    let mut total_commits: u64 = 0;
    let mut warnings = Vec::new();

    for repo in repos {
        let (default_branch, patterns, strategy, version_regex) = merged_branching(&cfg.runbooks.branching, repo);
        let head_ref = head_ref_override.unwrap_or(&default_branch).to_string();

        let baseline_ref = if let Some(prefix) = baseline_prefix {
            match latest_branch_with_prefix(&vcs, &owner, repo, prefix) {
                Some(b) => Some(b),
                None => {
                    warnings.push(format!("{repo}: latest branch for prefix '{prefix}' not found"));
                    None
                }
            }
        } else {
            baseline_override.map(str::to_string)
        }
        .or_else(|| pick_release_branch(&vcs, &owner, repo, &patterns, &strategy, version_regex.as_deref()));

        let baseline_exists = baseline_ref.as_deref().is_some_and(|r| vcs.ref_exists(&owner, repo, r).unwrap_or(false));
        let head_exists = vcs.ref_exists(&owner, repo, &head_ref).unwrap_or(false);

        let mut entry = json!({
            "repo": repo,
            "baselineRef": baseline_ref.clone().unwrap_or_default(),
            "headRef": head_ref,
            "baselineExists": baseline_exists,
            "headExists": head_exists,
            "compareUrl": "",
            "commitCount": 0,
            "tickets": Vec::<String>::new(),
        });

        if !(baseline_exists && head_exists) {
            warnings.push(format!(
                "{repo}: baseline/head ref not fully available (baseline={}, head={head_ref})",
                baseline_ref.as_deref().unwrap_or("-")
            ));
            repos_out.push(entry);
            continue;
        }

        let baseline_ref = baseline_ref.unwrap();
        match vcs.compare_refs(&owner, repo, &baseline_ref, &head_ref) {
            Ok(result) => {
                let mut tickets_for_repo = BTreeSet::new();
                for commit in &result.commits {
                    for t in extract_tickets(&ticket_regex, &commit.message) {
                        tickets_for_repo.insert(t.clone());
                        all_tickets.insert(t);
                    }
                }
                total_commits += result.commits.len() as u64;
                entry["commitCount"] = json!(result.commits.len());
                entry["compareUrl"] = json!(result.html_url);
                entry["tickets"] = json!(tickets_for_repo.into_iter().collect::<Vec<_>>());
            }
            Err(e) => warnings.push(format!("{repo}: compare API failed: {e}")),
        }
        repos_out.push(entry);
    }

    Json(json!({
        "status": "ok",
        "projectKey": project_key,
        "baselinePrefix": baseline_prefix.unwrap_or_default(),
        "repos": repos_out,
        "summary": {"uniqueTickets": all_tickets, "totalCommits": total_commits},
        "warnings": warnings,
    }))
    .into_response()
}

pub async fn drift(State(state): State<AppState>, Json(body): Json<Value>) -> axum::response::Response {
    let Some(project_key) = project_key_from_body(&body) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "message": "projectKey is required"}))).into_response();
    };
    let vcs = match resolve_vcs(&state) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (configs, idx) = match resolve_project(&state, &project_key) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cfg = &configs[idx];
    let Some(owner) = owner_for(cfg, &state) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "message": "no GitHub owner configured for this project"}))).into_response();
    };
    let repos = code_repos(cfg);
    let ticket_regex = ticket_regex_from_body(&body);
    let head_ref_override = body.get("headRef").and_then(Value::as_str);
    let baseline_override = body.get("baselineRef").and_then(Value::as_str);

    let mut repos_out = Vec::new();
    let mut all_tickets: BTreeSet<String> = BTreeSet::new();
    let mut total_drift: u64 = 0;
    let mut warnings = Vec::new();

    for repo in repos {
        let (default_branch, patterns, strategy, version_regex) = merged_branching(&cfg.runbooks.branching, repo);
        let main_ref = head_ref_override.unwrap_or(&default_branch).to_string();
        let release_ref = baseline_override
            .map(str::to_string)
            .or_else(|| pick_release_branch(&vcs, &owner, repo, &patterns, &strategy, version_regex.as_deref()));

        let release_exists = release_ref.as_deref().is_some_and(|r| vcs.ref_exists(&owner, repo, r).unwrap_or(false));
        let main_exists = vcs.ref_exists(&owner, repo, &main_ref).unwrap_or(false);

        let mut entry = json!({
            "repo": repo,
            "releaseRef": release_ref.clone().unwrap_or_default(),
            "mainRef": main_ref,
            "releaseExists": release_exists,
            "mainExists": main_exists,
            "compareUrl": "",
            "commitCount": 0,
            "tickets": Vec::<String>::new(),
            "hasDrift": false,
        });

        if !(release_exists && main_exists) {
            warnings.push(format!(
                "{repo}: release/main ref not fully available (release={}, main={main_ref})",
                release_ref.as_deref().unwrap_or("-")
            ));
            repos_out.push(entry);
            continue;
        }

        let release_ref = release_ref.unwrap();
        match vcs.compare_refs(&owner, repo, &main_ref, &release_ref) {
            Ok(result) => {
                let mut tickets_for_repo = BTreeSet::new();
                for commit in &result.commits {
                    for t in extract_tickets(&ticket_regex, &commit.message) {
                        tickets_for_repo.insert(t.clone());
                        all_tickets.insert(t);
                    }
                }
                total_drift += result.ahead_by;
                entry["hasDrift"] = json!(result.ahead_by > 0);
                entry["commitCount"] = json!(result.ahead_by);
                entry["compareUrl"] = json!(result.html_url);
                entry["tickets"] = json!(tickets_for_repo.into_iter().collect::<Vec<_>>());
            }
            Err(e) => warnings.push(format!("{repo}: compare API failed: {e}")),
        }
        repos_out.push(entry);
    }

    Json(json!({
        "status": "ok",
        "projectKey": project_key,
        "baselineRef": baseline_override.unwrap_or_default(),
        "repos": repos_out,
        "summary": {"uniqueTickets": all_tickets, "totalDriftCommits": total_drift},
        "warnings": warnings,
    }))
    .into_response()
}

pub async fn release_diff(State(state): State<AppState>, Json(body): Json<Value>) -> axum::response::Response {
    let Some(project_key) = project_key_from_body(&body) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "message": "projectKey is required"}))).into_response();
    };
    let (Some(ref_a), Some(ref_b)) = (
        body.get("releaseRefA").and_then(Value::as_str).filter(|s| !s.is_empty()),
        body.get("releaseRefB").and_then(Value::as_str).filter(|s| !s.is_empty()),
    ) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "message": "releaseRefA (older) and releaseRefB (newer) are required"})),
        )
            .into_response();
    };
    let vcs = match resolve_vcs(&state) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (configs, idx) = match resolve_project(&state, &project_key) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cfg = &configs[idx];
    let Some(owner) = owner_for(cfg, &state) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "message": "no GitHub owner configured for this project"}))).into_response();
    };
    let repos = code_repos(cfg);
    let ticket_regex = ticket_regex_from_body(&body);

    let mut repos_out = Vec::new();
    let mut all_added_tickets: BTreeSet<String> = BTreeSet::new();
    let mut total_added: u64 = 0;
    let mut warnings = Vec::new();

    for repo in repos {
        let a_exists = vcs.ref_exists(&owner, repo, ref_a).unwrap_or(false);
        let b_exists = vcs.ref_exists(&owner, repo, ref_b).unwrap_or(false);
        if !(a_exists && b_exists) {
            warnings.push(format!("{repo}: refs not fully available (A={ref_a} exists={a_exists}, B={ref_b} exists={b_exists})"));
            repos_out.push(json!({
                "repo": repo, "releaseA": ref_a, "releaseB": ref_b, "refsAvailable": false,
                "added": {"commitCount": 0, "tickets": Vec::<String>::new(), "prs": Vec::<String>::new(), "compareUrl": ""},
            }));
            continue;
        }

        match vcs.compare_refs(&owner, repo, ref_a, ref_b) {
            Ok(result) => {
                let mut added_tickets = BTreeSet::new();
                let mut added_prs: BTreeSet<String> = BTreeSet::new();
                for commit in &result.commits {
                    for t in extract_tickets(&ticket_regex, &commit.message) {
                        added_tickets.insert(t.clone());
                        all_added_tickets.insert(t);
                    }
                    for pr in extract_prs(&commit.message) {
                        added_prs.insert(pr);
                    }
                }
                total_added += result.ahead_by;
                repos_out.push(json!({
                    "repo": repo, "releaseA": ref_a, "releaseB": ref_b, "refsAvailable": true,
                    "added": {
                        "commitCount": result.ahead_by,
                        "tickets": added_tickets,
                        "prs": added_prs,
                        "compareUrl": result.html_url,
                    },
                }));
            }
            Err(e) => {
                warnings.push(format!("{repo}: compare older...newer failed: {e}"));
                repos_out.push(json!({
                    "repo": repo, "releaseA": ref_a, "releaseB": ref_b, "refsAvailable": true,
                    "added": {"commitCount": 0, "tickets": Vec::<String>::new(), "prs": Vec::<String>::new(), "compareUrl": ""},
                }));
            }
        }
    }

    Json(json!({
        "status": "ok",
        "projectKey": project_key,
        "releaseRefA": ref_a,
        "releaseRefB": ref_b,
        "repos": repos_out,
        "summary": {"addedTickets": all_added_tickets, "totalAdded": total_added},
        "warnings": warnings,
    }))
    .into_response()
}

pub async fn readiness(State(state): State<AppState>, Json(body): Json<Value>) -> axum::response::Response {
    let Some(project_key) = project_key_from_body(&body) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "message": "projectKey is required"}))).into_response();
    };
    let vcs = match resolve_vcs(&state) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (configs, idx) = match resolve_project(&state, &project_key) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cfg = &configs[idx];
    let Some(owner) = owner_for(cfg, &state) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "message": "no GitHub owner configured for this project"}))).into_response();
    };
    let repos = code_repos(cfg);
    let head_ref_override = body.get("headRef").and_then(Value::as_str);
    let baseline_override = body.get("baselineRef").and_then(Value::as_str);

    let mut repos_out = Vec::new();
    let mut overall_status = "ok";

    for repo in repos {
        let (default_branch, patterns, strategy, version_regex) = merged_branching(&cfg.runbooks.branching, repo);
        let head_ref = head_ref_override.unwrap_or(&default_branch).to_string();
        let baseline_ref = baseline_override
            .map(str::to_string)
            .or_else(|| pick_release_branch(&vcs, &owner, repo, &patterns, &strategy, version_regex.as_deref()));

        let baseline_exists = baseline_ref.as_deref().is_some_and(|r| vcs.ref_exists(&owner, repo, r).unwrap_or(false));
        let head_exists = vcs.ref_exists(&owner, repo, &head_ref).unwrap_or(false);

        let mut status = "ok";
        let mut messages = Vec::new();
        match &baseline_ref {
            None => {
                status = "warn";
                messages.push("No baseline release branch could be determined for this repo.".to_string());
            }
            Some(r) if !baseline_exists => {
                status = "warn";
                messages.push(format!("Baseline ref '{r}' does not exist in this repo."));
            }
            _ => {}
        }
        if !head_exists {
            status = "warn";
            messages.push(format!("Head ref '{head_ref}' does not exist in this repo."));
        }
        if baseline_exists && head_exists && is_frontend_repo(repo) && !patterns.iter().any(|p| p.contains("FE") || p.contains("fe")) {
            status = "warn";
            messages.push("Repo looks like FE but releaseBranchPatterns do not contain FE-specific pattern.".to_string());
        }
        if status != "ok" {
            overall_status = "warn";
        }

        repos_out.push(json!({
            "repo": repo,
            "baselineRef": baseline_ref.unwrap_or_default(),
            "headRef": head_ref,
            "baselineExists": baseline_exists,
            "headExists": head_exists,
            "status": status,
            "messages": messages,
        }));
    }

    Json(json!({
        "status": overall_status,
        "projectKey": project_key,
        "baselineRef": baseline_override.unwrap_or_default(),
        "repos": repos_out,
        "warnings": Vec::<String>::new(),
    }))
    .into_response()
}

pub async fn latest_branches(State(state): State<AppState>, Json(body): Json<Value>) -> axum::response::Response {
    let Some(project_key) = project_key_from_body(&body) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "message": "projectKey is required"}))).into_response();
    };
    let prefix = body.get("prefix").and_then(Value::as_str).filter(|s| !s.is_empty()).unwrap_or("release").to_string();
    let vcs = match resolve_vcs(&state) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (configs, idx) = match resolve_project(&state, &project_key) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cfg = &configs[idx];
    let Some(owner) = owner_for(cfg, &state) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "message": "no GitHub owner configured for this project"}))).into_response();
    };
    let repos = code_repos(cfg);

    let mut repos_out = Vec::new();
    let mut warnings = Vec::new();
    for repo in repos {
        match latest_branch_with_prefix(&vcs, &owner, repo, &prefix) {
            Some(branch) => repos_out.push(json!({"repo": repo, "branch": branch})),
            None => {
                warnings.push(format!("{repo}: no branch found matching prefix '{prefix}'"));
                repos_out.push(json!({"repo": repo, "branch": ""}));
            }
        }
    }

    Json(json!({
        "status": "ok",
        "projectKey": project_key,
        "prefix": prefix,
        "repos": repos_out,
        "warnings": warnings,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_matches_fe_pattern_filters_by_repo_type() {
        assert!(branch_matches("release/FE.1.2", r"release/BE\.\d+\.\d+|release/FE\.\d+\.\d+", true));
        assert!(!branch_matches("release/FE.1.2", r"release/BE\.\d+\.\d+|release/FE\.\d+\.\d+", false));
    }

    #[test]
    fn branch_matches_glob_prefix() {
        assert!(branch_matches("release/2026.01.01", "release/*", false));
        assert!(!branch_matches("feature/x", "release/*", false));
    }

    #[test]
    fn extract_semver_parses_dotted_version() {
        assert_eq!(extract_semver("release/1.2.3", None), (1, 2, 3));
        assert_eq!(extract_semver("release/BE.1.31", None), (1, 31, 0));
    }

    #[test]
    fn version_sort_key_orders_numerically_not_lexically() {
        assert!(version_sort_key("9.0.0") < version_sort_key("10.0.0"));
    }

    #[test]
    fn extract_prs_dedups_and_sorts_numerically() {
        assert_eq!(extract_prs("Merge pull request #123, also (#45) and #123 again"), vec!["#45", "#123"]);
    }

    #[test]
    fn merged_branching_falls_back_to_auto_detected_patterns() {
        let cfg = BranchingConfig::default();
        let (default_branch, patterns, _, _) = merged_branching(&cfg, "acme/web");
        assert_eq!(default_branch, "main");
        assert!(!patterns.is_empty());
    }
}
