//! Snapshot status/progress/ticket and health routes (spec §4.11).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use estate_types::ProjectConfig;
use estate_vcs::VcsAdapter;
use regex::Regex;
use serde_json::json;

use crate::state::AppState;

const DEFAULT_TICKET_REGEX: &str = r"\b[A-Z][A-Z0-9]+-\d+\b";

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn datadog_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn snapshot_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.status())
}

pub async fn snapshot_progress(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.progress())
}

pub async fn trigger_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    if state.scheduler.trigger_manual() {
        (StatusCode::OK, Json(json!({"success": true, "message": "Snapshot triggered"})))
    } else {
        (StatusCode::CONFLICT, Json(json!({"success": false, "message": "Snapshot already running"})))
    }
}

fn owner_for(cfg: &ProjectConfig, state: &AppState) -> Option<String> {
    if !cfg.project.github_owner.trim().is_empty() {
        return Some(cfg.project.github_owner.clone());
    }
    state.credentials.vcs.org.clone()
}

/// Rebuild a single ticket's entry live from GitHub (spec §4.11 `GET
/// /ticket/{key}`): a best-effort view built the same way the Ticket Index
/// Builder assembles the full snapshot, scoped to one key and a widened
/// lookback window.
pub async fn get_ticket(State(state): State<AppState>, Path(key): Path<String>) -> axum::response::Response {
    let key = key.trim().to_uppercase();
    if key.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "message": "Empty ticket key"}))).into_response();
    }

    let Some(token) = state.credentials.vcs.token.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "key": key,
                "status": "error",
                "message": "GITHUB_TOKEN is missing. Live ticket fetch requires GitHub access.",
            })),
        )
            .into_response();
    };

    let configs = match estate_config::load_all(&state.configs_dir) {
        Ok(c) => c,
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"key": key, "status": "error", "message": e.to_string()})))
                .into_response()
        }
    };

    let vcs = match VcsAdapter::new(token) {
        Ok(v) => v,
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"key": key, "status": "error", "message": e.to_string()})))
                .into_response()
        }
    };

    let mut repos = Vec::new();
    let mut ticket_regex_pattern: Option<String> = None;
    for cfg in &configs {
        if ticket_regex_pattern.is_none() {
            ticket_regex_pattern = Some(cfg.ticket_regex().to_string());
        }
        let Some(owner) = owner_for(cfg, &state) else { continue };
        for repo in cfg.services.iter().map(|s| s.code_repo.as_str()).filter(|r| !r.is_empty()) {
            let full = format!("{owner}/{repo}");
            if !repos.contains(&full) {
                repos.push(full);
            }
        }
    }

    let ticket_regex = Regex::new(ticket_regex_pattern.as_deref().unwrap_or(DEFAULT_TICKET_REGEX))
        .unwrap_or_else(|_| Regex::new(DEFAULT_TICKET_REGEX).unwrap());

    let tickets = estate_tickets::build_index(&vcs, &repos, state.ticket_window_days, state.per_repo_limit, &ticket_regex, &[], &[], None, 0);

    match tickets.get(&key) {
        Some(ticket) => Json(json!({
            "key": key,
            "status": "ok",
            "sources": {
                "jira": ticket.tracker.is_some(),
                "github": !ticket.prs.is_empty(),
                "teamcity": !ticket.evidence.is_empty(),
            },
            "ticket": ticket,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "key": key,
                "status": "not_found",
                "message": format!(
                    "Ticket '{key}' not found in GitHub PR history (last {} days) using current config.",
                    state.ticket_window_days
                ),
            })),
        )
            .into_response(),
    }
}
