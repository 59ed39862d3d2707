//! Deployment/tag-change events persisted in the append-only history stores
//! (spec §3, §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    TagChange,
    Deployment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEvent {
    pub id: String,
    pub kind: EventKind,
    #[serde(default)]
    pub bootstrap: bool,
    pub project_key: String,
    pub env_key: String,
    pub env_name: String,
    pub component: String,
    #[serde(default)]
    pub repo: Option<String>,
    /// The CI-reported branch deployed for this component at `to_tag`
    /// (distinct from `env_name`, the environment's display name) — used
    /// by the correlator's heuristic confidence check against a PR's
    /// `baseRef` (spec §4.7).
    #[serde(default)]
    pub branch: Option<String>,
    pub from_tag: String,
    pub to_tag: String,
    pub from_build: String,
    pub to_build: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default)]
    pub commit_url: Option<String>,
    #[serde(default)]
    pub kustomization_url: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

/// Build the stable composite event id (spec §3): `"{sha}:{project}:{env}:
/// {component}:{toTag}"` when a commit SHA is known, else
/// `"{project}:{env}:{component}:{toTag}:{at}"`. Bootstrap events are
/// additionally prefixed `"bootstrap:"`.
pub fn event_id(
    commit_sha: Option<&str>,
    project_key: &str,
    env_key: &str,
    component: &str,
    to_tag: &str,
    at: DateTime<Utc>,
    bootstrap: bool,
) -> String {
    let base = match commit_sha {
        Some(sha) if !sha.is_empty() => {
            format!("{sha}:{project_key}:{env_key}:{component}:{to_tag}")
        }
        _ => format!(
            "{project_key}:{env_key}:{component}:{to_tag}:{}",
            at.to_rfc3339()
        ),
    };
    if bootstrap {
        format!("bootstrap:{base}")
    } else {
        base
    }
}

/// Dedup signature used alongside `id` (spec §3, §4.8): truncate the
/// timestamp to seconds so sub-second jitter doesn't defeat dedup.
pub fn dedup_signature(
    project_key: &str,
    env_key: &str,
    component: &str,
    from_tag: &str,
    to_tag: &str,
    at: DateTime<Utc>,
) -> String {
    format!(
        "{project_key}:{env_key}:{component}:{from_tag}:{to_tag}:{}",
        at.format("%Y-%m-%dT%H:%M:%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_uses_commit_sha_when_known() {
        let at: DateTime<Utc> = "2026-01-19T12:00:00Z".parse().unwrap();
        let id = event_id(Some("abc"), "P1", "qa", "X", "svc-v0.0.11", at, false);
        assert_eq!(id, "abc:P1:qa:X:svc-v0.0.11");
    }

    #[test]
    fn id_falls_back_to_timestamp_without_sha() {
        let at: DateTime<Utc> = "2026-01-19T12:00:00Z".parse().unwrap();
        let id = event_id(None, "P1", "qa", "X", "svc-v0.0.11", at, false);
        assert_eq!(id, "P1:qa:X:svc-v0.0.11:2026-01-19T12:00:00+00:00");
    }

    #[test]
    fn bootstrap_events_get_prefixed() {
        let at: DateTime<Utc> = "2026-01-19T12:00:00Z".parse().unwrap();
        let id = event_id(Some("abc"), "P1", "qa", "X", "v1", at, true);
        assert!(id.starts_with("bootstrap:"));
    }

    #[test]
    fn dedup_signature_truncates_to_seconds() {
        let at: DateTime<Utc> = "2026-01-19T12:00:00.123456Z".parse().unwrap();
        let sig = dedup_signature("P1", "qa", "X", "a", "b", at);
        assert_eq!(sig, "P1:qa:X:a:b:2026-01-19T12:00:00");
    }
}
