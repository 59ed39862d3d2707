//! Ticket index entities: pull requests, time-aware attachments, timeline
//! and env-presence tracking (spec §3, §4.6, §4.7).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// Normalize a git ref: strip `refs/heads/`, `origin/`, `heads/` prefixes
/// (spec §3).
pub fn normalize_ref(raw: &str) -> String {
    let mut s = raw.trim();
    for prefix in ["refs/heads/", "origin/", "heads/"] {
        if let Some(stripped) = s.strip_prefix(prefix) {
            s = stripped;
        }
    }
    s.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub merged_at: DateTime<Utc>,
    pub author: String,
    pub base_ref: String,
    pub head_ref: String,
    pub merge_sha: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl PullRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: impl Into<String>,
        number: u64,
        title: impl Into<String>,
        url: impl Into<String>,
        merged_at: DateTime<Utc>,
        author: impl Into<String>,
        base_ref: impl Into<String>,
        head_ref: impl Into<String>,
        merge_sha: Option<String>,
        body: Option<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            number,
            title: title.into(),
            url: url.into(),
            merged_at,
            author: author.into(),
            base_ref: normalize_ref(&base_ref.into()),
            head_ref: normalize_ref(&head_ref.into()),
            merge_sha,
            body,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerInfo {
    pub summary: String,
    pub status: String,
    pub assignee: Option<String>,
    pub fix_versions: Vec<String>,
    pub url: String,
    pub project: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub source: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Heuristic,
    Inferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvPresenceMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub confidence: Confidence,
    pub source: String,
    pub inferred: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeAwareBranch {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub repo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeAwareBuild {
    pub build_number: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub repo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeAwareDeployment {
    pub env_key: String,
    pub component: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub kind: String,
    pub label: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub time_aware: bool,
    #[serde(default)]
    pub from_history: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub key: String,
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub prs: Vec<PullRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
    #[serde(default)]
    pub env_presence: HashMap<String, bool>,
    #[serde(default)]
    pub env_presence_meta: HashMap<String, EnvPresenceMeta>,
    #[serde(default)]
    pub time_aware_branches: Vec<TimeAwareBranch>,
    #[serde(default)]
    pub time_aware_builds: Vec<TimeAwareBuild>,
    #[serde(default)]
    pub time_aware_deployments: Vec<TimeAwareDeployment>,
    #[serde(default)]
    pub tracker: Option<TrackerInfo>,
    // Flattened convenience fields mirrored from `tracker` for UI ease
    // (spec §4.6 "flatten summary/status/url to top-level").
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Ticket {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            repos: Vec::new(),
            prs: Vec::new(),
            evidence: Vec::new(),
            timeline: Vec::new(),
            env_presence: Stage::ALL.iter().map(|s| (s.as_str().to_string(), false)).collect(),
            env_presence_meta: HashMap::new(),
            time_aware_branches: Vec::new(),
            time_aware_builds: Vec::new(),
            time_aware_deployments: Vec::new(),
            tracker: None,
            summary: None,
            status: None,
            url: None,
        }
    }

    pub fn attach_tracker(&mut self, info: TrackerInfo) {
        self.summary = Some(info.summary.clone());
        self.status = Some(info.status.clone());
        self.url = Some(info.url.clone());
        self.tracker = Some(info);
    }

    /// Persistence floor (spec §4.7, §8): once true, a stage never goes
    /// back to false from this setter.
    pub fn set_env_present(&mut self, stage: Stage, meta: EnvPresenceMeta) {
        let key = stage.as_str().to_string();
        let already_true = self.env_presence.get(&key).copied().unwrap_or(false);
        if already_true {
            // current run still wins for the descriptive fields unless it
            // didn't set anything this run -- callers only invoke this when
            // they have a fresh observation, so always refresh metadata.
        }
        self.env_presence.insert(key.clone(), true);
        self.env_presence_meta.insert(key, meta);
    }

    /// Carry forward a prior snapshot's `true` presence when the current
    /// run did not independently establish it (spec §4.7 persistence
    /// floor).
    pub fn carry_forward_presence(&mut self, stage: Stage, prev_meta: Option<EnvPresenceMeta>) {
        let key = stage.as_str().to_string();
        let current_true = self.env_presence.get(&key).copied().unwrap_or(false);
        if !current_true {
            self.env_presence.insert(key.clone(), true);
            let mut meta = prev_meta.unwrap_or(EnvPresenceMeta {
                when: None,
                tag: None,
                branch: None,
                confidence: Confidence::Inferred,
                source: "persisted_prev_snapshot".to_string(),
                inferred: true,
            });
            meta.source = "persisted_prev_snapshot".to_string();
            self.env_presence_meta.insert(key, meta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_ref_strips_known_prefixes() {
        assert_eq!(normalize_ref("refs/heads/main"), "main");
        assert_eq!(normalize_ref("origin/release/1.2"), "release/1.2");
        assert_eq!(normalize_ref("heads/feature-x"), "feature-x");
        assert_eq!(normalize_ref("main"), "main");
    }

    #[test]
    fn persistence_floor_never_unsets_true() {
        let mut t = Ticket::new("ABC-1");
        t.set_env_present(
            Stage::Qa,
            EnvPresenceMeta {
                when: None,
                tag: None,
                branch: None,
                confidence: Confidence::High,
                source: "time_aware".to_string(),
                inferred: false,
            },
        );
        assert!(t.env_presence[&Stage::Qa.as_str().to_string()]);

        // A later snapshot that doesn't re-establish QA still can't unset it;
        // carry_forward only adds, doesn't override when already true.
        t.carry_forward_presence(Stage::Qa, None);
        assert!(t.env_presence[&Stage::Qa.as_str().to_string()]);
        assert_eq!(
            t.env_presence_meta[&Stage::Qa.as_str().to_string()].source,
            "time_aware"
        );
    }

    #[test]
    fn carry_forward_sets_absent_stage_with_persisted_source() {
        let mut t = Ticket::new("ABC-1");
        t.carry_forward_presence(Stage::Prod, None);
        assert!(t.env_presence[&Stage::Prod.as_str().to_string()]);
        assert_eq!(
            t.env_presence_meta[&Stage::Prod.as_str().to_string()].source,
            "persisted_prev_snapshot"
        );
    }
}
