//! The Snapshot output document (spec §3, §4.9, §6 `data/latest.json`): the
//! single artifact one pipeline run produces.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assembled::Project;
use crate::ticket::Ticket;
use crate::warning::{GlobalAlert, Warning};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilityEnvSummary {
    pub env_key: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pods: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_rate_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsEntry {
    pub ts: DateTime<Utc>,
    pub title: String,
    pub msg: String,
    pub level: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// `observability{summary[],warnings[],news[]}` (spec §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilitySection {
    #[serde(default)]
    pub summary: Vec<ObservabilityEnvSummary>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    #[serde(default)]
    pub news: Vec<NewsEntry>,
}

/// One entry of `integrations{vcs,ci,monitoring,tracker}` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStatus {
    pub enabled: bool,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fetch: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<String>,
}

impl IntegrationStatus {
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self { enabled: false, connected: false, reason: Some(reason.into()), last_fetch: None, coverage: None }
    }

    pub fn connected(coverage: impl Into<String>, last_fetch: DateTime<Utc>) -> Self {
        Self {
            enabled: true,
            connected: true,
            reason: None,
            last_fetch: Some(last_fetch),
            coverage: Some(coverage.into()),
        }
    }

    pub fn down(reason: impl Into<String>) -> Self {
        Self { enabled: true, connected: false, reason: Some(reason.into()), last_fetch: None, coverage: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationsSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcs: Option<IntegrationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci: Option<IntegrationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<IntegrationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker: Option<IntegrationStatus>,
}

/// The Snapshot output document (spec §3): `{generatedAt, source:"snapshot",
/// projects[], ticketIndex{}, warnings[], observability{}, integrations{},
/// globalAlerts[]?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub ticket_index: HashMap<String, Ticket>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    #[serde(default)]
    pub observability: ObservabilitySection,
    #[serde(default)]
    pub integrations: IntegrationsSection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_alerts: Vec<GlobalAlert>,
}

impl Snapshot {
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            source: "snapshot".to_string(),
            projects: Vec::new(),
            ticket_index: HashMap::new(),
            warnings: Vec::new(),
            observability: ObservabilitySection::default(),
            integrations: IntegrationsSection::default(),
            global_alerts: Vec::new(),
        }
    }

    /// Archive file stem (spec §4.9): `generatedAt` with `:` and `.`
    /// replaced by `-`.
    pub fn archive_stem(&self) -> String {
        self.generated_at.to_rfc3339().replace([':', '.'], "-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_stem_replaces_colons_and_dots() {
        let at: DateTime<Utc> = "2026-01-19T12:30:00.500Z".parse().unwrap();
        let snapshot = Snapshot::new(at);
        assert!(!snapshot.archive_stem().contains(':'));
        assert!(!snapshot.archive_stem().contains('.'));
    }

    #[test]
    fn round_trips_through_json() {
        let at: DateTime<Utc> = "2026-01-19T12:30:00Z".parse().unwrap();
        let snapshot = Snapshot::new(at);
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.source, "snapshot");
        assert_eq!(parsed.generated_at, at);
    }
}
