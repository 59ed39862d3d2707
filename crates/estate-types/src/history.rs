//! History index document shape (spec §3, §4.8).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionInfo {
    pub days: u32,
    #[serde(default)]
    pub last_cleanup: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_events: u64,
    #[serde(default)]
    pub oldest_event: Option<DateTime<Utc>>,
    #[serde(default)]
    pub newest_event: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProjectHistorySummary {
    pub event_count: u64,
    #[serde(default)]
    pub first_event_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub environments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryIndex {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub retention: RetentionInfo,
    pub stats: HistoryStats,
    pub projects: HashMap<String, ProjectHistorySummary>,
}

impl HistoryIndex {
    pub fn empty(retention_days: u32) -> Self {
        Self {
            version: 1,
            generated_at: Utc::now(),
            retention: RetentionInfo {
                days: retention_days,
                last_cleanup: None,
            },
            stats: HistoryStats::default(),
            projects: HashMap::new(),
        }
    }
}
