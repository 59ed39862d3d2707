//! Normalized warning record (spec §7 `DataQuality`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Info,
    Warn,
    Error,
}

/// Well-known warning/alert reason codes referenced throughout §4 and §7.
/// Adapters and the assembler construct [`Warning`] values with one of
/// these as `reason`, but the field is a plain string so new reasons don't
/// require a type-level change.
pub mod reason {
    pub const NO_KUSTOMIZATION: &str = "NO_KUSTOMIZATION";
    pub const NO_TAG_FOUND: &str = "NO_TAG_FOUND";
    pub const NO_TEAMCITY_BUILDTYPE: &str = "NO_TEAMCITY_BUILDTYPE";
    pub const NO_TEAMCITY: &str = "NO_TEAMCITY";
    pub const NO_BRANCH_INFO: &str = "NO_BRANCH_INFO";
    pub const TEAMCITY_DISABLED: &str = "teamcity-disabled";
    pub const TEAMCITY_DOWN: &str = "teamcity-down";
}

/// A single normalized warning, surfaced either at global, project,
/// environment or component scope (spec §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub level: WarningLevel,
    pub scope: String,
    pub reason: String,
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub ts: DateTime<Utc>,
}

impl Warning {
    pub fn new(level: WarningLevel, scope: impl Into<String>, reason: impl Into<String>, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            scope: scope.into(),
            reason: reason.into(),
            source: source.into(),
            message: message.into(),
            project: None,
            env: None,
            component: None,
            ts: Utc::now(),
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }
}

/// A human-readable global banner, e.g. `teamcity-disabled`,
/// `argocd-disabled-<project>` (spec §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalAlert {
    pub code: String,
    pub message: String,
    pub level: WarningLevel,
    pub ts: DateTime<Utc>,
}

impl GlobalAlert {
    pub fn new(code: impl Into<String>, message: impl Into<String>, level: WarningLevel) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            level,
            ts: Utc::now(),
        }
    }
}
