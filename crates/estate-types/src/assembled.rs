//! The assembled runtime shape: [`Component`], [`Environment`], [`Project`]
//! (spec §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::warning::Warning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentStatus {
    Healthy,
    Warn,
}

/// One deployable unit in one environment of one project (glossary).
/// Always present for each attempted `(env, service)` pair; on failure it
/// degrades to a placeholder carrying `warnings[]` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub service_key: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub build_number: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub branch_url: Option<String>,
    #[serde(default)]
    pub build_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub build_finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub deployer: Option<String>,
    #[serde(default)]
    pub deployer_commit_url: Option<String>,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub infra_repo: Option<String>,
    #[serde(default)]
    pub infra_repo_url: Option<String>,
    #[serde(default)]
    pub kustomization_url: Option<String>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    #[serde(default)]
    pub argo_app: Option<String>,
    #[serde(default)]
    pub argo_app_url: Option<String>,
    #[serde(default)]
    pub argo_health: Option<String>,
    #[serde(default)]
    pub argo_sync: Option<String>,
}

impl Component {
    /// A placeholder Component for a `(env, service)` pair that failed to
    /// assemble, carrying the warning that explains why (spec §4.4 steps
    /// 2-3).
    pub fn placeholder(service_key: impl Into<String>, warning: Warning) -> Self {
        Self {
            service_key: service_key.into(),
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
            warnings: vec![warning],
            argo_app: None,
            argo_app_url: None,
            argo_health: None,
            argo_sync: None,
        }
    }
}

/// Per-environment assembled view (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub env_key: String,
    pub display_name: String,
    pub status: EnvironmentStatus,
    #[serde(default)]
    pub argo_status: String,
    #[serde(default)]
    pub health: Option<serde_json::Value>,
    #[serde(default)]
    pub last_deploy: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deployer: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    pub components: Vec<Component>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

impl Environment {
    /// Environment status is `warn` if any component has warnings, else
    /// `healthy` (spec §4.4).
    pub fn derive_status(&self) -> EnvironmentStatus {
        if self.components.iter().any(|c| !c.warnings.is_empty()) {
            EnvironmentStatus::Warn
        } else {
            EnvironmentStatus::Healthy
        }
    }

    /// Environment-level `lastDeploy`/`build`/`deployer` are chosen from the
    /// component with the newest `deployedAt` (else newest
    /// `buildFinishedAt`) (spec §4.4).
    pub fn derive_headline(&self) -> (Option<DateTime<Utc>>, Option<String>, Option<String>) {
        let newest = self
            .components
            .iter()
            .filter(|c| c.deployed_at.is_some())
            .max_by_key(|c| c.deployed_at)
            .or_else(|| {
                self.components
                    .iter()
                    .filter(|c| c.build_finished_at.is_some())
                    .max_by_key(|c| c.build_finished_at)
            });

        match newest {
            Some(c) => (
                c.deployed_at.or(c.build_finished_at),
                c.build_number.clone(),
                c.deployer.clone(),
            ),
            None => (None, None, None),
        }
    }
}

/// Per-project assembled view (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub key: String,
    pub display_name: String,
    pub generated_at: DateTime<Utc>,
    pub environments: Vec<Environment>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn component_with(deployed_at: Option<DateTime<Utc>>, build_finished_at: Option<DateTime<Utc>>) -> Component {
        Component {
            build_finished_at,
            deployed_at,
            build_number: Some("1".to_string()),
            deployer: Some("alice".to_string()),
            ..Component::placeholder("svc", Warning::new(crate::warning::WarningLevel::Info, "component", "x", "test", "x"))
        }
    }

    #[test]
    fn headline_prefers_newest_deployed_at() {
        let now = Utc::now();
        let env = Environment {
            env_key: "qa".into(),
            display_name: "QA".into(),
            status: EnvironmentStatus::Healthy,
            argo_status: String::new(),
            health: None,
            last_deploy: None,
            deployer: None,
            build: None,
            warnings: vec![],
            components: vec![
                component_with(Some(now - Duration::days(1)), None),
                component_with(Some(now), None),
            ],
        };
        let (when, _, _) = env.derive_headline();
        assert_eq!(when, Some(now));
    }

    #[test]
    fn status_is_warn_when_any_component_warns() {
        let warned = Component::placeholder(
            "svc",
            Warning::new(crate::warning::WarningLevel::Warn, "component", "NO_KUSTOMIZATION", "test", "x"),
        );
        let env = Environment {
            env_key: "qa".into(),
            display_name: "QA".into(),
            status: EnvironmentStatus::Healthy,
            argo_status: String::new(),
            health: None,
            last_deploy: None,
            deployer: None,
            build: None,
            warnings: vec![],
            components: vec![warned],
        };
        assert_eq!(env.derive_status(), EnvironmentStatus::Warn);
    }
}
