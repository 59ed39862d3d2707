//! Parsed project configuration (spec §3, §6). One YAML file per project is
//! deserialized directly into [`ProjectConfig`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::stage::normalize_env_key;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIdentity {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub github_owner: String,
    #[serde(default)]
    pub infra_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    pub key: String,
    pub name: String,
}

impl EnvironmentConfig {
    /// Normalized env key (spec §3: trimmed, lowercased, empty => absent).
    pub fn normalized_key(&self) -> Option<String> {
        normalize_env_key(&self.key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub key: String,
    pub code_repo: String,
    pub infra_repo: String,
    #[serde(default)]
    pub infra_ref: Option<String>,
    #[serde(default)]
    pub teamcity_build_type_id: Option<String>,
    #[serde(default)]
    pub envs: Vec<String>,
    #[serde(default)]
    pub argo_app: Option<String>,
}

impl ServiceConfig {
    /// Whether this service applies to the given env key (empty `envs`
    /// means "all environments").
    pub fn applies_to_env(&self, env_key: &str) -> bool {
        self.envs.is_empty() || self.envs.iter().any(|e| e == env_key)
    }

    /// Resolve the infra ref: service override -> project default -> "main"
    /// (spec §4.4 step 1).
    pub fn resolve_infra_ref(&self, project_default: Option<&str>) -> String {
        self.infra_ref
            .clone()
            .or_else(|| project_default.map(|s| s.to_string()))
            .unwrap_or_else(|| "main".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnvSelector {
    pub namespace: String,
    #[serde(default)]
    pub cluster: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComponentSelector {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub kube_deployment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DatadogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub window_minutes: Option<u32>,
    #[serde(default)]
    pub env_selectors: HashMap<String, EnvSelector>,
    #[serde(default)]
    pub component_selectors: HashMap<String, HashMap<String, ComponentSelector>>,
    #[serde(default)]
    pub env_map: HashMap<String, String>,
    #[serde(default)]
    pub tag_candidates: Vec<String>,
    #[serde(default)]
    pub base_tags: Vec<String>,
    #[serde(default)]
    pub queries: HashMap<String, String>,
    #[serde(default)]
    pub thresholds: HashMap<String, (f64, f64)>,
}

impl DatadogConfig {
    /// Default candidate tag names when `tagCandidates` is unset (spec
    /// §4.5): `env`, `environment`, `kube_namespace`, `kubernetes_namespace`.
    pub fn effective_tag_candidates(&self) -> Vec<String> {
        if self.tag_candidates.is_empty() {
            vec![
                "env".to_string(),
                "environment".to_string(),
                "kube_namespace".to_string(),
                "kubernetes_namespace".to_string(),
            ]
        } else {
            self.tag_candidates.clone()
        }
    }

    pub fn status_window_minutes(&self) -> u32 {
        self.window_minutes.unwrap_or(5)
    }

    pub fn observability_window_minutes(&self) -> u32 {
        self.window_minutes.unwrap_or(10)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArgoConfig {
    #[serde(default)]
    pub env_hosts: HashMap<String, String>,
    #[serde(default)]
    pub dev_host_envs: Vec<String>,
    #[serde(default)]
    pub app_name_rules: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GithubConfig {
    #[serde(default)]
    pub ticket_regex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReleaseBranchPickStrategy {
    Semver,
    Recent,
}

impl Default for ReleaseBranchPickStrategy {
    fn default() -> Self {
        ReleaseBranchPickStrategy::Recent
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepoOverride {
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub release_branch_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchingConfig {
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub release_branch_patterns: Vec<String>,
    #[serde(default)]
    pub release_branch_pick_strategy: ReleaseBranchPickStrategy,
    #[serde(default)]
    pub version_extraction_regex: Option<String>,
    #[serde(default)]
    pub repo_overrides: HashMap<String, RepoOverride>,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for BranchingConfig {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            release_branch_patterns: Vec::new(),
            release_branch_pick_strategy: ReleaseBranchPickStrategy::default(),
            version_extraction_regex: None,
            repo_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunbooksConfig {
    #[serde(default)]
    pub branching: BranchingConfig,
}

/// The full contents of one `configs/*.yaml` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: ProjectIdentity,
    pub environments: Vec<EnvironmentConfig>,
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub datadog: DatadogConfig,
    #[serde(default)]
    pub argocd: ArgoConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub runbooks: RunbooksConfig,
}

impl ProjectConfig {
    pub fn key(&self) -> &str {
        &self.project.key
    }

    pub fn display_name(&self) -> &str {
        &self.project.name
    }

    pub fn default_infra_ref(&self) -> Option<&str> {
        self.project.infra_ref.as_deref()
    }

    /// Validate the minimal fields that are fatal `ConfigError` conditions
    /// sources: missing `project.key`, missing `service.infraRepo`.
    pub fn validate(&self) -> Result<(), String> {
        if self.project.key.trim().is_empty() {
            return Err("project.key is required".to_string());
        }
        for svc in &self.services {
            if svc.infra_repo.trim().is_empty() {
                return Err(format!(
                    "service '{}' is missing required infraRepo",
                    svc.key
                ));
            }
        }
        Ok(())
    }

    pub fn ticket_regex(&self) -> &str {
        self.github
            .ticket_regex
            .as_deref()
            .unwrap_or(r"\b[A-Z][A-Z0-9]+-\d+\b")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_yaml() {
        let yaml = r#"
project:
  key: acme
  name: Acme
  githubOwner: acme-org
environments:
  - key: qa
    name: QA
services:
  - key: web
    codeRepo: acme/web
    infraRepo: acme/web-infra
"#;
        let cfg: ProjectConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(cfg.key(), "acme");
        assert_eq!(cfg.services.len(), 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_infra_repo() {
        let yaml = r#"
project:
  key: acme
  name: Acme
environments: []
services:
  - key: web
    codeRepo: acme/web
    infraRepo: ""
"#;
        let cfg: ProjectConfig = serde_yaml::from_str(yaml).expect("parse");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_tag_candidates_match_spec() {
        let dd = DatadogConfig::default();
        assert_eq!(
            dd.effective_tag_candidates(),
            vec!["env", "environment", "kube_namespace", "kubernetes_namespace"]
        );
    }
}
