//! Config Loader (spec §2 item 1, §6 "`configs/` directory layout"). Reads
//! one `ProjectConfig` YAML file per project from a directory, in sorted
//! file-name order (spec §5's ordering guarantee for `Snapshot.projects[]`
//! starts here).

use std::fs;
use std::path::Path;

use estate_types::{EstateError, ProjectConfig};

/// Load every `*.yaml`/`*.yml` file directly under `dir`, sorted by file
/// name, validating each as it's parsed. A missing directory, invalid YAML,
/// or a `ProjectConfig` that fails [`ProjectConfig::validate`] is a fatal
/// `EstateError::Config` (spec §6, §7).
pub fn load_all(dir: &Path) -> Result<Vec<ProjectConfig>, EstateError> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| EstateError::Config(format!("cannot read configs directory {}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| is_yaml(&entry.path()))
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    let mut configs = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = entry.path();
        configs.push(load_one(&path)?);
    }
    Ok(configs)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Parse and validate a single project config file.
pub fn load_one(path: &Path) -> Result<ProjectConfig, EstateError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| EstateError::Config(format!("cannot read {}: {e}", path.display())))?;
    let config: ProjectConfig = serde_yaml::from_str(&raw)
        .map_err(|e| EstateError::Config(format!("invalid YAML in {}: {e}", path.display())))?;
    config
        .validate()
        .map_err(|e| EstateError::Config(format!("{}: {e}", path.display())))?;
    tracing::debug!(project = config.key(), path = %path.display(), "loaded project config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const VALID: &str = r#"
project:
  key: acme
  name: Acme
environments:
  - key: qa
    name: QA
services:
  - key: web
    codeRepo: acme/web
    infraRepo: acme/web-infra
"#;

    #[test]
    fn loads_files_in_sorted_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b-proj.yaml"), VALID.replace("acme", "bravo")).unwrap();
        fs::write(dir.path().join("a-proj.yaml"), VALID.replace("acme", "alpha")).unwrap();

        let configs = load_all(dir.path()).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].key(), "alpha");
        assert_eq!(configs[1].key(), "bravo");
    }

    #[test]
    fn ignores_non_yaml_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("proj.yaml"), VALID).unwrap();
        fs::write(dir.path().join("README.md"), "not a config").unwrap();

        let configs = load_all(dir.path()).unwrap();
        assert_eq!(configs.len(), 1);
    }

    #[test]
    fn missing_directory_is_fatal_config_error() {
        let missing = Path::new("/nonexistent/estate-config-test-dir");
        let err = load_all(missing).unwrap_err();
        assert!(matches!(err, EstateError::Config(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn invalid_yaml_is_fatal_config_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.yaml"), ": : not yaml").unwrap();
        let err = load_all(dir.path()).unwrap_err();
        assert!(matches!(err, EstateError::Config(_)));
    }

    #[test]
    fn missing_infra_repo_is_fatal_config_error() {
        let dir = TempDir::new().unwrap();
        let bad = VALID.replace("infraRepo: acme/web-infra", "infraRepo: \"\"");
        fs::write(dir.path().join("proj.yaml"), bad).unwrap();
        let err = load_all(dir.path()).unwrap_err();
        assert!(matches!(err, EstateError::Config(_)));
    }
}
