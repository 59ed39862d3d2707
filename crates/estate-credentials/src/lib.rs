//! Environment-variable credential resolution for the four upstream
//! integrations (spec §6). Generalizes `shipper-auth`'s
//! candidate-chain pattern (`resolve_token`: try several env vars in order,
//! first non-empty wins) from a single registry token to the five
//! credential groups this pipeline needs.

use std::env;

use estate_sanitizer::mask;

/// Which upstream a credential belongs to, used only for diagnostic
/// messages (spec §7 `CredentialMissing`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Vcs,
    Ci,
    Tracker,
    Monitoring,
    ArgoCd,
}

impl Upstream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Upstream::Vcs => "vcs",
            Upstream::Ci => "ci",
            Upstream::Tracker => "tracker",
            Upstream::Monitoring => "monitoring",
            Upstream::ArgoCd => "argocd",
        }
    }
}

/// Resolve the first non-empty environment variable among `names`, trimmed
/// (spec §6: "all trimmed; first non-empty wins where multiple names are
/// listed").
pub fn first_non_empty(names: &[&str]) -> Option<String> {
    for name in names {
        if let Ok(raw) = env::var(name) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

#[derive(Debug, Clone, Default)]
pub struct VcsCredentials {
    pub token: Option<String>,
    pub org: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CiCredentials {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackerCredentials {
    pub base_url: Option<String>,
    pub email: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MonitoringCredentials {
    pub site: Option<String>,
    pub api_key: Option<String>,
    pub app_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ArgoCdCredentials {
    pub default_token: Option<String>,
}

impl ArgoCdCredentials {
    /// `ARGOCD_TOKEN_<STAGE>` overriding `ARGOCD_TOKEN` for a specific
    /// canonical stage (spec §6).
    pub fn token_for_stage(&self, stage: &str) -> Option<String> {
        first_non_empty(&[&format!("ARGOCD_TOKEN_{}", stage.to_uppercase())])
            .or_else(|| self.default_token.clone())
    }
}

/// All resolved credentials for one pipeline run, plus the non-credential
/// env-driven knobs §6 lists alongside them.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub vcs: VcsCredentials,
    pub ci: CiCredentials,
    pub tracker: TrackerCredentials,
    pub monitoring: MonitoringCredentials,
    pub argocd: ArgoCdCredentials,
}

impl Credentials {
    /// Resolve every credential group from the process environment, per the
    /// exact variable-name chains in spec §6.
    pub fn from_env() -> Self {
        Self {
            vcs: VcsCredentials {
                token: first_non_empty(&["GITHUB_TOKEN"]),
                org: first_non_empty(&["GITHUB_ORG"]),
            },
            ci: CiCredentials {
                base_url: first_non_empty(&["TEAMCITY_URL", "TEAMCITY_API"]),
                token: first_non_empty(&["TEAMCITY_TOKEN"]),
            },
            tracker: TrackerCredentials {
                base_url: first_non_empty(&["JIRA_BASE", "JIRA_URL"]),
                email: first_non_empty(&["JIRA_EMAIL"]),
                token: first_non_empty(&["JIRA_API_TOKEN", "JIRA_TOKEN"]),
            },
            monitoring: MonitoringCredentials {
                site: first_non_empty(&["DATADOG_SITE", "DD_SITE"]),
                api_key: first_non_empty(&["DATADOG_API_KEY", "DD_API_KEY"]),
                app_key: first_non_empty(&[
                    "DATADOG_APP_KEY",
                    "DATADOG_APPLICATION_KEY",
                    "DD_APP_KEY",
                    "DD_APPLICATION_KEY",
                ]),
            },
            argocd: ArgoCdCredentials {
                default_token: first_non_empty(&["ARGOCD_TOKEN"]),
            },
        }
    }

    /// VCS token is the one credential the pipeline treats as fatal when
    /// missing (spec §7 `CredentialMissing`, fatal for VCS).
    pub fn require_vcs_token(&self) -> Result<&str, String> {
        self.vcs
            .token
            .as_deref()
            .ok_or_else(|| "missing credential: GITHUB_TOKEN".to_string())
    }

    pub fn ci_enabled(&self) -> bool {
        self.ci.base_url.is_some() && self.ci.token.is_some()
    }

    pub fn tracker_enabled(&self) -> bool {
        self.tracker.base_url.is_some() && self.tracker.token.is_some()
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.api_key.is_some() && self.monitoring.app_key.is_some()
    }
}

/// Render a credential for a diagnostic log line/warning message, never the
/// raw value (spec §5: "never logged, never persisted").
pub fn masked(value: &str) -> String {
    mask(value)
}

/// `TICKET_TRACKER_DAYS`, `RELEASE_HISTORY_RETENTION_DAYS` etc. are plain
/// integers with a default; parse-or-default is the shared shape.
pub fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// `TICKET_HISTORY_TIME_AWARE`-style booleans: `1/true/yes/on` (spec §6),
/// case-insensitive.
pub fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn first_non_empty_trims_and_skips_blank() {
        temp_env::with_vars(
            [("ESTATE_TEST_A", Some("  ")), ("ESTATE_TEST_B", Some(" value "))],
            || {
                assert_eq!(
                    first_non_empty(&["ESTATE_TEST_A", "ESTATE_TEST_B"]),
                    Some("value".to_string())
                );
            },
        );
    }

    #[test]
    #[serial]
    fn vcs_credentials_from_env() {
        temp_env::with_vars(
            [("GITHUB_TOKEN", Some("ghp_xxx")), ("GITHUB_ORG", Some("acme"))],
            || {
                let creds = Credentials::from_env();
                assert_eq!(creds.vcs.token, Some("ghp_xxx".to_string()));
                assert_eq!(creds.require_vcs_token().unwrap(), "ghp_xxx");
            },
        );
    }

    #[test]
    #[serial]
    fn missing_vcs_token_is_an_error() {
        temp_env::with_var("GITHUB_TOKEN", None::<&str>, || {
            let creds = Credentials::from_env();
            assert!(creds.require_vcs_token().is_err());
        });
    }

    #[test]
    #[serial]
    fn ci_url_chain_prefers_teamcity_url() {
        temp_env::with_vars(
            [("TEAMCITY_URL", Some("https://ci.example.com")), ("TEAMCITY_API", Some("https://other"))],
            || {
                let creds = Credentials::from_env();
                assert_eq!(creds.ci.base_url, Some("https://ci.example.com".to_string()));
            },
        );
    }

    #[test]
    #[serial]
    fn env_u32_defaults_when_unset() {
        temp_env::with_var("ESTATE_TEST_DAYS", None::<&str>, || {
            assert_eq!(env_u32("ESTATE_TEST_DAYS", 120), 120);
        });
    }

    #[test]
    #[serial]
    fn env_bool_accepts_known_truthy_forms() {
        for v in ["1", "true", "YES", "On"] {
            temp_env::with_var("ESTATE_TEST_FLAG", Some(v), || {
                assert!(env_bool("ESTATE_TEST_FLAG", false));
            });
        }
    }

    #[test]
    fn masked_delegates_to_sanitizer() {
        assert_eq!(masked("abcdefghijkl"), "abcd****ijkl");
    }
}
