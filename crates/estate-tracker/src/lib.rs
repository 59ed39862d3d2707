//! Jira-compatible issue tracker adapter (spec §4.2, §6 "Jira-compatible
//! REST"). Single-issue enrichment lookups only — the Ticket Index Builder
//! (`estate-tickets`) calls `get_issue` per ticket key up to its bounded
//! enrichment budget (spec §4.6).
//!
//! Same `RegistryClient`-shaped wrapper as `estate-vcs`/`estate-ci`, with
//! HTTP basic auth (email + API token) built via `base64` the way
//! `shipper-auth` encodes its own credential headers.

use base64::Engine;
use estate_http::{HttpClient, RequestSpec};
use estate_types::EstateError;
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://example.atlassian.net";

#[derive(Debug, Clone)]
pub struct TrackerAdapter {
    base_url: String,
    auth_header: String,
    client: HttpClient,
}

#[derive(Debug, Clone)]
pub struct IssueInfo {
    pub summary: String,
    pub status: String,
    pub assignee: Option<String>,
    pub fix_versions: Vec<String>,
    pub project: String,
    pub url: String,
}

#[derive(Deserialize)]
struct IssueResponse {
    fields: IssueFields,
}

#[derive(Deserialize)]
struct IssueFields {
    summary: String,
    status: StatusField,
    #[serde(default)]
    assignee: Option<AssigneeField>,
    #[serde(default, rename = "fixVersions")]
    fix_versions: Vec<FixVersionField>,
    project: ProjectField,
}

#[derive(Deserialize)]
struct StatusField {
    name: String,
}

#[derive(Deserialize)]
struct AssigneeField {
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Deserialize)]
struct FixVersionField {
    name: String,
}

#[derive(Deserialize)]
struct ProjectField {
    key: String,
}

impl TrackerAdapter {
    pub fn new(base_url: impl Into<String>, email: &str, token: &str) -> Result<Self, EstateError> {
        let credentials = format!("{email}:{token}");
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_header: format!("Basic {encoded}"),
            client: HttpClient::new()?,
        })
    }

    fn request(&self, path: &str) -> RequestSpec {
        RequestSpec::get(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth_header.clone())
            .header("Accept", "application/json")
    }

    /// `getIssue(key) → {summary,status,assignee,fixVersions[],project,url}
    /// |NotFound` (spec §4.2). 401/403/404 are swallowed as `None` per
    /// §4.2 "skip silently"; 429 propagates so the caller can break its
    /// enrichment loop (spec §4.2 "429 breaks the enrichment loop").
    pub fn get_issue(&self, key: &str) -> Result<Option<IssueInfo>, EstateError> {
        let spec = self.request(&format!("/rest/api/3/issue/{key}"));
        match self.client.request(&spec) {
            Ok(response) => {
                let body: IssueResponse = response
                    .json()
                    .map_err(|e| EstateError::DataQuality(format!("invalid issue response: {e}")))?;
                Ok(Some(IssueInfo {
                    summary: body.fields.summary,
                    status: body.fields.status.name,
                    assignee: body.fields.assignee.map(|a| a.display_name),
                    fix_versions: body.fields.fix_versions.into_iter().map(|v| v.name).collect(),
                    project: body.fields.project.key,
                    url: format!("{}/browse/{key}", self.base_url),
                }))
            }
            Err(EstateError::NotFound(_)) => Ok(None),
            Err(EstateError::UpstreamAuth { .. }) => Ok(None),
            Err(EstateError::UpstreamRateLimit) => Err(EstateError::UpstreamRateLimit),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> TrackerAdapter {
        TrackerAdapter::new(server.uri(), "user@example.com", "tok").unwrap()
    }

    #[tokio::test]
    async fn get_issue_parses_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/ABC-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "fields": {
                    "summary": "Fix the thing",
                    "status": {"name": "In Progress"},
                    "assignee": {"displayName": "Alice"},
                    "fixVersions": [{"name": "1.2.0"}],
                    "project": {"key": "ABC"}
                }
            })))
            .mount(&server)
            .await;

        let info = adapter(&server).get_issue("ABC-1").unwrap().unwrap();
        assert_eq!(info.summary, "Fix the thing");
        assert_eq!(info.assignee, Some("Alice".to_string()));
        assert_eq!(info.fix_versions, vec!["1.2.0".to_string()]);
    }

    #[tokio::test]
    async fn not_found_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/MISSING-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let info = adapter(&server).get_issue("MISSING-1").unwrap();
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn auth_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/ABC-2"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let info = adapter(&server).get_issue("ABC-2").unwrap();
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn rate_limit_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/ABC-3"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let adapter = adapter(&server);
        let mut spec = adapter.request("/rest/api/3/issue/ABC-3");
        spec.retry.max_retries = 0;
        let err = adapter.client.request(&spec).unwrap_err();
        assert!(matches!(err, EstateError::UpstreamRateLimit));
    }
}
