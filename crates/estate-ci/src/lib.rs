//! TeamCity-compatible CI adapter (spec §4.2, §6 "TeamCity-compatible
//! REST"). Same `RegistryClient`-style shape as `estate-vcs`: one owning
//! struct, one method per endpoint, JSON responses parsed into typed
//! results.

use chrono::{DateTime, Utc};
use estate_http::{HttpClient, RequestSpec};
use estate_types::EstateError;
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://teamcity.example.com";

#[derive(Debug, Clone)]
pub struct CiAdapter {
    base_url: String,
    token: String,
    client: HttpClient,
}

#[derive(Debug, Clone)]
pub struct BuildDetails {
    pub number: String,
    pub status: String,
    pub state: String,
    pub branch_name: Option<String>,
    pub web_url: String,
    pub start_date: Option<DateTime<Utc>>,
    pub finish_date: Option<DateTime<Utc>>,
    pub triggered_by: Option<String>,
}

#[derive(Deserialize)]
struct BuildLocatorResponse {
    id: u64,
}

#[derive(Deserialize)]
struct BuildsListResponse {
    #[serde(default)]
    build: Vec<BuildLocatorResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildDetailsResponse {
    number: String,
    status: String,
    state: String,
    #[serde(default)]
    branch_name: Option<String>,
    web_url: String,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    finish_date: Option<String>,
    #[serde(default)]
    triggered: Option<TriggeredBy>,
}

#[derive(Deserialize)]
struct TriggeredBy {
    #[serde(default)]
    user: Option<TriggeredUser>,
}

#[derive(Deserialize)]
struct TriggeredUser {
    username: String,
}

/// Parse TeamCity's compact `YYYYMMDDThhmmss±hhmm` timestamp into UTC (spec
/// §4.2: "the raw vendor format ... MUST be parsed").
pub fn parse_teamcity_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y%m%dT%H%M%S%z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl CiAdapter {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, EstateError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: HttpClient::new()?,
        })
    }

    fn request(&self, path: &str) -> RequestSpec {
        RequestSpec::get(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json")
    }

    /// `getBuildIdByNumber(buildTypeId, number)` (spec §4.2).
    pub fn get_build_id_by_number(
        &self,
        build_type_id: &str,
        number: &str,
    ) -> Result<Option<u64>, EstateError> {
        let locator = format!("buildType:(id:{build_type_id}),number:{number}");
        let spec = self.request("/app/rest/builds").query("locator", locator);
        match self.client.request(&spec) {
            Ok(response) => {
                let body: BuildsListResponse = response
                    .json()
                    .map_err(|e| EstateError::DataQuality(format!("invalid builds response: {e}")))?;
                Ok(body.build.first().map(|b| b.id))
            }
            Err(EstateError::NotFound(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// `getBuildDetails(id)` (spec §4.2): `startDate`/`finishDate` are
    /// normalized to UTC before returning.
    pub fn get_build_details(&self, id: u64) -> Result<BuildDetails, EstateError> {
        let spec = self.request(&format!("/app/rest/builds/id:{id}"));
        let response = self.client.request(&spec)?;
        let body: BuildDetailsResponse = response
            .json()
            .map_err(|e| EstateError::DataQuality(format!("invalid build details response: {e}")))?;

        Ok(BuildDetails {
            number: body.number,
            status: body.status,
            state: body.state,
            branch_name: body.branch_name,
            web_url: body.web_url,
            start_date: body.start_date.as_deref().and_then(parse_teamcity_timestamp),
            finish_date: body.finish_date.as_deref().and_then(parse_teamcity_timestamp),
            triggered_by: body.triggered.and_then(|t| t.user).map(|u| u.username),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_vendor_compact_timestamp() {
        let parsed = parse_teamcity_timestamp("20260119T120000+0000").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-01-19T12:00:00+00:00");
    }

    #[test]
    fn rejects_malformed_timestamp() {
        assert_eq!(parse_teamcity_timestamp("not-a-date"), None);
    }

    #[tokio::test]
    async fn get_build_id_by_number_returns_first_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app/rest/builds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "build": [{"id": 4242}]
            })))
            .mount(&server)
            .await;

        let adapter = CiAdapter::new(server.uri(), "tok").unwrap();
        let id = adapter.get_build_id_by_number("WebBuild", "112").unwrap();
        assert_eq!(id, Some(4242));
    }

    #[tokio::test]
    async fn get_build_details_normalizes_dates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app/rest/builds/id:4242"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "number": "112",
                "status": "SUCCESS",
                "state": "finished",
                "branchName": "main",
                "webUrl": "https://ci.example.com/build/4242",
                "startDate": "20260119T115000+0000",
                "finishDate": "20260119T120000+0000",
                "triggered": {"user": {"username": "alice"}}
            })))
            .mount(&server)
            .await;

        let adapter = CiAdapter::new(server.uri(), "tok").unwrap();
        let details = adapter.get_build_details(4242).unwrap();
        assert_eq!(details.number, "112");
        assert_eq!(details.triggered_by, Some("alice".to_string()));
        assert!(details.finish_date.unwrap() > details.start_date.unwrap());
    }
}
