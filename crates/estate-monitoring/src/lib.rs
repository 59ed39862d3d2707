//! Datadog-compatible monitoring adapter (spec §4.2, §4.5, §6 "Datadog-
//! compatible REST"). Every call here returns the `(value, reason)`
//! sentinel pair named in spec §9 rather than throwing on expected upstream
//! conditions (no data, missing keys, auth failure) — the one adapter where
//! that convention is load-bearing rather than incidental, since the
//! Observability Collector treats `no_data` and `auth_401` as materially
//! different outcomes.

use chrono::Utc;
use estate_http::{HttpClient, Reason, RequestSpec};
use estate_types::EstateError;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct MonitoringAdapter {
    base_url: String,
    api_key: String,
    app_key: String,
    client: HttpClient,
}

#[derive(Debug, Clone)]
pub struct Monitor {
    pub id: u64,
    pub name: String,
    pub tags: Vec<String>,
    pub overall_state: String,
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct ValidateResponse {
    valid: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    series: Vec<Series>,
}

#[derive(Deserialize)]
struct Series {
    #[serde(default)]
    pointlist: Vec<(f64, Option<f64>)>,
}

#[derive(Deserialize)]
struct MonitorApiEntry {
    id: u64,
    name: String,
    #[serde(default)]
    tags: Vec<String>,
    overall_state: String,
    #[serde(default)]
    message: Option<String>,
}

/// `siteBaseUrl(site)` (spec §4.2): `"datadoghq.com" → "https://
/// api.datadoghq.com"`, `"…eu" → "…eu"`, full URLs pass through untouched.
pub fn site_base_url(site: &str) -> String {
    let trimmed = site.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.trim_end_matches('/').to_string();
    }
    format!("https://api.{trimmed}")
}

impl MonitoringAdapter {
    pub fn new(api_key: impl Into<String>, app_key: impl Into<String>, site: &str) -> Result<Self, EstateError> {
        Ok(Self {
            base_url: site_base_url(site),
            api_key: api_key.into(),
            app_key: app_key.into(),
            client: HttpClient::new()?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, path: &str) -> RequestSpec {
        RequestSpec::get(format!("{}{}", self.base_url, path))
            .header("DD-API-KEY", self.api_key.clone())
            .header("DD-APPLICATION-KEY", self.app_key.clone())
    }

    fn missing_keys(&self) -> bool {
        self.api_key.trim().is_empty() || self.app_key.trim().is_empty()
    }

    /// `validate(apiKey,appKey,site) → (ok,reason)` (spec §4.2).
    pub fn validate(&self) -> (bool, Reason) {
        if self.missing_keys() {
            return (false, Reason::MissingKeys);
        }
        let spec = self.request("/api/v1/validate");
        match self.client.request(&spec) {
            Ok(response) => match response.json::<ValidateResponse>() {
                Ok(body) => (body.valid, Reason::Ok),
                Err(e) => (false, Reason::Exception(e.to_string())),
            },
            Err(err) => (false, Reason::from_error(&err)),
        }
    }

    /// `queryTimeseries(query, windowMinutes) → (lastNumericPoint|None,
    /// reason)` (spec §4.2, §4.5).
    pub fn query_timeseries(&self, query: &str, window_minutes: u32) -> (Option<f64>, Reason) {
        if self.missing_keys() {
            return (None, Reason::MissingKeys);
        }
        let now = Utc::now().timestamp();
        let from = now - (window_minutes as i64) * 60;
        let spec = self
            .request("/api/v1/query")
            .query("from", from.to_string())
            .query("to", now.to_string())
            .query("query", query.to_string());

        match self.client.request(&spec) {
            Ok(response) => match response.json::<QueryResponse>() {
                Ok(body) => {
                    let last_point = body
                        .series
                        .iter()
                        .flat_map(|s| s.pointlist.iter())
                        .rev()
                        .find_map(|(_, value)| *value);
                    match last_point {
                        Some(value) => (Some(value), Reason::Ok),
                        None => (None, Reason::NoData),
                    }
                }
                Err(e) => (None, Reason::Exception(e.to_string())),
            },
            Err(err) => (None, Reason::from_error(&err)),
        }
    }

    /// `listMonitors()` (spec §4.2).
    pub fn list_monitors(&self) -> Result<Vec<Monitor>, EstateError> {
        let spec = self.request("/api/v1/monitor");
        let response = self.client.request(&spec)?;
        let entries: Vec<MonitorApiEntry> = response
            .json()
            .map_err(|e| EstateError::DataQuality(format!("invalid monitor response: {e}")))?;
        Ok(entries
            .into_iter()
            .map(|e| Monitor {
                id: e.id,
                name: e.name,
                tags: e.tags,
                overall_state: e.overall_state,
                message: e.message,
            })
            .collect())
    }
}

/// Normalize a raw metric sample per spec §4.5's per-signal normalizer
/// table. `cpuPct`/`memPct` scale a `0..1.5` fraction to a percentage;
/// `p95ms` heuristically treats a `0..50` value as seconds needing
/// conversion to milliseconds.
pub fn normalize_cpu_mem_pct(raw: f64) -> f64 {
    if (0.0..=1.5).contains(&raw) { raw * 100.0 } else { raw }
}

pub fn normalize_p95_ms(raw: f64) -> f64 {
    if (0.0..=50.0).contains(&raw) { raw * 1000.0 } else { raw }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn site_base_url_maps_known_sites() {
        assert_eq!(site_base_url("datadoghq.com"), "https://api.datadoghq.com");
        assert_eq!(site_base_url("datadoghq.eu"), "https://api.datadoghq.eu");
    }

    #[test]
    fn site_base_url_passes_through_full_urls() {
        assert_eq!(
            site_base_url("https://custom.example.com/"),
            "https://custom.example.com"
        );
    }

    #[test]
    fn normalizers_match_spec_examples() {
        assert_eq!(normalize_cpu_mem_pct(0.42), 42.0);
        assert_eq!(normalize_p95_ms(1.5), 1500.0);
        assert_eq!(normalize_p95_ms(2500.0), 2500.0);
    }

    #[tokio::test]
    async fn validate_reports_missing_keys_without_a_call() {
        let server = MockServer::start().await;
        let adapter = MonitoringAdapter::new("", "", "datadoghq.com")
            .unwrap()
            .with_base_url(server.uri());
        let (ok, reason) = adapter.validate();
        assert!(!ok);
        assert_eq!(reason, Reason::MissingKeys);
    }

    #[tokio::test]
    async fn validate_ok_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"valid": true})))
            .mount(&server)
            .await;

        let adapter = MonitoringAdapter::new("k", "a", "datadoghq.com")
            .unwrap()
            .with_base_url(server.uri());
        let (ok, reason) = adapter.validate();
        assert!(ok);
        assert_eq!(reason, Reason::Ok);
    }

    #[tokio::test]
    async fn query_timeseries_returns_last_point() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "series": [{"pointlist": [[1000.0, 0.2], [2000.0, 0.37]]}]
            })))
            .mount(&server)
            .await;

        let adapter = MonitoringAdapter::new("k", "a", "datadoghq.com")
            .unwrap()
            .with_base_url(server.uri());
        let (value, reason) = adapter.query_timeseries("avg:system.cpu.user{env:qa}", 5);
        assert_eq!(value, Some(0.37));
        assert_eq!(reason, Reason::Ok);
    }

    #[tokio::test]
    async fn query_timeseries_no_data_when_series_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"series": []})))
            .mount(&server)
            .await;

        let adapter = MonitoringAdapter::new("k", "a", "datadoghq.com")
            .unwrap()
            .with_base_url(server.uri());
        let (value, reason) = adapter.query_timeseries("avg:system.cpu.user{env:qa}", 5);
        assert_eq!(value, None);
        assert_eq!(reason, Reason::NoData);
    }

    #[tokio::test]
    async fn query_timeseries_auth_failure_maps_to_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let adapter = MonitoringAdapter::new("k", "a", "datadoghq.com")
            .unwrap()
            .with_base_url(server.uri());
        let (value, reason) = adapter.query_timeseries("avg:system.cpu.user{env:qa}", 5);
        assert_eq!(value, None);
        assert_eq!(reason, Reason::Auth403);
    }
}
