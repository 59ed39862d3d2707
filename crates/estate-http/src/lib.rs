//! The HTTP Client Core (spec §4.1): one retrying `reqwest::blocking` client
//! shared by every upstream adapter.
//!
//! The client-builder-then-`send` shape is `shipper-webhook`'s
//! `send_webhook`/`send_webhook_async` (builder with a timeout,
//! `anyhow::Context` on every fallible step); the retry table itself comes
//! from `estate-retry`, which already ports `shipper-retry`'s doubling
//! backoff. What `shipper-webhook` doesn't have is a retry loop at all (a
//! webhook is fired once) — that loop, plus `Retry-After`/
//! `X-RateLimit-Remaining` handling, is new and grounded on
//! `original_source/MVP1/snapshot/snapshot.py`'s `_api_request_with_retry`.

use std::collections::HashMap;
use std::time::Duration;

use estate_retry::{Outcome, RetryDecision, RetryPolicy, decide, parse_retry_after, rate_limit_throttle};
use estate_types::EstateError;
use reqwest::blocking::{Client, Response};
use reqwest::Method;

/// A single outbound request, one retry policy applied across all attempts.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Thin wrapper over `reqwest::blocking::Client`; adapters hold one of these
/// and never keep credentials beyond the call frame (spec §4.1, §5).
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, EstateError> {
        let client = Client::builder()
            .build()
            .map_err(|e| EstateError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Execute `spec`, retrying per the §4.1 table. Returns the final
    /// response (2xx/3xx or a non-retryable 4xx) or the terminal
    /// `EstateError` after retries are exhausted.
    pub fn request(&self, spec: &RequestSpec) -> Result<Response, EstateError> {
        let mut attempt: u32 = 0;
        loop {
            let mut builder = self
                .client
                .request(spec.method.clone(), &spec.url)
                .timeout(spec.timeout)
                .query(&spec.query);
            for (key, value) in &spec.headers {
                builder = builder.header(key, value);
            }
            if let Some(body) = &spec.body {
                builder = builder.body(body.clone());
            }

            let send_result = builder.send();

            let response = match send_result {
                Ok(resp) => resp,
                Err(err) => {
                    tracing::warn!(url = %spec.url, attempt, error = %err, "transport error");
                    match decide(&spec.retry, attempt, Outcome::ServerError) {
                        RetryDecision::Retry(delay) => {
                            std::thread::sleep(delay);
                            attempt += 1;
                            continue;
                        }
                        RetryDecision::Stop => {
                            return Err(EstateError::UpstreamServer {
                                status: 0,
                                detail: err.to_string(),
                            });
                        }
                    }
                }
            };

            if let Some(delay) = rate_limit_throttle(remaining_header(&response)) {
                std::thread::sleep(delay);
            }

            let status = response.status();
            if status.is_success() || status.is_redirection() {
                return Ok(response);
            }

            let outcome = if status.as_u16() == 429 {
                Outcome::RateLimited {
                    retry_after: response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_retry_after),
                }
            } else if status.is_client_error() {
                Outcome::ClientError
            } else {
                Outcome::ServerError
            };

            match decide(&spec.retry, attempt, outcome) {
                RetryDecision::Retry(delay) => {
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                RetryDecision::Stop => {
                    let detail = response.text().unwrap_or_default();
                    return Err(terminal_error(status.as_u16(), detail));
                }
            }
        }
    }
}

fn remaining_header(response: &Response) -> Option<u32> {
    response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// The normalized `(value, reason)` sentinel vocabulary every adapter call
/// returns instead of throwing on expected upstream conditions (spec §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    Ok,
    NoData,
    MissingKeys,
    Auth401,
    Auth403,
    Http(u16),
    Exception(String),
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::Ok => write!(f, "ok"),
            Reason::NoData => write!(f, "no_data"),
            Reason::MissingKeys => write!(f, "missing_keys"),
            Reason::Auth401 => write!(f, "auth_401"),
            Reason::Auth403 => write!(f, "auth_403"),
            Reason::Http(status) => write!(f, "http_{status}"),
            Reason::Exception(kind) => write!(f, "exception:{kind}"),
        }
    }
}

impl Reason {
    /// Classify a terminal `EstateError` into the reason vocabulary, for
    /// adapters that swallow it into a sentinel pair rather than propagate.
    pub fn from_error(err: &EstateError) -> Self {
        match err {
            EstateError::UpstreamAuth { status: 401, .. } => Reason::Auth401,
            EstateError::UpstreamAuth { status: 403, .. } => Reason::Auth403,
            EstateError::UpstreamAuth { status, .. } => Reason::Http(*status),
            EstateError::UpstreamRateLimit => Reason::Http(429),
            EstateError::UpstreamServer { status, .. } => Reason::Http(*status),
            EstateError::NotFound(_) => Reason::Http(404),
            other => Reason::Exception(other.to_string()),
        }
    }
}

fn terminal_error(status: u16, detail: String) -> EstateError {
    match status {
        401 | 403 => EstateError::UpstreamAuth { status, detail },
        429 => EstateError::UpstreamRateLimit,
        s if s >= 500 => EstateError::UpstreamServer { status: s, detail },
        404 => EstateError::NotFound(detail),
        _ => EstateError::UpstreamServer { status, detail },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn successful_get_returns_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hi"))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let spec = RequestSpec::get(format!("{}/ok", server.uri()));
        let response = client.request(&spec).unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn client_error_returns_immediately_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let spec = RequestSpec::get(format!("{}/missing", server.uri()));
        let err = client.request(&spec).unwrap_err();
        assert!(matches!(err, EstateError::NotFound(_)));
    }

    #[tokio::test]
    async fn server_error_retries_then_surfaces_terminal_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let mut spec = RequestSpec::get(format!("{}/flaky", server.uri()));
        spec.retry = RetryPolicy {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        };
        let err = client.request(&spec).unwrap_err();
        assert!(matches!(err, EstateError::UpstreamServer { status: 500, .. }));
    }

    #[test]
    fn reason_classifies_auth_errors() {
        assert_eq!(
            Reason::from_error(&EstateError::UpstreamAuth { status: 401, detail: String::new() }),
            Reason::Auth401
        );
        assert_eq!(
            Reason::from_error(&EstateError::NotFound("x".into())),
            Reason::Http(404)
        );
    }

    #[tokio::test]
    async fn auth_failure_maps_to_upstream_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secure"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let spec = RequestSpec::get(format!("{}/secure", server.uri()));
        let err = client.request(&spec).unwrap_err();
        assert!(matches!(err, EstateError::UpstreamAuth { status: 401, .. }));
    }
}
