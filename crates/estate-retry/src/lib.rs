//! Backoff arithmetic for the HTTP Client Core (spec §4.1).
//!
//! The doubling-capped backoff here is `shipper-retry`'s
//! `RetryStrategyConfig` (exponential doubling capped at `max_delay`)
//! stripped down to the exponential-only policy spec §4.1 calls for, plus
//! `Retry-After`/`X-RateLimit-Remaining` awareness that has no equivalent
//! in `shipper` and is instead grounded on
//! `original_source/MVP1/snapshot/snapshot.py`'s `_api_request_with_retry`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for one outbound HTTP call (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff: Duration,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: Duration,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}
fn default_max_backoff() -> Duration {
    Duration::from_secs(60)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

/// What the retry core should do with a given outcome (spec §4.1 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the response/error to the caller immediately.
    Stop,
    /// Wait the given delay then retry.
    Retry(Duration),
}

/// `delay = min(initial * 2^attempt, max)` (spec §4.1), `attempt` 0-indexed
/// (the delay before the *next* call after `attempt` failures so far).
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let pow = attempt.min(20);
    let scaled = policy.initial_backoff.saturating_mul(2_u32.saturating_pow(pow));
    scaled.min(policy.max_backoff)
}

/// Outcome classification the caller passes in after inspecting a response
/// (status code) or a transport error; encodes spec §4.1's table directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx/3xx: a successful or otherwise-final response.
    Success,
    /// 4xx other than 429: never retried.
    ClientError,
    /// 429: honor `Retry-After` if present, else the standard backoff.
    RateLimited { retry_after: Option<Duration> },
    /// 5xx or a network/timeout error.
    ServerError,
}

/// Decide what to do next for attempt number `attempt` (0-indexed, i.e. this
/// call already failed `attempt + 1` times including the one just made).
pub fn decide(policy: &RetryPolicy, attempt: u32, outcome: Outcome) -> RetryDecision {
    if attempt >= policy.max_retries {
        return RetryDecision::Stop;
    }
    match outcome {
        Outcome::Success | Outcome::ClientError => RetryDecision::Stop,
        Outcome::ServerError => RetryDecision::Retry(backoff_delay(policy, attempt)),
        Outcome::RateLimited { retry_after } => {
            RetryDecision::Retry(retry_after.unwrap_or_else(|| backoff_delay(policy, attempt)))
        }
    }
}

/// Parse a vendor `Retry-After` header value. Only the numeric-seconds form
/// is honored (spec §4.1: "wait `Retry-After` header if numeric, else
/// backoff"); HTTP-date forms fall back to `None` so the caller uses the
/// standard backoff instead.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Pre-call throttling based on `X-RateLimit-Remaining` (spec §4.1): sleep
/// 0.5s if remaining < 10, 1s if remaining < 5, nothing otherwise.
pub fn rate_limit_throttle(remaining: Option<u32>) -> Option<Duration> {
    match remaining {
        Some(r) if r < 5 => Some(Duration::from_millis(1000)),
        Some(r) if r < 10 => Some(Duration::from_millis(500)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(backoff_delay(&policy, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&policy, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(&policy, 10), Duration::from_secs(10));
    }

    #[test]
    fn client_errors_never_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(
            decide(&policy, 0, Outcome::ClientError),
            RetryDecision::Stop
        );
    }

    #[test]
    fn server_errors_retry_with_backoff() {
        let policy = RetryPolicy::default();
        match decide(&policy, 0, Outcome::ServerError) {
            RetryDecision::Retry(d) => assert_eq!(d, Duration::from_secs(1)),
            RetryDecision::Stop => panic!("expected retry"),
        }
    }

    #[test]
    fn rate_limited_honors_numeric_retry_after() {
        let policy = RetryPolicy::default();
        match decide(
            &policy,
            0,
            Outcome::RateLimited {
                retry_after: Some(Duration::from_secs(30)),
            },
        ) {
            RetryDecision::Retry(d) => assert_eq!(d, Duration::from_secs(30)),
            RetryDecision::Stop => panic!("expected retry"),
        }
    }

    #[test]
    fn exhausted_retries_stop_even_on_server_error() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };
        assert_eq!(decide(&policy, 2, Outcome::ServerError), RetryDecision::Stop);
    }

    #[test]
    fn retry_after_parses_numeric_only() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2026 07:28:00 GMT"), None);
    }

    #[test]
    fn rate_limit_throttle_thresholds() {
        assert_eq!(rate_limit_throttle(Some(20)), None);
        assert_eq!(rate_limit_throttle(Some(8)), Some(Duration::from_millis(500)));
        assert_eq!(rate_limit_throttle(Some(3)), Some(Duration::from_millis(1000)));
        assert_eq!(rate_limit_throttle(None), None);
    }

    proptest::proptest! {
        #[test]
        fn backoff_never_exceeds_max(attempt in 0u32..30) {
            let policy = RetryPolicy {
                max_retries: 10,
                initial_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(30),
            };
            let d = backoff_delay(&policy, attempt);
            assert!(d <= Duration::from_secs(30));
        }
    }
}
