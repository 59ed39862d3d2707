//! Error taxonomy shared across the pipeline (spec §7).
//!
//! Adapter and assembly code returns [`EstateError`] so callers can match on
//! propagation policy instead of string-matching. Top-level orchestration
//! (the scheduler, the CLI entrypoint) still uses `anyhow::Result` for
//! convenience; this type is what crosses crate boundaries where the caller
//! needs to decide fatal-vs-degrade.

use thiserror::Error;

/// One error kind per row of spec §7's taxonomy table.
#[derive(Debug, Error)]
pub enum EstateError {
    /// Missing directory, invalid YAML, missing `project.key`, missing
    /// `service.infraRepo`. Always fatal: abort the run.
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing required token. Fatal for VCS; non-fatal (adapter disabled)
    /// for CI, Monitoring, Tracker.
    #[error("missing credential: {0}")]
    CredentialMissing(String),

    /// 401/403 from an upstream. Degrades the affected adapter for the rest
    /// of the run.
    #[error("upstream authentication failed ({status}): {detail}")]
    UpstreamAuth { status: u16, detail: String },

    /// 429 after retries exhausted.
    #[error("upstream rate limited")]
    UpstreamRateLimit,

    /// 5xx or network error after retries exhausted.
    #[error("upstream server error ({status}): {detail}")]
    UpstreamServer { status: u16, detail: String },

    /// Exhausted all candidate paths/ids for a resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing `deployedAt`, missing `mergeSha`, unknown `envKey`, tag
    /// signature unparsable, etc. Recorded as a normalized [`crate::Warning`].
    #[error("data quality issue: {0}")]
    DataQuality(String),

    /// Index mtime moved during a read-modify-write cycle; retried up to
    /// 5 times before this is raised.
    #[error("history store conflict: {0}")]
    HistoryConflict(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EstateError {
    /// Whether this error kind is fatal to the whole run (spec §7
    /// propagation policy), as opposed to something that degrades a single
    /// component/adapter into a warning.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EstateError::Config(_))
    }
}
