use std::path::PathBuf;
use std::sync::Arc;

use estate_credentials::Credentials;
use estate_scheduler::Scheduler;

/// Shared handle threaded through every route (spec §4.11). Cloned per
/// request by axum's `State` extractor — everything inside is already
/// `Arc`/`Clone`-cheap.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub configs_dir: PathBuf,
    pub credentials: Credentials,
    pub ticket_window_days: u32,
    pub per_repo_limit: u32,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>, configs_dir: impl Into<PathBuf>, credentials: Credentials) -> Self {
        Self {
            scheduler,
            configs_dir: configs_dir.into(),
            credentials,
            ticket_window_days: estate_credentials::env_u32("TICKET_TRACKER_DAYS", 120),
            per_repo_limit: estate_credentials::env_u32("TICKET_TRACKER_PER_REPO_LIMIT", 120),
        }
    }
}
