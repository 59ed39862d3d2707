//! Core pipeline: fans out to the VCS, CI, Monitoring and Tracker
//! integrations, assembles one [`estate_types::Snapshot`], correlates
//! tickets against deployments and persists append-only history (spec §2,
//! §4.10).

pub mod pipeline;

pub use pipeline::{PipelineConfig, run_once, scheduler_closure};
