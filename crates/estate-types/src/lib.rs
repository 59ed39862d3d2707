//! Shared data model, error taxonomy and warning vocabulary for the estate
//! snapshot pipeline (spec §3). Every other crate in the workspace depends
//! on this one, mirroring how `shipper-types` is the single vocabulary crate
//! every `shipper` microcrate builds on.

pub mod assembled;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod snapshot;
pub mod stage;
pub mod tag;
pub mod ticket;
pub mod warning;

pub use assembled::{Component, Environment, EnvironmentStatus, Project};
pub use config::{
    ArgoConfig, BranchingConfig, ComponentSelector, DatadogConfig, EnvSelector,
    EnvironmentConfig, GithubConfig, ProjectConfig, ProjectIdentity, ReleaseBranchPickStrategy,
    RepoOverride, RunbooksConfig, ServiceConfig,
};
pub use error::EstateError;
pub use events::{DeploymentEvent, EventKind, dedup_signature, event_id};
pub use history::{HistoryIndex, HistoryStats, ProjectHistorySummary, RetentionInfo};
pub use snapshot::{
    IntegrationStatus, IntegrationsSection, NewsEntry, ObservabilityEnvSummary,
    ObservabilitySection, Snapshot,
};
pub use stage::{Stage, derive_stage, normalize_env_key};
pub use tag::{
    extract_build_number, normalize_tag, service_key_from_image, service_key_from_tag,
    tag_signature,
};
pub use ticket::{
    Confidence, EnvPresenceMeta, Evidence, PullRequest, Ticket, TimeAwareBranch, TimeAwareBuild,
    TimeAwareDeployment, TimelineEntry, TrackerInfo, normalize_ref,
};
pub use warning::{GlobalAlert, Warning, WarningLevel, reason};
