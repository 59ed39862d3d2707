//! Component Assembler and Observability Collector (spec §4.4, §4.5).

pub mod component;
pub mod observability;

pub use component::{CiState, assemble};
pub use observability::{
    AlertItem, AlertSeverity, EnvSignals, HealthStatus, NewsItem, ObservabilitySummary, Thresholds,
    collect_signals, derive_status, global_alerts, news_items, observability_warning,
    selector_matches_monitor,
};
