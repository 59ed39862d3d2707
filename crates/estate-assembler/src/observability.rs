//! Observability Collector (spec §4.5): per-environment CPU/memory/pods/
//! error-rate/p95 query set, deterministic-vs-candidate tag resolution, and
//! the monitor-derived global alerts / news feed.
//!
//! Grounded on `original_source/MVP1/snapshot/snapshot.py`'s
//! `datadog_collect_observability`/`_dd_selector_matches_monitor` for the
//! selector-matching and news/alert sort order; `shipper` has no
//! observability subsystem of its own to draw from here.

use std::collections::HashMap;

use estate_monitoring::{MonitoringAdapter, Monitor, normalize_cpu_mem_pct, normalize_p95_ms};
use estate_types::config::{ComponentSelector, DatadogConfig, EnvSelector};
use estate_types::{Warning, WarningLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvSignals {
    pub cpu_pct: Option<f64>,
    pub mem_pct: Option<f64>,
    pub pods: Option<f64>,
    pub error_rate_pct: Option<f64>,
    pub p95_ms: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Thresholds {
    pub error_rate: (f64, f64),
    pub p95: (f64, f64),
    pub cpu: (f64, f64),
    pub mem: (f64, f64),
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            error_rate: (1.0, 5.0),
            p95: (1000.0, 2000.0),
            cpu: (70.0, 85.0),
            mem: (70.0, 85.0),
        }
    }
}

impl Thresholds {
    /// Overlay per-project `datadog.thresholds` overrides onto the §4.5
    /// defaults.
    pub fn from_config(cfg: &DatadogConfig) -> Self {
        let mut thresholds = Self::default();
        if let Some(v) = cfg.thresholds.get("errorRate") {
            thresholds.error_rate = *v;
        }
        if let Some(v) = cfg.thresholds.get("p95") {
            thresholds.p95 = *v;
        }
        if let Some(v) = cfg.thresholds.get("cpu") {
            thresholds.cpu = *v;
        }
        if let Some(v) = cfg.thresholds.get("mem") {
            thresholds.mem = *v;
        }
        thresholds
    }
}

/// Query templates per signal (spec §4.5 table). `{TAGS}` is substituted
/// with the resolved, comma-joined tag set.
fn query_template(signal: &str, tags: &str) -> String {
    match signal {
        "cpuPct" => format!("avg:system.cpu.user{{{tags}}}"),
        "memPct" => format!("avg:system.mem.used_pct{{{tags}}}"),
        "pods" => format!("sum:kubernetes.pods.running{{{tags}}}"),
        "errorRatePct" => {
            format!("100*(sum:http.errors.as_count(){{{tags}}}/sum:http.hits.as_count(){{{tags}}})")
        }
        "p95ms" => format!("p95:trace.http.request.duration{{{tags}}}"),
        other => unreachable!("unknown signal {other}"),
    }
}

/// Build the deterministic TAGS set for an env selector (spec §4.5
/// "Deterministic mode"): `baseTags ∪ kube_namespace:N ∪ cluster? ∪
/// service/deployment?`.
fn deterministic_tags(
    base_tags: &[String],
    selector: &EnvSelector,
    component: Option<&ComponentSelector>,
) -> Vec<String> {
    let mut tags: Vec<String> = base_tags.to_vec();
    tags.push(format!("kube_namespace:{}", selector.namespace));
    if let Some(cluster) = &selector.cluster {
        tags.push(format!("kube_cluster_name:{cluster}"));
    }
    if let Some(component) = component {
        if let Some(service) = &component.service {
            tags.push(format!("service:{service}"));
        }
        if let Some(deployment) = &component.kube_deployment {
            tags.push(format!("kube_deployment:{deployment}"));
        }
    }
    tags
}

/// Resolve the TAGS string for one env, either from the configured
/// deterministic selector or by probing candidate tag names (spec §4.5).
/// Returns the resolved tag list plus whether deterministic mode was used.
fn resolve_tags(
    monitoring: &MonitoringAdapter,
    cfg: &DatadogConfig,
    env_key: &str,
    service_key: Option<&str>,
) -> (Vec<String>, bool) {
    if let Some(selector) = cfg.env_selectors.get(env_key) {
        let component = service_key.and_then(|svc| {
            cfg.component_selectors
                .get(svc)
                .and_then(|per_env| per_env.get(env_key))
        });
        return (deterministic_tags(&cfg.base_tags, selector, component), true);
    }

    for candidate in cfg.effective_tag_candidates() {
        let tags = {
            let mut t = cfg.base_tags.clone();
            t.push(format!("{candidate}:{env_key}"));
            t
        };
        let probe_query = query_template("pods", &tags.join(","));
        let (value, _reason) =
            monitoring.query_timeseries(&probe_query, cfg.observability_window_minutes());
        if value.is_some() {
            return (tags, false);
        }
    }
    (Vec::new(), false)
}

/// Collect every signal for one environment (spec §4.5).
pub fn collect_signals(
    monitoring: &MonitoringAdapter,
    cfg: &DatadogConfig,
    env_key: &str,
    service_key: Option<&str>,
    window_minutes: u32,
) -> EnvSignals {
    let (tags, _deterministic) = resolve_tags(monitoring, cfg, env_key, service_key);
    if tags.is_empty() {
        return EnvSignals::default();
    }
    let tags_joined = tags.join(",");

    let cpu = monitoring
        .query_timeseries(&query_template("cpuPct", &tags_joined), window_minutes)
        .0
        .map(normalize_cpu_mem_pct);
    let mem = monitoring
        .query_timeseries(&query_template("memPct", &tags_joined), window_minutes)
        .0
        .map(normalize_cpu_mem_pct);
    let pods = monitoring.query_timeseries(&query_template("pods", &tags_joined), window_minutes).0;
    let error_rate = monitoring
        .query_timeseries(&query_template("errorRatePct", &tags_joined), window_minutes)
        .0;
    let p95 = monitoring
        .query_timeseries(&query_template("p95ms", &tags_joined), window_minutes)
        .0
        .map(normalize_p95_ms);

    EnvSignals {
        cpu_pct: cpu,
        mem_pct: mem,
        pods,
        error_rate_pct: error_rate,
        p95_ms: p95,
    }
}

/// Derive the coarse four-level status from signals and thresholds (spec
/// §4.5: precedence `unhealthy > degraded > healthy > unknown`).
pub fn derive_status(signals: &EnvSignals, thresholds: &Thresholds) -> HealthStatus {
    let mut any_value = false;
    let mut worst = HealthStatus::Healthy;

    let mut check = |value: Option<f64>, (warn, alert): (f64, f64)| {
        if let Some(v) = value {
            any_value = true;
            let level = if v >= alert {
                HealthStatus::Unhealthy
            } else if v >= warn {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };
            if level > worst {
                worst = level;
            }
        }
    };

    check(signals.error_rate_pct, thresholds.error_rate);
    check(signals.p95_ms, thresholds.p95);
    check(signals.cpu_pct, thresholds.cpu);
    check(signals.mem_pct, thresholds.mem);

    if !any_value { HealthStatus::Unknown } else { worst }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct AlertItem {
    pub code: String,
    pub title: String,
    pub severity: AlertSeverity,
}

#[derive(Debug, Clone)]
pub struct NewsItem {
    pub ts: chrono::DateTime<chrono::Utc>,
    pub title: String,
    pub msg: String,
    pub level: String,
    pub source: String,
    pub url: Option<String>,
}

/// Whether a monitor matches an env selector (spec §4.5 "Selector-to-monitor
/// match"): the selector's `kube_namespace:N` (or legacy `namespace:N`) tag
/// must be present, and `cluster` (if set) requires `kube_cluster_name:C`
/// too.
pub fn selector_matches_monitor(selector: &EnvSelector, monitor_tags: &[String]) -> bool {
    let namespace_tag_a = format!("kube_namespace:{}", selector.namespace);
    let namespace_tag_b = format!("namespace:{}", selector.namespace);
    let namespace_ok = monitor_tags.iter().any(|t| *t == namespace_tag_a || *t == namespace_tag_b);
    if !namespace_ok {
        return false;
    }
    match &selector.cluster {
        Some(cluster) => {
            let cluster_tag = format!("kube_cluster_name:{cluster}");
            monitor_tags.iter().any(|t| *t == cluster_tag)
        }
        None => true,
    }
}

fn severity_of(monitor: &Monitor) -> Option<AlertSeverity> {
    match monitor.overall_state.to_lowercase().as_str() {
        "alert" => Some(AlertSeverity::Error),
        "warn" => Some(AlertSeverity::Warn),
        "no data" | "no_data" => Some(AlertSeverity::Info),
        _ => None,
    }
}

/// Build the global alert list from raw monitors (spec §4.5 "Global
/// alerts"): filtered by selector match when selectors are configured, else
/// by `env:` tag membership in known env keys; sorted severity desc then
/// title; capped.
pub fn global_alerts(
    monitors: &[Monitor],
    cfg: &DatadogConfig,
    known_env_keys: &[String],
    cap: usize,
) -> Vec<AlertItem> {
    let mut alerts: Vec<AlertItem> = monitors
        .iter()
        .filter_map(|m| {
            let severity = severity_of(m)?;
            if !monitor_is_relevant(m, cfg, known_env_keys) {
                return None;
            }
            Some(AlertItem {
                code: m.overall_state.to_lowercase().replace(' ', "_"),
                title: m.name.clone(),
                severity,
            })
        })
        .collect();
    alerts.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.title.cmp(&b.title)));
    alerts.truncate(cap);
    alerts
}

fn monitor_is_relevant(monitor: &Monitor, cfg: &DatadogConfig, known_env_keys: &[String]) -> bool {
    if !cfg.env_selectors.is_empty() {
        return cfg.env_selectors.values().any(|sel| selector_matches_monitor(sel, &monitor.tags));
    }
    monitor.tags.iter().any(|tag| {
        tag.strip_prefix("env:")
            .map(|env| known_env_keys.iter().any(|k| k == env))
            .unwrap_or(false)
    })
}

/// Build the news feed from raw monitors (spec §4.5 "News items"): only
/// `ALERT`/`WARN` monitors, sorted `bad > warn > ok` then newest first;
/// capped. Monitor payloads carry no timestamp of their own, so `now` is
/// used uniformly and stable ordering falls to severity then name.
pub fn news_items(monitors: &[Monitor], now: chrono::DateTime<chrono::Utc>, cap: usize) -> Vec<NewsItem> {
    let mut items: Vec<NewsItem> = monitors
        .iter()
        .filter_map(|m| {
            let severity = severity_of(m)?;
            if severity == AlertSeverity::Info {
                return None;
            }
            Some(NewsItem {
                ts: now,
                title: m.name.clone(),
                msg: m.message.clone().unwrap_or_default(),
                level: if severity == AlertSeverity::Error { "bad".to_string() } else { "warn".to_string() },
                source: "datadog".to_string(),
                url: None,
            })
        })
        .collect();
    items.sort_by(|a, b| {
        let rank = |level: &str| if level == "bad" { 0 } else { 1 };
        rank(&a.level).cmp(&rank(&b.level)).then_with(|| b.ts.cmp(&a.ts))
    });
    items.truncate(cap);
    items
}

/// Wrap a monitoring/observability exception as an `observability.warnings[]`
/// entry (spec §7: "Datadog monitor or news feed exceptions are added to
/// observability.warnings[] and do not affect envs").
pub fn observability_warning(message: impl Into<String>) -> Warning {
    Warning::new(WarningLevel::Warn, "observability", "DATADOG_EXCEPTION", "observability", message)
}

#[derive(Debug, Default, Clone)]
pub struct ObservabilitySummary {
    pub by_env: HashMap<String, HealthStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_precedence_unhealthy_beats_degraded() {
        let signals = EnvSignals {
            cpu_pct: Some(90.0),
            mem_pct: Some(72.0),
            pods: None,
            error_rate_pct: None,
            p95_ms: None,
        };
        assert_eq!(derive_status(&signals, &Thresholds::default()), HealthStatus::Unhealthy);
    }

    #[test]
    fn status_unknown_when_every_signal_absent() {
        assert_eq!(derive_status(&EnvSignals::default(), &Thresholds::default()), HealthStatus::Unknown);
    }

    #[test]
    fn selector_matches_legacy_namespace_tag() {
        let selector = EnvSelector { namespace: "qa-ns".to_string(), cluster: None };
        assert!(selector_matches_monitor(&selector, &["namespace:qa-ns".to_string()]));
        assert!(selector_matches_monitor(&selector, &["kube_namespace:qa-ns".to_string()]));
        assert!(!selector_matches_monitor(&selector, &["kube_namespace:prod-ns".to_string()]));
    }

    #[test]
    fn selector_requires_cluster_tag_when_specified() {
        let selector = EnvSelector { namespace: "qa-ns".to_string(), cluster: Some("c1".to_string()) };
        assert!(!selector_matches_monitor(&selector, &["kube_namespace:qa-ns".to_string()]));
        assert!(selector_matches_monitor(
            &selector,
            &["kube_namespace:qa-ns".to_string(), "kube_cluster_name:c1".to_string()]
        ));
    }

    #[test]
    fn news_items_excludes_info_and_sorts_bad_first() {
        let monitors = vec![
            Monitor { id: 1, name: "b".to_string(), tags: vec![], overall_state: "Warn".to_string(), message: None },
            Monitor { id: 2, name: "a".to_string(), tags: vec![], overall_state: "Alert".to_string(), message: None },
            Monitor { id: 3, name: "c".to_string(), tags: vec![], overall_state: "OK".to_string(), message: None },
        ];
        let news = news_items(&monitors, chrono::Utc::now(), 10);
        assert_eq!(news.len(), 2);
        assert_eq!(news[0].title, "a");
    }
}
