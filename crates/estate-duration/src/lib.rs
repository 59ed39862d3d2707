//! Duration parsing, serde codecs and the rolling-window ETA arithmetic used
//! by the scheduler (spec §4.10).
//!
//! `shipper-duration` ships as an empty shell (a `Cargo.toml` with no
//! `src/`); this promotes it into a real crate the same way `estate-lock`
//! promotes `shipper`'s monolithic lock module.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Parse a human-readable duration (`"30s"`, `"5m"`, `"1h"`) via `humantime`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw.trim()).map_err(|e| format!("invalid duration {raw:?}: {e}"))
}

/// Format a [`Duration`] the same way `humantime` parses it back.
pub fn format_duration(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

/// `serde(with = "estate_duration::as_humantime")` for a plain `Duration` field.
pub mod as_humantime {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// `serde(with = "estate_duration::as_seconds")` for a `Duration` stored as
/// whole seconds (the shape the history index and progress documents use).
pub mod as_seconds {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Clamp a duration to `[min, max]` seconds (spec §4.10: the rolling-average
/// runtime window is clamped to `[60, 3600]`s with a 1200s default).
pub fn clamp_seconds(value: Duration, min_secs: u64, max_secs: u64) -> Duration {
    value
        .max(Duration::from_secs(min_secs))
        .min(Duration::from_secs(max_secs))
}

/// A bounded ring buffer of recent run durations, used to compute the
/// scheduler's ETA (spec §4.10: "rolling window of the last 10 of up to 50
/// kept runtimes").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeWindow {
    #[serde(default = "default_capacity")]
    capacity: usize,
    #[serde(default = "default_window")]
    window: usize,
    runtimes_secs: Vec<u64>,
}

fn default_capacity() -> usize {
    50
}
fn default_window() -> usize {
    10
}

impl Default for RuntimeWindow {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window: default_window(),
            runtimes_secs: Vec::new(),
        }
    }
}

impl RuntimeWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed run's wall-clock duration, dropping the oldest
    /// entry once `capacity` is exceeded.
    pub fn record(&mut self, runtime: Duration) {
        self.runtimes_secs.push(runtime.as_secs());
        if self.runtimes_secs.len() > self.capacity {
            let excess = self.runtimes_secs.len() - self.capacity;
            self.runtimes_secs.drain(0..excess);
        }
    }

    /// Average of the most recent `window` runtimes, clamped to
    /// `[60, 3600]`s, defaulting to 1200s when no history exists.
    pub fn average_clamped(&self) -> Duration {
        if self.runtimes_secs.is_empty() {
            return Duration::from_secs(1200);
        }
        let start = self.runtimes_secs.len().saturating_sub(self.window);
        let recent = &self.runtimes_secs[start..];
        let sum: u64 = recent.iter().sum();
        let avg = sum / recent.len() as u64;
        clamp_seconds(Duration::from_secs(avg), 60, 3600)
    }

    /// `etaSeconds = max(0, avgRuntime - elapsed)` (spec §4.10).
    pub fn eta(&self, elapsed: Duration) -> Duration {
        self.average_clamped().saturating_sub(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_round_trip() {
        let d = parse_duration("30s").unwrap();
        assert_eq!(d, Duration::from_secs(30));
        assert_eq!(format_duration(d), "30s");
    }

    #[test]
    fn clamp_enforces_bounds() {
        assert_eq!(
            clamp_seconds(Duration::from_secs(10), 60, 3600),
            Duration::from_secs(60)
        );
        assert_eq!(
            clamp_seconds(Duration::from_secs(9000), 60, 3600),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn runtime_window_defaults_to_1200_with_no_history() {
        let window = RuntimeWindow::new();
        assert_eq!(window.average_clamped(), Duration::from_secs(1200));
    }

    #[test]
    fn runtime_window_averages_last_10_of_50() {
        let mut window = RuntimeWindow::new();
        for _ in 0..40 {
            window.record(Duration::from_secs(3000)); // would be clamped, just filler
        }
        for _ in 0..10 {
            window.record(Duration::from_secs(200));
        }
        // last 10 are all 200s -> average 200s
        assert_eq!(window.average_clamped(), Duration::from_secs(200));
    }

    #[test]
    fn runtime_window_caps_capacity_at_50() {
        let mut window = RuntimeWindow::new();
        for i in 0..60 {
            window.record(Duration::from_secs(60 + i));
        }
        assert_eq!(window.runtimes_secs.len(), 50);
    }

    #[test]
    fn eta_is_never_negative() {
        let mut window = RuntimeWindow::new();
        window.record(Duration::from_secs(100));
        let eta = window.eta(Duration::from_secs(500));
        assert_eq!(eta, Duration::ZERO);
    }

    proptest::proptest! {
        #[test]
        fn average_always_within_clamp_bounds(secs in 0u64..10_000) {
            let mut window = RuntimeWindow::new();
            window.record(Duration::from_secs(secs));
            let avg = window.average_clamped();
            assert!(avg >= Duration::from_secs(60));
            assert!(avg <= Duration::from_secs(3600));
        }
    }
}
