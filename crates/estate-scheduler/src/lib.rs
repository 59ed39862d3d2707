//! Scheduler + Progress (spec §4.10): a background thread that runs the
//! pipeline on a fixed interval, honors a cooldown-gated manual trigger,
//! and publishes a progress document the Control API polls.
//!
//! Grounded on `original_source/MVP1/snapshot/snapshot_scheduler.py`'s
//! `SnapshotScheduler`: same interval/cooldown/timeout constants and the
//! same `_scheduler_loop`/`_update_progress_loop` split between "decide
//! when to run" and "report how far along the current run is". The
//! original shells out to a subprocess it can `kill()` on timeout; here the
//! pipeline runs in-process on its own thread, so a timeout is reported
//! (and the run recorded as failed) but the thread itself is left to finish
//! or fail on its own rather than force-killed, since Rust has no portable
//! thread-kill.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use estate_duration::RuntimeWindow;
use estate_lock::atomic_write;
use estate_types::EstateError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_INTERVAL_MINUTES: u32 = 30;
pub const MANUAL_TRIGGER_COOLDOWN_SECS: u64 = 300;
pub const PIPELINE_TIMEOUT_SECS: u64 = 3600;
pub const PROGRESS_UPDATE_INTERVAL_SECS: u64 = 30;
pub const STOP_JOIN_TIMEOUT_SECS: u64 = 5;
const SLEEP_CHUNK_SECS: u64 = 60;

pub const PROGRESS_FILE: &str = "snapshot_progress.json";
pub const STATUS_FILE: &str = "snapshot_status.json";
pub const RUNTIME_HISTORY_FILE: &str = "snapshot_runtimes.json";

/// `GET /api/snapshot/progress` document (spec §4.10, §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub running: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub elapsed_seconds: u64,
    #[serde(default)]
    pub progress_percent: u8,
    #[serde(default)]
    pub eta_seconds: Option<u64>,
    #[serde(default)]
    pub eta_minutes: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            running: false,
            started_at: None,
            elapsed_seconds: 0,
            progress_percent: 0,
            eta_seconds: None,
            eta_minutes: None,
            error: None,
        }
    }
}

/// `GET /api/snapshot/status` document (spec §4.10, §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub running: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    pub interval_minutes: u32,
    pub manual_trigger_pending: bool,
    pub progress: Progress,
    #[serde(default)]
    pub seconds_until_next_run: Option<i64>,
    #[serde(default)]
    pub minutes_until_next_run: Option<i64>,
}

struct SchedulerState {
    running: AtomicBool,
    manual_trigger_pending: AtomicBool,
    last_manual_trigger_at: Mutex<Option<Instant>>,
    last_run_at: Mutex<Option<DateTime<Utc>>>,
    next_run_at: Mutex<Option<DateTime<Utc>>>,
    progress: Mutex<Progress>,
    runtimes: Mutex<RuntimeWindow>,
    stop: AtomicBool,
}

/// Runs `run_pipeline` on a timer, with a cooldown-gated manual trigger
/// (spec §4.10). `data_dir` is where the progress/status/runtime-history
/// documents are published for the Control API to read.
pub struct Scheduler {
    data_dir: PathBuf,
    interval: Duration,
    run_pipeline: Arc<dyn Fn() -> Result<(), EstateError> + Send + Sync>,
    state: Arc<SchedulerState>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        interval_minutes: u32,
        run_pipeline: Arc<dyn Fn() -> Result<(), EstateError> + Send + Sync>,
    ) -> Self {
        let data_dir = data_dir.into();
        let runtimes = load_runtime_window(&data_dir.join(RUNTIME_HISTORY_FILE));
        Self {
            data_dir,
            interval: Duration::from_secs(interval_minutes.max(1) as u64 * 60),
            run_pipeline,
            state: Arc::new(SchedulerState {
                running: AtomicBool::new(false),
                manual_trigger_pending: AtomicBool::new(false),
                last_manual_trigger_at: Mutex::new(None),
                last_run_at: Mutex::new(None),
                next_run_at: Mutex::new(None),
                progress: Mutex::new(Progress::default()),
                runtimes: Mutex::new(runtimes),
                stop: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Start the background scheduler loop. A no-op if already started.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.thread.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *guard = Some(std::thread::spawn(move || this.scheduler_loop()));
    }

    /// Stop the loop and join the background thread, waiting up to
    /// `STOP_JOIN_TIMEOUT_SECS` (spec §4.10: "5s join-on-stop").
    pub fn stop(&self) {
        self.state.stop.store(true, Ordering::SeqCst);
        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                let _ = handle.join();
                let _ = tx.send(());
            });
            let _ = rx.recv_timeout(Duration::from_secs(STOP_JOIN_TIMEOUT_SECS));
        }
    }

    /// Request an out-of-band run (spec §4.10 `POST /trigger`). Returns
    /// `false` if a run is already in progress or the 5-minute cooldown
    /// since the last manual trigger hasn't elapsed.
    pub fn trigger_manual(&self) -> bool {
        if self.state.running.load(Ordering::SeqCst) {
            return false;
        }
        let mut last = self.state.last_manual_trigger_at.lock().unwrap();
        if let Some(at) = *last {
            if at.elapsed() < Duration::from_secs(MANUAL_TRIGGER_COOLDOWN_SECS) {
                return false;
            }
        }
        *last = Some(Instant::now());
        self.state.manual_trigger_pending.store(true, Ordering::SeqCst);
        true
    }

    pub fn status(&self) -> Status {
        let now = Utc::now();
        let next_run_at = *self.state.next_run_at.lock().unwrap();
        let seconds_until = next_run_at.map(|t| (t - now).num_seconds());
        Status {
            running: self.state.running.load(Ordering::SeqCst),
            last_run_at: *self.state.last_run_at.lock().unwrap(),
            next_run_at,
            interval_minutes: (self.interval.as_secs() / 60) as u32,
            manual_trigger_pending: self.state.manual_trigger_pending.load(Ordering::SeqCst),
            progress: self.state.progress.lock().unwrap().clone(),
            seconds_until_next_run: seconds_until,
            minutes_until_next_run: seconds_until.map(|s| s / 60),
        }
    }

    pub fn progress(&self) -> Progress {
        self.state.progress.lock().unwrap().clone()
    }

    fn scheduler_loop(self: Arc<Self>) {
        loop {
            if self.state.stop.load(Ordering::SeqCst) {
                return;
            }

            let manual = self.state.manual_trigger_pending.swap(false, Ordering::SeqCst);
            let due = if manual {
                true
            } else {
                match *self.state.next_run_at.lock().unwrap() {
                    None => true,
                    Some(next) => Utc::now() >= next,
                }
            };

            if due {
                self.run_once();
                continue;
            }

            let wait = self.time_until_next_run();
            let chunk = wait.min(Duration::from_secs(SLEEP_CHUNK_SECS)).max(Duration::from_millis(100));
            std::thread::sleep(chunk);
        }
    }

    fn time_until_next_run(&self) -> Duration {
        match *self.state.next_run_at.lock().unwrap() {
            None => Duration::ZERO,
            Some(next) => {
                let now = Utc::now();
                if next <= now {
                    Duration::ZERO
                } else {
                    (next - now).to_std().unwrap_or(Duration::ZERO)
                }
            }
        }
    }

    fn run_once(self: &Arc<Self>) {
        self.state.running.store(true, Ordering::SeqCst);
        let started_at = Utc::now();
        *self.state.progress.lock().unwrap() = Progress {
            running: true,
            started_at: Some(started_at),
            elapsed_seconds: 0,
            progress_percent: 0,
            eta_seconds: None,
            eta_minutes: None,
            error: None,
        };
        self.publish_progress();

        let progress_thread = self.spawn_progress_updater(started_at);

        let run_pipeline = Arc::clone(&self.run_pipeline);
        let (tx, rx) = mpsc::channel();
        let worker = std::thread::spawn(move || {
            let result = run_pipeline();
            let _ = tx.send(result);
        });

        let outcome = rx.recv_timeout(Duration::from_secs(PIPELINE_TIMEOUT_SECS));

        match outcome {
            Ok(Ok(())) => {
                let runtime = Duration::from_secs((Utc::now() - started_at).num_seconds().max(0) as u64);
                self.state.runtimes.lock().unwrap().record(runtime);
                self.persist_runtime_window();
                self.finish_run(started_at, None);
            }
            Ok(Err(e)) => {
                self.finish_run(started_at, Some(e.to_string()));
            }
            Err(_) => {
                tracing::warn!("pipeline run exceeded {PIPELINE_TIMEOUT_SECS}s timeout");
                self.finish_run(started_at, Some(format!("timed out after {PIPELINE_TIMEOUT_SECS}s")));
            }
        }

        let _ = worker; // worker may still be running past a timeout; detached deliberately.
        if let Some(handle) = progress_thread {
            let _ = handle.join();
        }
    }

    fn spawn_progress_updater(self: &Arc<Self>, started_at: DateTime<Utc>) -> Option<JoinHandle<()>> {
        let this = Arc::clone(self);
        Some(std::thread::spawn(move || {
            while this.state.running.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_secs(PROGRESS_UPDATE_INTERVAL_SECS));
                if !this.state.running.load(Ordering::SeqCst) {
                    break;
                }
                this.update_progress(started_at);
            }
        }))
    }

    fn update_progress(&self, started_at: DateTime<Utc>) {
        let elapsed = (Utc::now() - started_at).num_seconds().max(0) as u64;
        let avg = self.state.runtimes.lock().unwrap().average_clamped();
        let eta = avg.saturating_sub(Duration::from_secs(elapsed));
        let eta_seconds = eta.as_secs();
        let percent = ((elapsed as f64 / avg.as_secs().max(1) as f64) * 100.0).min(95.0) as u8;

        let mut progress = self.state.progress.lock().unwrap();
        progress.elapsed_seconds = elapsed;
        progress.progress_percent = percent;
        progress.eta_seconds = Some(eta_seconds);
        progress.eta_minutes = if eta_seconds > 0 { Some((eta_seconds / 60).max(1)) } else { None };
        drop(progress);
        self.publish_progress();
    }

    fn finish_run(&self, started_at: DateTime<Utc>, error: Option<String>) {
        let now = Utc::now();
        *self.state.last_run_at.lock().unwrap() = Some(now);
        *self.state.next_run_at.lock().unwrap() = Some(now + chrono::Duration::from_std(self.interval).unwrap());
        self.state.running.store(false, Ordering::SeqCst);

        let elapsed = (now - started_at).num_seconds().max(0) as u64;
        *self.state.progress.lock().unwrap() = Progress {
            running: false,
            started_at: Some(started_at),
            elapsed_seconds: elapsed,
            progress_percent: if error.is_none() { 100 } else { 0 },
            eta_seconds: Some(0),
            eta_minutes: None,
            error,
        };
        self.publish_progress();
        self.publish_status();
    }

    fn publish_progress(&self) {
        let progress = self.state.progress.lock().unwrap().clone();
        if let Ok(bytes) = serde_json::to_vec_pretty(&progress) {
            let _ = atomic_write(&self.data_dir.join(PROGRESS_FILE), &bytes);
        }
    }

    fn publish_status(&self) {
        let status = self.status();
        if let Ok(bytes) = serde_json::to_vec_pretty(&status) {
            let _ = atomic_write(&self.data_dir.join(STATUS_FILE), &bytes);
        }
    }

    fn persist_runtime_window(&self) {
        let window = self.state.runtimes.lock().unwrap();
        if let Ok(bytes) = serde_json::to_vec_pretty(&*window) {
            let _ = atomic_write(&self.data_dir.join(RUNTIME_HISTORY_FILE), &bytes);
        }
    }
}

fn load_runtime_window(path: &Path) -> RuntimeWindow {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn trigger_manual_rejected_while_running() {
        let td = tempdir().unwrap();
        let scheduler = Arc::new(Scheduler::new(td.path(), 30, Arc::new(|| Ok(()))));
        scheduler.state.running.store(true, Ordering::SeqCst);
        assert!(!scheduler.trigger_manual());
    }

    #[test]
    fn trigger_manual_honors_cooldown() {
        let td = tempdir().unwrap();
        let scheduler = Arc::new(Scheduler::new(td.path(), 30, Arc::new(|| Ok(()))));
        assert!(scheduler.trigger_manual());
        assert!(!scheduler.trigger_manual());
    }

    #[test]
    fn run_once_publishes_final_status() {
        let td = tempdir().unwrap();
        let scheduler = Arc::new(Scheduler::new(td.path(), 30, Arc::new(|| Ok(()))));
        scheduler.run_once();
        let status = scheduler.status();
        assert!(!status.running);
        assert_eq!(status.progress.progress_percent, 100);
        assert!(td.path().join(PROGRESS_FILE).exists());
        assert!(td.path().join(STATUS_FILE).exists());
    }

    #[test]
    fn run_once_records_error_on_pipeline_failure() {
        let td = tempdir().unwrap();
        let scheduler = Arc::new(Scheduler::new(
            td.path(),
            30,
            Arc::new(|| Err(EstateError::Config("boom".to_string()))),
        ));
        scheduler.run_once();
        let progress = scheduler.progress();
        assert_eq!(progress.error.as_deref(), Some("configuration error: boom"));
    }

    #[test]
    fn status_reports_interval_minutes() {
        let td = tempdir().unwrap();
        let scheduler = Arc::new(Scheduler::new(td.path(), 45, Arc::new(|| Ok(()))));
        assert_eq!(scheduler.status().interval_minutes, 45);
    }
}
