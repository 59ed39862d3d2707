//! File-based concurrency primitives for the append-only history stores and
//! the snapshot writer (spec §4.8, §4.9, §5).
//!
//! `LockFile` generalizes `shipper`'s monolithic `crates/shipper/src/
//! lock.rs` (PID/hostname/timestamp lock metadata, tmp-write + fsync +
//! rename, `Drop`-released) from "one lock per publish plan" to "one lock
//! per resource path", since here multiple independent resources (two
//! history stores, the snapshot `latest.json`) each need their own lock.
//! `shipper-lock` itself ships as an empty shell with no source; this
//! promotes that module into the real crate instead.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LOCK_FILE_NAME: &str = ".lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
}

/// An exclusive lock over one resource directory, released on `Drop`. Used
/// by the history stores around index read-modify-write cycles and event
/// appends, and by the snapshot writer around its atomic replace (spec §5:
/// "writers hold exclusive locks where available ... on platforms without
/// advisory locking, writes go through tmp-file + atomic rename").
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Acquire a lock in `dir` (created if missing). Fails if a lock is
    /// already held and not stale.
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create lock dir {}", dir.display()))?;
        let lock_path = dir.join(LOCK_FILE_NAME);

        if lock_path.exists() {
            let existing = read_lock_info(&lock_path)?;
            bail!(
                "lock already held by pid {} on {} since {}",
                existing.pid,
                existing.hostname,
                existing.acquired_at
            );
        }

        write_lock_info(
            &lock_path,
            &LockInfo {
                pid: std::process::id(),
                hostname: gethostname::gethostname().to_string_lossy().to_string(),
                acquired_at: Utc::now(),
            },
        )?;

        Ok(Self { path: lock_path })
    }

    /// Acquire a lock, removing it first if its age exceeds `stale_after`
    /// (protects against a crashed process leaving a lock behind).
    pub fn acquire_with_timeout(dir: &Path, stale_after: Duration) -> Result<Self> {
        let lock_path = dir.join(LOCK_FILE_NAME);
        if lock_path.exists() {
            match read_lock_info(&lock_path) {
                Ok(info) => {
                    let age = Utc::now() - info.acquired_at;
                    if age.num_seconds().unsigned_abs() > stale_after.as_secs() {
                        fs::remove_file(&lock_path).with_context(|| {
                            format!("failed to remove stale lock {}", lock_path.display())
                        })?;
                    } else {
                        bail!(
                            "lock already held by pid {} on {} (age {:?})",
                            info.pid,
                            info.hostname,
                            age
                        );
                    }
                }
                Err(_) => {
                    fs::remove_file(&lock_path).with_context(|| {
                        format!("failed to remove corrupt lock {}", lock_path.display())
                    })?;
                }
            }
        }
        Self::acquire(dir)
    }

    pub fn release(&mut self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove lock {}", self.path.display()))?;
        }
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn write_lock_info(path: &Path, info: &LockInfo) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(info).context("failed to serialize lock info")?;
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        file.sync_all().context("failed to sync lock file")?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename lock file to {}", path.display()))?;
    Ok(())
}

fn read_lock_info(path: &Path) -> Result<LockInfo> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read lock {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse lock JSON from {}", path.display()))
}

/// Write `bytes` to `path` atomically: write to a `.tmp` sibling, `fsync`,
/// then rename over the destination. Falls back to delete-then-rename on
/// platforms that forbid replacing an existing file via rename (spec §4.9,
/// §9 "Scoped resources").
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        file.sync_all().context("failed to fsync tmp file")?;
    }
    match fs::rename(&tmp_path, path) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Best-effort fallback for platforms without atomic replace.
            let _ = fs::remove_file(path);
            fs::rename(&tmp_path, path)
                .with_context(|| format!("failed to rename {} to {}", tmp_path.display(), path.display()))
        }
    }
}

/// Run `op` with up to `retries` attempts, failing only if every attempt's
/// `op` reports the underlying resource changed mtime between read and
/// write (spec §4.8, §5: index read-modify-write with mtime-based conflict
/// detection). `op` receives the attempt number (0-indexed) and returns
/// `Ok(Some(value))` on success, `Ok(None)` to signal a detected conflict
/// that should be retried, or `Err` for a non-retryable failure.
pub fn retry_on_conflict<T>(
    retries: u32,
    mut op: impl FnMut(u32) -> Result<Option<T>>,
) -> Result<T> {
    for attempt in 0..=retries {
        match op(attempt)? {
            Some(value) => return Ok(value),
            None => {
                if attempt < retries {
                    let jitter_ms = 100 + (attempt as u64 * 100).min(400);
                    std::thread::sleep(Duration::from_millis(jitter_ms));
                }
            }
        }
    }
    bail!("history store conflict: exhausted {retries} retries")
}

/// `mtime` of a file, or `None` if it doesn't exist yet.
pub fn mtime(path: &Path) -> Option<std::time::SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_and_release_round_trip() {
        let td = tempdir().unwrap();
        let mut lock = LockFile::acquire(td.path()).unwrap();
        assert!(td.path().join(LOCK_FILE_NAME).exists());
        lock.release().unwrap();
        assert!(!td.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let td = tempdir().unwrap();
        let _lock = LockFile::acquire(td.path()).unwrap();
        assert!(LockFile::acquire(td.path()).is_err());
    }

    #[test]
    fn drop_releases_lock() {
        let td = tempdir().unwrap();
        {
            let _lock = LockFile::acquire(td.path()).unwrap();
            assert!(td.path().join(LOCK_FILE_NAME).exists());
        }
        assert!(!td.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn acquire_with_timeout_clears_stale_lock() {
        let td = tempdir().unwrap();
        let stale = LockInfo {
            pid: 99999,
            hostname: "old-host".to_string(),
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        write_lock_info(&td.path().join(LOCK_FILE_NAME), &stale).unwrap();

        let _lock = LockFile::acquire_with_timeout(td.path(), Duration::from_secs(3600)).unwrap();
        let info = read_lock_info(&td.path().join(LOCK_FILE_NAME)).unwrap();
        assert_eq!(info.pid, std::process::id());
    }

    #[test]
    fn atomic_write_creates_parent_and_content() {
        let td = tempdir().unwrap();
        let path = td.path().join("nested/out.json");
        atomic_write(&path, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn atomic_write_overwrites_existing_file() {
        let td = tempdir().unwrap();
        let path = td.path().join("out.json");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn retry_on_conflict_succeeds_after_conflicts() {
        let mut calls = 0;
        let result = retry_on_conflict(5, |_attempt| {
            calls += 1;
            if calls < 3 {
                Ok(None)
            } else {
                Ok(Some(42))
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_on_conflict_exhausts_and_errors() {
        let result: Result<i32> = retry_on_conflict(2, |_attempt| Ok(None));
        assert!(result.is_err());
    }
}
