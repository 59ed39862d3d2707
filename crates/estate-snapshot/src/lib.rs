//! Snapshot Writer (spec §4.9): the only place that touches `data/
//! latest.json`. One atomic replace plus an append-only, bounded archive
//! copy under `data/history/`.
//!
//! The replace itself is `estate-lock::atomic_write`, the same tmp-file +
//! fsync + rename primitive the history stores use for their index;
//! `LockFile` guards the directory the same way it guards a history
//! store's read-modify-write cycle, so a scheduler run and a concurrent API
//! read never observe a half-written document (spec §5).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use estate_lock::{LockFile, atomic_write};
use estate_types::Snapshot;

pub const LATEST_FILE: &str = "latest.json";
pub const HISTORY_DIR: &str = "history";
pub const DEFAULT_KEEP: usize = 100;

/// Writes [`Snapshot`] documents to one data directory (spec §4.9, §6
/// `data/latest.json`).
pub struct SnapshotWriter {
    data_dir: PathBuf,
    keep: usize,
}

impl SnapshotWriter {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), keep: DEFAULT_KEEP }
    }

    pub fn with_keep(mut self, keep: usize) -> Self {
        self.keep = keep;
        self
    }

    fn latest_path(&self) -> PathBuf {
        self.data_dir.join(LATEST_FILE)
    }

    fn history_dir(&self) -> PathBuf {
        self.data_dir.join(HISTORY_DIR)
    }

    /// Read the previously written snapshot, if any (spec §4.7: the
    /// persistence floor needs the previous run's tickets; spec §4.8's tag
    /// change detection needs the previous run's component facts). Absent
    /// or unparsable data reads as `None` rather than failing the run.
    pub fn read_latest(&self) -> Option<Snapshot> {
        let path = self.latest_path();
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse previous snapshot, ignoring");
                None
            }
        }
    }

    /// Write `snapshot` as the new `data/latest.json` and archive a copy
    /// under `data/history/` (spec §4.9): write to `{path}.tmp`, fsync,
    /// then replace; archive stem is `generatedAt` with `:`/`.` replaced by
    /// `-`; only the newest `keep` archived snapshots are retained.
    pub fn write(&self, snapshot: &Snapshot) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create data dir {}", self.data_dir.display()))?;
        let _lock = LockFile::acquire(&self.data_dir).context("failed to lock snapshot data dir")?;

        let bytes = serde_json::to_vec_pretty(snapshot).context("failed to serialize snapshot")?;
        atomic_write(&self.latest_path(), &bytes).context("failed to replace latest.json")?;

        self.archive(snapshot, &bytes)?;
        Ok(())
    }

    fn archive(&self, snapshot: &Snapshot, bytes: &[u8]) -> Result<()> {
        let history_dir = self.history_dir();
        fs::create_dir_all(&history_dir)
            .with_context(|| format!("failed to create history dir {}", history_dir.display()))?;

        let archive_path = history_dir.join(format!("{}.json", snapshot.archive_stem()));
        atomic_write(&archive_path, bytes)
            .with_context(|| format!("failed to write archive file {}", archive_path.display()))?;

        self.prune_archive(&history_dir)
    }

    /// Keep only the newest `keep` archived snapshots, oldest by file name
    /// first since [`Snapshot::archive_stem`] is an RFC3339 timestamp and
    /// sorts chronologically as a string.
    fn prune_archive(&self, history_dir: &Path) -> Result<()> {
        let mut entries: Vec<PathBuf> = fs::read_dir(history_dir)
            .with_context(|| format!("failed to read history dir {}", history_dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        entries.sort();

        if entries.len() <= self.keep {
            return Ok(());
        }
        let excess = entries.len() - self.keep;
        for stale in &entries[..excess] {
            fs::remove_file(stale)
                .with_context(|| format!("failed to remove stale archive {}", stale.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tempfile::tempdir;

    fn snapshot_at(at: &str) -> Snapshot {
        let generated_at: DateTime<Utc> = at.parse().unwrap();
        Snapshot::new(generated_at)
    }

    #[test]
    fn write_creates_latest_and_archive_copy() {
        let td = tempdir().unwrap();
        let writer = SnapshotWriter::new(td.path());
        let snapshot = snapshot_at("2026-01-19T12:00:00Z");
        writer.write(&snapshot).unwrap();

        assert!(td.path().join(LATEST_FILE).exists());
        let archived: Vec<_> = fs::read_dir(td.path().join(HISTORY_DIR)).unwrap().collect();
        assert_eq!(archived.len(), 1);
    }

    #[test]
    fn read_latest_round_trips() {
        let td = tempdir().unwrap();
        let writer = SnapshotWriter::new(td.path());
        let snapshot = snapshot_at("2026-01-19T12:00:00Z");
        writer.write(&snapshot).unwrap();

        let read_back = writer.read_latest().unwrap();
        assert_eq!(read_back.generated_at, snapshot.generated_at);
    }

    #[test]
    fn read_latest_is_none_when_absent() {
        let td = tempdir().unwrap();
        let writer = SnapshotWriter::new(td.path());
        assert!(writer.read_latest().is_none());
    }

    #[test]
    fn archive_is_pruned_to_keep_limit() {
        let td = tempdir().unwrap();
        let writer = SnapshotWriter::new(td.path()).with_keep(2);
        writer.write(&snapshot_at("2026-01-01T00:00:00Z")).unwrap();
        writer.write(&snapshot_at("2026-01-02T00:00:00Z")).unwrap();
        writer.write(&snapshot_at("2026-01-03T00:00:00Z")).unwrap();

        let mut names: Vec<String> = fs::read_dir(td.path().join(HISTORY_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].starts_with("2026-01-02"));
        assert!(names[1].starts_with("2026-01-03"));
    }

    #[test]
    fn write_overwrites_latest_on_subsequent_runs() {
        let td = tempdir().unwrap();
        let writer = SnapshotWriter::new(td.path());
        writer.write(&snapshot_at("2026-01-01T00:00:00Z")).unwrap();
        writer.write(&snapshot_at("2026-01-02T00:00:00Z")).unwrap();

        let latest = writer.read_latest().unwrap();
        assert_eq!(latest.generated_at.to_rfc3339(), "2026-01-02T00:00:00+00:00");
    }
}
