//! Append-only history stores (spec §4.8): `ReleaseHistory` (`TAG_CHANGE`
//! events) and `DeploymentHistory` (`DEPLOYMENT` events) share one store
//! implementation parameterized by [`EventKind`].
//!
//! Layout per store, rooted at one directory:
//! - `events.jsonl` — the active append-only log.
//! - `index.json` — totals, per-project counts, environments, first/last
//!   event timestamps (spec §3 `HistoryIndex`).
//! - `archive/{YYYY-MM}.jsonl` — retired events, one file per month.
//!
//! Grounded on `shipper-events::EventLog` for the JSONL
//! append/read shape, generalized to a store-per-directory instead of an
//! in-memory `Vec` the caller serializes once. Locking and atomic index
//! writes reuse `estate-lock`.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use estate_lock::{LockFile, atomic_write, retry_on_conflict};
use estate_types::{
    DeploymentEvent, EventKind, HistoryIndex, HistoryStats, ProjectHistorySummary, RetentionInfo,
    Warning, WarningLevel, dedup_signature, event_id, reason,
};

pub const EVENTS_FILE: &str = "events.jsonl";
pub const INDEX_FILE: &str = "index.json";
pub const ARCHIVE_DIR: &str = "archive";
const BACKFILL_MARKER: &str = ".backfill-complete";

pub const DEFAULT_RETENTION_DAYS: u32 = 90;
pub const BOOTSTRAP_WINDOW_DAYS: i64 = 60;
pub const BACKFILL_WINDOW_DAYS: i64 = 60;
const INDEX_RETRIES: u32 = 5;

/// Outcome of [`HistoryStore::run_retention`].
#[derive(Debug, PartialEq, Eq)]
pub enum RetentionOutcome {
    /// A cleanup already ran within the last 24h; nothing done.
    SkippedTooSoon,
    /// Cleanup ran; `archived` events were moved out of the active log.
    Ran { archived: usize },
}

/// One append-only event store (spec §4.8). `ReleaseHistory` and
/// `DeploymentHistory` are the same type at two different directories and
/// [`EventKind`]s.
pub struct HistoryStore {
    dir: PathBuf,
    kind: EventKind,
    retention_days: u32,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>, kind: EventKind) -> Self {
        Self {
            dir: dir.into(),
            kind,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn archive_dir(&self) -> PathBuf {
        self.dir.join(ARCHIVE_DIR)
    }

    fn backfill_marker_path(&self) -> PathBuf {
        self.dir.join(BACKFILL_MARKER)
    }

    /// Read every event currently in the active log. Missing file reads as
    /// empty (spec §4.8 "empty index" bootstrap case).
    pub fn read_all(&self) -> Result<Vec<DeploymentEvent>> {
        read_jsonl(&self.events_path())
    }

    pub fn read_index(&self) -> Result<HistoryIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(HistoryIndex::empty(self.retention_days));
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read index {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse index JSON from {}", path.display()))
    }

    /// True when the store has never recorded an event (spec §4.8
    /// "Bootstrap (empty index)").
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read_index()?.stats.total_events == 0)
    }

    /// True when the store has events but its oldest is younger than the
    /// 60-day bootstrap window, and the one-time backfill hasn't run yet
    /// (spec §4.8 "one-time 60-day backfill").
    pub fn needs_backfill(&self, now: DateTime<Utc>) -> Result<bool> {
        if self.backfill_marker_path().exists() {
            return Ok(false);
        }
        let index = self.read_index()?;
        match index.stats.oldest_event {
            None => Ok(false),
            Some(oldest) => Ok(now.signed_duration_since(oldest) < Duration::days(BACKFILL_WINDOW_DAYS)),
        }
    }

    /// Marks the one-time backfill as complete so it never re-runs.
    pub fn mark_backfill_complete(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create history dir {}", self.dir.display()))?;
        atomic_write(&self.backfill_marker_path(), Utc::now().to_rfc3339().as_bytes())
    }

    /// Append `candidates`, deduplicating against what's already in the
    /// store by event `id` first, then by `(project, env, component,
    /// fromTag, toTag, at[:19])` signature (spec §4.8). Returns how many
    /// were actually appended.
    pub fn append(&self, candidates: Vec<DeploymentEvent>) -> Result<usize> {
        if candidates.is_empty() {
            return Ok(0);
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create history dir {}", self.dir.display()))?;
        let _lock = LockFile::acquire(&self.dir).context("failed to lock history store")?;

        let existing = self.read_all()?;
        let existing_ids: HashSet<&str> = existing.iter().map(|e| e.id.as_str()).collect();
        let existing_sigs: HashSet<String> = existing.iter().map(event_signature).collect();

        let mut fresh = Vec::new();
        for event in candidates {
            if existing_ids.contains(event.id.as_str()) {
                continue;
            }
            if existing_sigs.contains(&event_signature(&event)) {
                continue;
            }
            fresh.push(event);
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        append_jsonl(&self.events_path(), &fresh)?;

        let all = self.read_all()?;
        self.rewrite_index(&all, None)?;

        Ok(fresh.len())
    }

    fn rewrite_index(&self, events: &[DeploymentEvent], last_cleanup: Option<DateTime<Utc>>) -> Result<()> {
        let index_path = self.index_path();
        retry_on_conflict(INDEX_RETRIES, |_attempt| {
            let before_mtime = estate_lock::mtime(&index_path);
            let prior = self.read_index()?;
            let mut next = build_index(events, self.retention_days);
            next.retention.last_cleanup = last_cleanup.or(prior.retention.last_cleanup);
            let bytes = serde_json::to_vec_pretty(&next).context("failed to serialize index")?;
            atomic_write(&index_path, &bytes)?;
            let after_mtime = estate_lock::mtime(&index_path);
            if before_mtime.is_some() && before_mtime == after_mtime {
                return Ok(None);
            }
            Ok(Some(()))
        })
    }

    /// Cleanup (spec §4.8, §5): move events older than `retentionDays` into
    /// a monthly archive file and rewrite the active log/index. Runs at
    /// most once per 24h, tracked via `index.retention.lastCleanup`.
    pub fn run_retention(&self, now: DateTime<Utc>) -> Result<RetentionOutcome> {
        let index = self.read_index()?;
        if let Some(last) = index.retention.last_cleanup {
            if now.signed_duration_since(last) < Duration::hours(24) {
                return Ok(RetentionOutcome::SkippedTooSoon);
            }
        }

        let _lock = LockFile::acquire(&self.dir).context("failed to lock history store")?;
        let all = self.read_all()?;
        let cutoff = now - Duration::days(self.retention_days as i64);
        let (keep, archive): (Vec<_>, Vec<_>) = all.into_iter().partition(|e| e.at >= cutoff);

        if !archive.is_empty() {
            let mut by_month: HashMap<String, Vec<DeploymentEvent>> = HashMap::new();
            for event in archive.iter() {
                by_month.entry(event.at.format("%Y-%m").to_string()).or_default().push(event.clone());
            }
            fs::create_dir_all(self.archive_dir())
                .with_context(|| format!("failed to create archive dir {}", self.archive_dir().display()))?;
            for (month, events) in by_month {
                let path = self.archive_dir().join(format!("{month}.jsonl"));
                append_jsonl(&path, &events)?;
            }
        }

        let bytes = keep
            .iter()
            .map(|e| serde_json::to_string(e).map(|s| s + "\n"))
            .collect::<std::result::Result<String, _>>()
            .context("failed to serialize retained events")?;
        atomic_write(&self.events_path(), bytes.as_bytes())?;

        self.rewrite_index(&keep, Some(now))?;

        Ok(RetentionOutcome::Ran { archived: archive.len() })
    }

    /// Migrate a legacy single-document release history (spec §4.8
    /// "Migration"): stream its `projects[].events[]` into the append-only
    /// log, derive the index, then rename the legacy file to a `.bak`
    /// sibling so the migration only ever runs once.
    pub fn migrate_legacy(&self, legacy_path: &Path) -> Result<usize> {
        if !legacy_path.exists() {
            return Ok(0);
        }
        let content = fs::read_to_string(legacy_path)
            .with_context(|| format!("failed to read legacy history {}", legacy_path.display()))?;
        let doc: LegacyReleaseHistory = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse legacy history {}", legacy_path.display()))?;

        let mut events = Vec::new();
        for project in doc.projects.values() {
            events.extend(project.events.iter().cloned());
        }

        let appended = self.append(events)?;

        let backup = legacy_path.with_extension("bak");
        fs::rename(legacy_path, &backup)
            .with_context(|| format!("failed to rename legacy history to {}", backup.display()))?;

        Ok(appended)
    }
}

fn event_signature(event: &DeploymentEvent) -> String {
    dedup_signature(
        &event.project_key,
        &event.env_key,
        &event.component,
        &event.from_tag,
        &event.to_tag,
        event.at,
    )
}

fn build_index(events: &[DeploymentEvent], retention_days: u32) -> HistoryIndex {
    let mut projects: HashMap<String, ProjectHistorySummary> = HashMap::new();
    let mut oldest: Option<DateTime<Utc>> = None;
    let mut newest: Option<DateTime<Utc>> = None;

    for event in events {
        oldest = Some(oldest.map_or(event.at, |o| o.min(event.at)));
        newest = Some(newest.map_or(event.at, |n| n.max(event.at)));

        let summary = projects.entry(event.project_key.clone()).or_default();
        summary.event_count += 1;
        summary.first_event_at = Some(summary.first_event_at.map_or(event.at, |f| f.min(event.at)));
        summary.last_event_at = Some(summary.last_event_at.map_or(event.at, |l| l.max(event.at)));
        if !summary.environments.contains(&event.env_key) {
            summary.environments.push(event.env_key.clone());
        }
    }
    for summary in projects.values_mut() {
        summary.environments.sort();
    }

    HistoryIndex {
        version: 1,
        generated_at: Utc::now(),
        retention: RetentionInfo { days: retention_days, last_cleanup: None },
        stats: HistoryStats {
            total_events: events.len() as u64,
            oldest_event: oldest,
            newest_event: newest,
        },
        projects,
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<DeploymentEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("failed to read line from {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: DeploymentEvent = serde_json::from_str(&line)
            .with_context(|| format!("failed to parse event JSON from line: {line}"))?;
        events.push(event);
    }
    Ok(events)
}

fn append_jsonl(path: &Path, events: &[DeploymentEvent]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    for event in events {
        let line = serde_json::to_string(event).context("failed to serialize event")?;
        writeln!(writer, "{line}").context("failed to write event line")?;
    }
    writer.flush().context("failed to flush events file")?;
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct LegacyProjectHistory {
    #[serde(default)]
    events: Vec<DeploymentEvent>,
}

#[derive(Debug, serde::Deserialize)]
struct LegacyReleaseHistory {
    #[serde(default)]
    projects: HashMap<String, LegacyProjectHistory>,
}

/// One component's tag/build state at a point in a snapshot run, the input
/// to [`derive_tag_change_events`] (spec §4.8 "Event derivation").
#[derive(Debug, Clone)]
pub struct ComponentSnapshotFacts {
    pub project_key: String,
    pub env_key: String,
    pub env_name: String,
    pub component: String,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub tag: String,
    pub build: String,
    pub deployed_at: Option<DateTime<Utc>>,
    pub commit_sha: Option<String>,
    pub commit_url: Option<String>,
    pub kustomization_url: Option<String>,
}

fn key(f: &ComponentSnapshotFacts) -> (String, String, String) {
    (f.project_key.clone(), f.env_key.clone(), f.component.clone())
}

/// For every `(project, env, component)` present in both `prev` and
/// `current` with a non-empty, changed tag, emit one event (spec §4.8).
/// The event's `at` is the current component's `deployedAt`; when absent,
/// a warning is emitted and the run's `generatedAt` is used instead.
pub fn derive_tag_change_events(
    prev: &[ComponentSnapshotFacts],
    current: &[ComponentSnapshotFacts],
    kind: EventKind,
    bootstrap: bool,
    generated_at: DateTime<Utc>,
) -> (Vec<DeploymentEvent>, Vec<Warning>) {
    let prev_by_key: HashMap<_, _> = prev.iter().map(|f| (key(f), f)).collect();
    let mut events = Vec::new();
    let mut warnings = Vec::new();

    for cur in current {
        let Some(prior) = prev_by_key.get(&key(cur)) else {
            continue;
        };
        if prior.tag.is_empty() || cur.tag.is_empty() || prior.tag == cur.tag {
            continue;
        }

        let at = cur.deployed_at.unwrap_or(generated_at);
        if cur.deployed_at.is_none() {
            warnings.push(
                Warning::new(
                    WarningLevel::Warn,
                    "component",
                    reason::NO_TAG_FOUND,
                    "history",
                    format!(
                        "{}/{}/{} tag change {} -> {} has no deployedAt; using run generatedAt",
                        cur.project_key, cur.env_key, cur.component, prior.tag, cur.tag
                    ),
                )
                .with_project(cur.project_key.clone())
                .with_env(cur.env_key.clone())
                .with_component(cur.component.clone()),
            );
        }

        let id = event_id(
            cur.commit_sha.as_deref(),
            &cur.project_key,
            &cur.env_key,
            &cur.component,
            &cur.tag,
            at,
            bootstrap,
        );

        events.push(DeploymentEvent {
            id,
            kind,
            bootstrap,
            project_key: cur.project_key.clone(),
            env_key: cur.env_key.clone(),
            env_name: cur.env_name.clone(),
            component: cur.component.clone(),
            repo: cur.repo.clone(),
            branch: cur.branch.clone(),
            from_tag: prior.tag.clone(),
            to_tag: cur.tag.clone(),
            from_build: prior.build.clone(),
            to_build: cur.build.clone(),
            at,
            by: None,
            commit_url: cur.commit_url.clone(),
            kustomization_url: cur.kustomization_url.clone(),
            links: Vec::new(),
        });
    }

    (events, warnings)
}

/// One reconstructed bootstrap event (spec §4.8 "Bootstrap"): built by the
/// caller from a pair of adjacent commits touching a kustomization path
/// (via `estate-vcs`'s commit listing and `estate-kustomize`'s signature
/// comparison), since scanning commit history is an adapter concern this
/// crate deliberately stays free of.
#[derive(Debug, Clone)]
pub struct BootstrapCandidate {
    pub project_key: String,
    pub env_key: String,
    pub env_name: String,
    pub component: String,
    pub repo: Option<String>,
    pub from_tag: String,
    pub to_tag: String,
    pub from_build: String,
    pub to_build: String,
    pub at: DateTime<Utc>,
    pub commit_sha: Option<String>,
    pub commit_url: Option<String>,
    pub kustomization_url: Option<String>,
}

/// Bootstrap reconstruction diffs infra-repo kustomization commits, which
/// carry no CI branch information, so bootstrap events never populate
/// [`DeploymentEvent::branch`].
pub fn build_bootstrap_event(candidate: BootstrapCandidate) -> DeploymentEvent {
    let id = event_id(
        candidate.commit_sha.as_deref(),
        &candidate.project_key,
        &candidate.env_key,
        &candidate.component,
        &candidate.to_tag,
        candidate.at,
        true,
    );
    DeploymentEvent {
        id,
        kind: EventKind::Deployment,
        bootstrap: true,
        project_key: candidate.project_key,
        env_key: candidate.env_key,
        env_name: candidate.env_name,
        component: candidate.component,
        repo: candidate.repo,
        branch: None,
        from_tag: candidate.from_tag,
        to_tag: candidate.to_tag,
        from_build: candidate.from_build,
        to_build: candidate.to_build,
        at: candidate.at,
        by: None,
        commit_url: candidate.commit_url,
        kustomization_url: candidate.kustomization_url,
        links: Vec::new(),
    }
}

/// Cutoff for bootstrap commit scanning (spec §4.8: "reconstruct up to 60
/// days of history").
pub fn bootstrap_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(BOOTSTRAP_WINDOW_DAYS)
}
