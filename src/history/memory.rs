//! In-process store with an optional append-only journal on disk.
//!
//! Each write is appended to `<path>.journal` as one JSON line and synced
//! before it becomes visible in memory. Every `compact_every` writes the full
//! state is written to `<path>` (temp file, then rename), records past the
//! retention bound are pruned and the journal is truncated. Opening loads the
//! snapshot and replays the journal entries newer than it.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::DatabaseError;
use crate::history::{
    ForecastFilter, ForecastRecord, ForecastStore, HistoryStore, LedgerStore, Order, OutcomeRecord,
    Resolution, SessionStat, StatsStore,
};

/// Outcomes, and resolved forecasts, kept by default.
pub const DEFAULT_RETENTION: usize = 20_000;

/// Journal entries written between compactions by default.
pub const DEFAULT_COMPACT_EVERY: usize = 500;

/// Retention and compaction settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Newest outcomes kept, and newest resolved forecasts kept. Pending
    /// forecasts are never pruned.
    pub retention: usize,
    /// Writes between compactions.
    pub compact_every: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            compact_every: DEFAULT_COMPACT_EVERY,
        }
    }
}

/// Issue ids order by length, then lexically, so `…999` sorts before `…1000`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IssueKey(String);

impl IssueKey {
    fn of(issue_id: &str) -> Self {
        Self(issue_id.to_string())
    }
}

impl Ord for IssueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for IssueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One journaled write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Entry {
    Outcome {
        record: OutcomeRecord,
    },
    Forecast {
        record: ForecastRecord,
    },
    Resolve {
        issue_id: String,
        resolution: Resolution,
        at: DateTime<Utc>,
        /// Also add the result to the session totals.
        counted: bool,
    },
    Count {
        wins: u64,
        losses: u64,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalLine<E> {
    seq: u64,
    entry: E,
}

#[derive(Debug, Default)]
struct Snapshot {
    /// Sequence number of the last applied entry.
    seq: u64,
    history: BTreeMap<IssueKey, OutcomeRecord>,
    forecasts: BTreeMap<IssueKey, ForecastRecord>,
    stats: SessionStat,
}

impl Snapshot {
    /// Whether applying `entry` would change anything.
    fn accepts(&self, entry: &Entry) -> bool {
        match entry {
            Entry::Outcome { record } => !self.history.contains_key(&IssueKey::of(&record.issue_id)),
            Entry::Forecast { record } => {
                !self.forecasts.contains_key(&IssueKey::of(&record.issue_id))
            }
            Entry::Resolve { issue_id, .. } => self
                .forecasts
                .get(&IssueKey::of(issue_id))
                .is_some_and(ForecastRecord::is_pending),
            Entry::Count { .. } => true,
        }
    }

    fn apply(&mut self, entry: Entry) {
        match entry {
            Entry::Outcome { record } => {
                self.history
                    .entry(IssueKey::of(&record.issue_id))
                    .or_insert(record);
            }
            Entry::Forecast { record } => {
                self.forecasts
                    .entry(IssueKey::of(&record.issue_id))
                    .or_insert(record);
            }
            Entry::Resolve {
                issue_id,
                resolution,
                at,
                counted,
            } => {
                let resolved = self
                    .forecasts
                    .get_mut(&IssueKey(issue_id))
                    .is_some_and(|record| record.resolve(&resolution, at));
                if resolved && counted {
                    let (wins, losses) = resolution.tally();
                    self.stats.record(wins, losses, at);
                }
            }
            Entry::Count { wins, losses, at } => self.stats.record(wins, losses, at),
        }
    }

    /// Drop the oldest outcomes and resolved forecasts beyond `retention`.
    fn prune(&mut self, retention: usize) -> usize {
        let mut pruned = 0;
        while self.history.len() > retention {
            self.history.pop_first();
            pruned += 1;
        }

        let resolved: Vec<IssueKey> = self
            .forecasts
            .iter()
            .filter(|(_, record)| !record.is_pending())
            .map(|(key, _)| key.clone())
            .collect();
        let excess = resolved.len().saturating_sub(retention);
        for key in resolved.into_iter().take(excess) {
            self.forecasts.remove(&key);
            pruned += 1;
        }
        pruned
    }
}

/// On-disk snapshot layout.
#[derive(Debug, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    seq: u64,
    #[serde(default)]
    history: Vec<OutcomeRecord>,
    #[serde(default)]
    forecasts: Vec<ForecastRecord>,
    #[serde(default)]
    stats: SessionStat,
}

#[derive(Serialize)]
struct SnapshotView<'a> {
    seq: u64,
    history: Vec<&'a OutcomeRecord>,
    forecasts: Vec<&'a ForecastRecord>,
    stats: &'a SessionStat,
}

impl From<SnapshotFile> for Snapshot {
    fn from(file: SnapshotFile) -> Self {
        let mut snapshot = Snapshot {
            seq: file.seq,
            ..Snapshot::default()
        };
        for record in file.history {
            snapshot
                .history
                .entry(IssueKey::of(&record.issue_id))
                .or_insert(record);
        }
        for record in file.forecasts {
            snapshot
                .forecasts
                .entry(IssueKey::of(&record.issue_id))
                .or_insert(record);
        }
        snapshot.stats = file.stats;
        snapshot.stats.total = snapshot.stats.wins + snapshot.stats.losses;
        snapshot
    }
}

#[derive(Debug, Default)]
struct State {
    snapshot: Snapshot,
    journal: Option<tokio::fs::File>,
    /// The journal may end mid-line; the next append starts a fresh line.
    torn: bool,
    /// Entries written since the last compaction.
    since_compaction: usize,
}

impl State {
    async fn append(&mut self, path: &Path, line: &JournalLine<&Entry>) -> Result<(), DatabaseError> {
        let mut bytes = Vec::new();
        if self.torn {
            bytes.push(b'\n');
        }
        serde_json::to_writer(&mut bytes, line)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        bytes.push(b'\n');

        let mut file = match self.journal.take() {
            Some(file) => file,
            None => open_journal(path).await?,
        };
        let written = async {
            file.write_all(&bytes).await?;
            file.sync_data().await
        }
        .await;
        match written {
            Ok(()) => {
                self.journal = Some(file);
                self.torn = false;
                Ok(())
            }
            Err(e) => {
                self.torn = true;
                Err(e.into())
            }
        }
    }

    async fn compact(&mut self, path: Option<&Path>, retention: usize) -> Result<(), DatabaseError> {
        self.since_compaction = 0;
        let pruned = self.snapshot.prune(retention);
        if let Some(path) = path {
            write_snapshot(path, &self.snapshot).await?;
            // Everything journaled so far is in the snapshot now.
            self.journal = None;
            tokio::fs::File::create(journal_path(path)).await?;
            self.torn = false;
        }
        tracing::debug!(seq = self.snapshot.seq, pruned, "Compacted store");
        Ok(())
    }
}

/// Implements every store contract behind one lock.
///
/// A write that fails to reach the journal leaves memory unchanged.
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<State>,
    path: Option<PathBuf>,
    options: StoreOptions,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store.
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    /// Volatile store with explicit retention.
    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            inner: RwLock::new(State::default()),
            path: None,
            options,
        }
    }

    /// Store persisted at `path`, loaded if it exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DatabaseError> {
        Self::open_with(path, StoreOptions::default()).await
    }

    pub async fn open_with(
        path: impl Into<PathBuf>,
        options: StoreOptions,
    ) -> Result<Self, DatabaseError> {
        let path = path.into();
        let mut snapshot = load_snapshot(&path).await?;
        let (replayed, torn) = replay(&journal_path(&path), &mut snapshot).await?;
        tracing::info!(
            path = %path.display(),
            history = snapshot.history.len(),
            forecasts = snapshot.forecasts.len(),
            replayed,
            "Opened store"
        );
        Ok(Self {
            inner: RwLock::new(State {
                snapshot,
                journal: None,
                torn,
                since_compaction: replayed,
            }),
            path: Some(path),
            options,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Journal `entry`, apply it, then return `read` of the new state.
    ///
    /// `None` when the entry would change nothing; nothing is written then.
    async fn commit<T>(
        &self,
        entry: Entry,
        read: impl FnOnce(&Snapshot) -> T,
    ) -> Result<Option<T>, DatabaseError> {
        let mut guard = self.inner.write().await;
        let state = &mut *guard;
        if !state.snapshot.accepts(&entry) {
            return Ok(None);
        }

        let seq = state.snapshot.seq + 1;
        if let Some(path) = &self.path
            && let Err(e) = state.append(path, &JournalLine { seq, entry: &entry }).await
        {
            // A partly written line must never shadow a later entry.
            state.snapshot.seq = seq;
            return Err(e);
        }
        state.snapshot.seq = seq;
        state.snapshot.apply(entry);
        state.since_compaction += 1;
        let value = read(&state.snapshot);

        if state.since_compaction >= self.options.compact_every.max(1)
            && let Err(e) = state
                .compact(self.path.as_deref(), self.options.retention)
                .await
        {
            tracing::warn!(error = %e, "Store compaction failed, keeping journal");
        }
        Ok(Some(value))
    }
}

fn journal_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".journal");
    PathBuf::from(name)
}

async fn create_parent(path: &Path) -> Result<(), DatabaseError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

async fn open_journal(path: &Path) -> Result<tokio::fs::File, DatabaseError> {
    create_parent(path).await?;
    Ok(tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(journal_path(path))
        .await?)
}

async fn load_snapshot(path: &Path) -> Result<Snapshot, DatabaseError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let file: SnapshotFile =
                serde_json::from_str(&text).map_err(|e| DatabaseError::Snapshot {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            Ok(Snapshot::from(file))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::default()),
        Err(e) => Err(e.into()),
    }
}

async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), DatabaseError> {
    let view = SnapshotView {
        seq: snapshot.seq,
        history: snapshot.history.values().collect(),
        forecasts: snapshot.forecasts.values().collect(),
        stats: &snapshot.stats,
    };
    let json = serde_json::to_vec(&view).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    create_parent(path).await?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Apply journal entries newer than the snapshot. Returns how many were
/// applied and whether the journal ends mid-line.
async fn replay(journal: &Path, snapshot: &mut Snapshot) -> Result<(usize, bool), DatabaseError> {
    let text = match tokio::fs::read_to_string(journal).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, false)),
        Err(e) => return Err(e.into()),
    };

    let mut applied = 0;
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalLine<Entry>>(line) {
            Ok(JournalLine { seq, entry }) if seq > snapshot.seq => {
                snapshot.seq = seq;
                snapshot.apply(entry);
                applied += 1;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "Skipping unreadable journal entry");
            }
        }
    }
    Ok((applied, !text.is_empty() && !text.ends_with('\n')))
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append_if_absent(&self, record: OutcomeRecord) -> Result<bool, DatabaseError> {
        let inserted = self.commit(Entry::Outcome { record }, |_| ()).await?;
        Ok(inserted.is_some())
    }

    async fn query(&self, limit: usize, order: Order) -> Result<Vec<OutcomeRecord>, DatabaseError> {
        let state = self.inner.read().await;
        let mut records: Vec<OutcomeRecord> = state
            .snapshot
            .history
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect();
        if order == Order::OldestFirst {
            records.reverse();
        }
        Ok(records)
    }

    async fn find_by_id(&self, issue_id: &str) -> Result<Option<OutcomeRecord>, DatabaseError> {
        let state = self.inner.read().await;
        Ok(state.snapshot.history.get(&IssueKey::of(issue_id)).cloned())
    }
}

#[async_trait]
impl ForecastStore for MemoryStore {
    async fn create_if_absent(&self, record: ForecastRecord) -> Result<bool, DatabaseError> {
        let created = self.commit(Entry::Forecast { record }, |_| ()).await?;
        Ok(created.is_some())
    }

    async fn query(
        &self,
        filter: ForecastFilter,
        limit: usize,
    ) -> Result<Vec<ForecastRecord>, DatabaseError> {
        let state = self.inner.read().await;
        Ok(state
            .snapshot
            .forecasts
            .values()
            .rev()
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get(&self, issue_id: &str) -> Result<Option<ForecastRecord>, DatabaseError> {
        let state = self.inner.read().await;
        Ok(state.snapshot.forecasts.get(&IssueKey::of(issue_id)).cloned())
    }

    async fn update_once(
        &self,
        issue_id: &str,
        resolution: Resolution,
    ) -> Result<bool, DatabaseError> {
        let entry = Entry::Resolve {
            issue_id: issue_id.to_string(),
            resolution,
            at: Utc::now(),
            counted: false,
        };
        Ok(self.commit(entry, |_| ()).await?.is_some())
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn increment(&self, wins: u64, losses: u64) -> Result<SessionStat, DatabaseError> {
        let entry = Entry::Count {
            wins,
            losses,
            at: Utc::now(),
        };
        let stat = self.commit(entry, |s| s.stats.clone()).await?;
        Ok(stat.unwrap_or_default())
    }

    async fn current(&self) -> Result<SessionStat, DatabaseError> {
        Ok(self.inner.read().await.snapshot.stats.clone())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn resolve_and_count(
        &self,
        issue_id: &str,
        resolution: Resolution,
    ) -> Result<Option<SessionStat>, DatabaseError> {
        let entry = Entry::Resolve {
            issue_id: issue_id.to_string(),
            resolution,
            at: Utc::now(),
            counted: true,
        };
        self.commit(entry, |s| s.stats.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Category, Outcome};
    use pretty_assertions::assert_eq;

    fn outcome(id: &str, value: u8) -> OutcomeRecord {
        OutcomeRecord::new(id, value, Utc::now()).unwrap()
    }

    fn forecast(id: &str, value: u8) -> ForecastRecord {
        ForecastRecord {
            issue_id: id.to_string(),
            predicted_value: value,
            predicted_category: Category::of(value),
            confidence: 0.6,
            outcome: Outcome::Pending,
            actual_value: None,
            actual_category: None,
            created_at: Utc::now(),
            resolved_at: None,
            model_tier: "compact".to_string(),
            pattern: None,
        }
    }

    fn ids(records: &[OutcomeRecord]) -> Vec<&str> {
        records.iter().map(|r| r.issue_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_append_is_deduplicated() {
        let store = MemoryStore::new();
        assert!(store.append_if_absent(outcome("001", 1)).await.unwrap());
        assert!(!store.append_if_absent(outcome("001", 9)).await.unwrap());
        let found = store.find_by_id("001").await.unwrap().unwrap();
        assert_eq!(found.value, 1);
    }

    #[tokio::test]
    async fn test_query_orders_and_limits() {
        let store = MemoryStore::new();
        for (i, id) in ["003", "001", "002", "004"].into_iter().enumerate() {
            store.append_if_absent(outcome(id, i as u8)).await.unwrap();
        }
        let newest = HistoryStore::query(&store, 3, Order::NewestFirst).await.unwrap();
        assert_eq!(ids(&newest), vec!["004", "003", "002"]);
        let oldest = HistoryStore::query(&store, 3, Order::OldestFirst).await.unwrap();
        assert_eq!(ids(&oldest), vec!["002", "003", "004"]);
    }

    #[tokio::test]
    async fn test_longer_ids_sort_after_shorter() {
        let store = MemoryStore::new();
        store.append_if_absent(outcome("1000", 1)).await.unwrap();
        store.append_if_absent(outcome("999", 2)).await.unwrap();
        let newest = HistoryStore::query(&store, 1, Order::NewestFirst).await.unwrap();
        assert_eq!(ids(&newest), vec!["1000"]);
    }

    #[tokio::test]
    async fn test_create_if_absent_keeps_first() {
        let store = MemoryStore::new();
        assert!(store.create_if_absent(forecast("005", 2)).await.unwrap());
        assert!(!store.create_if_absent(forecast("005", 8)).await.unwrap());
        let all = ForecastStore::query(&store, ForecastFilter::All, 10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].predicted_value, 2);
    }

    #[tokio::test]
    async fn test_update_once_resolves_only_pending() {
        let store = MemoryStore::new();
        store.create_if_absent(forecast("007", 4)).await.unwrap();
        let resolution = Resolution::judge(4, &outcome("007", 4));

        assert!(store.update_once("007", resolution).await.unwrap());
        assert!(!store.update_once("007", resolution).await.unwrap());
        assert!(!store.update_once("missing", resolution).await.unwrap());

        let pending = ForecastStore::query(&store, ForecastFilter::Pending, 10)
            .await
            .unwrap();
        assert!(pending.is_empty());
        let resolved = ForecastStore::query(&store, ForecastFilter::Resolved, 10)
            .await
            .unwrap();
        assert_eq!(resolved[0].outcome, Outcome::Win);
        assert!(resolved[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_stats_increment() {
        let store = MemoryStore::new();
        store.increment(1, 0).await.unwrap();
        let stat = store.increment(0, 1).await.unwrap();
        assert_eq!((stat.wins, stat.losses, stat.total), (1, 1, 2));
        assert_eq!(store.current().await.unwrap(), stat);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = MemoryStore::open(&path).await.unwrap();
        store.append_if_absent(outcome("010", 6)).await.unwrap();
        store.create_if_absent(forecast("011", 3)).await.unwrap();
        store.increment(0, 1).await.unwrap();
        drop(store);

        let reopened = MemoryStore::open(&path).await.unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        assert_eq!(reopened.find_by_id("010").await.unwrap().unwrap().value, 6);
        let forecasts = ForecastStore::query(&reopened, ForecastFilter::Pending, 5)
            .await
            .unwrap();
        assert_eq!(forecasts[0].issue_id, "011");
        assert_eq!(reopened.current().await.unwrap().losses, 1);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        let err = MemoryStore::open(&path).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Snapshot { .. }));
    }

    fn journal_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(journal_path(path))
            .unwrap_or_default()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    fn options(retention: usize, compact_every: usize) -> StoreOptions {
        StoreOptions {
            retention,
            compact_every,
        }
    }

    #[tokio::test]
    async fn test_writes_go_to_journal_until_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = MemoryStore::open_with(&path, options(100, 10)).await.unwrap();
        store.append_if_absent(outcome("001", 1)).await.unwrap();
        store.append_if_absent(outcome("001", 1)).await.unwrap();
        store.append_if_absent(outcome("002", 2)).await.unwrap();

        assert!(!path.exists());
        assert_eq!(journal_lines(&path).len(), 2, "duplicates are not journaled");
        drop(store);

        let reopened = MemoryStore::open(&path).await.unwrap();
        let all = HistoryStore::query(&reopened, 10, Order::OldestFirst).await.unwrap();
        assert_eq!(ids(&all), vec!["001", "002"]);
    }

    #[tokio::test]
    async fn test_compaction_writes_snapshot_and_truncates_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = MemoryStore::open_with(&path, options(100, 3)).await.unwrap();
        for id in ["001", "002", "003"] {
            store.append_if_absent(outcome(id, 5)).await.unwrap();
        }
        assert!(path.exists());
        assert!(journal_lines(&path).is_empty());

        store.append_if_absent(outcome("004", 5)).await.unwrap();
        let lines = journal_lines(&path);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("{\"seq\":4,"));
        drop(store);

        let reopened = MemoryStore::open_with(&path, options(100, 3)).await.unwrap();
        let all = HistoryStore::query(&reopened, 10, Order::OldestFirst).await.unwrap();
        assert_eq!(ids(&all), vec!["001", "002", "003", "004"]);
        reopened.append_if_absent(outcome("005", 5)).await.unwrap();
        assert!(journal_lines(&path)[1].starts_with("{\"seq\":5,"));
    }

    #[tokio::test]
    async fn test_retention_keeps_newest_and_all_pending() {
        let store = MemoryStore::with_options(options(2, 1));
        for id in ["001", "002", "003", "004"] {
            store.append_if_absent(outcome(id, 1)).await.unwrap();
        }
        let history = HistoryStore::query(&store, 10, Order::OldestFirst).await.unwrap();
        assert_eq!(ids(&history), vec!["003", "004"]);

        for id in ["101", "102", "103", "104"] {
            store.create_if_absent(forecast(id, 1)).await.unwrap();
        }
        for id in ["101", "102", "103"] {
            let resolution = Resolution::judge(1, &outcome(id, 2));
            store.update_once(id, resolution).await.unwrap();
        }

        let forecasts = ForecastStore::query(&store, ForecastFilter::All, 10).await.unwrap();
        let kept: Vec<&str> = forecasts.iter().map(|f| f.issue_id.as_str()).collect();
        assert_eq!(kept, vec!["104", "103", "102"]);
        assert!(forecasts[0].is_pending());
    }

    #[tokio::test]
    async fn test_replay_skips_entries_in_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let snapshot = serde_json::json!({
            "seq": 2,
            "history": [outcome("001", 1)],
            "forecasts": [],
            "stats": { "wins": 1, "losses": 0, "total": 1, "updatedAt": null },
        });
        tokio::fs::write(&path, snapshot.to_string()).await.unwrap();

        let count = Entry::Count {
            wins: 1,
            losses: 0,
            at: Utc::now(),
        };
        let old = serde_json::to_string(&JournalLine { seq: 2, entry: &count }).unwrap();
        let new = serde_json::to_string(&JournalLine { seq: 3, entry: &count }).unwrap();
        tokio::fs::write(journal_path(&path), format!("{old}\n{new}\n"))
            .await
            .unwrap();

        let store = MemoryStore::open(&path).await.unwrap();
        assert_eq!(store.current().await.unwrap().wins, 2);
        assert!(store.find_by_id("001").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_torn_last_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = MemoryStore::open(&path).await.unwrap();
            store.append_if_absent(outcome("001", 1)).await.unwrap();
        }
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(journal_path(&path))
            .unwrap();
        std::io::Write::write_all(&mut file, b"{\"seq\":2,\"entry\":{\"op\":\"outc").unwrap();
        drop(file);

        let store = MemoryStore::open(&path).await.unwrap();
        store.append_if_absent(outcome("002", 2)).await.unwrap();
        drop(store);

        let reopened = MemoryStore::open(&path).await.unwrap();
        let all = HistoryStore::query(&reopened, 10, Order::OldestFirst).await.unwrap();
        assert_eq!(ids(&all), vec!["001", "002"]);
    }

    #[tokio::test]
    async fn test_resolve_and_count_is_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = MemoryStore::open(&path).await.unwrap();
        store.create_if_absent(forecast("020", 3)).await.unwrap();
        let resolution = Resolution::judge(3, &outcome("020", 3));

        let stat = store.resolve_and_count("020", resolution).await.unwrap();
        assert_eq!(stat.map(|s| (s.wins, s.total)), Some((1, 1)));
        assert_eq!(store.resolve_and_count("020", resolution).await.unwrap(), None);
        assert_eq!(store.resolve_and_count("missing", resolution).await.unwrap(), None);
        assert_eq!(journal_lines(&path).len(), 2);
        drop(store);

        let reopened = MemoryStore::open(&path).await.unwrap();
        let record = reopened.get("020").await.unwrap().unwrap();
        assert_eq!(record.outcome, Outcome::Win);
        assert_eq!(reopened.current().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_failed_journal_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = MemoryStore::open(&path).await.unwrap();
        std::fs::create_dir(journal_path(&path)).unwrap();
        assert!(store.append_if_absent(outcome("001", 1)).await.is_err());
        assert!(store.find_by_id("001").await.unwrap().is_none());

        std::fs::remove_dir(journal_path(&path)).unwrap();
        assert!(store.append_if_absent(outcome("001", 1)).await.unwrap());
        drop(store);

        let reopened = MemoryStore::open(&path).await.unwrap();
        assert!(reopened.find_by_id("001").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_returns_stored_forecast() {
        let store = MemoryStore::new();
        store.create_if_absent(forecast("030", 7)).await.unwrap();
        store.create_if_absent(forecast("030", 1)).await.unwrap();
        assert_eq!(store.get("030").await.unwrap().unwrap().predicted_value, 7);
        assert!(store.get("031").await.unwrap().is_none());
    }
}
