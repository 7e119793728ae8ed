//! # Browser History Ingestion
//!
//! Locating profile stores, snapshotting the history database, querying the
//! vendor schema and normalizing timestamps. Per-browser work is independent
//! and runs on a small worker pool; a browser that cannot be read is skipped
//! with a reason, never fatal to the run.

pub mod locate;
pub mod reader;
pub mod snapshot;
pub mod time;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::util;

use self::locate::BrowserLocator;
use self::snapshot::SnapshotManager;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("no history database at {0}")]
    NotFound(PathBuf),
    #[error("history database locked: {0}")]
    Locked(PathBuf),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supported browser vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chrome,
    Edge,
    Firefox,
}

/// The two history database shapes. Adding a vendor means adding a
/// `BrowserKind` case and mapping it here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVariant {
    Chromium,
    Firefox,
}

impl BrowserKind {
    pub fn tag(&self) -> &'static str {
        match self {
            BrowserKind::Chrome => "chrome",
            BrowserKind::Edge => "edge",
            BrowserKind::Firefox => "firefox",
        }
    }

    pub fn schema(&self) -> SchemaVariant {
        match self {
            BrowserKind::Chrome | BrowserKind::Edge => SchemaVariant::Chromium,
            BrowserKind::Firefox => SchemaVariant::Firefox,
        }
    }
}

/// One normalized visit. Immutable once constructed; uniqueness is not
/// enforced here, any dedup policy belongs to the storage caller.
#[derive(Debug, Clone, Serialize)]
pub struct BrowserEntry {
    pub source: BrowserKind,
    pub url: String,
    pub title: Option<String>,
    pub visit_time: DateTime<Utc>,
    pub query: Option<String>,
    pub ip: Option<String>,
}

/// Knobs for one ingestion pass.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Per-browser row cap, applied in the SQL `LIMIT`.
    pub max_rows: u32,
    /// Upper bound on worker threads; the pool never exceeds the number of
    /// browsers to fetch.
    pub workers: usize,
    /// Budget for the whole ingestion pass. Browsers that have not reported
    /// by the deadline are skipped like a locked database.
    pub read_timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            workers: num_cpus::get(),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// How a browser's fetch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Read succeeded; `path` is the original database, `snapshot_sha256`
    /// the digest of the temporary copy that was actually queried.
    Fetched {
        path: PathBuf,
        snapshot_sha256: String,
    },
    /// No profile store found. A normal outcome, not a failure.
    NoProfile,
    /// Snapshot or read failed; the browser contributes nothing this run.
    Skipped { reason: String },
}

/// Result of one browser's locate, snapshot, read, normalize sequence.
#[derive(Debug, Clone)]
pub struct BrowserBatch {
    pub browser: BrowserKind,
    pub entries: Vec<BrowserEntry>,
    pub skipped_rows: u64,
    pub outcome: FetchOutcome,
}

impl BrowserBatch {
    fn skipped(browser: BrowserKind, reason: String) -> Self {
        Self {
            browser,
            entries: Vec::new(),
            skipped_rows: 0,
            outcome: FetchOutcome::Skipped { reason },
        }
    }
}

/// Seam between the pipeline and the ingestion machinery. The pipeline only
/// calls this after the browser-history consent check, so an implementation
/// can prove that declined consent issues no locator or snapshot calls.
pub trait HistorySource: Send + Sync {
    fn fetch(
        &self,
        browsers: &[BrowserKind],
        since: DateTime<Utc>,
        opts: &FetchOptions,
        cancel: Arc<AtomicBool>,
    ) -> Vec<BrowserBatch>;
}

/// Reads history from browser profile stores on the local machine.
pub struct LocalHistorySource {
    locator: Arc<BrowserLocator>,
}

impl LocalHistorySource {
    pub fn new(locator: BrowserLocator) -> Self {
        Self {
            locator: Arc::new(locator),
        }
    }
}

impl HistorySource for LocalHistorySource {
    fn fetch(
        &self,
        browsers: &[BrowserKind],
        since: DateTime<Utc>,
        opts: &FetchOptions,
        cancel: Arc<AtomicBool>,
    ) -> Vec<BrowserBatch> {
        if browsers.is_empty() {
            return Vec::new();
        }

        let (job_tx, job_rx) = bounded::<BrowserKind>(browsers.len());
        let (batch_tx, batch_rx) = bounded::<BrowserBatch>(browsers.len());
        for kind in browsers {
            let _ = job_tx.send(*kind);
        }
        drop(job_tx);

        // Workers stamp each browser's read start; its timeout runs from
        // that instant, not from the start of the whole pass.
        let starts: Arc<Mutex<BTreeMap<BrowserKind, Instant>>> =
            Arc::new(Mutex::new(BTreeMap::new()));

        let worker_count = opts.workers.max(1).min(browsers.len());
        for _ in 0..worker_count {
            let job_rx = job_rx.clone();
            let batch_tx = batch_tx.clone();
            let locator = self.locator.clone();
            let cancel = cancel.clone();
            let starts = starts.clone();
            let opts = *opts;
            thread::spawn(move || {
                while let Ok(kind) = job_rx.recv() {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Ok(mut starts) = starts.lock() {
                        starts.insert(kind, Instant::now());
                    }
                    let batch = fetch_one(&locator, kind, since, &opts);
                    if batch_tx.send(batch).is_err() {
                        break;
                    }
                }
            });
        }
        drop(batch_tx);

        collect_batches(browsers, &batch_rx, &starts, opts.read_timeout)
    }
}

/// How often the collector re-checks for newly started reads while no
/// started browser has a nearer deadline.
const START_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Gathers per-browser batches in completion order (within-browser order
/// comes straight from the query). The timeout applies to each browser's
/// own read: a browser still waiting for a worker has not started and
/// keeps its full budget, while one that started and went silent past its
/// budget is skipped the same way a locked database is.
fn collect_batches(
    browsers: &[BrowserKind],
    batch_rx: &Receiver<BrowserBatch>,
    starts: &Mutex<BTreeMap<BrowserKind, Instant>>,
    timeout: Duration,
) -> Vec<BrowserBatch> {
    fn accept(pending: &mut Vec<BrowserKind>, batches: &mut Vec<BrowserBatch>, batch: BrowserBatch) {
        if pending.contains(&batch.browser) {
            pending.retain(|k| *k != batch.browser);
            batches.push(batch);
        } else {
            // Late result from a read already skipped as timed out.
            debug!("{}: discarding late batch", batch.browser.tag());
        }
    }

    let mut pending: Vec<BrowserKind> = browsers.to_vec();
    let mut batches: Vec<BrowserBatch> = Vec::new();
    while !pending.is_empty() {
        // Drain finished reads before judging any deadline.
        while let Ok(batch) = batch_rx.try_recv() {
            accept(&mut pending, &mut batches, batch);
        }
        if pending.is_empty() {
            break;
        }
        let now = Instant::now();
        let mut next_deadline: Option<Instant> = None;
        let mut overdue: Vec<BrowserKind> = Vec::new();
        if let Ok(starts) = starts.lock() {
            for kind in &pending {
                let Some(start) = starts.get(kind) else {
                    continue;
                };
                let deadline = *start + timeout;
                if deadline <= now {
                    overdue.push(*kind);
                } else {
                    next_deadline = Some(next_deadline.map_or(deadline, |d| d.min(deadline)));
                }
            }
        }
        for kind in overdue {
            warn!("{} read timed out after {timeout:?}, skipping", kind.tag());
            pending.retain(|k| *k != kind);
            batches.push(BrowserBatch::skipped(
                kind,
                format!("read timed out after {timeout:?}"),
            ));
        }
        if pending.is_empty() {
            break;
        }
        let wait = next_deadline
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(START_POLL_INTERVAL)
            .min(START_POLL_INTERVAL);
        match batch_rx.recv_timeout(wait) {
            Ok(batch) => accept(&mut pending, &mut batches, batch),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    batches
}

fn fetch_one(
    locator: &BrowserLocator,
    kind: BrowserKind,
    since: DateTime<Utc>,
    opts: &FetchOptions,
) -> BrowserBatch {
    let candidates = locator.locate(kind);
    let Some(db_path) = candidates.into_iter().next() else {
        debug!("no profile store found for {}", kind.tag());
        return BrowserBatch {
            browser: kind,
            entries: Vec::new(),
            skipped_rows: 0,
            outcome: FetchOutcome::NoProfile,
        };
    };

    let manager = match SnapshotManager::new() {
        Ok(manager) => manager,
        Err(err) => return BrowserBatch::skipped(kind, err.to_string()),
    };
    let handle = match manager.snapshot(&db_path) {
        Ok(handle) => handle,
        Err(err) => {
            warn!("{}: snapshot of {} failed: {err}", kind.tag(), db_path.display());
            return BrowserBatch::skipped(kind, err.to_string());
        }
    };

    let conn = match reader::open_snapshot(handle.path()) {
        Ok(conn) => conn,
        Err(err) => {
            warn!("{}: cannot open snapshot: {err}", kind.tag());
            return BrowserBatch::skipped(kind, err.to_string());
        }
    };

    match reader::read_visits(&conn, kind, since, opts.max_rows, util::local_ip()) {
        Ok(batch) => {
            debug!(
                "{}: {} entries, {} rows skipped, source {}",
                kind.tag(),
                batch.entries.len(),
                batch.skipped_rows,
                db_path.display()
            );
            BrowserBatch {
                browser: kind,
                entries: batch.entries,
                skipped_rows: batch.skipped_rows,
                outcome: FetchOutcome::Fetched {
                    path: db_path,
                    snapshot_sha256: handle.sha256().to_string(),
                },
            }
        }
        Err(err) => {
            warn!("{}: read failed: {err}", kind.tag());
            BrowserBatch::skipped(kind, err.to_string())
        }
    }
}
