//! Shared test infrastructure: fixture history databases, a scripted
//! consent prompt, and a call-counting history source.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, params};

use webtrail::consent::{ConsentPrompt, ConsentSource};
use webtrail::history::{
    BrowserBatch, BrowserEntry, BrowserKind, FetchOptions, HistorySource,
};

/// Build a Chromium-shaped history database at `path`.
pub fn chromium_fixture(path: &Path, rows: &[(&str, Option<&str>, i64)]) {
    let conn = Connection::open(path).expect("open fixture");
    conn.execute_batch(
        "CREATE TABLE urls (id INTEGER PRIMARY KEY, url TEXT, title TEXT);
         CREATE TABLE visits (id INTEGER PRIMARY KEY, url INTEGER, visit_time INTEGER);",
    )
    .expect("schema");
    for (i, (url, title, raw)) in rows.iter().enumerate() {
        let id = i as i64 + 1;
        conn.execute(
            "INSERT INTO urls (id, url, title) VALUES (?1, ?2, ?3)",
            params![id, url, title],
        )
        .expect("url row");
        conn.execute(
            "INSERT INTO visits (url, visit_time) VALUES (?1, ?2)",
            params![id, raw],
        )
        .expect("visit row");
    }
}

/// Build a Firefox-shaped history database at `path`.
pub fn firefox_fixture(path: &Path, rows: &[(&str, Option<&str>, i64)]) {
    let conn = Connection::open(path).expect("open fixture");
    conn.execute_batch(
        "CREATE TABLE moz_places (id INTEGER PRIMARY KEY, url TEXT, title TEXT);
         CREATE TABLE moz_historyvisits (id INTEGER PRIMARY KEY, place_id INTEGER, visit_date INTEGER);",
    )
    .expect("schema");
    for (i, (url, title, raw)) in rows.iter().enumerate() {
        let id = i as i64 + 1;
        conn.execute(
            "INSERT INTO moz_places (id, url, title) VALUES (?1, ?2, ?3)",
            params![id, url, title],
        )
        .expect("place row");
        conn.execute(
            "INSERT INTO moz_historyvisits (place_id, visit_date) VALUES (?1, ?2)",
            params![id, raw],
        )
        .expect("visit row");
    }
}

/// Count rows currently in the structured history table.
pub fn table_row_count(data_dir: &Path) -> i64 {
    let conn = Connection::open(data_dir.join("webtrail.sqlite")).expect("open db");
    conn.query_row("SELECT COUNT(*) FROM browser_history", [], |row| row.get(0))
        .expect("count")
}

/// Prompt that answers from a fixed grant set and records what was asked.
pub struct ScriptedPrompt {
    grants: BTreeMap<ConsentSource, bool>,
    pub asked: Vec<ConsentSource>,
}

impl ScriptedPrompt {
    pub fn granting(sources: &[ConsentSource]) -> Self {
        Self {
            grants: sources.iter().map(|s| (*s, true)).collect(),
            asked: Vec::new(),
        }
    }

    pub fn declining_all() -> Self {
        Self::granting(&[])
    }
}

impl ConsentPrompt for ScriptedPrompt {
    fn ask(&mut self, source: ConsentSource, _question: &str) -> bool {
        self.asked.push(source);
        self.grants.get(&source).copied().unwrap_or(false)
    }
}

/// Source that only counts fetch calls; used to prove that declined consent
/// short-circuits ingestion before any source access.
pub struct CountingSource {
    pub calls: AtomicUsize,
}

impl CountingSource {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HistorySource for CountingSource {
    fn fetch(
        &self,
        _browsers: &[BrowserKind],
        _since: DateTime<Utc>,
        _opts: &FetchOptions,
        _cancel: Arc<AtomicBool>,
    ) -> Vec<BrowserBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Vec::new()
    }
}

/// A normalized entry for storage-level tests.
pub fn sample_entry(url: &str) -> BrowserEntry {
    BrowserEntry {
        source: BrowserKind::Chrome,
        url: url.to_string(),
        title: Some("Sample".to_string()),
        visit_time: Utc.with_ymd_and_hms(2023, 6, 22, 0, 0, 0).unwrap(),
        query: webtrail::util::extract_search_query(url),
        ip: None,
    }
}
