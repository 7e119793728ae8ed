//! Vendor-schema queries against a snapshot. Each call prepares a fresh
//! statement; the time filter and row cap live in the SQL so a decade of
//! history never has to fit in memory.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, params};

use crate::util;

use super::{BrowserEntry, BrowserKind, HistoryError, SchemaVariant, time};

const CHROMIUM_VISITS_SQL: &str = "SELECT urls.url, urls.title, visits.visit_time \
     FROM visits JOIN urls ON visits.url = urls.id \
     WHERE visits.visit_time >= ?1 \
     ORDER BY visits.visit_time DESC LIMIT ?2";

const FIREFOX_VISITS_SQL: &str = "SELECT moz_places.url, moz_places.title, moz_historyvisits.visit_date \
     FROM moz_historyvisits JOIN moz_places ON moz_historyvisits.place_id = moz_places.id \
     WHERE moz_historyvisits.visit_date >= ?1 \
     ORDER BY moz_historyvisits.visit_date DESC LIMIT ?2";

/// Rows read from one snapshot, plus the count of rows dropped for
/// malformed content.
#[derive(Debug, Default)]
pub struct ReadBatch {
    pub entries: Vec<BrowserEntry>,
    pub skipped_rows: u64,
}

/// Open a snapshot read-only. The snapshot is our own temp copy, so a
/// failure here means the copy is not a usable database.
pub fn open_snapshot(path: &Path) -> Result<Connection, HistoryError> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|err| HistoryError::SchemaMismatch(err.to_string()))
}

/// Query visits at or after `since`, newest first, capped at `max_rows`.
///
/// A prepare failure (absent table, corrupt schema) is a `SchemaMismatch`
/// for the whole browser. Individual rows with a null URL, a null visit
/// time or an unnormalizable timestamp are dropped and counted.
pub fn read_visits(
    conn: &Connection,
    kind: BrowserKind,
    since: DateTime<Utc>,
    max_rows: u32,
    ip: Option<&str>,
) -> Result<ReadBatch, HistoryError> {
    let (sql, since_raw) = match kind.schema() {
        SchemaVariant::Chromium => (CHROMIUM_VISITS_SQL, time::utc_to_chromium_raw(since)),
        SchemaVariant::Firefox => (FIREFOX_VISITS_SQL, time::utc_to_firefox_raw(since)),
    };

    let mut stmt = conn
        .prepare(sql)
        .map_err(|err| HistoryError::SchemaMismatch(err.to_string()))?;
    let rows = stmt
        .query_map(params![since_raw, max_rows], |row| {
            let url: Option<String> = row.get(0)?;
            let title: Option<String> = row.get(1)?;
            let raw_time: Option<i64> = row.get(2)?;
            Ok((url, title, raw_time))
        })
        .map_err(|err| HistoryError::SchemaMismatch(err.to_string()))?;

    let mut batch = ReadBatch::default();
    for row in rows {
        let (url, title, raw_time) = match row {
            Ok(columns) => columns,
            Err(_) => {
                batch.skipped_rows += 1;
                continue;
            }
        };
        let (Some(url), Some(raw_time)) = (url, raw_time) else {
            batch.skipped_rows += 1;
            continue;
        };
        let normalized = match kind.schema() {
            SchemaVariant::Chromium => time::chromium_to_utc(raw_time),
            SchemaVariant::Firefox => time::firefox_to_utc(raw_time),
        };
        let Some(visit_time) = normalized else {
            batch.skipped_rows += 1;
            continue;
        };

        let query = util::extract_search_query(&url);
        batch.entries.push(BrowserEntry {
            source: kind,
            url,
            title,
            visit_time,
            query,
            ip: ip.map(str::to_owned),
        });
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn chromium_conn(rows: &[(Option<&str>, Option<&str>, Option<i64>)]) -> Connection {
        let conn = Connection::open_in_memory().expect("open");
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
        conn
    }

    fn firefox_conn(rows: &[(&str, Option<&str>, i64)]) -> Connection {
        let conn = Connection::open_in_memory().expect("open");
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
        conn
    }

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn reads_chromium_rows_newest_first() {
        let old = time::CHROMIUM_EPOCH_OFFSET_MICROS + 1_000_000;
        let new = time::CHROMIUM_EPOCH_OFFSET_MICROS + 2_000_000;
        let conn = chromium_conn(&[
            (Some("https://old.example/"), None, Some(old)),
            (Some("https://new.example/"), Some("New"), Some(new)),
        ]);

        let batch =
            read_visits(&conn, BrowserKind::Chrome, epoch(), 100, Some("10.0.0.5")).expect("read");
        assert_eq!(batch.skipped_rows, 0);
        assert_eq!(batch.entries.len(), 2);
        assert_eq!(batch.entries[0].url, "https://new.example/");
        assert_eq!(batch.entries[0].title.as_deref(), Some("New"));
        assert_eq!(batch.entries[0].ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(batch.entries[1].url, "https://old.example/");
    }

    #[test]
    fn since_filter_is_applied_in_sql() {
        let cutoff = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let before = time::utc_to_chromium_raw(cutoff) - 1;
        let after = time::utc_to_chromium_raw(cutoff) + 1;
        let conn = chromium_conn(&[
            (Some("https://before.example/"), None, Some(before)),
            (Some("https://after.example/"), None, Some(after)),
        ]);

        let batch = read_visits(&conn, BrowserKind::Edge, cutoff, 100, None).expect("read");
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].url, "https://after.example/");
    }

    #[test]
    fn max_rows_caps_the_read() {
        let base = time::CHROMIUM_EPOCH_OFFSET_MICROS;
        let rows: Vec<(Option<&str>, Option<&str>, Option<i64>)> = (0..5)
            .map(|i| (Some("https://example.com/"), None, Some(base + i)))
            .collect();
        let conn = chromium_conn(&rows);

        let batch = read_visits(&conn, BrowserKind::Chrome, epoch(), 2, None).expect("read");
        assert_eq!(batch.entries.len(), 2);
    }

    #[test]
    fn malformed_rows_are_counted_not_fatal() {
        // A pre-1970 `since` lets a pre-epoch Chromium value through the SQL
        // bound so it reaches (and fails) normalization.
        let since = Utc.with_ymd_and_hms(1969, 1, 1, 0, 0, 0).unwrap();
        let good = time::CHROMIUM_EPOCH_OFFSET_MICROS + 5;
        let pre_epoch = time::CHROMIUM_EPOCH_OFFSET_MICROS - 1_000;
        let conn = chromium_conn(&[
            (None, None, Some(good)), // null url
            (Some("https://pre-epoch.example/"), None, Some(pre_epoch)),
            (Some("https://ok.example/?q=rust"), None, Some(good)),
        ]);

        let batch = read_visits(&conn, BrowserKind::Chrome, since, 100, None).expect("read");
        assert_eq!(batch.skipped_rows, 2);
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].query.as_deref(), Some("rust"));
    }

    #[test]
    fn firefox_join_and_identity_epoch() {
        let raw = 1_687_392_000_000_000;
        let conn = firefox_conn(&[("https://ff.example/", Some("FF"), raw)]);

        let batch = read_visits(&conn, BrowserKind::Firefox, epoch(), 100, None).expect("read");
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].source, BrowserKind::Firefox);
        assert_eq!(batch.entries[0].visit_time.timestamp_micros(), raw);
    }

    #[test]
    fn missing_table_is_schema_mismatch() {
        let conn = Connection::open_in_memory().expect("open");
        let err = read_visits(&conn, BrowserKind::Chrome, epoch(), 100, None)
            .expect_err("should fail");
        assert!(matches!(err, HistoryError::SchemaMismatch(_)));
    }

    #[test]
    fn fresh_statement_per_call() {
        let raw = time::CHROMIUM_EPOCH_OFFSET_MICROS + 1;
        let conn = chromium_conn(&[(Some("https://example.com/"), None, Some(raw))]);
        let first = read_visits(&conn, BrowserKind::Chrome, epoch(), 100, None).expect("read");
        let second = read_visits(&conn, BrowserKind::Chrome, epoch(), 100, None).expect("read");
        assert_eq!(first.entries.len(), second.entries.len());
    }
}
