//! History persistence. One `persist` call is one atomic unit: the table
//! insert runs in a single transaction and the CSV export is rebuilt via
//! write-then-rename before that transaction commits, so a failure on
//! either target leaves both unchanged.

use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use tracing::debug;

use crate::history::BrowserEntry;

use super::{DB_FILE, StorageError};

const CSV_FILE: &str = "browser_history.csv";
const CSV_HEADER: [&str; 6] = ["source", "url", "title", "visit_time", "query", "ip"];

pub struct HistoryStore {
    conn: Connection,
    csv_path: PathBuf,
}

impl HistoryStore {
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let conn = Connection::open(data_dir.join(DB_FILE))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS browser_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                url TEXT NOT NULL,
                title TEXT,
                visit_time TEXT NOT NULL,
                query TEXT,
                ip TEXT
            )",
        )?;
        Ok(Self {
            conn,
            csv_path: data_dir.join(CSV_FILE),
        })
    }

    /// Append `entries` to the table and the CSV export. Append-only: no
    /// update-in-place and no deduplication. Returns the number of rows
    /// written; an empty input writes nothing and returns 0.
    pub fn persist(&mut self, entries: &[BrowserEntry]) -> Result<usize, StorageError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO browser_history (source, url, title, visit_time, query, ip)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.source.tag(),
                    entry.url,
                    entry.title,
                    entry.visit_time.to_rfc3339(),
                    entry.query,
                    entry.ip,
                ])?;
            }
        }
        // CSV failure drops the transaction and rolls the table back.
        append_csv_atomic(&self.csv_path, entries)?;
        tx.commit()?;

        debug!("persisted {} entries", entries.len());
        Ok(entries.len())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

fn append_csv_atomic(csv_path: &Path, entries: &[BrowserEntry]) -> Result<(), StorageError> {
    let dir = csv_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let existing = match std::fs::read(csv_path) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".browser_history-")
        .suffix(".csv")
        .tempfile_in(dir)?;
    if let Some(bytes) = &existing {
        tmp.write_all(bytes)?;
    }
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp.as_file_mut());
        if existing.is_none() {
            writer.write_record(CSV_HEADER)?;
        }
        for entry in entries {
            writer.write_record([
                entry.source.tag(),
                entry.url.as_str(),
                entry.title.as_deref().unwrap_or(""),
                &entry.visit_time.to_rfc3339(),
                entry.query.as_deref().unwrap_or(""),
                entry.ip.as_deref().unwrap_or(""),
            ])?;
        }
        writer.flush()?;
    }
    tmp.persist(csv_path)
        .map_err(|err| StorageError::Io(err.error))?;
    Ok(())
}
