//! Append-only audit log. Every event is written to both the `audit_log`
//! table and a JSONL file; events are never mutated or deleted. The log is
//! an explicit handle opened once at run start and flushed at run end, not
//! a global.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::warn;

use super::{DB_FILE, StorageError};

const AUDIT_FILE: &str = "audit.jsonl";

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub detail: Option<String>,
}

pub struct AuditLog {
    conn: Mutex<Connection>,
    writer: Mutex<BufWriter<File>>,
}

impl AuditLog {
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let conn = Connection::open(data_dir.join(DB_FILE))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event TEXT NOT NULL,
                detail TEXT
            )",
        )?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_dir.join(AUDIT_FILE))?;
        Ok(Self {
            conn: Mutex::new(conn),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Record one event. Audit failures are reported but never abort the
    /// run they describe.
    pub fn log(&self, event: &str, detail: Option<&str>) {
        let record = AuditEvent {
            timestamp: Utc::now(),
            event: event.to_string(),
            detail: detail.map(str::to_owned),
        };
        if let Err(err) = self.append(&record) {
            warn!("audit write error: {err}");
        }
    }

    fn append(&self, record: &AuditEvent) -> Result<(), StorageError> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO audit_log (timestamp, event, detail) VALUES (?1, ?2, ?3)",
                params![record.timestamp.to_rfc3339(), record.event, record.detail],
            )?;
        }
        let mut guard = self.writer.lock().unwrap();
        serde_json::to_writer(&mut *guard, record)?;
        guard.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.writer.lock().unwrap().flush()?;
        Ok(())
    }
}
