//! # Storage Module
//!
//! Durable output for normalized history: a SQLite table plus a flat CSV
//! export, both append-only, and the append-only audit log.

pub mod audit;
pub mod store;

use thiserror::Error;

/// Both the history table and the audit table live in this file.
pub(crate) const DB_FILE: &str = "webtrail.sqlite";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
