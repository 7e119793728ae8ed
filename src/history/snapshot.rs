//! Snapshot isolation for locked browser databases. The original file is
//! only ever opened for reading; every query runs against a byte-for-byte
//! copy in a process-local temp directory that is removed on every exit
//! path.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempDir};
use tracing::debug;

use super::HistoryError;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Scoped handle over a temporary copy of a history database. The backing
/// file is never the original path and is deleted when the handle drops,
/// whether or not the intervening read succeeded.
#[derive(Debug)]
pub struct SnapshotHandle {
    file: NamedTempFile,
    sha256: String,
    source: PathBuf,
}

impl SnapshotHandle {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Digest of the copied bytes, carried into audit detail for provenance.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

pub struct SnapshotManager {
    temp_dir: TempDir,
}

impl SnapshotManager {
    pub fn new() -> Result<Self, HistoryError> {
        let temp_dir = tempfile::Builder::new().prefix("webtrail-snap-").tempdir()?;
        Ok(Self { temp_dir })
    }

    /// Copy `source` into a fresh temp file and return a handle over the
    /// copy. A refused open maps to `Locked` and the caller treats that
    /// browser as unavailable for this run.
    pub fn snapshot(&self, source: &Path) -> Result<SnapshotHandle, HistoryError> {
        let mut src = File::open(source).map_err(|err| match err.kind() {
            ErrorKind::NotFound => HistoryError::NotFound(source.to_path_buf()),
            ErrorKind::PermissionDenied => HistoryError::Locked(source.to_path_buf()),
            _ => HistoryError::Io(err),
        })?;

        let mut tmp = tempfile::Builder::new()
            .suffix(".db")
            .tempfile_in(self.temp_dir.path())?;

        let mut hasher = Sha256::new();
        let mut buf = [0u8; COPY_BUF_SIZE];
        loop {
            let n = src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])?;
        }
        tmp.flush()?;

        debug!(
            "snapshot of {} at {}",
            source.display(),
            tmp.path().display()
        );

        Ok(SnapshotHandle {
            sha256: hex::encode(hasher.finalize()),
            source: source.to_path_buf(),
            file: tmp,
        })
    }
}
