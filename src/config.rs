use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::history::BrowserKind;

/// User-editable table of extra history database locations, consulted by the
/// locator after the platform defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct KnownPaths {
    #[serde(default)]
    pub chrome: Vec<PathBuf>,
    #[serde(default)]
    pub edge: Vec<PathBuf>,
    #[serde(default)]
    pub firefox: Vec<PathBuf>,
}

impl KnownPaths {
    pub fn for_kind(&self, kind: BrowserKind) -> &[PathBuf] {
        match kind {
            BrowserKind::Chrome => &self.chrome,
            BrowserKind::Edge => &self.edge,
            BrowserKind::Firefox => &self.firefox,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub paths: KnownPaths,
    pub config_hash: String,
    pub run_id: String,
}

/// Load the known-paths table from `path`, falling back to the embedded
/// default. The raw bytes are hashed so the run-start audit event records
/// exactly which configuration was in effect.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/known_paths.yml").to_vec()
    };

    let paths: KnownPaths = serde_yaml::from_slice(&bytes)?;

    Ok(LoadedConfig {
        paths,
        config_hash: hash_bytes(&bytes),
        run_id: generate_run_id(),
    })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    format!("{}_{}", now.format("%Y%m%dT%H%M%SZ"), rand_suffix())
}

fn rand_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:08x}", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_parses() {
        let loaded = load_config(None).expect("load");
        assert!(loaded.paths.chrome.is_empty());
        assert!(loaded.paths.firefox.is_empty());
        assert_eq!(loaded.config_hash.len(), 64);
    }

    #[test]
    fn run_id_has_timestamp_and_suffix() {
        let loaded = load_config(None).expect("load");
        let (stamp, suffix) = loaded.run_id.split_once('_').expect("shape");
        assert_eq!(stamp.len(), "YYYYMMDDTHHMMSSZ".len());
        assert_eq!(suffix.len(), 8);
    }

    #[test]
    fn yaml_override_parses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("paths.yml");
        std::fs::write(&path, "chrome:\n  - /tmp/History\nedge: []\n").expect("write");
        let loaded = load_config(Some(&path)).expect("load");
        assert_eq!(loaded.paths.chrome, vec![PathBuf::from("/tmp/History")]);
        assert!(loaded.paths.firefox.is_empty());
    }
}
