//! Profile-store discovery. Candidates are ordered by a fixed priority:
//! explicit CLI override, then platform-default profile directories, then
//! the user-editable known-paths table. Absence of any candidate is a
//! normal outcome, never an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::KnownPaths;

use super::{BrowserKind, SchemaVariant};

/// Chromium profile directories probed before scanning the rest of the base.
const CHROMIUM_PROFILE_NAMES: &[&str] = &["Default", "Profile 1", "Profile 2", "Profile 3"];

/// Filesystem roots the locator searches under. Injected so tests can point
/// at temp directories instead of mutating the process environment.
#[derive(Debug, Clone, Default)]
pub struct LocatorEnv {
    pub home: Option<PathBuf>,
    pub local_app_data: Option<PathBuf>,
    pub app_data: Option<PathBuf>,
}

impl LocatorEnv {
    pub fn from_process() -> Self {
        Self {
            home: std::env::var_os("HOME").map(PathBuf::from),
            local_app_data: std::env::var_os("LOCALAPPDATA").map(PathBuf::from),
            app_data: std::env::var_os("APPDATA").map(PathBuf::from),
        }
    }
}

pub struct BrowserLocator {
    env: LocatorEnv,
    overrides: BTreeMap<BrowserKind, PathBuf>,
    known_paths: KnownPaths,
}

impl BrowserLocator {
    pub fn new(
        env: LocatorEnv,
        overrides: BTreeMap<BrowserKind, PathBuf>,
        known_paths: KnownPaths,
    ) -> Self {
        Self {
            env,
            overrides,
            known_paths,
        }
    }

    /// Candidate database files for `kind` that exist on disk, in priority
    /// order. Does not validate that a candidate is a well-formed database.
    pub fn locate(&self, kind: BrowserKind) -> Vec<PathBuf> {
        let mut out = Vec::new();

        if let Some(path) = self.overrides.get(&kind) {
            push_existing(&mut out, path.clone());
        }

        match kind.schema() {
            SchemaVariant::Chromium => self.chromium_candidates(kind, &mut out),
            SchemaVariant::Firefox => self.firefox_candidates(&mut out),
        }

        for extra in self.known_paths.for_kind(kind) {
            push_existing(&mut out, extra.clone());
        }

        debug!("{}: {} candidate store(s)", kind.tag(), out.len());
        out
    }

    fn chromium_bases(&self, kind: BrowserKind) -> Vec<PathBuf> {
        let mut bases = Vec::new();
        match kind {
            BrowserKind::Chrome => {
                if let Some(home) = &self.env.home {
                    bases.push(home.join(".config/google-chrome"));
                    bases.push(home.join(".config/chromium"));
                }
                if let Some(lad) = &self.env.local_app_data {
                    bases.push(lad.join("Google/Chrome/User Data"));
                }
            }
            BrowserKind::Edge => {
                if let Some(home) = &self.env.home {
                    bases.push(home.join(".config/microsoft-edge"));
                }
                if let Some(lad) = &self.env.local_app_data {
                    bases.push(lad.join("Microsoft/Edge/User Data"));
                }
            }
            BrowserKind::Firefox => {}
        }
        bases
    }

    fn chromium_candidates(&self, kind: BrowserKind, out: &mut Vec<PathBuf>) {
        for base in self.chromium_bases(kind) {
            if !base.is_dir() {
                continue;
            }
            for name in CHROMIUM_PROFILE_NAMES {
                push_existing(out, base.join(name).join("History"));
            }
            // Any other profile directory holding a History file.
            let Ok(read_dir) = std::fs::read_dir(&base) else {
                continue;
            };
            for entry in read_dir.flatten() {
                let candidate = entry.path().join("History");
                push_existing(out, candidate);
            }
        }
    }

    fn firefox_candidates(&self, out: &mut Vec<PathBuf>) {
        let mut ini_paths = Vec::new();
        if let Some(home) = &self.env.home {
            ini_paths.push(home.join(".mozilla/firefox/profiles.ini"));
        }
        if let Some(app_data) = &self.env.app_data {
            ini_paths.push(app_data.join("Mozilla/Firefox/profiles.ini"));
        }

        for ini in ini_paths {
            let Ok(content) = std::fs::read_to_string(&ini) else {
                continue;
            };
            let Some(base) = ini.parent() else {
                continue;
            };
            for profile in parse_profile_paths(&content) {
                // A relative Path= entry resolves against the ini's
                // directory; join() keeps absolute entries as-is.
                push_existing(out, base.join(profile).join("places.sqlite"));
            }
        }
    }
}

fn parse_profile_paths(ini: &str) -> Vec<String> {
    ini.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            if key.trim().eq_ignore_ascii_case("path") {
                Some(value.trim().to_string())
            } else {
                None
            }
        })
        .collect()
}

fn push_existing(out: &mut Vec<PathBuf>, candidate: PathBuf) {
    if candidate.is_file() && !out.contains(&candidate) {
        out.push(candidate);
    }
}
