//! Small shared helpers: CLI value mapping, search-query extraction and
//! best-effort local interface detection.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Result, bail};
use once_cell::sync::Lazy;

use crate::cli;
use crate::history::BrowserKind;
use crate::pipeline::TimeWindow;

/// Query-string parameters that carry a search term, in priority order.
const SEARCH_PARAM_KEYS: &[&str] = &["q", "query", "text"];

/// Resolved once per process. Uses the kernel routing table via a UDP
/// connect; no packet is sent and the address is never resolved externally.
static LOCAL_IP: Lazy<Option<String>> = Lazy::new(resolve_local_ip);

/// Convert CLI time window to internal enum
pub fn window_from_cli(window: cli::TimeWindowArg) -> TimeWindow {
    match window {
        cli::TimeWindowArg::Today => TimeWindow::Today,
        cli::TimeWindowArg::LastWeek => TimeWindow::LastWeek,
        cli::TimeWindowArg::LastMonth => TimeWindow::LastMonth,
        cli::TimeWindowArg::OneYear => TimeWindow::OneYear,
    }
}

/// Split `--browsers` values into recognized browsers (deduplicated, in the
/// order given) and unknown tags the caller should warn about.
pub fn parse_browsers(raw: &[String]) -> (Vec<BrowserKind>, Vec<String>) {
    let mut known = Vec::new();
    let mut unknown = Vec::new();
    for item in raw {
        let tag = item.trim().to_ascii_lowercase();
        match tag.as_str() {
            "" => {}
            "chrome" => push_unique(&mut known, BrowserKind::Chrome),
            "edge" => push_unique(&mut known, BrowserKind::Edge),
            "firefox" => push_unique(&mut known, BrowserKind::Firefox),
            _ => unknown.push(tag),
        }
    }
    (known, unknown)
}

fn push_unique(list: &mut Vec<BrowserKind>, kind: BrowserKind) {
    if !list.contains(&kind) {
        list.push(kind);
    }
}

/// Parse repeated `--db-override browser=path` arguments.
pub fn parse_db_overrides(raw: &[String]) -> Result<BTreeMap<BrowserKind, PathBuf>> {
    let mut overrides = BTreeMap::new();
    for item in raw {
        let Some((browser, path)) = item.split_once('=') else {
            bail!("--db-override expects browser=path, got: {item}");
        };
        let (known, _) = parse_browsers(&[browser.to_string()]);
        let Some(kind) = known.first().copied() else {
            bail!("--db-override names unknown browser: {browser}");
        };
        overrides.insert(kind, PathBuf::from(path));
    }
    Ok(overrides)
}

/// Extract a search query from a visit URL, if the URL encodes one.
///
/// Checks `q`, then `query`, then `text`; the value is percent-decoded with
/// `+` treated as space. Returns `None` for URLs without a query string.
pub fn extract_search_query(url: &str) -> Option<String> {
    // The fragment goes first; a '?' inside it is not a query string.
    let url = url.split('#').next().unwrap_or(url);
    let query = url.split_once('?')?.1;
    for key in SEARCH_PARAM_KEYS {
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            if k == *key && !v.is_empty() {
                return Some(percent_decode(v));
            }
        }
    }
    None
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Best-effort local interface address stamped on collected entries.
/// Loopback-only hosts yield `None`.
pub fn local_ip() -> Option<&'static str> {
    LOCAL_IP.as_deref()
}

fn resolve_local_ip() -> Option<String> {
    let sock = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    sock.connect(("8.8.8.8", 80)).ok()?;
    let ip = sock.local_addr().ok()?.ip();
    if ip.is_loopback() {
        return None;
    }
    Some(ip.to_string())
}
