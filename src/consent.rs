//! Per-source consent. Decisions are collected exactly once per run, audited
//! as they are made, and frozen; a declined source is never located,
//! snapshotted or read.

use std::collections::BTreeMap;
use std::io::Write;

use serde::Serialize;

use crate::storage::audit::AuditLog;

/// Data sources gated behind an explicit per-run decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentSource {
    Gmail,
    Filesystem,
    BrowserHistory,
    AiAnalysis,
}

impl ConsentSource {
    /// Sources asked up front, in prompt order. `AiAnalysis` is only asked
    /// once browser-history consent was granted.
    pub const PRIMARY: [ConsentSource; 3] = [
        ConsentSource::Gmail,
        ConsentSource::Filesystem,
        ConsentSource::BrowserHistory,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ConsentSource::Gmail => "gmail",
            ConsentSource::Filesystem => "filesystem",
            ConsentSource::BrowserHistory => "browser_history",
            ConsentSource::AiAnalysis => "ai_analysis",
        }
    }

    pub fn question(&self) -> &'static str {
        match self {
            ConsentSource::Gmail => "Allow read-only Gmail access via OAuth?",
            ConsentSource::Filesystem => {
                "Allow read-only local filesystem scan (for config/paths)?"
            }
            ConsentSource::BrowserHistory => {
                "Allow read-only browser history ingestion (Chrome/Firefox/Edge)?"
            }
            ConsentSource::AiAnalysis => {
                "Allow deeper AI analysis of the collected browser history?"
            }
        }
    }
}

/// The prompt mechanism is an external collaborator; the gate only requires
/// a synchronous yes/no answer per question.
pub trait ConsentPrompt {
    fn ask(&mut self, source: ConsentSource, question: &str) -> bool;
}

/// Interactive y/N prompt on stdin. Empty input and EOF decline.
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl ConsentPrompt for StdinPrompt {
    fn ask(&mut self, _source: ConsentSource, question: &str) -> bool {
        let stdin = std::io::stdin();
        loop {
            print!("{question} [y/N]: ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            match stdin.read_line(&mut line) {
                Ok(_) => {}
                Err(_) => return false,
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return true,
                "" | "n" | "no" => return false,
                _ => println!("Please answer with 'y' or 'n'."),
            }
        }
    }
}

/// Frozen per-run consent decisions. Absence of a source means not granted.
#[derive(Debug, Clone, Default)]
pub struct ConsentGate {
    decisions: BTreeMap<ConsentSource, bool>,
}

impl ConsentGate {
    /// Ask every source exactly once, auditing each decision. Re-asking
    /// within a run is not possible: the returned gate is read-only.
    pub fn collect(prompt: &mut dyn ConsentPrompt, audit: &AuditLog) -> Self {
        let mut decisions = BTreeMap::new();
        for source in ConsentSource::PRIMARY {
            let allowed = prompt.ask(source, source.question());
            record(audit, source, allowed);
            decisions.insert(source, allowed);
        }
        if decisions
            .get(&ConsentSource::BrowserHistory)
            .copied()
            .unwrap_or(false)
        {
            let source = ConsentSource::AiAnalysis;
            let allowed = prompt.ask(source, source.question());
            record(audit, source, allowed);
            decisions.insert(source, allowed);
        }
        Self { decisions }
    }

    pub fn granted(&self, source: ConsentSource) -> bool {
        self.decisions.get(&source).copied().unwrap_or(false)
    }
}

fn record(audit: &AuditLog, source: ConsentSource, allowed: bool) {
    let verdict = if allowed { "granted" } else { "declined" };
    audit.log("consent", Some(&format!("{}={verdict}", source.tag())));
}
