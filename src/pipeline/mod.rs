//! # Pipeline Module
//!
//! A fixed, statically inspectable sequence of steps: consent, ingest,
//! store, notify. Each step takes the run context by value and returns it;
//! a step whose consent was withheld returns the context unchanged. Only a
//! storage failure is fatal to the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, NaiveTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::consent::{ConsentGate, ConsentPrompt, ConsentSource};
use crate::history::{BrowserEntry, BrowserKind, FetchOptions, FetchOutcome, HistorySource};
use crate::storage::StorageError;
use crate::storage::audit::AuditLog;
use crate::storage::store::HistoryStore;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("run cancelled")]
    Cancelled,
}

/// Relative time window a run is bounded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Today,
    LastWeek,
    LastMonth,
    OneYear,
}

impl TimeWindow {
    pub fn label(&self) -> &'static str {
        match self {
            TimeWindow::Today => "today",
            TimeWindow::LastWeek => "last week",
            TimeWindow::LastMonth => "last month",
            TimeWindow::OneYear => "1 year",
        }
    }

    /// Resolve the window's start relative to `now`.
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimeWindow::Today => now.date_naive().and_time(NaiveTime::MIN).and_utc(),
            TimeWindow::LastWeek => now - Duration::days(7),
            TimeWindow::LastMonth => now - Duration::days(30),
            TimeWindow::OneYear => now - Duration::days(365),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    ConsentCollected,
    Ingested,
    Stored,
    Notified,
    Done,
    Failed,
}

impl PipelineState {
    pub fn advance(self) -> PipelineState {
        match self {
            PipelineState::Init => PipelineState::ConsentCollected,
            PipelineState::ConsentCollected => PipelineState::Ingested,
            PipelineState::Ingested => PipelineState::Stored,
            PipelineState::Stored => PipelineState::Notified,
            PipelineState::Notified => PipelineState::Done,
            PipelineState::Done => PipelineState::Done,
            PipelineState::Failed => PipelineState::Failed,
        }
    }
}

/// The single mutable aggregate threaded through the run. Steps may read
/// and append; `history` is only ever appended to within a run.
#[derive(Debug)]
pub struct RunContext {
    pub window: TimeWindow,
    pub since: DateTime<Utc>,
    pub browsers: Vec<BrowserKind>,
    pub fetch: FetchOptions,
    pub consents: Option<ConsentGate>,
    /// Discovery order, not time-sorted. Cross-browser order is unspecified.
    pub history: Vec<BrowserEntry>,
    pub entries_saved: usize,
    pub skipped_rows: u64,
    pub skipped_browsers: u64,
    /// Reserved for downstream analysis consumers; the core never fills it.
    pub analysis: Option<String>,
}

impl RunContext {
    pub fn new(
        window: TimeWindow,
        since: DateTime<Utc>,
        browsers: Vec<BrowserKind>,
        fetch: FetchOptions,
    ) -> Self {
        Self {
            window,
            since,
            browsers,
            fetch,
            consents: None,
            history: Vec::new(),
            entries_saved: 0,
            skipped_rows: 0,
            skipped_browsers: 0,
            analysis: None,
        }
    }

    pub fn granted(&self, source: ConsentSource) -> bool {
        self.consents
            .as_ref()
            .map(|gate| gate.granted(source))
            .unwrap_or(false)
    }
}

/// Collaborators a step may use. Passed explicitly so no step owns global
/// state and tests can substitute every seam.
pub struct StepEnv<'a> {
    pub audit: &'a AuditLog,
    pub store: &'a mut HistoryStore,
    pub prompt: &'a mut dyn ConsentPrompt,
    pub source: &'a dyn HistorySource,
    pub cancel: Arc<AtomicBool>,
}

pub type Step = fn(RunContext, &mut StepEnv) -> Result<RunContext, PipelineError>;

/// The step list is a flat, fixed sequence on purpose: skip-on-declined
/// consent happens inside a step, never by rewriting this schedule.
pub const STEPS: &[(&str, Step)] = &[
    ("consent", consent_step),
    ("ingest", ingest_step),
    ("store", store_step),
    ("notify", notify_step),
];

/// Run every step in order, threading the context through. The cancel flag
/// is consulted between steps; ingestion checks it per browser as well.
pub fn run(ctx: RunContext, env: &mut StepEnv) -> Result<RunContext, PipelineError> {
    let mut state = PipelineState::Init;
    let result = drive(ctx, env, &mut state);
    debug!("pipeline ended in {state:?}");
    result
}

/// Step executor. `state` always holds the run's actual current state:
/// it advances once per completed step, lands in `Done` after the last,
/// and is set to `Failed` on cancellation or a step error.
fn drive(
    mut ctx: RunContext,
    env: &mut StepEnv,
    state: &mut PipelineState,
) -> Result<RunContext, PipelineError> {
    for (name, step) in STEPS {
        if env.cancel.load(Ordering::Relaxed) {
            *state = PipelineState::Failed;
            env.audit.log("run_failed", Some("cancelled"));
            return Err(PipelineError::Cancelled);
        }
        ctx = match step(ctx, env) {
            Ok(next) => next,
            Err(err) => {
                *state = PipelineState::Failed;
                env.audit.log("run_failed", Some(&format!("{name}: {err}")));
                return Err(err);
            }
        };
        let next = state.advance();
        debug!("pipeline step {name} done: {state:?} -> {next:?}");
        *state = next;
    }
    *state = state.advance();
    Ok(ctx)
}

fn consent_step(mut ctx: RunContext, env: &mut StepEnv) -> Result<RunContext, PipelineError> {
    ctx.consents = Some(ConsentGate::collect(env.prompt, env.audit));
    Ok(ctx)
}

fn ingest_step(mut ctx: RunContext, env: &mut StepEnv) -> Result<RunContext, PipelineError> {
    if !ctx.granted(ConsentSource::BrowserHistory) {
        return Ok(ctx);
    }
    env.audit.log("ingest_start", Some("browser_history"));

    let batches = env
        .source
        .fetch(&ctx.browsers, ctx.since, &ctx.fetch, env.cancel.clone());
    for batch in batches {
        ctx.skipped_rows += batch.skipped_rows;
        match &batch.outcome {
            FetchOutcome::Fetched { path, snapshot_sha256 } => {
                info!(
                    "{}: {} entries from {}",
                    batch.browser.tag(),
                    batch.entries.len(),
                    path.display()
                );
                env.audit.log(
                    "ingest_source",
                    Some(&format!(
                        "{}={} path={} snapshot_sha256={snapshot_sha256}",
                        batch.browser.tag(),
                        batch.entries.len(),
                        path.display()
                    )),
                );
            }
            FetchOutcome::NoProfile => {
                ctx.skipped_browsers += 1;
                env.audit.log(
                    "browser_skipped",
                    Some(&format!("{}=no_profile", batch.browser.tag())),
                );
            }
            FetchOutcome::Skipped { reason } => {
                ctx.skipped_browsers += 1;
                env.audit.log(
                    "browser_skipped",
                    Some(&format!("{}={reason}", batch.browser.tag())),
                );
            }
        }
        ctx.history.extend(batch.entries);
    }

    env.audit.log(
        "ingest_end",
        Some(&format!("browser_history_count={}", ctx.history.len())),
    );
    Ok(ctx)
}

fn store_step(mut ctx: RunContext, env: &mut StepEnv) -> Result<RunContext, PipelineError> {
    if ctx.history.is_empty() {
        return Ok(ctx);
    }
    env.audit
        .log("store_start", Some(&format!("rows={}", ctx.history.len())));
    let saved = env.store.persist(&ctx.history)?;
    ctx.entries_saved = saved;
    env.audit
        .log("store_end", Some(&format!("rows_saved={saved}")));
    Ok(ctx)
}

fn notify_step(ctx: RunContext, env: &mut StepEnv) -> Result<RunContext, PipelineError> {
    let message = format!("Data fetch complete — {} entries saved.", ctx.entries_saved);
    println!("{message}");
    env.audit.log("ui_notify", Some(&message));
    Ok(ctx)
}
