use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{info, warn};

use webtrail::{
    cli,
    config,
    consent::StdinPrompt,
    history::{FetchOptions, LocalHistorySource},
    history::locate::{BrowserLocator, LocatorEnv},
    logging,
    pipeline::{self, RunContext, StepEnv},
    storage::audit::AuditLog,
    storage::store::HistoryStore,
    util,
};

fn main() -> Result<()> {
    logging::init_logging();

    let cli_opts = cli::parse();
    let cli::Command::FetchHistory(args) = cli_opts.command;

    let loaded = config::load_config(args.paths_config.as_deref())?;
    let (browsers, unknown) = util::parse_browsers(&args.browsers);
    for unknown in unknown {
        warn!("unknown browser in --browsers: {unknown}");
    }
    if browsers.is_empty() {
        bail!("no recognized browsers in --browsers");
    }
    let overrides = util::parse_db_overrides(&args.db_override)?;

    let window = util::window_from_cli(args.time_window);
    let since = window.since(chrono::Utc::now());

    info!(
        "starting run_id={} window={} browsers={} output={}",
        loaded.run_id,
        window.label(),
        browsers.iter().map(|b| b.tag()).collect::<Vec<_>>().join(","),
        args.output.display()
    );

    let audit = AuditLog::open(&args.output)?;
    let mut store = HistoryStore::open(&args.output)?;
    audit.log(
        "run_start",
        Some(&format!(
            "run_id={} window={} config_hash={}",
            loaded.run_id,
            window.label(),
            loaded.config_hash
        )),
    );

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::SeqCst);
        })?;
    }

    let locator = BrowserLocator::new(LocatorEnv::from_process(), overrides, loaded.paths.clone());
    let source = LocalHistorySource::new(locator);
    let mut prompt = StdinPrompt;

    let ctx = RunContext::new(
        window,
        since,
        browsers,
        FetchOptions {
            max_rows: args.max_rows,
            workers: args.workers,
            read_timeout: Duration::from_secs(args.read_timeout_secs),
        },
    );
    let mut env = StepEnv {
        audit: &audit,
        store: &mut store,
        prompt: &mut prompt,
        source: &source,
        cancel,
    };

    match pipeline::run(ctx, &mut env) {
        Ok(ctx) => {
            info!(
                "webtrail run finished: {} saved, {} rows skipped, {} browsers skipped",
                ctx.entries_saved, ctx.skipped_rows, ctx.skipped_browsers
            );
            audit.flush()?;
            Ok(())
        }
        Err(err) => {
            audit.flush()?;
            bail!("run failed: {err}");
        }
    }
}
