use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum TimeWindowArg {
    Today,
    LastWeek,
    LastMonth,
    OneYear,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Collect browser history under explicit per-source consent
    FetchHistory(FetchHistoryArgs),
}

#[derive(Args, Debug)]
pub struct FetchHistoryArgs {
    /// Browsers to include (comma-separated: chrome, edge, firefox)
    #[arg(long, value_delimiter = ',', default_value = "chrome,firefox,edge")]
    pub browsers: Vec<String>,

    /// Restrict ingestion to a relative time window
    #[arg(long, value_enum, default_value_t = TimeWindowArg::LastWeek)]
    pub time_window: TimeWindowArg,

    /// Output directory for the history database, CSV export and audit log
    #[arg(short, long, default_value = "./data")]
    pub output: PathBuf,

    /// Optional path to a known-paths config file (YAML)
    #[arg(long)]
    pub paths_config: Option<PathBuf>,

    /// Override a browser's history database path (browser=path, repeatable)
    #[arg(long, value_name = "BROWSER=PATH")]
    pub db_override: Vec<String>,

    /// Number of ingestion worker threads
    #[arg(long, default_value_t = num_cpus::get())]
    pub workers: usize,

    /// Per-browser row cap
    #[arg(long, default_value_t = 10_000)]
    pub max_rows: u32,

    /// Ingestion timeout in seconds; browsers slower than this are skipped
    #[arg(long, default_value_t = 30)]
    pub read_timeout_secs: u64,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
