//! CLI argument definitions using clap derive macros.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};

use ingest_core::pipeline::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use ingest_core::retry::{DEFAULT_MAX_ITEM_RETRIES, DEFAULT_MAX_SESSION_RESTARTS};

/// Default catalog database path.
pub const DEFAULT_DATABASE: &str = "catalog.db";

/// Default checkpoint directory.
pub const DEFAULT_CHECKPOINT_DIR: &str = "checkpoints";

/// Default delay between retries in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// Crawl media listings into a deduplicated catalog of items and stream links.
///
/// Every flag can also be set through its `INGEST_*` environment variable or
/// the TOML config file; the command line wins over the environment, which
/// wins over the file.
#[derive(Parser, Debug)]
#[command(name = "catalog-ingest")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file with scopes and extraction rules
    #[arg(short = 'C', long, env = "INGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite catalog database path
    #[arg(long, env = "INGEST_DATABASE", default_value = DEFAULT_DATABASE)]
    pub database: PathBuf,

    /// Directory holding one checkpoint file per scope
    #[arg(long, env = "INGEST_CHECKPOINT_DIR", default_value = DEFAULT_CHECKPOINT_DIR)]
    pub checkpoint_dir: PathBuf,

    /// Workers per pipeline stage (1-64)
    #[arg(short = 'w', long, env = "INGEST_WORKERS", default_value_t = DEFAULT_WORKERS as u8, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub workers: u8,

    /// Capacity of each inter-stage queue (1-4096)
    #[arg(long, env = "INGEST_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY as u16, value_parser = clap::value_parser!(u16).range(1..=4096))]
    pub queue_capacity: u16,

    /// Attempts per item and session before a restart (1-10)
    #[arg(short = 'r', long, env = "INGEST_MAX_RETRIES", default_value_t = DEFAULT_MAX_ITEM_RETRIES as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: u8,

    /// Session restarts before an item is skipped (0-10)
    #[arg(long, env = "INGEST_MAX_RESTARTS", default_value_t = DEFAULT_MAX_SESSION_RESTARTS as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_restarts: u8,

    /// Delay between retries in milliseconds (max 60000)
    #[arg(long, env = "INGEST_RETRY_DELAY_MS", default_value_t = DEFAULT_RETRY_DELAY_MS, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub retry_delay_ms: u64,

    /// Disable the lookup cache
    #[arg(long, env = "INGEST_NO_CACHE")]
    pub no_cache: bool,

    /// Only run the named scope (repeatable)
    #[arg(short = 's', long = "scope", env = "INGEST_SCOPE", value_delimiter = ',')]
    pub scopes: Vec<String>,

    /// Clear the selected scopes' checkpoints before running
    #[arg(long)]
    pub fresh: bool,
}

/// Which settings were given explicitly (command line or environment).
///
/// Only settings left at their clap default may be replaced by the config file.
#[derive(Debug, Clone, Copy, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ExplicitSources {
    pub database: bool,
    pub checkpoint_dir: bool,
    pub workers: bool,
    pub queue_capacity: bool,
    pub max_retries: bool,
    pub max_restarts: bool,
    pub retry_delay_ms: bool,
    pub no_cache: bool,
}

impl ExplicitSources {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            database: is_explicit(matches, "database"),
            checkpoint_dir: is_explicit(matches, "checkpoint_dir"),
            workers: is_explicit(matches, "workers"),
            queue_capacity: is_explicit(matches, "queue_capacity"),
            max_retries: is_explicit(matches, "max_retries"),
            max_restarts: is_explicit(matches, "max_restarts"),
            retry_delay_ms: is_explicit(matches, "retry_delay_ms"),
            no_cache: is_explicit(matches, "no_cache"),
        }
    }
}

fn is_explicit(matches: &ArgMatches, id: &str) -> bool {
    matches!(
        matches.value_source(id),
        Some(ValueSource::CommandLine | ValueSource::EnvVariable)
    )
}

/// Parses the process arguments, exiting with usage on error.
pub fn parse_with_sources() -> (Args, ExplicitSources) {
    try_parse_with_sources(std::env::args_os()).unwrap_or_else(|err| err.exit())
}

/// Parses `args`, recording which values were given explicitly.
///
/// # Errors
///
/// Returns the clap error for invalid arguments, `--help` and `--version`.
pub fn try_parse_with_sources<I, T>(args: I) -> Result<(Args, ExplicitSources), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = Args::command().try_get_matches_from(args)?;
    let parsed = Args::from_arg_matches(&matches)?;
    Ok((parsed, ExplicitSources::from_matches(&matches)))
}
