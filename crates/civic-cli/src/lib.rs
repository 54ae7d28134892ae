//! civic CLI library
//!
//! Operator command line for the civicsync core. Commands run in-process
//! against the configured database (or in memory with `--in-memory`):
//!
//! - **run**: dispatch one run and block until it finishes
//! - **sweep**: finalize runs orphaned by a crash
//! - **jobs**: list jobs with their latest run

pub mod commands;
pub mod error;

pub use error::{CliError, Result};

use civic_common::logging::{LogConfig, LogLevel, LogOutput};
use civic_common::JobMode;
use civic_server::models::RunStatus;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// civicsync operator CLI
#[derive(Parser, Debug)]
#[command(name = "civic")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (defaults to $CIVIC_CONFIG or ./civicsync.toml)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Keep all state in memory instead of PostgreSQL
    #[arg(long, global = true)]
    pub in_memory: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a job now and wait for it to finish
    ///
    /// Exits 0 on success, 1 on failure, 2 on partial success and 3 when
    /// the run could not start (job locked or unknown).
    Run {
        #[arg(long, value_parser = parse_mode)]
        mode: JobMode,

        #[arg(long)]
        job: String,

        #[arg(long)]
        scope: Option<String>,

        /// Only fetch records changed since this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<chrono::NaiveDate>,

        /// Operator recorded as the trigger
        #[arg(long, env = "CIVIC_ACTOR", default_value = "cli")]
        actor: String,
    },

    /// Finalize runs left active by a crashed process
    Sweep,

    /// List jobs with their latest run
    Jobs,
}

fn parse_mode(s: &str) -> std::result::Result<JobMode, String> {
    s.parse::<JobMode>().map_err(|e| e.to_string())
}

/// Warn-level console logging so run summaries stay readable, with `LOG_*`
/// variables applied on top. `--verbose` always wins on level.
pub fn log_config(verbose: bool, var: impl Fn(&str) -> Option<String>) -> LogConfig {
    let base = LogConfig::builder()
        .level(LogLevel::Warn)
        .output(LogOutput::Console)
        .log_file_prefix("civic-cli")
        .build();
    let mut config = match base.clone().with_overrides_from(var) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring logging environment: {e}");
            base
        },
    };
    if verbose {
        config.level = LogLevel::Debug;
    }
    config
}

/// Exit code for a finished run
pub fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Success => 0,
        RunStatus::PartialSuccess => 2,
        _ => 1,
    }
}
