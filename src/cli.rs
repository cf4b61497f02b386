//! Command-line interface definitions for the discovery engine.
//!
//! This module defines the CLI subcommands using the `clap` crate. Paths can
//! be provided via flags or environment variables.

use clap::{Args, Parser, Subcommand};

/// Command-line arguments for the discovery engine.
///
/// # Examples
///
/// ```sh
/// # One discovery pass over every due source
/// newsroom_discovery run --sources sources.yaml --state-dir ./state
///
/// # Force two sources regardless of schedule and write a report
/// newsroom_discovery run -s sources.yaml -d ./state --source gazette --source courier \
///     --ignore-schedule --report-dir ./reports
///
/// # Operator actions
/// newsroom_discovery pause -s sources.yaml -d ./state --source gazette --reason "site redesign"
/// newsroom_discovery resume -s sources.yaml -d ./state --source gazette
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one discovery pass
    Run(RunArgs),

    /// Pause a source so discovery skips it
    Pause(PauseArgs),

    /// Resume a paused source and reset its no-effective-methods counter
    Resume(ResumeArgs),

    /// Full-site index build, spawned by the engine in a child process
    #[command(hide = true)]
    BuildWorker(BuildWorkerArgs),
}

/// Where sources and state live.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// YAML file listing sources
    #[arg(short, long, env = "DISCOVERY_SOURCES")]
    pub sources: String,

    /// Directory for health, candidate, and telemetry files
    #[arg(short = 'd', long, env = "DISCOVERY_STATE_DIR")]
    pub state_dir: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Optional path to config.yaml file
    #[arg(short, long, env = "DISCOVERY_CONFIG")]
    pub config: Option<String>,

    /// Only these source ids (repeatable)
    #[arg(long = "source")]
    pub sources_only: Vec<String>,

    /// Directory for the JSON run report
    #[arg(short, long, env = "DISCOVERY_REPORT_DIR")]
    pub report_dir: Option<String>,

    /// Process sources even when they are not due
    #[arg(long)]
    pub ignore_schedule: bool,
}

#[derive(Args, Debug)]
pub struct PauseArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub source: String,

    #[arg(long)]
    pub reason: String,
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub source: String,
}

#[derive(Args, Debug)]
pub struct BuildWorkerArgs {
    #[arg(long)]
    pub url: String,

    /// Result file; written atomically
    #[arg(long)]
    pub output: String,

    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,

    /// Stop collecting after this many URLs
    #[arg(long, default_value_t = 500)]
    pub max_urls: usize,
}
