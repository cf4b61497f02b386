//! # Newsroom Discovery
//!
//! Discovers new article URLs from many independently operated news sources
//! that share no API. Per source it decides which discovery strategy to try,
//! in what order, and remembers whether the source is worth probing again.
//!
//! ## Features
//!
//! - RSS/Atom feed probing with recency filtering and an older-entry fallback
//! - Homepage pre-checks before an expensive full-site index build
//! - Full-site build isolated in a child process under a hard deadline
//! - Heuristic link sniffing through a pluggable classifier
//! - Per-source health state: RSS failure counters, a rolling transient
//!   window, cooldowns, and auto-pause
//!
//! ## Usage
//!
//! ```sh
//! newsroom_discovery run --sources sources.yaml --state-dir ./state --report-dir ./reports
//! ```
//!
//! ## Architecture
//!
//! 1. **Scheduling**: skip sources that are paused or not yet due
//! 2. **Routing**: try strategies in priority order, short-circuiting on enough results
//! 3. **Health**: classify each outcome and fold it into the source's state
//! 4. **Filtering**: scope, recency, and dedup checks before the candidate sink
//! 5. **Output**: persist candidates and state, write the run report

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod classifier;
mod cli;
mod config;
mod error;
mod fetch;
mod filter;
mod health;
mod indexer;
mod interfaces;
mod models;
mod orchestrator;
mod outputs;
mod router;
mod schedule;
mod store;
mod strategies;
#[cfg(test)]
mod testing;
mod utils;
mod worker;

use classifier::PathHeuristicClassifier;
use cli::{Cli, Command, PauseArgs, ResumeArgs, RunArgs, StoreArgs};
use config::DiscoveryConfig;
use fetch::HttpFetcher;
use orchestrator::{DiscoveryOrchestrator, RunOptions};
use outputs::json;
use store::files::FileStore;
use strategies::StrategyKit;
use utils::ensure_writable_dir;
use worker::IsolatedBuildWorker;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    match args.command {
        Command::Run(run_args) => run(run_args).await,
        Command::Pause(pause_args) => pause(pause_args).await,
        Command::Resume(resume_args) => resume(resume_args).await,
        Command::BuildWorker(worker_args) => {
            indexer::run_worker(
                &worker_args.url,
                Path::new(&worker_args.output),
                Duration::from_secs(worker_args.timeout_secs.max(1)),
                worker_args.max_urls,
                &DiscoveryConfig::default().user_agent,
            )
            .await
        }
    }
}

/// Wire the production collaborators around a file store.
async fn build_orchestrator(store_args: &StoreArgs, config: DiscoveryConfig) -> Result<DiscoveryOrchestrator> {
    let store = Arc::new(
        FileStore::open(&store_args.sources, &store_args.state_dir)
            .await
            .context("failed to open state store")?,
    );
    let fetcher = HttpFetcher::new(config.http_timeout(), &config.user_agent).context("failed to build HTTP client")?;
    let mut worker = IsolatedBuildWorker::for_current_exe()
        .context("failed to locate current executable for the build worker")?
        .with_grace(config.worker_grace());
    if let Some(deadline) = config.worker_deadline() {
        worker = worker.with_deadline(deadline);
    }
    let kit = StrategyKit::new(
        Arc::new(fetcher),
        Arc::new(worker),
        Arc::new(PathHeuristicClassifier),
        config,
    );
    Ok(DiscoveryOrchestrator::new(kit, store.clone(), store.clone(), store))
}

#[instrument(level = "info", skip_all)]
async fn run(args: RunArgs) -> Result<()> {
    let start_time = std::time::Instant::now();
    info!("Discovery run starting up");

    let config = match &args.config {
        Some(path) => DiscoveryConfig::load(path)?,
        None => DiscoveryConfig::default(),
    };

    // Early check: fail before any network work if the report can't be written
    if let Some(report_dir) = &args.report_dir {
        if let Err(e) = ensure_writable_dir(report_dir).await {
            error!(
                path = %report_dir,
                error = %e,
                "Report directory is not writable (fix perms or choose a different path)"
            );
            return Err(anyhow::anyhow!("report directory {report_dir} is not writable: {e}"));
        }
    }

    let mut orchestrator = build_orchestrator(&args.store, config).await?;
    let report = orchestrator
        .run(&RunOptions {
            source_ids: args.sources_only.clone(),
            ignore_schedule: args.ignore_schedule,
        })
        .await?;

    let s = &report.summary;
    info!(
        processed = s.sources_processed,
        succeeded = s.sources_succeeded,
        failed = s.sources_failed,
        paused = s.sources_paused,
        not_due = s.sources_not_due,
        found = s.candidates_found,
        new = s.candidates_new,
        duplicate = s.candidates_duplicate,
        expired = s.candidates_expired,
        out_of_scope = s.candidates_out_of_scope,
        "Run summary"
    );

    if let Some(report_dir) = &args.report_dir {
        match json::write_report(&report, report_dir).await {
            Ok(path) => info!(path = %path.display(), "Run report written"),
            Err(e) => error!(error = %e, "Failed to write run report"),
        }
    }

    info!(elapsed_ms = start_time.elapsed().as_millis() as u64, "Discovery run finished");
    Ok(())
}

#[instrument(level = "info", skip_all, fields(source_id = %args.source))]
async fn pause(args: PauseArgs) -> Result<()> {
    let orchestrator = build_orchestrator(&args.store, DiscoveryConfig::default()).await?;
    let health = orchestrator.pause_source(&args.source, &args.reason).await?;
    info!(reason = ?health.paused_reason, "Source paused");
    Ok(())
}

#[instrument(level = "info", skip_all, fields(source_id = %args.source))]
async fn resume(args: ResumeArgs) -> Result<()> {
    let orchestrator = build_orchestrator(&args.store, DiscoveryConfig::default()).await?;
    orchestrator.resume_source(&args.source).await?;
    info!("Source resumed");
    Ok(())
}
