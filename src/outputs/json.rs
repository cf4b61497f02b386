//! JSON run report.
//!
//! Each run writes one file named after its UTC start time, grouped by date:
//! `{report_dir}/{YYYY-MM-DD}/{HHMMSS}.json`. The file holds the run summary
//! and one attempt record per processed source.

use std::error::Error;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

use crate::orchestrator::RunReport;

/// Path of the report file for a run, relative to `report_dir`.
pub fn report_path(report: &RunReport, report_dir: &str) -> PathBuf {
    PathBuf::from(report_dir)
        .join(report.started_at.format("%Y-%m-%d").to_string())
        .join(format!("{}.json", report.started_at.format("%H%M%S")))
}

/// Write a [`RunReport`] as pretty JSON.
///
/// # Arguments
///
/// * `report` - The finished run
/// * `report_dir` - Base directory for reports
///
/// # Returns
///
/// The path written, or an error if directory creation or file writing fails.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir))]
pub async fn write_report(report: &RunReport, report_dir: &str) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
    let json = serde_json::to_string_pretty(report)?;
    let path = report_path(report, report_dir);

    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create report dir");
            return Err(e.into());
        }
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote run report");
    Ok(path)
}
