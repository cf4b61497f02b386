//! Process-isolated full-site build.
//!
//! The full-site index build can hang indefinitely and cannot be cancelled
//! cooperatively, so it runs in a child process (this binary's hidden
//! `build-worker` subcommand by default). The parent waits under a hard
//! wall-clock deadline of `min(30, max(10, 3 x base_timeout))` seconds and
//! kills the child when it expires.
//!
//! Results come back through a JSON file, never shared memory. The child
//! writes to a temporary sibling and renames it into place, so a kill
//! mid-write leaves no half-written result behind.
//!
//! [`IsolatedBuildWorker::run`] distinguishes a completed build from a
//! timeout or a crash; the [`SiteBuilder`] impl folds all failures into an
//! empty URL list.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, instrument, warn};

use crate::interfaces::SiteBuilder;

const MIN_HARD_TIMEOUT_SECS: f64 = 10.0;
const MAX_HARD_TIMEOUT_SECS: f64 = 30.0;

/// Hard wall-clock limit for one build: `min(30, max(10, 3 x base))` seconds.
pub fn hard_timeout(base: Duration) -> Duration {
    let secs = (base.as_secs_f64() * 3.0).clamp(MIN_HARD_TIMEOUT_SECS, MAX_HARD_TIMEOUT_SECS);
    Duration::from_secs_f64(secs)
}

/// What the worker process writes to its result file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub urls: Vec<String>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// Write `report` to `path` atomically (temp file + rename).
pub async fn write_report(path: &Path, report: &WorkerReport) -> std::io::Result<()> {
    let partial = path.with_extension("partial");
    let json = serde_json::to_vec(report)?;
    tokio::fs::write(&partial, json).await?;
    tokio::fs::rename(&partial, path).await
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Completed(Vec<String>),
    TimedOut,
    Crashed(String),
}

/// Runs the full-site build in a separate OS process under a hard deadline.
#[derive(Debug, Clone)]
pub struct IsolatedBuildWorker {
    program: PathBuf,
    /// Leading arguments; `--url`, `--output`, and `--timeout-secs` follow.
    args: Vec<String>,
    grace: Duration,
    deadline_override: Option<Duration>,
}

impl IsolatedBuildWorker {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            grace: Duration::from_secs(2),
            deadline_override: None,
        }
    }

    /// Re-invoke the current executable's `build-worker` subcommand.
    pub fn for_current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec!["build-worker".to_string()]))
    }

    /// How long to wait for the killed child to be reaped.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Replace the computed deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_override = Some(deadline);
        self
    }

    pub fn deadline(&self, base_timeout: Duration) -> Duration {
        self.deadline_override.unwrap_or_else(|| hard_timeout(base_timeout))
    }

    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn run(&self, url: &str, base_timeout: Duration) -> BuildOutcome {
        let t0 = Instant::now();
        let dir = match tempfile::Builder::new().prefix("site-index-").tempdir() {
            Ok(dir) => dir,
            Err(e) => return BuildOutcome::Crashed(format!("failed to create result dir: {e}")),
        };
        let output = dir.path().join("result.json");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--url")
            .arg(url)
            .arg("--output")
            .arg(&output)
            .arg("--timeout-secs")
            .arg(base_timeout.as_secs().max(1).to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(program = %self.program.display(), error = %e, "Failed to spawn build worker");
                return BuildOutcome::Crashed(format!("spawn failed: {e}"));
            }
        };

        let deadline = self.deadline(base_timeout);
        let outcome = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) if status.success() => read_report(&output).await,
            Ok(Ok(status)) => BuildOutcome::Crashed(format!("worker exited with {status}")),
            Ok(Err(e)) => BuildOutcome::Crashed(format!("failed waiting on worker: {e}")),
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "Build worker exceeded deadline; killing");
                self.terminate(&mut child).await;
                BuildOutcome::TimedOut
            }
        };

        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            outcome = match &outcome {
                BuildOutcome::Completed(_) => "completed",
                BuildOutcome::TimedOut => "timed_out",
                BuildOutcome::Crashed(_) => "crashed",
            },
            "Build worker finished"
        );
        outcome
    }

    async fn terminate(&self, child: &mut Child) {
        if let Err(e) = child.start_kill() {
            warn!(error = %e, "Failed to signal build worker");
        }
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(_) => debug!("Build worker reaped"),
            Err(_) => warn!(grace_ms = self.grace.as_millis() as u64, "Build worker not reaped within grace period"),
        }
    }
}

async fn read_report(path: &Path) -> BuildOutcome {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => return BuildOutcome::Crashed(format!("no result file: {e}")),
    };
    match serde_json::from_slice::<WorkerReport>(&bytes) {
        Ok(report) => BuildOutcome::Completed(report.urls),
        Err(e) => BuildOutcome::Crashed(format!("unreadable result file: {e}")),
    }
}

#[async_trait]
impl SiteBuilder for IsolatedBuildWorker {
    async fn build(&self, url: &str, base_timeout: Duration) -> Vec<String> {
        match self.run(url, base_timeout).await {
            BuildOutcome::Completed(urls) => urls,
            BuildOutcome::TimedOut => Vec::new(),
            BuildOutcome::Crashed(reason) => {
                warn!(%url, %reason, "Build worker crashed; treating as empty");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_timeout_bounds() {
        assert_eq!(hard_timeout(Duration::from_secs(1)), Duration::from_secs(10));
        assert_eq!(hard_timeout(Duration::from_secs(5)), Duration::from_secs(15));
        assert_eq!(hard_timeout(Duration::from_secs(10)), Duration::from_secs(30));
        assert_eq!(hard_timeout(Duration::from_secs(60)), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_write_report_leaves_no_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        let report = WorkerReport {
            urls: vec!["https://example.com/a".into()],
            elapsed_ms: 5,
        };
        write_report(&path, &report).await.unwrap();
        assert!(!path.with_extension("partial").exists());
        assert_eq!(read_report(&path).await, BuildOutcome::Completed(report.urls));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_crash() {
        let worker = IsolatedBuildWorker::new("/nonexistent/definitely-not-here", vec![]);
        let outcome = worker.run("https://example.com", Duration::from_secs(1)).await;
        assert!(matches!(outcome, BuildOutcome::Crashed(_)));
    }

    #[cfg(unix)]
    fn sh(script: &str) -> IsolatedBuildWorker {
        // `sh -c script --url U --output P ...` binds $0=--url, $1=U, $2=--output, $3=P.
        IsolatedBuildWorker::new("sh", vec!["-c".into(), script.into()])
            .with_grace(Duration::from_secs(1))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hanging_build_is_killed_and_empty() {
        let worker = sh("sleep 30").with_deadline(Duration::from_millis(300));
        let t0 = Instant::now();
        assert_eq!(worker.run("https://example.com", Duration::from_secs(10)).await, BuildOutcome::TimedOut);
        assert!(t0.elapsed() < Duration::from_secs(5));

        let t1 = Instant::now();
        assert!(worker.build("https://example.com", Duration::from_secs(10)).await.is_empty());
        assert!(t1.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_completed_build_reads_result_file() {
        let worker = sh(r#"printf '{"urls":["https://example.com/news/a"],"elapsed_ms":3}' > "$3""#);
        assert_eq!(
            worker.run("https://example.com", Duration::from_secs(1)).await,
            BuildOutcome::Completed(vec!["https://example.com/news/a".into()])
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crash_and_garbage_are_distinct_from_empty() {
        assert!(matches!(
            sh("exit 3").run("https://example.com", Duration::from_secs(1)).await,
            BuildOutcome::Crashed(_)
        ));
        assert!(matches!(
            sh(r#"printf 'not json' > "$3""#).run("https://example.com", Duration::from_secs(1)).await,
            BuildOutcome::Crashed(_)
        ));
        assert!(matches!(
            sh("exit 0").run("https://example.com", Duration::from_secs(1)).await,
            BuildOutcome::Crashed(_)
        ));
        assert_eq!(
            sh(r#"printf '{"urls":[]}' > "$3""#).run("https://example.com", Duration::from_secs(1)).await,
            BuildOutcome::Completed(vec![])
        );
        assert!(sh("exit 3").build("https://example.com", Duration::from_secs(1)).await.is_empty());
    }
}
