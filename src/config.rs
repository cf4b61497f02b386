//! Engine configuration and tuning constants.
//!
//! The thresholds here are product tuning values. They are kept as named
//! constants and exposed through [`DiscoveryConfig`] so a deployment can
//! override them from a YAML file without touching code.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

use crate::error::ConfigError;

/// Non-network RSS failures in a row before the feed is marked missing.
pub const PERMANENT_FAILURE_THRESHOLD: u32 = 3;
/// Transient RSS failures inside the rolling window before the feed is marked missing.
pub const TRANSIENT_FAILURE_THRESHOLD: usize = 5;
pub const TRANSIENT_WINDOW_DAYS: i64 = 7;
/// How recent a feed's newest entry must be to relax recency filtering.
pub const FALLBACK_ACTIVITY_DAYS: f64 = 90.0;
pub const FALLBACK_MAX_ENTRIES: usize = 5;
/// Cadence used when a source's frequency is missing or unrecognized.
pub const DEFAULT_FREQUENCY_DAYS: f64 = 7.0;
/// Cadence for sources publishing more than once a day (6 hours).
pub const SUB_DAILY_INTERVAL_DAYS: f64 = 0.25;
/// Longest cadence a free-text frequency can map to.
pub const MAX_FREQUENCY_DAYS: f64 = 365.0;
pub const NO_EFFECTIVE_PAUSE_THRESHOLD: u32 = 5;
pub const DEFAULT_MAX_ARTICLES: usize = 50;
pub const RECENCY_DAYS: i64 = 7;
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// Thresholds consumed by the failure state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub permanent_failure_threshold: u32,
    pub transient_failure_threshold: usize,
    pub transient_window_days: i64,
    pub no_effective_pause_threshold: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            permanent_failure_threshold: PERMANENT_FAILURE_THRESHOLD,
            transient_failure_threshold: TRANSIENT_FAILURE_THRESHOLD,
            transient_window_days: TRANSIENT_WINDOW_DAYS,
            no_effective_pause_threshold: NO_EFFECTIVE_PAUSE_THRESHOLD,
        }
    }
}

/// Runtime configuration for one discovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Per-request HTTP timeout; also the base for the build worker's hard timeout.
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub default_max_articles: usize,
    /// Entries older than this are dropped unless the fallback applies.
    pub recency_days: i64,
    pub fallback_activity_days: f64,
    pub fallback_max_entries: usize,
    pub default_frequency_days: f64,
    pub politeness_delay_ms: u64,
    pub politeness_jitter_ms: u64,
    pub worker_grace_ms: u64,
    /// Replaces the build worker's computed hard deadline when set.
    pub worker_deadline_secs: Option<u64>,
    pub effectiveness_cache_ttl_secs: u64,
    pub health: HealthThresholds,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: HTTP_TIMEOUT_SECS,
            user_agent: format!("newsroom_discovery/{}", env!("CARGO_PKG_VERSION")),
            default_max_articles: DEFAULT_MAX_ARTICLES,
            recency_days: RECENCY_DAYS,
            fallback_activity_days: FALLBACK_ACTIVITY_DAYS,
            fallback_max_entries: FALLBACK_MAX_ENTRIES,
            default_frequency_days: DEFAULT_FREQUENCY_DAYS,
            politeness_delay_ms: 1000,
            politeness_jitter_ms: 250,
            worker_grace_ms: 2000,
            worker_deadline_secs: None,
            effectiveness_cache_ttl_secs: 3600,
            health: HealthThresholds::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Load configuration from a YAML file; missing keys take their defaults.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&raw)?;
        info!(?config, "Loaded discovery configuration");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: DiscoveryConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid("http_timeout_secs must be positive".into()));
        }
        if self.health.permanent_failure_threshold == 0 || self.health.transient_failure_threshold == 0 {
            return Err(ConfigError::Invalid("failure thresholds must be positive".into()));
        }
        if !(self.default_frequency_days > 0.0) {
            return Err(ConfigError::Invalid("default_frequency_days must be positive".into()));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn worker_grace(&self) -> Duration {
        Duration::from_millis(self.worker_grace_ms)
    }

    pub fn worker_deadline(&self) -> Option<Duration> {
        self.worker_deadline_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}
