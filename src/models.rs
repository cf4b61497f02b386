//! Data models for sources, their health state, and discovered candidates.
//!
//! This module defines the core data structures used throughout the engine:
//! - [`Source`]: one monitored publisher with its cadence hint and health state
//! - [`HealthState`]: the typed per-source failure/success counters
//! - [`CandidateUrl`]: a discovered URL not yet verified as an article
//! - [`DiscoveryAttempt`]: the ephemeral per-source record of what was tried
//! - [`RunSummary`]: end-of-run counts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::health::classifier::Classification;

/// The discovery methods the router can try for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    RssFeed,
    FullBuild,
    Sniffer,
}

impl DiscoveryMethod {
    /// Default ordering when nothing is known about the source.
    pub const DEFAULT_ORDER: [DiscoveryMethod; 3] = [
        DiscoveryMethod::RssFeed,
        DiscoveryMethod::FullBuild,
        DiscoveryMethod::Sniffer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMethod::RssFeed => "rss_feed",
            DiscoveryMethod::FullBuild => "full_build",
            DiscoveryMethod::Sniffer => "sniffer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rss_feed" | "rss" | "feed" => Some(DiscoveryMethod::RssFeed),
            "full_build" | "newspaper4k" | "build" => Some(DiscoveryMethod::FullBuild),
            "sniffer" | "storysniffer" => Some(DiscoveryMethod::Sniffer),
            _ => None,
        }
    }
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transient RSS failure inside the rolling window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransientFailure {
    pub at: DateTime<Utc>,
    /// HTTP status, or `None` for connection errors and timeouts.
    pub status: Option<u16>,
}

/// Persisted per-source health counters and flags.
///
/// Mutated only by [`crate::health::state_machine::FailureStateMachine`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthState {
    pub rss_consecutive_failures: u32,
    /// Rolling window, oldest first.
    pub rss_transient_failures: Vec<TransientFailure>,
    pub rss_missing_at: Option<DateTime<Utc>>,
    pub rss_last_failed_at: Option<DateTime<Utc>>,
    pub last_successful_method: Option<DiscoveryMethod>,
    pub no_effective_methods_consecutive: u32,
    pub no_effective_methods_last_seen: Option<DateTime<Utc>>,
    pub paused: bool,
    pub paused_reason: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl HealthState {
    /// Read a legacy untyped metadata blob.
    ///
    /// Older state stored these fields in a free-form JSON object where
    /// numbers sometimes arrived as strings and timestamps in several
    /// formats. Unknown or malformed values fall back to their defaults.
    pub fn from_legacy(meta: &Value) -> Self {
        let Some(obj) = meta.as_object() else {
            return HealthState::default();
        };

        let count = |key: &str| -> u32 {
            match obj.get(key) {
                Some(Value::Number(n)) => n
                    .as_u64()
                    .map(|v| v.min(u32::MAX as u64) as u32)
                    .unwrap_or(0),
                Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
                _ => 0,
            }
        };
        let stamp = |key: &str| obj.get(key).and_then(legacy_timestamp);

        let rss_transient_failures = obj
            .get("rss_transient_failures")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let at = entry
                            .get("timestamp")
                            .or_else(|| entry.get("at"))
                            .and_then(legacy_timestamp)?;
                        let status = entry
                            .get("status")
                            .or_else(|| entry.get("status_code"))
                            .and_then(|s| match s {
                                Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
                                Value::String(s) => s.parse().ok(),
                                _ => None,
                            });
                        Some(TransientFailure { at, status })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let paused = match obj.get("paused") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0) != 0,
            _ => false,
        };

        HealthState {
            rss_consecutive_failures: count("rss_consecutive_failures"),
            rss_transient_failures,
            rss_missing_at: stamp("rss_missing_at"),
            rss_last_failed_at: stamp("rss_last_failed_at"),
            last_successful_method: obj
                .get("last_successful_method")
                .and_then(Value::as_str)
                .and_then(DiscoveryMethod::parse),
            no_effective_methods_consecutive: count("no_effective_methods_consecutive"),
            no_effective_methods_last_seen: stamp("no_effective_methods_last_seen"),
            paused,
            paused_reason: obj
                .get("paused_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            last_attempt_at: stamp("last_discovery_attempt_at").or_else(|| stamp("last_attempt_at")),
            last_success_at: stamp("last_success_at"),
        }
    }
}

fn legacy_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    let s = v.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive ISO timestamps were written without an offset and meant UTC.
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// A publisher/host being monitored for new articles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub host: String,
    /// Base URL; `https://{host}` when not declared.
    #[serde(default)]
    pub homepage: Option<String>,
    /// Free-text cadence hint ("daily", "weekly", "every 3 days", ...).
    #[serde(default)]
    pub frequency: Option<String>,
    /// Alternate hosts or registrable domains whose URLs count as in scope.
    #[serde(default)]
    pub alternate_hosts: Vec<String>,
    /// Feed URLs already known for this source; probed before conventional paths.
    #[serde(default)]
    pub known_feeds: Vec<String>,
    /// Per-source candidate cap.
    #[serde(default)]
    pub max_articles: Option<usize>,
    #[serde(default, skip_serializing)]
    pub health: HealthState,
}

impl Source {
    pub fn new(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            homepage: None,
            frequency: None,
            alternate_hosts: Vec::new(),
            known_feeds: Vec::new(),
            max_articles: None,
            health: HealthState::default(),
        }
    }

    pub fn homepage_url(&self) -> String {
        match &self.homepage {
            Some(h) if !h.trim().is_empty() => h.trim().to_string(),
            _ => format!("https://{}", self.host.trim().trim_end_matches('/')),
        }
    }

    pub fn cap(&self, default_cap: usize) -> usize {
        self.max_articles.filter(|c| *c > 0).unwrap_or(default_cap)
    }

    /// Primary host, declared alternates, and the homepage's host.
    pub fn allowed_hosts(&self) -> Vec<String> {
        let mut hosts = vec![self.host.clone()];
        hosts.extend(self.alternate_hosts.iter().cloned());
        if let Some(host) = crate::utils::host_of(&self.homepage_url()) {
            hosts.push(host);
        }
        hosts
    }
}

/// Discovery-specific metadata carried alongside a candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<usize>,
    /// Set when recency filtering was relaxed because the feed is still active.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback_include_older: bool,
    /// Sniffer confidence, passed through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Sub-path that produced the candidate ("homepage_feed_link", "homepage_links", "site_index").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A discovered URL not yet verified as an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateUrl {
    pub url: String,
    pub source_id: String,
    pub method: DiscoveryMethod,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: CandidateMetadata,
}

impl CandidateUrl {
    pub fn new(url: impl Into<String>, source_id: impl Into<String>, method: DiscoveryMethod) -> Self {
        Self {
            url: url.into(),
            source_id: source_id.into(),
            method,
            published_at: None,
            metadata: CandidateMetadata::default(),
        }
    }
}

/// One strategy invocation inside an attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptStep {
    pub method: DiscoveryMethod,
    /// `None` when the method was skipped without running.
    pub classification: Option<Classification>,
    pub candidates: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Ephemeral record of one source's discovery pass. Never persisted as a row.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryAttempt {
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<AttemptStep>,
    pub candidates_found: usize,
    pub candidates_new: usize,
    pub paused: bool,
    pub elapsed_ms: u64,
}

impl DiscoveryAttempt {
    pub fn attempted_methods(&self) -> Vec<DiscoveryMethod> {
        self.steps
            .iter()
            .filter(|s| s.classification.is_some())
            .map(|s| s.method)
            .collect()
    }
}

/// End-of-run counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub sources_processed: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub sources_paused: usize,
    pub sources_not_due: usize,
    pub candidates_found: usize,
    pub candidates_new: usize,
    pub candidates_duplicate: usize,
    pub candidates_expired: usize,
    pub candidates_out_of_scope: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_method_parse_accepts_legacy_labels() {
        assert_eq!(DiscoveryMethod::parse("RSS_FEED"), Some(DiscoveryMethod::RssFeed));
        assert_eq!(DiscoveryMethod::parse("newspaper4k"), Some(DiscoveryMethod::FullBuild));
        assert_eq!(DiscoveryMethod::parse("storysniffer"), Some(DiscoveryMethod::Sniffer));
        assert_eq!(DiscoveryMethod::parse("carrier pigeon"), None);
    }

    #[test]
    fn test_source_homepage_defaults_to_https_host() {
        let source = Source::new("s1", "example.com");
        assert_eq!(source.homepage_url(), "https://example.com");

        let mut declared = Source::new("s2", "example.com");
        declared.homepage = Some("http://www.example.com/news/".to_string());
        assert_eq!(declared.homepage_url(), "http://www.example.com/news/");
    }

    #[test]
    fn test_source_cap_ignores_zero() {
        let mut source = Source::new("s1", "example.com");
        assert_eq!(source.cap(50), 50);
        source.max_articles = Some(0);
        assert_eq!(source.cap(50), 50);
        source.max_articles = Some(12);
        assert_eq!(source.cap(50), 12);
    }

    #[test]
    fn test_health_from_legacy_blob() {
        let blob = json!({
            "rss_consecutive_failures": "2",
            "rss_transient_failures": [
                {"timestamp": "2025-05-01T10:00:00", "status": 429},
                {"timestamp": "not a date", "status": 503},
                {"timestamp": "2025-05-02T10:00:00+00:00", "status_code": "503"}
            ],
            "rss_missing_at": "2025-05-03 08:30:00",
            "last_successful_method": "rss_feed",
            "no_effective_methods_consecutive": 4,
            "paused": "true",
            "paused_reason": "auto"
        });

        let health = HealthState::from_legacy(&blob);
        assert_eq!(health.rss_consecutive_failures, 2);
        assert_eq!(health.rss_transient_failures.len(), 2);
        assert_eq!(health.rss_transient_failures[0].status, Some(429));
        assert_eq!(health.rss_transient_failures[1].status, Some(503));
        assert_eq!(
            health.rss_missing_at,
            Some(Utc.with_ymd_and_hms(2025, 5, 3, 8, 30, 0).unwrap())
        );
        assert_eq!(health.last_successful_method, Some(DiscoveryMethod::RssFeed));
        assert_eq!(health.no_effective_methods_consecutive, 4);
        assert!(health.paused);
        assert_eq!(health.paused_reason.as_deref(), Some("auto"));
    }

    #[test]
    fn test_health_from_legacy_drops_out_of_range_status() {
        let blob = json!({
            "rss_transient_failures": [
                {"timestamp": "2025-05-01T10:00:00", "status": 70000},
                {"timestamp": "2025-05-02T10:00:00", "status": 503}
            ]
        });
        let health = HealthState::from_legacy(&blob);
        assert_eq!(health.rss_transient_failures.len(), 2);
        assert_eq!(health.rss_transient_failures[0].status, None);
        assert_eq!(health.rss_transient_failures[1].status, Some(503));
    }

    #[test]
    fn test_health_from_legacy_non_object_is_default() {
        assert_eq!(HealthState::from_legacy(&json!(null)), HealthState::default());
        assert_eq!(HealthState::from_legacy(&json!([1, 2])), HealthState::default());
    }

    #[test]
    fn test_candidate_metadata_skips_empty_fields() {
        let candidate = CandidateUrl::new("https://example.com/a", "s1", DiscoveryMethod::Sniffer);
        let json = serde_json::to_string(&candidate).unwrap();
        assert!(json.contains("\"method\":\"sniffer\""));
        assert!(!json.contains("fallback_include_older"));
        assert!(!json.contains("confidence"));
    }
}
