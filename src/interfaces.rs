//! Narrow interfaces the engine consumes.
//!
//! Concrete storage and transport live outside the core. The engine needs
//! only these seams:
//!
//! - [`SourcePersistence`]: list sources and read/write their health state
//! - [`CandidateSink`]: idempotent upsert of discovered URLs
//! - [`TelemetrySink`]: best-effort per-method outcome recording
//! - [`HeuristicClassifier`]: article-likelihood guess for the sniffer
//! - [`SiteBuilder`]: the expensive full-site index build

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::models::{CandidateUrl, DiscoveryMethod, HealthState, Source};

/// Which sources a run should consider.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    /// Restrict to these ids; empty means all.
    pub source_ids: Vec<String>,
    /// Include paused sources in the listing.
    pub include_paused: bool,
}

impl SourceFilter {
    pub fn matches(&self, source: &Source) -> bool {
        (self.source_ids.is_empty() || self.source_ids.iter().any(|id| id == &source.id))
            && (self.include_paused || !source.health.paused)
    }
}

#[async_trait]
pub trait SourcePersistence: Send + Sync {
    /// Sources matching `filter`, with health loaded.
    async fn list_due_sources(&self, filter: &SourceFilter) -> Result<Vec<Source>>;

    async fn read_health(&self, source_id: &str) -> Result<HealthState>;

    async fn write_health(&self, source_id: &str, health: &HealthState) -> Result<()>;
}

#[async_trait]
pub trait CandidateSink: Send + Sync {
    /// Insert or update a candidate, keyed on URL. Returns whether it was new.
    async fn upsert(&self, candidate: &CandidateUrl) -> Result<bool>;

    /// URLs already known for a source, used for dedup before upsert.
    async fn known_urls(&self, _source_id: &str) -> Result<HashSet<String>> {
        Ok(HashSet::new())
    }
}

/// Historical per-method success signal for one source, in `0.0..=1.0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodEffectiveness {
    pub scores: HashMap<DiscoveryMethod, f64>,
}

impl MethodEffectiveness {
    pub fn score(&self, method: DiscoveryMethod) -> f64 {
        self.scores.get(&method).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Best-effort telemetry. Callers log and discard errors.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record_method_outcome(
        &self,
        source_id: &str,
        method: DiscoveryMethod,
        status: &str,
        article_count: usize,
        elapsed_ms: u64,
    ) -> Result<()>;

    async fn record_site_failure(
        &self,
        source_id: &str,
        method: DiscoveryMethod,
        error: &str,
        elapsed_ms: u64,
    ) -> Result<()>;

    /// Historical effectiveness, when the backing store tracks it.
    async fn method_effectiveness(&self, _source_id: &str) -> Result<Option<MethodEffectiveness>> {
        Ok(None)
    }
}

/// External article-likelihood scorer used by the sniffer strategy.
#[async_trait]
pub trait HeuristicClassifier: Send + Sync {
    /// Returns `(is_article, confidence)`.
    async fn guess(&self, url: &str) -> Result<(bool, f64)>;
}

/// Full-site index build. Never fails: any internal failure yields no URLs.
#[async_trait]
pub trait SiteBuilder: Send + Sync {
    async fn build(&self, url: &str, base_timeout: Duration) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        let mut source = Source::new("a", "a.example");
        let all = SourceFilter::default();
        assert!(all.matches(&source));

        let only_b = SourceFilter {
            source_ids: vec!["b".into()],
            include_paused: false,
        };
        assert!(!only_b.matches(&source));

        source.health.paused = true;
        assert!(!all.matches(&source));
        let with_paused = SourceFilter {
            include_paused: true,
            ..Default::default()
        };
        assert!(with_paused.matches(&source));
    }

    #[test]
    fn test_effectiveness_defaults_to_zero() {
        let mut eff = MethodEffectiveness::default();
        assert!(eff.is_empty());
        eff.scores.insert(DiscoveryMethod::Sniffer, 0.8);
        assert_eq!(eff.score(DiscoveryMethod::Sniffer), 0.8);
        assert_eq!(eff.score(DiscoveryMethod::RssFeed), 0.0);
    }
}
