//! Discovery strategies tried by the router for one source.
//!
//! Each strategy is a plain async function over a shared [`StrategyKit`] and
//! the per-attempt [`AttemptContext`]. None of them returns an error: every
//! failure is expressed as a [`RawOutcome`] inside the [`StrategyReport`] and
//! classified afterwards.
//!
//! | Strategy | Module | Cost | Notes |
//! |----------|--------|------|-------|
//! | RSS feed probing | [`rss`] | cheap | known feeds, then conventional paths |
//! | Full-site build | [`build`] | expensive | homepage pre-checks first, then the isolated worker |
//! | Heuristic sniffer | [`sniffer`] | moderate | external classifier over homepage links |
//!
//! [`homepage`] holds the HTML scanning shared by the build pre-check and
//! the sniffer.

pub mod build;
pub mod homepage;
pub mod rss;
pub mod sniffer;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::DiscoveryConfig;
use crate::error::FetchError;
use crate::fetch::{FetchedPage, PageFetcher};
use crate::health::classifier::{Classification, RawOutcome, classify_attempt};
use crate::interfaces::{HeuristicClassifier, SiteBuilder};
use crate::models::{CandidateUrl, Source};
use crate::schedule::SchedulerGate;

/// Collaborators shared by every strategy.
#[derive(Clone)]
pub struct StrategyKit {
    pub fetcher: Arc<dyn PageFetcher>,
    pub builder: Arc<dyn SiteBuilder>,
    pub classifier: Arc<dyn HeuristicClassifier>,
    pub config: DiscoveryConfig,
    pub gate: SchedulerGate,
}

impl StrategyKit {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        builder: Arc<dyn SiteBuilder>,
        classifier: Arc<dyn HeuristicClassifier>,
        config: DiscoveryConfig,
    ) -> Self {
        let gate = SchedulerGate::new(config.default_frequency_days, config.fallback_activity_days);
        Self {
            fetcher,
            builder,
            classifier,
            config,
            gate,
        }
    }
}

/// State local to one source's discovery pass.
pub struct AttemptContext<'a> {
    pub source: &'a Source,
    pub now: DateTime<Utc>,
    pub cap: usize,
    /// False while RSS is marked missing and cooling down. Gates nested
    /// feed probing inside other strategies too.
    pub rss_allowed: bool,
    pub allowed_hosts: Vec<String>,
    homepage: Option<Result<FetchedPage, FetchError>>,
}

impl<'a> AttemptContext<'a> {
    pub fn new(source: &'a Source, now: DateTime<Utc>, cap: usize, rss_allowed: bool) -> Self {
        Self {
            source,
            now,
            cap,
            rss_allowed,
            allowed_hosts: source.allowed_hosts(),
            homepage: None,
        }
    }

    /// The source homepage, fetched at most once per attempt.
    pub async fn homepage(&mut self, fetcher: &dyn PageFetcher) -> Result<FetchedPage, FetchError> {
        if let Some(cached) = &self.homepage {
            return cached.clone();
        }
        let result = fetcher.get(&self.source.homepage_url()).await;
        self.homepage = Some(result.clone());
        result
    }
}

/// What one strategy produced.
#[derive(Debug, Clone, Default)]
pub struct StrategyReport {
    pub candidates: Vec<CandidateUrl>,
    /// Sub-step outcomes, in order.
    pub outcomes: Vec<RawOutcome>,
    pub note: Option<String>,
}

impl StrategyReport {
    pub fn crashed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            candidates: Vec::new(),
            outcomes: vec![RawOutcome::Crashed(reason.clone())],
            note: Some(reason),
        }
    }

    pub fn classification(&self) -> Classification {
        if self.candidates.is_empty() {
            classify_attempt(&self.outcomes)
        } else {
            Classification::Success
        }
    }

    /// Human-readable failure detail for telemetry.
    pub fn failure_detail(&self) -> String {
        self.outcomes
            .iter()
            .rev()
            .find_map(|o| match o {
                RawOutcome::HttpStatus(s) => Some(format!("http {s}")),
                RawOutcome::Network(e) | RawOutcome::Unparseable(e) | RawOutcome::Crashed(e) => Some(e.clone()),
                _ => None,
            })
            .or_else(|| self.note.clone())
            .unwrap_or_else(|| "no candidates".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscoveryMethod;
    use crate::testing::ScriptedFetcher;

    #[test]
    fn test_report_classification() {
        let mut report = StrategyReport {
            outcomes: vec![RawOutcome::HttpStatus(404), RawOutcome::HttpStatus(503)],
            ..Default::default()
        };
        assert_eq!(report.classification(), Classification::Transient { status: Some(503) });
        assert_eq!(report.failure_detail(), "http 503");

        report
            .candidates
            .push(CandidateUrl::new("https://example.com/a", "s1", DiscoveryMethod::RssFeed));
        assert_eq!(report.classification(), Classification::Success);
    }

    #[test]
    fn test_crashed_report() {
        let report = StrategyReport::crashed("boom");
        assert_eq!(report.classification(), Classification::Permanent);
        assert_eq!(report.failure_detail(), "boom");
    }

    #[test]
    fn test_context_allowed_hosts() {
        let mut source = Source::new("s1", "example.com");
        source.alternate_hosts = vec!["example-news.org".into()];
        source.homepage = Some("https://www.example.net/".into());
        let ctx = AttemptContext::new(&source, Utc::now(), 10, true);
        assert_eq!(ctx.allowed_hosts, vec!["example.com", "example-news.org", "example.net"]);
    }

    #[tokio::test]
    async fn test_homepage_fetched_once() {
        let fetcher = ScriptedFetcher::new().page("https://example.com", 200, "<html></html>");
        let source = Source::new("s1", "example.com");
        let mut ctx = AttemptContext::new(&source, Utc::now(), 10, true);
        ctx.homepage(&fetcher).await.unwrap();
        ctx.homepage(&fetcher).await.unwrap();
        assert_eq!(fetcher.call_count("https://example.com"), 1);
    }
}
