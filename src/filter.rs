//! Scope and recency filter applied to every raw candidate before it
//! reaches the candidate sink.
//!
//! Checks run in order, first match wins:
//!
//! | Check | Verdict |
//! |-------|---------|
//! | URL does not resolve against the source's base URL | `Invalid` |
//! | host not in the source's allow-list | `OutOfScope` |
//! | published before the cutoff and not a fallback entry | `Expired` |
//! | already known for this source, or seen earlier in the batch | `Duplicate` |
//!
//! None of these is a failure; each is only counted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use crate::models::{CandidateUrl, Source};
use crate::utils::{host_allowed, normalize_url, resolve_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Accepted,
    Invalid,
    OutOfScope,
    Expired,
    Duplicate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub accepted: usize,
    pub invalid: usize,
    pub out_of_scope: usize,
    pub expired: usize,
    pub duplicate: usize,
}

impl FilterStats {
    fn count(&mut self, verdict: FilterVerdict) {
        match verdict {
            FilterVerdict::Accepted => self.accepted += 1,
            FilterVerdict::Invalid => self.invalid += 1,
            FilterVerdict::OutOfScope => self.out_of_scope += 1,
            FilterVerdict::Expired => self.expired += 1,
            FilterVerdict::Duplicate => self.duplicate += 1,
        }
    }
}

pub struct ScopeFilter {
    base: Option<Url>,
    allowed_hosts: Vec<String>,
    cutoff: DateTime<Utc>,
    known: HashSet<String>,
}

impl ScopeFilter {
    /// `known` holds URLs the sink already has for this source.
    pub fn for_source(source: &Source, cutoff: DateTime<Utc>, known: HashSet<String>) -> Self {
        Self {
            base: Url::parse(&source.homepage_url()).ok(),
            allowed_hosts: source.allowed_hosts(),
            cutoff,
            known,
        }
    }

    /// Judge one candidate, rewriting its URL to the resolved, normalized
    /// form. Accepted URLs become known.
    pub fn check(&mut self, candidate: &mut CandidateUrl) -> FilterVerdict {
        let resolved = match &self.base {
            Some(base) => resolve_url(base, &candidate.url),
            None => Url::parse(&candidate.url).ok(),
        };
        let Some(url) = resolved else {
            return FilterVerdict::Invalid;
        };
        candidate.url = normalize_url(&url);

        let in_scope = url
            .host_str()
            .map(|h| host_allowed(h, &self.allowed_hosts))
            .unwrap_or(false);
        if !in_scope {
            return FilterVerdict::OutOfScope;
        }

        let expired = candidate
            .published_at
            .is_some_and(|published| published < self.cutoff);
        if expired && !candidate.metadata.fallback_include_older {
            return FilterVerdict::Expired;
        }

        if !self.known.insert(candidate.url.clone()) {
            return FilterVerdict::Duplicate;
        }
        FilterVerdict::Accepted
    }

    pub fn apply(&mut self, candidates: Vec<CandidateUrl>) -> (Vec<CandidateUrl>, FilterStats) {
        let mut stats = FilterStats::default();
        let mut accepted = Vec::new();
        for mut candidate in candidates {
            let verdict = self.check(&mut candidate);
            stats.count(verdict);
            if verdict == FilterVerdict::Accepted {
                accepted.push(candidate);
            } else {
                debug!(url = %candidate.url, ?verdict, "Candidate filtered");
            }
        }
        (accepted, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscoveryMethod;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn source() -> Source {
        let mut source = Source::new("s1", "example.com");
        source.alternate_hosts = vec!["example-news.org".into()];
        source
    }

    fn candidate(url: &str) -> CandidateUrl {
        CandidateUrl::new(url, "s1", DiscoveryMethod::RssFeed)
    }

    #[test]
    fn test_relative_urls_resolve_against_homepage() {
        let mut filter = ScopeFilter::for_source(&source(), now() - Duration::days(7), HashSet::new());
        let mut c = candidate("/news/story-one#comments");
        assert_eq!(filter.check(&mut c), FilterVerdict::Accepted);
        assert_eq!(c.url, "https://example.com/news/story-one");
    }

    #[test]
    fn test_scope_allows_alternates_and_subdomains() {
        let mut filter = ScopeFilter::for_source(&source(), now() - Duration::days(7), HashSet::new());
        assert_eq!(filter.check(&mut candidate("https://www.example.com/a")), FilterVerdict::Accepted);
        assert_eq!(filter.check(&mut candidate("https://m.example-news.org/b")), FilterVerdict::Accepted);
        assert_eq!(filter.check(&mut candidate("https://elsewhere.net/c")), FilterVerdict::OutOfScope);
        assert_eq!(filter.check(&mut candidate("javascript:void(0)")), FilterVerdict::Invalid);
    }

    #[test]
    fn test_recency_respects_fallback_marker() {
        let mut filter = ScopeFilter::for_source(&source(), now() - Duration::days(7), HashSet::new());

        let mut old = candidate("https://example.com/old");
        old.published_at = Some(now() - Duration::days(30));
        assert_eq!(filter.check(&mut old), FilterVerdict::Expired);

        let mut relaxed = candidate("https://example.com/old-but-relaxed");
        relaxed.published_at = Some(now() - Duration::days(30));
        relaxed.metadata.fallback_include_older = true;
        assert_eq!(filter.check(&mut relaxed), FilterVerdict::Accepted);

        assert_eq!(filter.check(&mut candidate("https://example.com/undated")), FilterVerdict::Accepted);
    }

    #[test]
    fn test_dedup_against_known_and_batch() {
        let known: HashSet<String> = ["https://example.com/seen".to_string()].into_iter().collect();
        let mut filter = ScopeFilter::for_source(&source(), now() - Duration::days(7), known);
        let (accepted, stats) = filter.apply(vec![
            candidate("https://example.com/seen"),
            candidate("https://example.com/fresh"),
            candidate("https://example.com/fresh#again"),
            candidate("https://other.org/x"),
        ]);
        assert_eq!(accepted.len(), 1);
        assert_eq!(
            stats,
            FilterStats {
                accepted: 1,
                invalid: 0,
                out_of_scope: 1,
                expired: 0,
                duplicate: 2,
            }
        );
    }
}
