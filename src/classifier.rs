//! Built-in URL heuristic used by the sniffer when no external classifier
//! is wired in.
//!
//! Scores a URL from path features alone. Each feature adds a fixed weight
//! and the total is clamped to `0.0..=1.0`; a URL is called an article at
//! [`ARTICLE_THRESHOLD`] or above.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::interfaces::HeuristicClassifier;
use crate::strategies::homepage::is_utility_path;

pub const ARTICLE_THRESHOLD: f64 = 0.5;

static DATE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(19|20)\d{2}/\d{1,2}(/\d{1,2})?/").expect("valid regex"));
static YEAR_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(19|20)\d{2}/").expect("valid regex"));
static NEWSY_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/(news|article|articles|story|stories|local|politics|sports|business|obituaries|opinion|community)/")
        .expect("valid regex")
});
static NUMERIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{5,}").expect("valid regex"));
static HTML_EXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.html?$").expect("valid regex"));

/// Path-feature article scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathHeuristicClassifier;

impl PathHeuristicClassifier {
    pub fn score(&self, url: &Url) -> f64 {
        let path = url.path();
        if path == "/" || is_utility_path(path) {
            return 0.0;
        }

        let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        let words = last.split(['-', '_']).filter(|w| !w.is_empty()).count();

        let mut score: f64 = 0.0;
        if DATE_PATH.is_match(path) {
            score += 0.4;
        } else if YEAR_ONLY.is_match(path) {
            score += 0.2;
        }
        if NEWSY_SEGMENT.is_match(path) {
            score += 0.25;
        }
        if words >= 4 {
            score += 0.35;
        } else if words >= 2 {
            score += 0.15;
        }
        if NUMERIC_ID.is_match(last) {
            score += 0.2;
        }
        if HTML_EXT.is_match(last) {
            score += 0.1;
        }
        if url.query().is_some() {
            score -= 0.1;
        }
        score.clamp(0.0, 1.0)
    }
}

#[async_trait]
impl HeuristicClassifier for PathHeuristicClassifier {
    async fn guess(&self, url: &str) -> Result<(bool, f64)> {
        let parsed = Url::parse(url).map_err(|e| anyhow!("cannot score {url}: {e}"))?;
        let score = self.score(&parsed);
        Ok((score >= ARTICLE_THRESHOLD, score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn guess(url: &str) -> (bool, f64) {
        PathHeuristicClassifier.guess(url).await.unwrap()
    }

    #[tokio::test]
    async fn test_articles_score_high() {
        assert!(guess("https://example.com/2025/06/01/city-council-approves-budget").await.0);
        assert!(guess("https://example.com/news/school-board-meets-tuesday-night").await.0);
        assert!(guess("https://example.com/local/story_1234567.html").await.0);
    }

    #[tokio::test]
    async fn test_fronts_and_utility_pages_score_low() {
        assert_eq!(guess("https://example.com/").await, (false, 0.0));
        assert!(!guess("https://example.com/sports").await.0);
        assert_eq!(guess("https://example.com/tag/weather").await, (false, 0.0));
        assert_eq!(guess("https://example.com/about").await, (false, 0.0));
    }

    #[tokio::test]
    async fn test_score_is_bounded() {
        let (_, score) = guess("https://example.com/news/2025/06/01/a-very-long-headline-slug-12345678.html").await;
        assert!((0.0..=1.0).contains(&score));
    }

    #[tokio::test]
    async fn test_unparseable_url_is_error() {
        assert!(PathHeuristicClassifier.guess("not a url").await.is_err());
    }
}
