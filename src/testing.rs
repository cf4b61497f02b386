//! Scripted fakes for the engine's trait seams.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::DiscoveryConfig;
use crate::error::FetchError;
use crate::fetch::{FetchedPage, PageFetcher};
use crate::interfaces::{HeuristicClassifier, SiteBuilder, TelemetrySink};
use crate::models::DiscoveryMethod;
use crate::strategies::StrategyKit;

#[derive(Debug, Clone)]
enum Scripted {
    Page { status: u16, body: String },
    NetworkError,
}

#[derive(Debug, Default)]
struct FetcherState {
    script: HashMap<String, Scripted>,
    calls: Vec<String>,
}

/// Fetcher that serves canned responses keyed on the exact URL. Anything
/// unscripted is a 404. Clones share the script and the call log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFetcher {
    state: Arc<Mutex<FetcherState>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, status: u16, body: &str) -> Self {
        self.state.lock().unwrap().script.insert(
            url.to_string(),
            Scripted::Page {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    pub fn network_error(self, url: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .script
            .insert(url.to_string(), Scripted::NetworkError);
        self
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| *c == url).count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(url.to_string());
        match state.script.get(url).cloned() {
            Some(Scripted::Page { status, body }) => Ok(FetchedPage {
                status,
                final_url: url.to_string(),
                body: body.into_bytes(),
            }),
            Some(Scripted::NetworkError) => Err(FetchError::Connect(format!("scripted failure for {url}"))),
            None => Ok(FetchedPage {
                status: 404,
                final_url: url.to_string(),
                body: Vec::new(),
            }),
        }
    }
}

/// Site builder returning a fixed URL list, or panicking.
#[derive(Debug, Default)]
pub struct ScriptedBuilder {
    urls: Vec<String>,
    panics: bool,
    calls: AtomicUsize,
}

impl ScriptedBuilder {
    pub fn returning(urls: Vec<String>) -> Self {
        Self {
            urls,
            ..Default::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SiteBuilder for ScriptedBuilder {
    async fn build(&self, _url: &str, _base_timeout: Duration) -> Vec<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("scripted builder panic");
        }
        self.urls.clone()
    }
}

/// Classifier that accepts URLs containing a substring (empty accepts all).
#[derive(Debug, Clone, Default)]
pub struct FixedClassifier {
    accept: String,
    confidence: f64,
    nan_for: Option<String>,
    fail_for: Option<String>,
}

impl FixedClassifier {
    pub fn accepting(substr: &str, confidence: f64) -> Self {
        Self {
            accept: substr.to_string(),
            confidence,
            ..Default::default()
        }
    }

    pub fn with_nan_for(mut self, substr: &str) -> Self {
        self.nan_for = Some(substr.to_string());
        self
    }

    pub fn failing_for(mut self, substr: &str) -> Self {
        self.fail_for = Some(substr.to_string());
        self
    }
}

#[async_trait]
impl HeuristicClassifier for FixedClassifier {
    async fn guess(&self, url: &str) -> Result<(bool, f64)> {
        if self.fail_for.as_deref().is_some_and(|s| url.contains(s)) {
            return Err(anyhow!("scripted classifier failure"));
        }
        if self.nan_for.as_deref().is_some_and(|s| url.contains(s)) {
            return Ok((true, f64::NAN));
        }
        Ok((url.contains(&self.accept), self.confidence))
    }
}

/// Telemetry sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

#[async_trait]
impl TelemetrySink for NoopTelemetry {
    async fn record_method_outcome(&self, _: &str, _: DiscoveryMethod, _: &str, _: usize, _: u64) -> Result<()> {
        Ok(())
    }

    async fn record_site_failure(&self, _: &str, _: DiscoveryMethod, _: &str, _: u64) -> Result<()> {
        Ok(())
    }
}

pub fn kit_full(
    fetcher: ScriptedFetcher,
    builder: Arc<ScriptedBuilder>,
    classifier: Arc<FixedClassifier>,
) -> StrategyKit {
    StrategyKit::new(Arc::new(fetcher), builder, classifier, DiscoveryConfig::default())
}

pub fn kit_with(fetcher: ScriptedFetcher, builder: Arc<ScriptedBuilder>) -> StrategyKit {
    kit_full(fetcher, builder, Arc::new(FixedClassifier::accepting("", 0.5)))
}

pub fn kit_with_fetcher(fetcher: ScriptedFetcher) -> StrategyKit {
    kit_with(fetcher, Arc::new(ScriptedBuilder::returning(vec![])))
}

/// Minimal RSS 2.0 document with one item per `(link, published)` pair.
pub fn rss_feed(items: &[(&str, DateTime<Utc>)]) -> String {
    let items: String = items
        .iter()
        .enumerate()
        .map(|(i, (link, published))| {
            format!(
                "<item><title>Item {i}</title><link>{link}</link><guid>{link}</guid><pubDate>{}</pubDate></item>",
                published.to_rfc2822()
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Test</title><link>https://example.com</link><description>t</description>{items}</channel></rss>"#
    )
}
