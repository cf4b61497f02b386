//! In-process store implementing every persistence seam.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{TelemetryKind, TelemetryRecord, effectiveness_from};
use crate::error::StoreError;
use crate::interfaces::{CandidateSink, MethodEffectiveness, SourceFilter, SourcePersistence, TelemetrySink};
use crate::models::{CandidateUrl, DiscoveryMethod, HealthState, Source};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    sources: Vec<Source>,
    health: Mutex<HashMap<String, HealthState>>,
    /// Keyed on URL, in insertion order.
    candidates: Mutex<Vec<CandidateUrl>>,
    telemetry: Mutex<Vec<TelemetryRecord>>,
    /// Sources whose health reads fail, for exercising error paths.
    broken: HashSet<String>,
}

impl InMemoryStore {
    /// Each source's embedded `health` seeds the stored state.
    pub fn with_sources(sources: Vec<Source>) -> Self {
        let health = sources
            .iter()
            .map(|s| (s.id.clone(), s.health.clone()))
            .collect();
        Self {
            sources,
            health: Mutex::new(health),
            ..Default::default()
        }
    }

    pub fn with_broken_source(mut self, source_id: &str) -> Self {
        self.broken.insert(source_id.to_string());
        self
    }

    pub fn health_of(&self, source_id: &str) -> HealthState {
        self.health
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(source_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn candidates(&self) -> Vec<CandidateUrl> {
        self.candidates.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn telemetry(&self) -> Vec<TelemetryRecord> {
        self.telemetry.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn push_telemetry(&self, record: TelemetryRecord) {
        self.telemetry.lock().unwrap_or_else(|e| e.into_inner()).push(record);
    }
}

#[async_trait]
impl SourcePersistence for InMemoryStore {
    async fn list_due_sources(&self, filter: &SourceFilter) -> Result<Vec<Source>> {
        let health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self
            .sources
            .iter()
            .map(|s| {
                let mut source = s.clone();
                source.health = health.get(&s.id).cloned().unwrap_or_default();
                source
            })
            .filter(|s| filter.matches(s))
            .collect())
    }

    async fn read_health(&self, source_id: &str) -> Result<HealthState> {
        if self.broken.contains(source_id) {
            bail!("health record for {source_id} is unreadable");
        }
        if !self.sources.iter().any(|s| s.id == source_id) {
            return Err(StoreError::UnknownSource(source_id.to_string()).into());
        }
        Ok(self.health_of(source_id))
    }

    async fn write_health(&self, source_id: &str, health: &HealthState) -> Result<()> {
        if !self.sources.iter().any(|s| s.id == source_id) {
            return Err(StoreError::UnknownSource(source_id.to_string()).into());
        }
        self.health
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(source_id.to_string(), health.clone());
        Ok(())
    }
}

#[async_trait]
impl CandidateSink for InMemoryStore {
    async fn upsert(&self, candidate: &CandidateUrl) -> Result<bool> {
        let mut candidates = self.candidates.lock().unwrap_or_else(|e| e.into_inner());
        match candidates.iter_mut().find(|c| c.url == candidate.url) {
            Some(existing) => {
                *existing = candidate.clone();
                Ok(false)
            }
            None => {
                candidates.push(candidate.clone());
                Ok(true)
            }
        }
    }

    async fn known_urls(&self, source_id: &str) -> Result<HashSet<String>> {
        Ok(self
            .candidates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| c.source_id == source_id)
            .map(|c| c.url.clone())
            .collect())
    }
}

#[async_trait]
impl TelemetrySink for InMemoryStore {
    async fn record_method_outcome(
        &self,
        source_id: &str,
        method: DiscoveryMethod,
        status: &str,
        article_count: usize,
        elapsed_ms: u64,
    ) -> Result<()> {
        self.push_telemetry(TelemetryRecord {
            at: Utc::now(),
            kind: TelemetryKind::MethodOutcome,
            source_id: source_id.to_string(),
            method,
            status: Some(status.to_string()),
            article_count,
            error: None,
            elapsed_ms,
        });
        Ok(())
    }

    async fn record_site_failure(
        &self,
        source_id: &str,
        method: DiscoveryMethod,
        error: &str,
        elapsed_ms: u64,
    ) -> Result<()> {
        self.push_telemetry(TelemetryRecord {
            at: Utc::now(),
            kind: TelemetryKind::SiteFailure,
            source_id: source_id.to_string(),
            method,
            status: None,
            article_count: 0,
            error: Some(error.to_string()),
            elapsed_ms,
        });
        Ok(())
    }

    async fn method_effectiveness(&self, source_id: &str) -> Result<Option<MethodEffectiveness>> {
        Ok(effectiveness_from(&self.telemetry(), source_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_url() {
        let store = InMemoryStore::with_sources(vec![Source::new("s1", "example.com")]);
        let c = CandidateUrl::new("https://example.com/a", "s1", DiscoveryMethod::RssFeed);
        assert!(store.upsert(&c).await.unwrap());
        assert!(!store.upsert(&c).await.unwrap());
        assert_eq!(store.candidates().len(), 1);
        assert_eq!(store.known_urls("s1").await.unwrap().len(), 1);
        assert!(store.known_urls("s2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_round_trip_and_unknown_source() {
        let store = InMemoryStore::with_sources(vec![Source::new("s1", "example.com")]);
        let health = HealthState {
            rss_consecutive_failures: 2,
            ..Default::default()
        };
        store.write_health("s1", &health).await.unwrap();
        assert_eq!(store.read_health("s1").await.unwrap(), health);
        assert!(store.read_health("nope").await.is_err());
        assert!(store.write_health("nope", &health).await.is_err());
    }

    #[tokio::test]
    async fn test_listing_applies_filter_with_stored_health() {
        let store = InMemoryStore::with_sources(vec![Source::new("a", "a.example"), Source::new("b", "b.example")]);
        let paused = HealthState {
            paused: true,
            ..Default::default()
        };
        store.write_health("b", &paused).await.unwrap();

        let active = store.list_due_sources(&SourceFilter::default()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");

        let all = store
            .list_due_sources(&SourceFilter {
                include_paused: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[1].health.paused);
    }
}
