//! Top-level discovery loop.
//!
//! One run:
//!
//! 1. list sources from [`SourcePersistence`] (paused ones included, so they
//!    can be counted)
//! 2. skip paused and not-yet-due sources
//! 3. for each due source, one at a time with a politeness delay between
//!    sources: read health, route, filter, upsert, fold the outcome into
//!    health, write health back
//! 4. return a [`RunReport`] with the [`RunSummary`] and one
//!    [`DiscoveryAttempt`] per processed source
//!
//! Any error or panic while checking or processing one source is counted as
//! a failed source and the loop moves on.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use rand::{Rng, rng};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::filter::{FilterStats, ScopeFilter};
use crate::health::state_machine::NoEffectiveOutcome;
use crate::interfaces::{CandidateSink, MethodEffectiveness, SourceFilter, SourcePersistence, TelemetrySink};
use crate::models::{CandidateUrl, DiscoveryAttempt, DiscoveryMethod, HealthState, RunSummary, Source};
use crate::router::DiscoveryRouter;
use crate::strategies::StrategyKit;

/// Per-source effectiveness scores with a last-refresh time and TTL.
#[derive(Debug)]
pub struct EffectivenessCache {
    ttl: std::time::Duration,
    entries: HashMap<String, (Instant, Option<MethodEffectiveness>)>,
}

impl EffectivenessCache {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// `Some(value)` while the entry is fresh, `None` when absent or stale.
    pub fn get(&self, source_id: &str) -> Option<Option<MethodEffectiveness>> {
        self.entries
            .get(source_id)
            .filter(|(refreshed, _)| refreshed.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    pub fn insert(&mut self, source_id: &str, value: Option<MethodEffectiveness>) {
        self.entries.insert(source_id.to_string(), (Instant::now(), value));
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict to these source ids; empty means all.
    pub source_ids: Vec<String>,
    /// Process sources even when their cadence says they are not due.
    pub ignore_schedule: bool,
}

/// Everything a run produced, as written to the report file.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: RunSummary,
    pub attempts: Vec<DiscoveryAttempt>,
}

struct SourceOutcome {
    attempt: DiscoveryAttempt,
    stats: FilterStats,
    duplicates_at_sink: usize,
}

pub struct DiscoveryOrchestrator {
    router: DiscoveryRouter,
    persistence: Arc<dyn SourcePersistence>,
    sink: Arc<dyn CandidateSink>,
    telemetry: Arc<dyn TelemetrySink>,
    effectiveness: EffectivenessCache,
}

impl DiscoveryOrchestrator {
    pub fn new(
        kit: StrategyKit,
        persistence: Arc<dyn SourcePersistence>,
        sink: Arc<dyn CandidateSink>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let ttl = std::time::Duration::from_secs(kit.config.effectiveness_cache_ttl_secs);
        Self {
            router: DiscoveryRouter::new(kit, telemetry.clone()),
            persistence,
            sink,
            telemetry,
            effectiveness: EffectivenessCache::new(ttl),
        }
    }

    /// One discovery pass over every due source.
    #[instrument(level = "info", skip_all, fields(only = ?options.source_ids, ignore_schedule = options.ignore_schedule))]
    pub async fn run(&mut self, options: &RunOptions) -> Result<RunReport> {
        let started_at = Utc::now();
        let filter = SourceFilter {
            source_ids: options.source_ids.clone(),
            include_paused: true,
        };
        let sources = self
            .persistence
            .list_due_sources(&filter)
            .await
            .context("failed to list sources")?;
        info!(count = sources.len(), "Loaded sources");

        let mut summary = RunSummary::default();
        let mut attempts = Vec::new();
        let mut first = true;

        for source in &sources {
            let now = Utc::now();
            if source.health.paused {
                debug!(source_id = %source.id, reason = ?source.health.paused_reason, "Skipping paused source");
                summary.sources_paused += 1;
                continue;
            }
            if !options.ignore_schedule {
                let gate = &self.router.kit().gate;
                match std::panic::catch_unwind(AssertUnwindSafe(|| gate.is_source_due(source, now))) {
                    Ok(true) => {}
                    Ok(false) => {
                        summary.sources_not_due += 1;
                        continue;
                    }
                    Err(_) => {
                        error!(source_id = %source.id, frequency = ?source.frequency, "Due check panicked; continuing");
                        summary.sources_failed += 1;
                        continue;
                    }
                }
            }

            if !first {
                self.politeness_pause().await;
            }
            first = false;
            summary.sources_processed += 1;

            let processed = AssertUnwindSafe(self.process_source(source, now)).catch_unwind().await;
            match processed {
                Ok(Ok(outcome)) => {
                    let attempt = &outcome.attempt;
                    summary.candidates_found += attempt.candidates_found;
                    summary.candidates_new += attempt.candidates_new;
                    summary.candidates_duplicate += outcome.stats.duplicate + outcome.duplicates_at_sink;
                    summary.candidates_expired += outcome.stats.expired;
                    summary.candidates_out_of_scope += outcome.stats.out_of_scope + outcome.stats.invalid;
                    if attempt.candidates_found > 0 {
                        summary.sources_succeeded += 1;
                    }
                    if attempt.paused {
                        summary.sources_paused += 1;
                    }
                    attempts.push(outcome.attempt);
                }
                Ok(Err(e)) => {
                    error!(source_id = %source.id, error = ?e, "Source processing failed; continuing");
                    summary.sources_failed += 1;
                }
                Err(_) => {
                    error!(source_id = %source.id, "Source processing panicked; continuing");
                    summary.sources_failed += 1;
                }
            }
        }

        info!(?summary, "Discovery run complete");
        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            summary,
            attempts,
        })
    }

    async fn politeness_pause(&self) {
        let config = &self.router.kit().config;
        if config.politeness_delay_ms == 0 && config.politeness_jitter_ms == 0 {
            return;
        }
        let jitter = rng().random_range(0..=config.politeness_jitter_ms);
        tokio::time::sleep(std::time::Duration::from_millis(config.politeness_delay_ms + jitter)).await;
    }

    async fn effectiveness_for(&mut self, source_id: &str) -> Option<MethodEffectiveness> {
        if let Some(cached) = self.effectiveness.get(source_id) {
            return cached;
        }
        let fetched = match self.telemetry.method_effectiveness(source_id).await {
            Ok(value) => value,
            Err(e) => {
                warn!(%source_id, error = %e, "Failed to load method effectiveness");
                None
            }
        };
        self.effectiveness.insert(source_id, fetched.clone());
        fetched
    }

    #[instrument(level = "info", skip_all, fields(source_id = %source.id))]
    async fn process_source(&mut self, source: &Source, now: DateTime<Utc>) -> Result<SourceOutcome> {
        let t0 = Instant::now();
        let mut health = self
            .persistence
            .read_health(&source.id)
            .await
            .with_context(|| format!("failed to read health for {}", source.id))?;
        let effectiveness = self.effectiveness_for(&source.id).await;

        let routed = self
            .router
            .discover(source, &mut health, effectiveness.as_ref(), now)
            .await;
        let found = routed.candidates.len();

        let known = match self.sink.known_urls(&source.id).await {
            Ok(known) => known,
            Err(e) => {
                warn!(error = %e, "Failed to load known URLs; relying on sink idempotency");
                HashSet::new()
            }
        };
        let cutoff = now - Duration::days(self.router.kit().config.recency_days);
        let mut filter = ScopeFilter::for_source(source, cutoff, known);
        let (accepted, stats) = filter.apply(routed.candidates);

        let persisted = self.persist(&accepted).await;
        let (new, duplicates_at_sink, first_new_method) = match &persisted {
            Ok(counts) => *counts,
            Err(_) => (0, 0, None),
        };

        self.fold_outcome(source, &mut health, found, new, first_new_method, now);
        self.persistence
            .write_health(&source.id, &health)
            .await
            .with_context(|| format!("failed to write health for {}", source.id))?;
        persisted.with_context(|| format!("failed to persist candidates for {}", source.id))?;

        let attempt = DiscoveryAttempt {
            source_id: source.id.clone(),
            started_at: now,
            steps: routed.steps,
            candidates_found: found,
            candidates_new: new,
            paused: health.paused,
            elapsed_ms: t0.elapsed().as_millis() as u64,
        };
        info!(
            methods = ?attempt.attempted_methods(),
            found,
            new,
            out_of_scope = stats.out_of_scope,
            expired = stats.expired,
            duplicate = stats.duplicate + duplicates_at_sink,
            paused = attempt.paused,
            elapsed_ms = attempt.elapsed_ms,
            "Source processed"
        );
        Ok(SourceOutcome {
            attempt,
            stats,
            duplicates_at_sink,
        })
    }

    /// Upsert accepted candidates. Returns (new, already present, method of the first new one).
    async fn persist(&self, accepted: &[CandidateUrl]) -> Result<(usize, usize, Option<DiscoveryMethod>)> {
        let mut new = 0;
        let mut duplicate = 0;
        let mut first_new_method = None;
        for candidate in accepted {
            if self.sink.upsert(candidate).await? {
                new += 1;
                first_new_method.get_or_insert(candidate.method);
            } else {
                duplicate += 1;
            }
        }
        Ok((new, duplicate, first_new_method))
    }

    fn fold_outcome(
        &self,
        source: &Source,
        health: &mut HealthState,
        found: usize,
        new: usize,
        first_new_method: Option<DiscoveryMethod>,
        now: DateTime<Utc>,
    ) {
        let fsm = self.router.state_machine();
        if new > 0 {
            fsm.record_discovery_success(health, first_new_method, now);
        } else if found == 0 {
            let gate = self.router.kit().gate.cadence(source.frequency.as_deref());
            match fsm.record_no_effective_methods(health, gate, now) {
                NoEffectiveOutcome::Gated => {}
                NoEffectiveOutcome::Counted(count) => info!(count, "No effective discovery method"),
                NoEffectiveOutcome::Paused(count) => warn!(count, "No effective discovery method; source auto-paused"),
            }
        }
        fsm.record_attempt(health, now);
    }

    /// Operator pause. Pausing an already-paused source updates the reason.
    #[instrument(level = "info", skip(self))]
    pub async fn pause_source(&self, source_id: &str, reason: &str) -> Result<HealthState> {
        let mut health = self.persistence.read_health(source_id).await?;
        self.router.state_machine().pause(&mut health, reason);
        self.persistence.write_health(source_id, &health).await?;
        Ok(health)
    }

    /// Operator resume; resets the no-effective-methods counter.
    #[instrument(level = "info", skip(self))]
    pub async fn resume_source(&self, source_id: &str) -> Result<HealthState> {
        let mut health = self.persistence.read_health(source_id).await?;
        self.router.state_machine().resume(&mut health);
        self.persistence.write_health(source_id, &health).await?;
        Ok(health)
    }
}
