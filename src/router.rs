//! Per-source strategy selection and execution.
//!
//! For one source the router picks an order of discovery methods, runs them
//! one at a time, classifies each outcome, and folds the RSS outcome into
//! the source's health state.
//!
//! ## Ordering
//!
//! 1. `last_successful_method`, when recorded, goes first.
//! 2. Otherwise methods are sorted by historical effectiveness, when known.
//! 3. Otherwise the default: RSS, full build, sniffer.
//!
//! RSS is skipped outright while it is marked missing and cooling down.
//!
//! ## Stopping
//!
//! - RSS yields at least half the source's cap: skip the slower methods.
//! - Total candidates reach the cap.
//!
//! A strategy that panics is recorded as crashed and the loop moves on to
//! the next method.

use futures::FutureExt;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::health::classifier::Classification;
use crate::health::state_machine::FailureStateMachine;
use crate::interfaces::{MethodEffectiveness, TelemetrySink};
use crate::models::{AttemptStep, CandidateUrl, DiscoveryMethod, HealthState, Source};
use crate::strategies::{AttemptContext, StrategyKit, StrategyReport, build, rss, sniffer};

/// What one router pass produced.
#[derive(Debug, Clone, Default)]
pub struct RouterResult {
    /// Deduplicated by URL, at most the source's cap.
    pub candidates: Vec<CandidateUrl>,
    pub steps: Vec<AttemptStep>,
}

impl RouterResult {
    /// Methods that actually ran, in order.
    pub fn attempted_methods(&self) -> Vec<DiscoveryMethod> {
        self.steps
            .iter()
            .filter(|s| s.classification.is_some())
            .map(|s| s.method)
            .collect()
    }
}

pub struct DiscoveryRouter {
    kit: StrategyKit,
    fsm: FailureStateMachine,
    telemetry: Arc<dyn TelemetrySink>,
}

impl DiscoveryRouter {
    pub fn new(kit: StrategyKit, telemetry: Arc<dyn TelemetrySink>) -> Self {
        let fsm = FailureStateMachine::new(kit.config.health.clone());
        Self { kit, fsm, telemetry }
    }

    pub fn kit(&self) -> &StrategyKit {
        &self.kit
    }

    pub fn state_machine(&self) -> &FailureStateMachine {
        &self.fsm
    }

    pub fn method_order(
        &self,
        health: &HealthState,
        effectiveness: Option<&MethodEffectiveness>,
    ) -> Vec<DiscoveryMethod> {
        let mut order = DiscoveryMethod::DEFAULT_ORDER.to_vec();
        if let Some(eff) = effectiveness.filter(|e| !e.is_empty()) {
            order.sort_by(|a, b| {
                eff.score(*b)
                    .partial_cmp(&eff.score(*a))
                    .unwrap_or(Ordering::Equal)
            });
        }
        if let Some(last) = health.last_successful_method {
            order.retain(|m| *m != last);
            order.insert(0, last);
        }
        order
    }

    /// Run discovery for one source, mutating `health` in place.
    ///
    /// # Arguments
    /// * `source` - The source to discover; its own `health` field is ignored
    /// * `health` - Health state read from the store, updated with RSS and method outcomes
    /// * `effectiveness` - Historical per-method scores, if the telemetry store has any
    /// * `now` - Attempt timestamp
    ///
    /// # Returns
    /// The collected candidates (deduplicated, capped) and one step per method considered.
    #[instrument(level = "info", skip_all, fields(source_id = %source.id))]
    pub async fn discover(
        &self,
        source: &Source,
        health: &mut HealthState,
        effectiveness: Option<&MethodEffectiveness>,
        now: DateTime<Utc>,
    ) -> RouterResult {
        let cap = source.cap(self.kit.config.default_max_articles);
        self.fsm.expire_transient(health, now);
        let cooldown = self.kit.gate.rss_retry_cooldown(source.frequency.as_deref());
        let rss_allowed = !self.fsm.rss_suppressed(health, cooldown, now);

        let order = self.method_order(health, effectiveness);
        debug!(
            ?order,
            cap,
            rss_allowed,
            rss_transient = self.fsm.transient_in_window(health, now),
            "Method order chosen"
        );

        let mut ctx = AttemptContext::new(source, now, cap, rss_allowed);
        let mut result = RouterResult::default();
        let mut seen = HashSet::new();

        for method in order {
            if result.candidates.len() >= cap {
                info!(cap, "Candidate cap reached; stopping");
                break;
            }
            if method == DiscoveryMethod::RssFeed && !rss_allowed {
                info!(missing_at = ?health.rss_missing_at, "RSS marked missing and cooling down; skipping");
                result.steps.push(AttemptStep {
                    method,
                    classification: None,
                    candidates: 0,
                    elapsed_ms: 0,
                    note: Some("skipped: rss missing, in cooldown".to_string()),
                });
                continue;
            }

            let t0 = Instant::now();
            let report = self.run_strategy(method, &mut ctx).await;
            let elapsed_ms = t0.elapsed().as_millis() as u64;
            let classification = report.classification();

            if method == DiscoveryMethod::RssFeed {
                self.fsm.apply_rss(health, classification, now);
            }

            let mut added = 0usize;
            for candidate in &report.candidates {
                if result.candidates.len() >= cap {
                    break;
                }
                if seen.insert(candidate.url.clone()) {
                    result.candidates.push(candidate.clone());
                    added += 1;
                }
            }
            if added > 0 {
                self.fsm.record_method_success(health, method, now);
            }

            info!(
                %method,
                outcome = classification.label(),
                produced = report.candidates.len(),
                added,
                elapsed_ms,
                "Strategy finished"
            );
            self.record_telemetry(&source.id, method, &report, classification, added, elapsed_ms)
                .await;

            result.steps.push(AttemptStep {
                method,
                classification: Some(classification),
                candidates: added,
                elapsed_ms,
                note: report.note.clone(),
            });

            if method == DiscoveryMethod::RssFeed && added > 0 && added * 2 >= cap {
                info!(added, cap, "RSS produced at least half the cap; skipping slower methods");
                break;
            }
        }

        debug!(methods = ?result.attempted_methods(), found = result.candidates.len(), "Router pass finished");
        result
    }

    async fn run_strategy(&self, method: DiscoveryMethod, ctx: &mut AttemptContext<'_>) -> StrategyReport {
        let kit = &self.kit;
        let strategy = async {
            match method {
                DiscoveryMethod::RssFeed => rss::discover(kit, ctx).await,
                DiscoveryMethod::FullBuild => build::discover(kit, ctx).await,
                DiscoveryMethod::Sniffer => sniffer::discover(kit, ctx).await,
            }
        };
        match AssertUnwindSafe(strategy).catch_unwind().await {
            Ok(report) => report,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(%method, %reason, "Strategy panicked; continuing with next method");
                StrategyReport::crashed(format!("{method} panicked: {reason}"))
            }
        }
    }

    async fn record_telemetry(
        &self,
        source_id: &str,
        method: DiscoveryMethod,
        report: &StrategyReport,
        classification: Classification,
        added: usize,
        elapsed_ms: u64,
    ) {
        if let Err(e) = self
            .telemetry
            .record_method_outcome(source_id, method, classification.label(), added, elapsed_ms)
            .await
        {
            warn!(%method, error = %e, "Failed to record method outcome");
        }
        if classification != Classification::Success {
            if let Err(e) = self
                .telemetry
                .record_site_failure(source_id, method, &report.failure_detail(), elapsed_ms)
                .await
            {
                warn!(%method, error = %e, "Failed to record site failure");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
