//! Failure state machine over [`HealthState`].
//!
//! RSS transitions per attempt:
//!
//! - **Success**: clear both RSS failure counters and `rss_missing_at`.
//! - **Transient**: append `{now, status}` to the rolling window, expire
//!   entries older than the window from the front, reset the consecutive
//!   counter, and mark RSS missing once the window holds the threshold.
//! - **Permanent**: bump the consecutive counter; mark RSS missing once it
//!   reaches the threshold.
//!
//! Source-wide, the "no effective method" counter is time-gated by the
//! source's cadence and pauses the source once it crosses its threshold.
//!
//! Every update is a read-modify-write against state the caller loaded from
//! the store. Two writers racing on the same source can lose an increment;
//! counters saturate and never go negative.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::HealthThresholds;
use crate::health::classifier::Classification;
use crate::models::{DiscoveryMethod, HealthState, TransientFailure};

pub const AUTO_PAUSE_REASON: &str = "no effective discovery methods";

/// Result of recording a no-effective-methods event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoEffectiveOutcome {
    /// Within the time gate; counter untouched.
    Gated,
    Counted(u32),
    /// Counted and the source is now paused.
    Paused(u32),
}

#[derive(Debug, Clone, Default)]
pub struct FailureStateMachine {
    thresholds: HealthThresholds,
}

impl FailureStateMachine {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds }
    }

    fn window(&self) -> Duration {
        Duration::days(self.thresholds.transient_window_days)
    }

    /// Fold one classified RSS outcome into the health state.
    pub fn apply_rss(&self, health: &mut HealthState, classification: Classification, now: DateTime<Utc>) {
        match classification {
            Classification::Success => self.record_rss_success(health),
            Classification::Transient { status } => self.record_rss_transient(health, status, now),
            Classification::Permanent => self.record_rss_permanent(health, now),
        }
    }

    pub fn record_rss_success(&self, health: &mut HealthState) {
        if health.rss_consecutive_failures > 0 || !health.rss_transient_failures.is_empty() || health.rss_missing_at.is_some() {
            debug!(
                consecutive = health.rss_consecutive_failures,
                transient = health.rss_transient_failures.len(),
                "Clearing RSS failure state after success"
            );
        }
        health.rss_consecutive_failures = 0;
        health.rss_transient_failures.clear();
        health.rss_missing_at = None;
    }

    pub fn record_rss_transient(&self, health: &mut HealthState, status: Option<u16>, now: DateTime<Utc>) {
        health.rss_transient_failures.push(TransientFailure { at: now, status });
        self.expire_transient(health, now);
        health.rss_last_failed_at = Some(now);
        // A transient failure proves the feed host still answers.
        health.rss_consecutive_failures = 0;

        let in_window = health.rss_transient_failures.len();
        if in_window >= self.thresholds.transient_failure_threshold {
            warn!(in_window, ?status, "Transient RSS failure threshold reached; marking RSS missing");
            health.rss_missing_at = Some(now);
        }
    }

    pub fn record_rss_permanent(&self, health: &mut HealthState, now: DateTime<Utc>) {
        health.rss_consecutive_failures = health.rss_consecutive_failures.saturating_add(1);
        health.rss_last_failed_at = Some(now);
        if health.rss_consecutive_failures >= self.thresholds.permanent_failure_threshold {
            warn!(
                consecutive = health.rss_consecutive_failures,
                "Permanent RSS failure threshold reached; marking RSS missing"
            );
            health.rss_missing_at = Some(now);
        }
    }

    /// Drop window entries older than the rolling window, oldest first.
    pub fn expire_transient(&self, health: &mut HealthState, now: DateTime<Utc>) {
        let cutoff = now - self.window();
        let expired = health
            .rss_transient_failures
            .iter()
            .take_while(|f| f.at < cutoff)
            .count();
        if expired > 0 {
            health.rss_transient_failures.drain(..expired);
        }
    }

    /// Transient failures still inside the window as of `now`.
    pub fn transient_in_window(&self, health: &HealthState, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window();
        health
            .rss_transient_failures
            .iter()
            .filter(|f| f.at >= cutoff)
            .count()
    }

    /// True while RSS is marked missing and the retry cooldown has not elapsed.
    pub fn rss_suppressed(&self, health: &HealthState, cooldown: Duration, now: DateTime<Utc>) -> bool {
        match health.rss_missing_at {
            Some(missing_at) => now - missing_at < cooldown,
            None => false,
        }
    }

    /// A strategy produced at least one candidate.
    pub fn record_method_success(&self, health: &mut HealthState, method: DiscoveryMethod, now: DateTime<Utc>) {
        health.last_successful_method = Some(method);
        health.last_success_at = Some(now);
        health.no_effective_methods_consecutive = 0;
        health.no_effective_methods_last_seen = None;
    }

    /// A discovery attempt yielded at least one new candidate: every failure
    /// counter is cleared regardless of which method succeeded.
    pub fn record_discovery_success(&self, health: &mut HealthState, method: Option<DiscoveryMethod>, now: DateTime<Utc>) {
        self.record_rss_success(health);
        if let Some(method) = method {
            health.last_successful_method = Some(method);
        }
        health.last_success_at = Some(now);
        health.no_effective_methods_consecutive = 0;
        health.no_effective_methods_last_seen = None;
    }

    pub fn record_attempt(&self, health: &mut HealthState, now: DateTime<Utc>) {
        health.last_attempt_at = Some(now);
    }

    /// No method produced anything. Counted at most once per `gate` interval.
    pub fn record_no_effective_methods(
        &self,
        health: &mut HealthState,
        gate: Duration,
        now: DateTime<Utc>,
    ) -> NoEffectiveOutcome {
        if let Some(last) = health.no_effective_methods_last_seen {
            if now - last <= gate {
                debug!(
                    count = health.no_effective_methods_consecutive,
                    "No-effective-methods event inside time gate; not counted"
                );
                return NoEffectiveOutcome::Gated;
            }
        }

        health.no_effective_methods_consecutive = health.no_effective_methods_consecutive.saturating_add(1);
        health.no_effective_methods_last_seen = Some(now);
        let count = health.no_effective_methods_consecutive;

        if count >= self.thresholds.no_effective_pause_threshold {
            self.pause(health, AUTO_PAUSE_REASON);
            NoEffectiveOutcome::Paused(count)
        } else {
            NoEffectiveOutcome::Counted(count)
        }
    }

    /// Pausing an already-paused source only updates the reason.
    pub fn pause(&self, health: &mut HealthState, reason: &str) {
        if !health.paused {
            info!(reason, "Pausing source");
        }
        health.paused = true;
        health.paused_reason = Some(reason.to_string());
    }

    pub fn resume(&self, health: &mut HealthState) {
        info!(was_paused = health.paused, "Resuming source");
        health.paused = false;
        health.paused_reason = None;
        health.no_effective_methods_consecutive = 0;
        health.no_effective_methods_last_seen = None;
    }
}
