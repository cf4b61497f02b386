//! Scheduling gate: decides whether a source is due before any network call.
//!
//! A source's free-text `frequency` is mapped to a cadence in days by a
//! lenient parser. The same cadence drives three other time windows so that
//! scheduling and failure counting stay consistent for a given source:
//!
//! | Window | Derivation |
//! |--------|------------|
//! | due interval | cadence |
//! | no-effective-method time gate | cadence |
//! | RSS retry cooldown | 2 x cadence, clamped to 1..=7 days |
//! | feed fallback activity window | 3 x cadence, never below 90 days |
//!
//! Parsed cadences are capped at a year, so an absurd count such as
//! "every 9999999999999 days" still yields a usable interval.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::{DEFAULT_FREQUENCY_DAYS, FALLBACK_ACTIVITY_DAYS, MAX_FREQUENCY_DAYS, SUB_DAILY_INTERVAL_DAYS};
use crate::models::Source;

static EVERY_N_UNITS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*-?\s*(hours?|hrs?|days?|weeks?|months?)\b").expect("valid regex")
});

static N_TIMES_PER_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\s*(?:x|times)\s*(?:a|an|per|each)?\s*(day|week|month)").expect("valid regex")
});

/// Parse a free-text cadence into days. Returns `None` when unrecognized.
pub fn parse_frequency(frequency: &str) -> Option<f64> {
    parse_frequency_uncapped(frequency).map(|days| days.min(MAX_FREQUENCY_DAYS))
}

fn parse_frequency_uncapped(frequency: &str) -> Option<f64> {
    let f = frequency.trim().to_ascii_lowercase();
    if f.is_empty() {
        return None;
    }

    if let Some(caps) = N_TIMES_PER_UNIT.captures(&f) {
        let times: f64 = caps[1].parse().ok()?;
        if times >= 1.0 {
            let days = unit_days(&caps[2])? / times;
            return Some(if days < 1.0 { SUB_DAILY_INTERVAL_DAYS } else { days });
        }
    }

    if let Some(caps) = EVERY_N_UNITS.captures(&f) {
        let n: f64 = caps[1].parse().ok()?;
        if n > 0.0 && n.is_finite() {
            let days = n * unit_days(&caps[2])?;
            return Some(if days < 1.0 { SUB_DAILY_INTERVAL_DAYS } else { days });
        }
    }

    let keyword = |needles: &[&str]| needles.iter().any(|n| f.contains(n));
    let days = if keyword(&["hourly", "broadcast", "continuous", "live", "24/7", "daily", "nightly", "weekday"]) {
        SUB_DAILY_INTERVAL_DAYS
    } else if keyword(&["semiweekly", "semi-weekly", "twice weekly", "twice a week"]) {
        3.5
    } else if keyword(&["biweekly", "bi-weekly", "fortnight"]) {
        14.0
    } else if keyword(&["weekly", "week"]) {
        7.0
    } else if keyword(&["bimonthly", "bi-monthly"]) {
        60.0
    } else if keyword(&["monthly", "month"]) {
        30.0
    } else if keyword(&["quarterly"]) {
        90.0
    } else if keyword(&["annual", "yearly"]) {
        365.0
    } else {
        return None;
    };
    Some(days)
}

fn unit_days(unit: &str) -> Option<f64> {
    match unit.trim_end_matches('s') {
        "hour" | "hr" => Some(1.0 / 24.0),
        "day" => Some(1.0),
        "week" => Some(7.0),
        "month" => Some(30.0),
        _ => None,
    }
}

fn days_to_duration(days: f64) -> Duration {
    // Widest window derived from a cadence is 3 x the capped cadence.
    let days = if days.is_finite() {
        days.clamp(0.0, MAX_FREQUENCY_DAYS * 3.0)
    } else {
        DEFAULT_FREQUENCY_DAYS
    };
    Duration::try_seconds((days * 86_400.0).round() as i64)
        .unwrap_or_else(|| Duration::days(DEFAULT_FREQUENCY_DAYS as i64))
}

/// Decides whether sources are due and derives cadence-based windows.
#[derive(Debug, Clone)]
pub struct SchedulerGate {
    default_days: f64,
    fallback_activity_days: f64,
}

impl Default for SchedulerGate {
    fn default() -> Self {
        Self::new(DEFAULT_FREQUENCY_DAYS, FALLBACK_ACTIVITY_DAYS)
    }
}

impl SchedulerGate {
    pub fn new(default_days: f64, fallback_activity_days: f64) -> Self {
        Self {
            default_days,
            fallback_activity_days,
        }
    }

    /// Cadence in days; missing or unrecognized frequencies take the default.
    pub fn cadence_days(&self, frequency: Option<&str>) -> f64 {
        frequency
            .and_then(parse_frequency)
            .unwrap_or(self.default_days)
    }

    pub fn cadence(&self, frequency: Option<&str>) -> Duration {
        days_to_duration(self.cadence_days(frequency))
    }

    /// Pure function of (frequency, last attempt, now).
    pub fn is_due(
        &self,
        frequency: Option<&str>,
        last_attempt: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        match last_attempt {
            None => true,
            Some(last) => now - last >= self.cadence(frequency),
        }
    }

    /// Paused sources are never due.
    pub fn is_source_due(&self, source: &Source, now: DateTime<Utc>) -> bool {
        if source.health.paused {
            debug!(source_id = %source.id, "Source paused; not due");
            return false;
        }
        self.is_due(source.frequency.as_deref(), source.health.last_attempt_at, now)
    }

    /// How long RSS stays suppressed after being marked missing.
    pub fn rss_retry_cooldown(&self, frequency: Option<&str>) -> Duration {
        let days = (self.cadence_days(frequency) * 2.0).clamp(1.0, 7.0);
        days_to_duration(days)
    }

    /// Window within which a feed's newest entry must fall for the
    /// older-entry fallback to apply. Slow publishers get 3 x cadence;
    /// nobody gets less than the default window.
    pub fn fallback_activity_window(&self, frequency: Option<&str>) -> Duration {
        let days = match frequency.and_then(parse_frequency) {
            Some(days) => (days * 3.0).max(self.fallback_activity_days),
            None => self.fallback_activity_days,
        };
        days_to_duration(days)
    }
}
