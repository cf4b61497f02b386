//! Failure classification for strategy outcomes.
//!
//! | Raw outcome | Classification |
//! |-------------|----------------|
//! | >= 1 usable candidate | `Success` |
//! | parseable feed with >= 1 entry | `Success` |
//! | 401 / 403 / 429 / 5xx | `Transient(status)` |
//! | connection error / timeout | `Transient(None)` |
//! | 404, other 4xx, unparseable or empty feed, nothing found | `Permanent` |
//!
//! Success always wins over the classification of any sub-step in the same
//! attempt.

use serde::Serialize;

use crate::error::FetchError;

/// What a strategy (or one sub-step of it) actually observed.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutcome {
    /// Produced this many usable candidates.
    Found(usize),
    /// A feed parsed with entries, but none survived recency filtering.
    FeedAlive { entries: usize },
    /// Completed with a non-success HTTP status.
    HttpStatus(u16),
    /// Connection failure or timeout.
    Network(String),
    /// Fetched fine but the body was not a usable feed.
    Unparseable(String),
    /// Ran to completion and found nothing.
    Empty,
    /// The strategy itself failed (panic, malformed collaborator data).
    Crashed(String),
}

impl RawOutcome {
    pub fn from_fetch_error(e: &FetchError) -> Self {
        if e.is_network() {
            RawOutcome::Network(e.to_string())
        } else {
            RawOutcome::Crashed(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    Success,
    Transient { status: Option<u16> },
    Permanent,
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::Transient { .. } => "transient",
            Classification::Permanent => "permanent",
        }
    }
}

/// True for statuses that indicate a live server that is refusing or
/// failing for now.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 429) || (500..=599).contains(&status)
}

pub fn classify(outcome: &RawOutcome) -> Classification {
    match outcome {
        RawOutcome::Found(n) if *n > 0 => Classification::Success,
        RawOutcome::FeedAlive { entries } if *entries > 0 => Classification::Success,
        RawOutcome::HttpStatus(status) if is_transient_status(*status) => Classification::Transient {
            status: Some(*status),
        },
        RawOutcome::Network(_) => Classification::Transient { status: None },
        _ => Classification::Permanent,
    }
}

/// Classify a multi-step attempt (e.g. probing several feed URLs).
///
/// Any success wins; otherwise any transient sub-step makes the attempt
/// transient (reporting the last transient status seen); otherwise permanent.
pub fn classify_attempt(outcomes: &[RawOutcome]) -> Classification {
    let mut transient = None;
    for outcome in outcomes {
        match classify(outcome) {
            Classification::Success => return Classification::Success,
            t @ Classification::Transient { .. } => transient = Some(t),
            Classification::Permanent => {}
        }
    }
    transient.unwrap_or(Classification::Permanent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_permanent() {
        assert_eq!(classify(&RawOutcome::HttpStatus(404)), Classification::Permanent);
        assert_eq!(classify(&RawOutcome::HttpStatus(410)), Classification::Permanent);
    }

    #[test]
    fn test_rate_limits_and_server_errors_are_transient() {
        for status in [401, 403, 429, 500, 502, 503, 599] {
            assert_eq!(
                classify(&RawOutcome::HttpStatus(status)),
                Classification::Transient { status: Some(status) },
                "status {status}"
            );
        }
        assert_eq!(
            classify(&RawOutcome::Network("timed out".into())),
            Classification::Transient { status: None }
        );
    }

    #[test]
    fn test_unparseable_and_empty_are_permanent() {
        assert_eq!(classify(&RawOutcome::Unparseable("not xml".into())), Classification::Permanent);
        assert_eq!(classify(&RawOutcome::Empty), Classification::Permanent);
        assert_eq!(classify(&RawOutcome::Found(0)), Classification::Permanent);
        assert_eq!(classify(&RawOutcome::FeedAlive { entries: 0 }), Classification::Permanent);
        assert_eq!(classify(&RawOutcome::Crashed("boom".into())), Classification::Permanent);
    }

    #[test]
    fn test_candidates_are_success() {
        assert_eq!(classify(&RawOutcome::Found(3)), Classification::Success);
        assert_eq!(classify(&RawOutcome::FeedAlive { entries: 8 }), Classification::Success);
    }

    #[test]
    fn test_success_wins_over_sub_steps() {
        let outcomes = vec![
            RawOutcome::HttpStatus(503),
            RawOutcome::HttpStatus(404),
            RawOutcome::Found(2),
        ];
        assert_eq!(classify_attempt(&outcomes), Classification::Success);
    }

    #[test]
    fn test_transient_beats_permanent_in_attempt() {
        let outcomes = vec![
            RawOutcome::HttpStatus(404),
            RawOutcome::HttpStatus(429),
            RawOutcome::Unparseable("html".into()),
        ];
        assert_eq!(
            classify_attempt(&outcomes),
            Classification::Transient { status: Some(429) }
        );
    }

    #[test]
    fn test_empty_attempt_is_permanent() {
        assert_eq!(classify_attempt(&[]), Classification::Permanent);
    }
}
