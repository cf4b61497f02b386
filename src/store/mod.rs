//! Concrete collaborators behind the engine's interfaces.
//!
//! - `memory::InMemoryStore`: everything in process, for tests
//! - [`files::FileStore`]: sources from YAML, state as JSON/JSON Lines files
//!
//! Both keep the same telemetry log shape and derive method effectiveness
//! from it with [`effectiveness_from`].

pub mod files;
#[cfg(test)]
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::interfaces::MethodEffectiveness;
use crate::models::DiscoveryMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    MethodOutcome,
    SiteFailure,
}

/// One line of the telemetry log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub at: DateTime<Utc>,
    pub kind: TelemetryKind,
    pub source_id: String,
    pub method: DiscoveryMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub article_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Fraction of recorded method outcomes for `source_id` that produced at
/// least one candidate, per method. `None` when nothing is recorded.
pub fn effectiveness_from<'a>(
    records: impl IntoIterator<Item = &'a TelemetryRecord>,
    source_id: &str,
) -> Option<MethodEffectiveness> {
    let mut tallies: HashMap<DiscoveryMethod, (u32, u32)> = HashMap::new();
    for record in records {
        if record.kind != TelemetryKind::MethodOutcome || record.source_id != source_id {
            continue;
        }
        let entry = tallies.entry(record.method).or_default();
        entry.1 += 1;
        if record.article_count > 0 {
            entry.0 += 1;
        }
    }
    if tallies.is_empty() {
        return None;
    }
    let scores = tallies
        .into_iter()
        .map(|(method, (hits, total))| (method, f64::from(hits) / f64::from(total)))
        .collect();
    Some(MethodEffectiveness { scores })
}
