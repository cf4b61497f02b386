//! Per-source health tracking.
//!
//! - [`classifier`]: maps a strategy's raw outcome to success, transient, or permanent
//! - [`state_machine`]: folds classified outcomes into [`crate::models::HealthState`]

pub mod classifier;
pub mod state_machine;
