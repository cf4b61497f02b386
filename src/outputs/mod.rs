//! Run report output.
//!
//! # Submodules
//!
//! - [`json`]: writes the end-of-run [`RunReport`](crate::orchestrator::RunReport)
//!
//! # Output Structure
//!
//! ```text
//! report_dir/
//! └── 2025-05-06/
//!     ├── 061500.json
//!     └── 181502.json
//! ```

pub mod json;
