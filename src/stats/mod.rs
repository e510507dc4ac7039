//! Engine statistics.
//!
//! Process-wide counters of what the engine accepted, rejected, scored and
//! published.

pub mod log;

// Re-export commonly used types
pub use log::{create_shared_stats, EngineStats, SharedEngineStats, StatsSnapshot};
