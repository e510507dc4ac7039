//! Core scoring functionality.
//!
//! This module contains:
//! - Signal aggregation over sliding windows
//! - Tick features and the entropy classifier
//! - The hysteresis level table
//! - The score engine state machine
//! - Sessions pairing an aggregator with an engine, and their snapshots

pub mod aggregator;
pub mod engine;
pub mod features;
pub mod hysteresis;
pub mod session;
pub mod snapshot;

// Re-export commonly used types
pub use aggregator::SignalAggregator;
pub use engine::{EngineSignal, Mode, ScoreEngine, SuggestionKind, TickOutput};
pub use features::{compute_entropy, EntropyBreakdown, TickFeatures};
pub use hysteresis::{Level, LevelBand, LevelTable};
pub use session::{Session, SessionConfig, TickReport};
pub use snapshot::{PersistedSession, SessionSnapshot, PRODUCER_NAME};
