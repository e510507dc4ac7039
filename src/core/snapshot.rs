//! Session snapshots: the pull-based display view and the persisted form.

use crate::core::engine::{Mode, ScoreEngine};
use crate::core::hysteresis::Level;
use crate::signal::ContextCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name recorded in persisted snapshots.
pub const PRODUCER_NAME: &str = "dsi-engine";

/// Read-only view of one session for display surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub score: f64,
    pub level: Level,
    pub mode: Mode,
    pub idle: bool,
    pub deep_reading: bool,
    pub entropy: f64,
    pub in_flow_band: bool,
    pub category: ContextCategory,
    pub suggestion_pending: bool,
    pub taken_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn capture(session_id: &str, engine: &ScoreEngine) -> Self {
        Self {
            session_id: session_id.to_string(),
            score: engine.score(),
            level: engine.level(),
            mode: engine.mode(),
            idle: engine.idle(),
            deep_reading: engine.deep_reading(),
            entropy: engine.entropy(),
            in_flow_band: engine.in_flow_band(),
            category: engine.category(),
            suggestion_pending: engine.suggestion_pending(),
            taken_at: Utc::now(),
        }
    }
}

/// What survives a host restart for a still-open session.
///
/// Mode locks are deliberately absent: the collaborators that own them
/// re-announce their state when they reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session_id: String,
    pub score: f64,
    pub level: Level,
    pub category: ContextCategory,
    pub producer: String,
    pub saved_at: DateTime<Utc>,
}

impl PersistedSession {
    pub fn capture(session_id: &str, engine: &ScoreEngine) -> Self {
        Self {
            session_id: session_id.to_string(),
            score: engine.score(),
            level: engine.level(),
            category: engine.category(),
            producer: PRODUCER_NAME.to_string(),
            saved_at: Utc::now(),
        }
    }
}
