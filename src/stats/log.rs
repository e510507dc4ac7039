//! Engine activity counters.
//!
//! Tracks what the engine has processed and emitted so hosts can expose it
//! for auditing and debugging. Counters are process-wide and lock-free.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Activity counters for the current process.
#[derive(Debug)]
pub struct EngineStats {
    /// Interaction events accepted by an aggregator
    events_accepted: AtomicU64,
    /// Inputs rejected at the aggregator boundary
    events_rejected: AtomicU64,
    /// Score engine ticks run
    ticks: AtomicU64,
    /// Level-change events published
    level_changes: AtomicU64,
    /// Suggestion events published
    suggestions: AtomicU64,
    /// Deliveries dropped because a consumer was full or gone
    emissions_dropped: AtomicU64,
    sessions_started: AtomicU64,
    sessions_ended: AtomicU64,
    started_at: DateTime<Utc>,
}

impl EngineStats {
    pub fn new() -> Self {
        Self {
            events_accepted: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            level_changes: AtomicU64::new(0),
            suggestions: AtomicU64::new(0),
            emissions_dropped: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_ended: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_event_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_level_change(&self) {
        self.level_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suggestion(&self) {
        self.suggestions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emissions_dropped(&self, count: u64) {
        self.emissions_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_ended(&self) {
        self.sessions_ended.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            level_changes: self.level_changes.load(Ordering::Relaxed),
            suggestions: self.suggestions.load(Ordering::Relaxed),
            emissions_dropped: self.emissions_dropped.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_ended: self.sessions_ended.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Engine Statistics:\n\
             - Events accepted: {}\n\
             - Events rejected: {}\n\
             - Ticks: {}\n\
             - Level changes: {}\n\
             - Suggestions: {}\n\
             - Emissions dropped: {}\n\
             - Sessions started/ended: {}/{}\n\
             - Uptime: {} seconds",
            stats.events_accepted,
            stats.events_rejected,
            stats.ticks,
            stats.level_changes,
            stats.suggestions,
            stats.emissions_dropped,
            stats.sessions_started,
            stats.sessions_ended,
            stats.uptime_secs
        )
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub events_accepted: u64,
    pub events_rejected: u64,
    pub ticks: u64,
    pub level_changes: u64,
    pub suggestions: u64,
    pub emissions_dropped: u64,
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

impl StatsSnapshot {
    /// Sessions currently open according to the counters.
    pub fn sessions_open(&self) -> u64 {
        self.sessions_started.saturating_sub(self.sessions_ended)
    }
}

/// Thread-safe shared stats.
pub type SharedEngineStats = Arc<EngineStats>;

/// Create a new shared stats instance.
pub fn create_shared_stats() -> SharedEngineStats {
    Arc::new(EngineStats::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = EngineStats::new();

        stats.record_event_accepted();
        stats.record_event_accepted();
        stats.record_event_rejected();
        stats.record_emissions_dropped(3);
        stats.record_session_started();

        let snapshot = stats.stats();
        assert_eq!(snapshot.events_accepted, 2);
        assert_eq!(snapshot.events_rejected, 1);
        assert_eq!(snapshot.emissions_dropped, 3);
        assert_eq!(snapshot.sessions_open(), 1);
    }

    #[test]
    fn test_summary_format() {
        let summary = EngineStats::new().summary();
        assert!(summary.contains("Events accepted"));
        assert!(summary.contains("Level changes"));
        assert!(summary.contains("Emissions dropped"));
    }
}
