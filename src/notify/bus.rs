//! Best-effort event publication to external consumers.
//!
//! Publishing never blocks and never fails from the caller's point of view:
//! a full consumer loses the event, a disconnected consumer is removed, and
//! nothing is queued for retry.

use crate::core::engine::{EngineSignal, Mode, SuggestionKind};
use crate::core::hysteresis::Level;
use crate::signal::ContextCategory;
use crate::stats::SharedEngineStats;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Event delivered to intervention executors and display surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    LevelChanged {
        session_id: String,
        mode: Mode,
        level: Level,
        score: f64,
        entropy: f64,
        in_flow_band: bool,
        category: ContextCategory,
        emitted_at: DateTime<Utc>,
    },
    Suggestion {
        session_id: String,
        score: f64,
        kind: SuggestionKind,
        emitted_at: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Attach a session id and emission time to an engine signal.
    pub fn from_signal(session_id: &str, signal: &EngineSignal) -> Self {
        let emitted_at = Utc::now();
        match *signal {
            EngineSignal::LevelChanged {
                mode,
                level,
                score,
                entropy,
                in_flow_band,
                category,
            } => EngineEvent::LevelChanged {
                session_id: session_id.to_string(),
                mode,
                level,
                score,
                entropy,
                in_flow_band,
                category,
                emitted_at,
            },
            EngineSignal::Suggestion { score, kind } => EngineEvent::Suggestion {
                session_id: session_id.to_string(),
                score,
                kind,
                emitted_at,
            },
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            EngineEvent::LevelChanged { session_id, .. } => session_id,
            EngineEvent::Suggestion { session_id, .. } => session_id,
        }
    }
}

/// Why a sink could not take an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Consumer is behind; this event is dropped
    #[error("sink is full")]
    Full,
    /// Consumer is temporarily unreachable; this event is dropped
    #[error("sink is unavailable")]
    Unavailable,
    /// Consumer is gone for good; the sink is removed
    #[error("sink is closed")]
    Closed,
}

/// A consumer of engine events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &EngineEvent) -> Result<(), SinkError>;

    fn name(&self) -> &str {
        "sink"
    }
}

/// Sink backed by a bounded crossbeam channel.
pub struct ChannelSink {
    sender: Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<EngineEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: &EngineEvent) -> Result<(), SinkError> {
        self.sender.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Disconnected(_) => SinkError::Closed,
        })
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Observer list of event sinks.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Arc<RwLock<Vec<Arc<dyn EventSink>>>>,
    stats: Option<SharedEngineStats>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count dropped deliveries in the given stats.
    pub fn with_stats(stats: SharedEngineStats) -> Self {
        Self {
            sinks: Arc::default(),
            stats: Some(stats),
        }
    }

    /// Register a bounded channel consumer and return its receiving end.
    pub fn subscribe(&self, capacity: usize) -> Receiver<EngineEvent> {
        let (sender, receiver) = bounded(capacity.max(1));
        self.add_sink(Arc::new(ChannelSink::new(sender)));
        receiver
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Offer an event to every sink. Returns how many sinks accepted it.
    pub fn publish(&self, event: &EngineEvent) -> usize {
        let mut delivered = 0;
        let mut dropped = 0u64;
        let mut closed: Vec<Arc<dyn EventSink>> = Vec::new();

        {
            let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
            for sink in sinks.iter() {
                match sink.deliver(event) {
                    Ok(()) => delivered += 1,
                    Err(SinkError::Closed) => {
                        tracing::debug!(sink = sink.name(), "removing closed event sink");
                        dropped += 1;
                        closed.push(Arc::clone(sink));
                    }
                    Err(e) => {
                        tracing::debug!(
                            sink = sink.name(),
                            session = event.session_id(),
                            "event dropped: {e}"
                        );
                        dropped += 1;
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.sinks
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|s| !closed.iter().any(|c| Arc::ptr_eq(s, c)));
        }
        if dropped > 0 {
            if let Some(stats) = &self.stats {
                stats.record_emissions_dropped(dropped);
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::create_shared_stats;

    fn level_event(session: &str, level: Level) -> EngineEvent {
        EngineEvent::from_signal(
            session,
            &EngineSignal::LevelChanged {
                mode: Mode::Standard,
                level,
                score: 55.0,
                entropy: 0.1,
                in_flow_band: true,
                category: ContextCategory::Other,
            },
        )
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(level_event("tab-1", 1)).unwrap();
        assert_eq!(json["type"], "level_changed");
        assert_eq!(json["session_id"], "tab-1");
        assert_eq!(json["level"], 1);
        assert_eq!(json["category"], "other");

        let suggestion = EngineEvent::from_signal(
            "tab-1",
            &EngineSignal::Suggestion {
                score: 76.0,
                kind: SuggestionKind::Gentle,
            },
        );
        let json = serde_json::to_value(suggestion).unwrap();
        assert_eq!(json["type"], "suggestion");
        assert_eq!(json["kind"], "gentle");
    }

    #[test]
    fn test_publish_to_subscribers() {
        let bus = EventBus::new();
        let a = bus.subscribe(4);
        let b = bus.subscribe(4);

        assert_eq!(bus.publish(&level_event("s", 1)), 2);
        assert_eq!(a.try_recv().unwrap().session_id(), "s");
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn test_full_subscriber_drops_without_blocking() {
        let stats = create_shared_stats();
        let bus = EventBus::with_stats(stats.clone());
        let rx = bus.subscribe(1);

        assert_eq!(bus.publish(&level_event("s", 1)), 1);
        assert_eq!(bus.publish(&level_event("s", 2)), 0);
        assert_eq!(rx.len(), 1);
        assert_eq!(stats.stats().emissions_dropped, 1);
        assert_eq!(bus.sink_count(), 1);
    }

    #[test]
    fn test_disconnected_subscriber_removed() {
        let bus = EventBus::new();
        let rx = bus.subscribe(4);
        let keep = bus.subscribe(4);
        drop(rx);

        assert_eq!(bus.publish(&level_event("s", 1)), 1);
        assert_eq!(bus.sink_count(), 1);
        assert_eq!(keep.len(), 1);
    }
}
