//! DSI Engine - per-session stress scoring for browsing sessions.
//!
//! This library turns a stream of scroll and click events from a browsing
//! context into a bounded stress score, a discrete intervention level and
//! occasional suggestions, once per second per session.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           DSI Engine                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐            │
//! │  │ Interaction │──▶│ Aggregator  │──▶│   Score     │──▶ Event   │
//! │  │   events    │   │  (windows)  │   │   Engine    │    Bus     │
//! │  └─────────────┘   └─────────────┘   └─────────────┘            │
//! │         ▲                 ▲                 ▲                   │
//! │         │          ┌──────┴─────────────────┴──────┐            │
//! │         └──────────│  Session Registry (1 Hz tick) │──▶ Snapshots│
//! │                    └───────────────────────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use dsi_engine::{Config, EventBus, SessionRegistry, create_shared_stats};
//! use dsi_engine::signal::InteractionEvent;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let stats = create_shared_stats();
//! let bus = EventBus::with_stats(stats.clone());
//! let events = bus.subscribe(64);
//! let registry = SessionRegistry::new(Config::default(), bus, stats)?;
//!
//! registry.start_session("tab-1")?;
//! registry.record_event("tab-1", InteractionEvent::scroll(120.0, registry.now_ms()))?;
//!
//! // Level changes and suggestions arrive on `events` as the session ticks
//! # let _ = events;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod notify;
pub mod registry;
pub mod signal;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, ScoringConfig, SignalConfig};
pub use core::{
    EngineSignal, Mode, ScoreEngine, Session, SessionSnapshot, SignalAggregator, SuggestionKind,
    TickFeatures,
};
pub use notify::{EngineEvent, EventBus, EventSink, SinkError};
pub use registry::{RegistryError, SessionRegistry};
pub use signal::{ContextCategory, ContextUpdate, InteractionEvent, LockMode, SignalError};
pub use stats::{create_shared_stats, EngineStats, SharedEngineStats, StatsSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
