//! Event publication.
//!
//! Level changes and suggestions leave the engine through an [`EventBus`]
//! of non-blocking sinks.

pub mod bus;

#[cfg(feature = "webhook")]
pub mod webhook;

pub use bus::{ChannelSink, EngineEvent, EventBus, EventSink, SinkError};

#[cfg(feature = "webhook")]
pub use webhook::{WebhookConfig, WebhookError, WebhookSink};
