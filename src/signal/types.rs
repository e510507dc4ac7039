//! Input signal types accepted by the engine.
//!
//! Timestamps are milliseconds since the Unix epoch as produced by the host
//! (for a browser, `Date.now()`), carried as `f64` so that malformed values
//! (NaN, negative) can be rejected at the aggregator boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A raw interaction event observed in a browsing context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionEvent {
    /// Vertical scroll position sample, in pixels.
    Scroll { position: f64, timestamp: f64 },
    /// Pointer click at viewport coordinates, in pixels.
    Click { x: f64, y: f64, timestamp: f64 },
}

impl InteractionEvent {
    /// Create a scroll sample.
    pub fn scroll(position: f64, timestamp: f64) -> Self {
        InteractionEvent::Scroll {
            position,
            timestamp,
        }
    }

    /// Create a click sample.
    pub fn click(x: f64, y: f64, timestamp: f64) -> Self {
        InteractionEvent::Click { x, y, timestamp }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            InteractionEvent::Scroll { timestamp, .. } => *timestamp,
            InteractionEvent::Click { timestamp, .. } => *timestamp,
        }
    }
}

/// Page category reported by the external context classifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContextCategory {
    Social,
    News,
    Video,
    Document,
    Shopping,
    #[default]
    Other,
}

impl ContextCategory {
    pub const ALL: [ContextCategory; 6] = [
        ContextCategory::Social,
        ContextCategory::News,
        ContextCategory::Video,
        ContextCategory::Document,
        ContextCategory::Shopping,
        ContextCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextCategory::Social => "social",
            ContextCategory::News => "news",
            ContextCategory::Video => "video",
            ContextCategory::Document => "document",
            ContextCategory::Shopping => "shopping",
            ContextCategory::Other => "other",
        }
    }
}

impl fmt::Display for ContextCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextCategory {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        ContextCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| SignalError::UnknownCategory(s.to_string()))
    }
}

/// Context classification update from the page/category detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextUpdate {
    /// Category name; must parse as a [`ContextCategory`].
    pub category: String,
    pub timestamp: f64,
}

/// Externally signaled lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Reader,
    Therapy,
}

/// Reasons an input is rejected before it reaches the score engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("non-finite {field}: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("negative timestamp: {0}")]
    NegativeTimestamp(f64),

    #[error("timestamp {timestamp} is too far ahead of clock {now}")]
    FutureTimestamp { timestamp: f64, now: f64 },

    #[error("timestamp {timestamp} precedes last observed {last}")]
    OutOfOrder { timestamp: f64, last: f64 },

    #[error("unknown context category: {0}")]
    UnknownCategory(String),
}

/// Reject NaN, infinite and negative timestamps.
pub fn validate_timestamp(timestamp: f64) -> Result<f64, SignalError> {
    if !timestamp.is_finite() {
        return Err(SignalError::NonFinite {
            field: "timestamp",
            value: timestamp,
        });
    }
    if timestamp < 0.0 {
        return Err(SignalError::NegativeTimestamp(timestamp));
    }
    Ok(timestamp)
}

/// Reject NaN and infinite coordinates.
pub fn validate_coordinate(field: &'static str, value: f64) -> Result<f64, SignalError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SignalError::NonFinite { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let json = r#"{"type":"click","x":10.0,"y":20.0,"timestamp":1500.0}"#;
        let event: InteractionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, InteractionEvent::click(10.0, 20.0, 1500.0));
        assert_eq!(event.timestamp(), 1500.0);

        let scroll = serde_json::to_value(InteractionEvent::scroll(320.0, 10.0)).unwrap();
        assert_eq!(scroll["type"], "scroll");
        assert_eq!(scroll["position"], 320.0);
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!(
            "Social".parse::<ContextCategory>().unwrap(),
            ContextCategory::Social
        );
        assert_eq!(
            " document ".parse::<ContextCategory>().unwrap(),
            ContextCategory::Document
        );
        assert_eq!(
            "forum".parse::<ContextCategory>(),
            Err(SignalError::UnknownCategory("forum".to_string()))
        );
    }

    #[test]
    fn test_timestamp_validation() {
        assert!(validate_timestamp(0.0).is_ok());
        assert!(matches!(
            validate_timestamp(f64::NAN),
            Err(SignalError::NonFinite { .. })
        ));
        assert_eq!(
            validate_timestamp(-1.0),
            Err(SignalError::NegativeTimestamp(-1.0))
        );
        assert!(validate_coordinate("x", f64::INFINITY).is_err());
    }
}
