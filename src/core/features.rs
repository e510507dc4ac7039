//! Per-tick features and the entropy (behavioural disorder) classifier.
//!
//! Entropy only separates disordered from purposeful activity; it is never
//! added to the score directly.

use crate::config::{EntropyConfig, IncrementConfig, RecoveryConfig};
use serde::{Deserialize, Serialize};

/// Features read from the aggregator for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TickFeatures {
    /// Absolute scroll displacement per second over the scroll window
    pub scroll_speed: f64,
    /// Clicks per second over the click window
    pub click_frequency: f64,
    /// Scroll direction reversals, decayed across ticks
    pub direction_changes: u32,
    /// Repeated clicks at the same spot since the last tick
    pub rage_clicks: u32,
    /// Timestamp of the most recent accepted event (ms)
    pub last_activity: Option<f64>,
}

impl TickFeatures {
    /// Whether the tick saw meaningful activity: scrolling above the noise
    /// floor or any click.
    pub fn is_active(&self, recovery: &RecoveryConfig) -> bool {
        self.scroll_speed > recovery.activity_scroll_floor
            || self.click_frequency > 0.0
            || self.rage_clicks > 0
    }
}

/// Entropy split into its additive components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EntropyBreakdown {
    pub reversal: f64,
    pub rage: f64,
    pub scroll: f64,
    pub click: f64,
}

impl EntropyBreakdown {
    /// Sum of all components, capped at 1.
    pub fn total(&self) -> f64 {
        (self.reversal + self.rage + self.scroll + self.click).clamp(0.0, 1.0)
    }
}

/// Compute the entropy components for a tick.
///
/// Each component ramps with its signal and saturates at its weight once the
/// signal reaches the chaotic threshold.
pub fn compute_entropy(features: &TickFeatures, config: &EntropyConfig) -> EntropyBreakdown {
    EntropyBreakdown {
        reversal: component(
            features.direction_changes as f64,
            config.chaotic_reversals as f64,
            config.reversal_weight,
        ),
        rage: component(
            features.rage_clicks as f64,
            config.chaotic_rage_clicks as f64,
            config.rage_weight,
        ),
        scroll: component(
            features.scroll_speed,
            config.chaotic_scroll_speed,
            config.scroll_weight,
        ),
        click: component(
            features.click_frequency,
            config.chaotic_click_frequency,
            config.click_weight,
        ),
    }
}

fn component(value: f64, threshold: f64, weight: f64) -> f64 {
    if threshold <= 0.0 || value <= 0.0 {
        return 0.0;
    }
    weight * (value / threshold).min(1.0)
}

/// How a tick's activity is scored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivityClass {
    /// At least one chaotic signal; carries the summed increment
    Chaotic(f64),
    /// Elevated but orderly signals; carries the summed increment
    Elevated(f64),
    /// Purposeful activity
    Orderly,
}

/// Classify active-tick features and compute the positive increment.
///
/// Chaotic increments (reversals, rage clicks, chaotic scroll and click
/// rates) take precedence over elevated ones; a signal contributes to at
/// most one tier.
pub fn classify_activity(
    features: &TickFeatures,
    entropy: &EntropyConfig,
    increments: &IncrementConfig,
    weight: f64,
) -> ActivityClass {
    let mut chaotic = 0.0;
    let mut elevated = 0.0;

    if features.direction_changes >= entropy.chaotic_reversals {
        chaotic += increments.reversal * features.direction_changes as f64;
    }
    if features.rage_clicks >= entropy.chaotic_rage_clicks {
        chaotic += increments.rage * features.rage_clicks as f64;
    }

    let scroll_k = features.scroll_speed / 1000.0;
    if features.scroll_speed > entropy.chaotic_scroll_speed {
        chaotic += increments.chaotic_scroll * scroll_k;
    } else if features.scroll_speed > increments.elevated_scroll_speed {
        elevated += increments.elevated_scroll * scroll_k;
    }

    if features.click_frequency > entropy.chaotic_click_frequency {
        chaotic += increments.chaotic_click * features.click_frequency;
    } else if features.click_frequency > increments.elevated_click_frequency {
        elevated += increments.elevated_click * features.click_frequency;
    }

    if chaotic > 0.0 {
        ActivityClass::Chaotic((chaotic + elevated) * weight)
    } else if elevated > 0.0 {
        ActivityClass::Elevated(elevated * weight)
    } else {
        ActivityClass::Orderly
    }
}
