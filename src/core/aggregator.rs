//! Signal aggregation over sliding time windows.
//!
//! Raw scroll and click samples are kept in short bounded windows (default
//! 500 ms for scrolling, 1000 ms for clicks) and reduced to per-tick rate
//! features. Reversal and rage counters accumulate between ticks and are
//! decayed or reset once a tick has consumed them.

use crate::config::SignalConfig;
use crate::core::features::TickFeatures;
use crate::signal::{validate_coordinate, validate_timestamp, InteractionEvent, SignalError};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct ScrollSample {
    time: f64,
    /// Absolute displacement from the previous position
    displacement: f64,
}

#[derive(Debug, Clone, Copy)]
struct ClickSample {
    time: f64,
    x: f64,
    y: f64,
}

/// Last movement that carried a direction above the noise floor.
#[derive(Debug, Clone, Copy)]
struct Heading {
    time: f64,
    downward: bool,
}

/// Per-session reducer from raw events to tick features.
#[derive(Debug, Clone)]
pub struct SignalAggregator {
    config: SignalConfig,
    scroll_samples: VecDeque<ScrollSample>,
    clicks: VecDeque<ClickSample>,
    /// Reference point for the next displacement; survives consumption
    last_scroll: Option<(f64, f64)>,
    heading: Option<Heading>,
    /// Reference point for rage detection; survives consumption
    last_click: Option<ClickSample>,
    direction_changes: u32,
    rage_clicks: u32,
    last_activity: Option<f64>,
}

impl SignalAggregator {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            config,
            scroll_samples: VecDeque::new(),
            clicks: VecDeque::new(),
            last_scroll: None,
            heading: None,
            last_click: None,
            direction_changes: 0,
            rage_clicks: 0,
            last_activity: None,
        }
    }

    /// Route a raw event to the matching observer.
    ///
    /// `now` is the host clock (ms). Events stamped further ahead of it than
    /// the configured skew are rejected before any state changes.
    pub fn observe(&mut self, event: InteractionEvent, now: f64) -> Result<(), SignalError> {
        let timestamp = validate_timestamp(event.timestamp())?;
        if timestamp - now > self.config.max_clock_skew_ms {
            return Err(SignalError::FutureTimestamp { timestamp, now });
        }
        match event {
            InteractionEvent::Scroll {
                position,
                timestamp,
            } => self.on_scroll(position, timestamp),
            InteractionEvent::Click { x, y, timestamp } => self.on_click(x, y, timestamp),
        }
    }

    /// Record a scroll position sample.
    ///
    /// A movement opposite to the previous heading within the reversal window
    /// counts as a direction change, provided it exceeds the noise floor.
    fn on_scroll(&mut self, position: f64, time: f64) -> Result<(), SignalError> {
        let time = validate_timestamp(time)?;
        let position = validate_coordinate("position", position)?;
        if let Some((last_time, _)) = self.last_scroll {
            if time < last_time {
                return Err(SignalError::OutOfOrder {
                    timestamp: time,
                    last: last_time,
                });
            }
        }

        let movement = self
            .last_scroll
            .map(|(_, last_position)| position - last_position)
            .unwrap_or(0.0);

        if movement.abs() > self.config.reversal_noise_px {
            let downward = movement > 0.0;
            if let Some(heading) = self.heading {
                if heading.downward != downward
                    && time - heading.time < self.config.reversal_window_ms
                {
                    self.direction_changes += 1;
                }
            }
            self.heading = Some(Heading { time, downward });
        }

        self.scroll_samples.push_back(ScrollSample {
            time,
            displacement: movement.abs(),
        });
        self.last_scroll = Some((time, position));
        self.touch(time);
        prune(
            &mut self.scroll_samples,
            time - self.config.scroll_window_ms,
            |s| s.time,
        );
        Ok(())
    }

    /// Record a click.
    ///
    /// A click close to the previous one in both space and time counts as a
    /// rage click.
    fn on_click(&mut self, x: f64, y: f64, time: f64) -> Result<(), SignalError> {
        let time = validate_timestamp(time)?;
        let x = validate_coordinate("x", x)?;
        let y = validate_coordinate("y", y)?;
        if let Some(last) = self.last_click {
            if time < last.time {
                return Err(SignalError::OutOfOrder {
                    timestamp: time,
                    last: last.time,
                });
            }
            let distance = ((x - last.x).powi(2) + (y - last.y).powi(2)).sqrt();
            if distance <= self.config.rage_radius_px
                && time - last.time < self.config.rage_interval_ms
            {
                self.rage_clicks += 1;
            }
        }

        let click = ClickSample { time, x, y };
        self.clicks.push_back(click);
        self.last_click = Some(click);
        self.touch(time);
        prune(&mut self.clicks, time - self.config.click_window_ms, |c| {
            c.time
        });
        Ok(())
    }

    /// Read the current features without consuming them.
    pub fn peek(&self, now: f64) -> TickFeatures {
        let scroll_cutoff = now - self.config.scroll_window_ms;
        let displacement: f64 = self
            .scroll_samples
            .iter()
            .filter(|s| s.time > scroll_cutoff)
            .map(|s| s.displacement)
            .sum();

        let click_cutoff = now - self.config.click_window_ms;
        let click_count = self.clicks.iter().filter(|c| c.time > click_cutoff).count();

        TickFeatures {
            scroll_speed: displacement / (self.config.scroll_window_ms / 1000.0),
            click_frequency: click_count as f64 / (self.config.click_window_ms / 1000.0),
            direction_changes: self.direction_changes,
            rage_clicks: self.rage_clicks,
            last_activity: self.last_activity,
        }
    }

    /// Apply the post-tick reset policy.
    ///
    /// Buffered samples are dropped so the next tick only scores new
    /// behaviour, rage clicks reset fully, and direction changes decay by a
    /// partial decrement.
    pub fn consume(&mut self) {
        self.scroll_samples.clear();
        self.clicks.clear();
        self.rage_clicks = 0;
        self.direction_changes = self
            .direction_changes
            .saturating_sub(self.config.direction_decrement);
    }

    /// Read and consume the current features.
    pub fn sample(&mut self, now: f64) -> TickFeatures {
        let features = self.peek(now);
        self.consume();
        features
    }

    /// Timestamp of the most recent accepted event.
    pub fn last_activity(&self) -> Option<f64> {
        self.last_activity
    }

    /// Number of buffered samples across both windows.
    pub fn buffered(&self) -> usize {
        self.scroll_samples.len() + self.clicks.len()
    }

    fn touch(&mut self, time: f64) {
        self.last_activity = Some(self.last_activity.map_or(time, |t| t.max(time)));
    }
}

/// Drop samples at or before the cutoff from the front of a time-ordered buffer.
fn prune<T>(buffer: &mut VecDeque<T>, cutoff: f64, time: impl Fn(&T) -> f64) {
    while buffer.front().is_some_and(|s| time(s) <= cutoff) {
        buffer.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> SignalAggregator {
        SignalAggregator::new(SignalConfig::default())
    }

    #[test]
    fn test_scroll_speed_over_window() {
        let mut agg = aggregator();
        agg.on_scroll(0.0, 1000.0).unwrap();
        agg.on_scroll(100.0, 1100.0).unwrap();
        agg.on_scroll(300.0, 1200.0).unwrap();

        // 300 px inside a 0.5 s window
        let features = agg.peek(1200.0);
        assert!((features.scroll_speed - 600.0).abs() < 1e-9);
        assert_eq!(features.direction_changes, 0);
    }

    #[test]
    fn test_old_scroll_samples_pruned() {
        let mut agg = aggregator();
        agg.on_scroll(0.0, 0.0).unwrap();
        agg.on_scroll(500.0, 100.0).unwrap();
        agg.on_scroll(510.0, 900.0).unwrap();

        assert_eq!(agg.buffered(), 1);
        assert!((agg.peek(900.0).scroll_speed - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_direction_reversal_counting() {
        let mut agg = aggregator();
        agg.on_scroll(0.0, 0.0).unwrap();
        agg.on_scroll(200.0, 100.0).unwrap();
        agg.on_scroll(50.0, 200.0).unwrap();
        agg.on_scroll(250.0, 300.0).unwrap();

        assert_eq!(agg.peek(300.0).direction_changes, 2);
    }

    #[test]
    fn test_reversal_ignores_noise_and_slow_turns() {
        let mut agg = aggregator();
        agg.on_scroll(0.0, 0.0).unwrap();
        agg.on_scroll(200.0, 100.0).unwrap();
        // Below the noise floor
        agg.on_scroll(195.0, 200.0).unwrap();
        // Opposite heading but long after the last meaningful movement
        agg.on_scroll(0.0, 1500.0).unwrap();

        assert_eq!(agg.peek(1500.0).direction_changes, 0);
    }

    #[test]
    fn test_rage_clicks() {
        let mut agg = aggregator();
        for i in 0..6 {
            agg.on_click(100.0, 100.0, 1000.0 + i as f64 * 100.0).unwrap();
        }
        let features = agg.peek(1500.0);
        assert_eq!(features.rage_clicks, 5);
        assert!((features.click_frequency - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_distant_or_slow_clicks_are_not_rage() {
        let mut agg = aggregator();
        agg.on_click(0.0, 0.0, 0.0).unwrap();
        agg.on_click(100.0, 0.0, 100.0).unwrap();
        agg.on_click(100.0, 0.0, 700.0).unwrap();
        assert_eq!(agg.peek(700.0).rage_clicks, 0);
    }

    #[test]
    fn test_second_sample_without_events() {
        let mut agg = aggregator();
        agg.on_scroll(0.0, 0.0).unwrap();
        agg.on_scroll(200.0, 100.0).unwrap();
        agg.on_scroll(0.0, 200.0).unwrap();
        agg.on_scroll(200.0, 300.0).unwrap();
        agg.on_scroll(0.0, 400.0).unwrap();
        agg.on_click(5.0, 5.0, 350.0).unwrap();
        agg.on_click(5.0, 5.0, 380.0).unwrap();

        let first = agg.sample(400.0);
        assert_eq!(first.direction_changes, 3);
        assert_eq!(first.rage_clicks, 1);
        assert!(first.scroll_speed > 0.0);

        let second = agg.sample(400.0);
        assert_eq!(second.scroll_speed, 0.0);
        assert_eq!(second.click_frequency, 0.0);
        assert_eq!(second.direction_changes, 2);
        assert_eq!(second.rage_clicks, 0);
    }

    #[test]
    fn test_invalid_input_leaves_state_untouched() {
        let mut agg = aggregator();
        agg.on_click(1.0, 1.0, 100.0).unwrap();

        assert!(agg.on_click(f64::NAN, 1.0, 200.0).is_err());
        assert!(agg.on_scroll(10.0, -5.0).is_err());
        assert!(agg.on_scroll(f64::INFINITY, 300.0).is_err());
        assert!(matches!(
            agg.on_click(1.0, 1.0, 50.0),
            Err(SignalError::OutOfOrder { .. })
        ));

        assert_eq!(agg.buffered(), 1);
        assert_eq!(agg.last_activity(), Some(100.0));
    }

    #[test]
    fn test_future_event_rejected_without_poisoning_order() {
        let mut agg = aggregator();
        let now = 10_000.0;
        agg.observe(InteractionEvent::click(1.0, 1.0, now - 200.0), now)
            .unwrap();

        assert_eq!(
            agg.observe(InteractionEvent::click(1.0, 1.0, now + 1e12), now),
            Err(SignalError::FutureTimestamp {
                timestamp: now + 1e12,
                now,
            })
        );
        assert!(agg
            .observe(InteractionEvent::scroll(0.0, now + 1e9), now)
            .is_err());
        assert_eq!(agg.last_activity(), Some(now - 200.0));

        // Small client skew is tolerated
        agg.observe(InteractionEvent::click(1.0, 1.0, now + 500.0), now)
            .unwrap();
        agg.observe(InteractionEvent::scroll(0.0, now + 100.0), now)
            .unwrap();
        assert_eq!(agg.buffered(), 3);
        assert_eq!(agg.last_activity(), Some(now + 500.0));
    }
}
