//! Configuration for the DSI engine.
//!
//! Every numeric constant the engine uses (thresholds, increments, decay
//! rates, window sizes, category weights) lives in this table. Nothing in
//! the scoring path hard-codes a value.

use crate::signal::ContextCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the engine host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interval between score engine ticks for every session
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,

    /// Path for persisted session snapshots
    pub data_path: PathBuf,

    /// Whether session snapshots are written to disk after each tick
    pub persist_snapshots: bool,

    /// Capacity of each bounded event subscriber queue
    pub event_buffer: usize,

    /// Aggregator windows and detection thresholds
    pub signals: SignalConfig,

    /// Score engine constants
    pub scoring: ScoringConfig,

    /// Per-category weights and decay multipliers
    pub categories: CategoryTable,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dsi-engine");

        Self {
            tick_interval: Duration::from_millis(1000),
            data_path: data_dir,
            persist_snapshots: false,
            event_buffer: 256,
            signals: SignalConfig::default(),
            scoring: ScoringConfig::default(),
            categories: CategoryTable::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dsi-engine")
            .join("config.json")
    }

    /// Directory holding one snapshot file per live session.
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_path.join("sessions")
    }

    /// Check that the table is internally consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(invalid("tick_interval must be positive"));
        }
        if self.event_buffer == 0 {
            return Err(invalid("event_buffer must be positive"));
        }
        self.signals.validate()?;
        self.scoring.validate()?;
        self.categories.validate()
    }
}

/// Windows and detection thresholds for the signal aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Sliding window for scroll displacement (ms)
    pub scroll_window_ms: f64,
    /// Sliding window for click counting (ms)
    pub click_window_ms: f64,
    /// Maximum gap between opposite scroll movements counted as a reversal (ms)
    pub reversal_window_ms: f64,
    /// Displacement a scroll step must exceed to carry a direction (px)
    pub reversal_noise_px: f64,
    /// Maximum distance between consecutive clicks counted as a rage click (px)
    pub rage_radius_px: f64,
    /// Maximum gap between consecutive clicks counted as a rage click (ms)
    pub rage_interval_ms: f64,
    /// Amount removed from the direction-change counter after each sample
    pub direction_decrement: u32,
    /// How far an input timestamp may run ahead of the host clock (ms)
    pub max_clock_skew_ms: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            scroll_window_ms: 500.0,
            click_window_ms: 1000.0,
            reversal_window_ms: 1000.0,
            reversal_noise_px: 10.0,
            rage_radius_px: 20.0,
            rage_interval_ms: 500.0,
            direction_decrement: 1,
            max_clock_skew_ms: 5000.0,
        }
    }
}

impl SignalConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.scroll_window_ms <= 0.0 || self.click_window_ms <= 0.0 {
            return Err(invalid("scroll and click windows must be positive"));
        }
        if self.reversal_window_ms <= 0.0 || self.rage_interval_ms <= 0.0 {
            return Err(invalid("reversal and rage intervals must be positive"));
        }
        if self.reversal_noise_px < 0.0 || self.rage_radius_px < 0.0 {
            return Err(invalid("noise floor and rage radius must not be negative"));
        }
        if self.max_clock_skew_ms < 0.0 {
            return Err(invalid("max_clock_skew_ms must not be negative"));
        }
        Ok(())
    }
}

/// An inclusive score range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub low: f64,
    pub high: f64,
}

impl Band {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, score: f64) -> bool {
        score >= self.low && score <= self.high
    }

    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }
}

/// Level thresholds. Level 1 has an asymmetric enter/exit pair with a floor
/// between them; levels 2 and 3 use single thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelThresholds {
    pub level1_enter: f64,
    pub level1_exit: f64,
    /// Score the level-1 floor lock clamps a falling score to
    pub level1_floor: f64,
    pub level2: f64,
    pub level3: f64,
    /// Level-2 sub-threshold for a gentle suggestion
    pub suggestion_gentle: f64,
    /// Level-2 sub-threshold for a strong suggestion
    pub suggestion_strong: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            level1_enter: 50.0,
            level1_exit: 40.0,
            level1_floor: 45.0,
            level2: 70.0,
            level3: 85.0,
            suggestion_gentle: 75.0,
            suggestion_strong: 80.0,
        }
    }
}

/// Thresholds and weights of the entropy (disorder) classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    /// Direction changes per tick at which scrolling is chaotic
    pub chaotic_reversals: u32,
    /// Rage clicks per tick at which clicking is chaotic
    pub chaotic_rage_clicks: u32,
    /// Scroll speed above which scrolling is chaotic (px/s)
    pub chaotic_scroll_speed: f64,
    /// Click frequency above which clicking is chaotic (clicks/s)
    pub chaotic_click_frequency: f64,
    pub reversal_weight: f64,
    pub rage_weight: f64,
    pub scroll_weight: f64,
    pub click_weight: f64,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            chaotic_reversals: 3,
            chaotic_rage_clicks: 3,
            chaotic_scroll_speed: 3000.0,
            chaotic_click_frequency: 5.0,
            reversal_weight: 0.35,
            rage_weight: 0.35,
            scroll_weight: 0.2,
            click_weight: 0.2,
        }
    }
}

/// Positive score increments applied to disordered activity.
///
/// Each increment is multiplied by the triggering signal and by the
/// category weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementConfig {
    /// Per direction change, once chaotic
    pub reversal: f64,
    /// Per rage click, once chaotic
    pub rage: f64,
    /// Per 1000 px/s of chaotic scrolling
    pub chaotic_scroll: f64,
    /// Scroll speed above which scrolling is elevated (px/s)
    pub elevated_scroll_speed: f64,
    /// Per 1000 px/s of elevated scrolling
    pub elevated_scroll: f64,
    /// Per click/s of chaotic clicking
    pub chaotic_click: f64,
    /// Click frequency above which clicking is elevated (clicks/s)
    pub elevated_click_frequency: f64,
    /// Per click/s of elevated clicking
    pub elevated_click: f64,
}

impl Default for IncrementConfig {
    fn default() -> Self {
        Self {
            reversal: 1.5,
            rage: 2.0,
            chaotic_scroll: 2.5,
            elevated_scroll_speed: 1500.0,
            elevated_scroll: 0.8,
            chaotic_click: 1.5,
            elevated_click_frequency: 3.0,
            elevated_click: 0.5,
        }
    }
}

/// Recovery applied to orderly activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Scroll speed below which scrolling is noise (px/s)
    pub activity_scroll_floor: f64,
    /// Fixed recovery inside the flow band
    pub flow_recovery: f64,
    /// Recovery outside the flow band
    pub base_recovery_rate: f64,
    /// Score above which recovery is boosted
    pub high_score: f64,
    pub high_score_multiplier: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            activity_scroll_floor: 50.0,
            flow_recovery: 0.2,
            base_recovery_rate: 1.0,
            high_score: 70.0,
            high_score_multiplier: 1.5,
        }
    }
}

/// Natural decay applied while idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub base_decay_rate: f64,
    /// Fraction of the current score added to the decay
    pub decay_factor: f64,
    /// Smallest decay applied while the score is positive
    pub min_decay: f64,
    /// Multiplier applied inside the flow band
    pub flow_band_factor: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            base_decay_rate: 0.3,
            decay_factor: 0.02,
            min_decay: 0.1,
            flow_band_factor: 0.5,
        }
    }
}

/// Idle classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Post-activity window with no decay (ms)
    pub grace_ms: f64,
    /// Idle time after which a passive-reading context counts as deep reading (ms)
    pub deep_idle_ms: f64,
    /// Fixed score reduction per deep-reading tick
    pub deep_reading_reward: f64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            grace_ms: 3000.0,
            deep_idle_ms: 10_000.0,
            deep_reading_reward: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TherapyConfig {
    /// Multiplier on recovery while therapy is active
    pub bonus_multiplier: f64,
    /// Score restored on therapy completion; flow-band midpoint when unset
    pub completion_score: Option<f64>,
}

impl Default for TherapyConfig {
    fn default() -> Self {
        Self {
            bonus_multiplier: 2.0,
            completion_score: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Band the score is held in while reader mode is active
    pub band: Band,
    /// Decay per tick above the band, before the category multiplier
    pub decay: f64,
    /// Increase per tick below the band
    pub nudge: f64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            band: Band::new(45.0, 55.0),
            decay: 0.5,
            nudge: 0.5,
        }
    }
}

/// All score engine constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub min_score: f64,
    pub max_score: f64,
    pub initial_score: f64,
    pub flow_band: Band,
    pub levels: LevelThresholds,
    pub entropy: EntropyConfig,
    pub increments: IncrementConfig,
    pub recovery: RecoveryConfig,
    pub decay: DecayConfig,
    pub idle: IdleConfig,
    pub therapy: TherapyConfig,
    pub reader: ReaderConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            max_score: 100.0,
            initial_score: 0.0,
            flow_band: Band::new(30.0, 60.0),
            levels: LevelThresholds::default(),
            entropy: EntropyConfig::default(),
            increments: IncrementConfig::default(),
            recovery: RecoveryConfig::default(),
            decay: DecayConfig::default(),
            idle: IdleConfig::default(),
            therapy: TherapyConfig::default(),
            reader: ReaderConfig::default(),
        }
    }
}

impl ScoringConfig {
    /// Score restored when therapy completes.
    pub fn completion_score(&self) -> f64 {
        self.therapy
            .completion_score
            .unwrap_or_else(|| self.flow_band.midpoint())
            .clamp(self.min_score, self.max_score)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_score >= self.max_score {
            return Err(invalid("min_score must be below max_score"));
        }
        if !(self.min_score..=self.max_score).contains(&self.initial_score) {
            return Err(invalid("initial_score must lie within the score bounds"));
        }
        for (name, band) in [("flow_band", self.flow_band), ("reader.band", self.reader.band)] {
            if band.low >= band.high || band.low < self.min_score || band.high > self.max_score {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-empty range within the score bounds"
                )));
            }
        }

        let l = &self.levels;
        let ascending = [
            self.min_score,
            l.level1_exit,
            l.level1_floor,
            l.level1_enter,
            l.level2,
        ];
        if ascending.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(invalid(
                "expected min_score < level1_exit < level1_floor < level1_enter < level2",
            ));
        }
        if !(l.level2 <= l.suggestion_gentle
            && l.suggestion_gentle <= l.suggestion_strong
            && l.suggestion_strong < l.level3
            && l.level3 <= self.max_score)
        {
            return Err(invalid(
                "expected level2 <= suggestion_gentle <= suggestion_strong < level3 <= max_score",
            ));
        }

        let e = &self.entropy;
        if [e.reversal_weight, e.rage_weight, e.scroll_weight, e.click_weight]
            .iter()
            .any(|w| *w < 0.0)
        {
            return Err(invalid("entropy weights must not be negative"));
        }
        if e.chaotic_reversals == 0 || e.chaotic_rage_clicks == 0 {
            return Err(invalid("chaotic reversal and rage thresholds must be positive"));
        }
        if e.chaotic_scroll_speed <= 0.0 || e.chaotic_click_frequency <= 0.0 {
            return Err(invalid("chaotic scroll and click thresholds must be positive"));
        }
        if self.increments.elevated_scroll_speed > e.chaotic_scroll_speed
            || self.increments.elevated_click_frequency > e.chaotic_click_frequency
        {
            return Err(invalid("elevated thresholds must not exceed chaotic thresholds"));
        }
        if self.decay.min_decay < 0.0 || self.idle.grace_ms < 0.0 {
            return Err(invalid("min_decay and grace_ms must not be negative"));
        }
        if self.idle.deep_idle_ms < self.idle.grace_ms {
            return Err(invalid("deep_idle_ms must not be shorter than grace_ms"));
        }
        Ok(())
    }
}

/// Weight and decay behaviour for one context category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryProfile {
    /// Multiplier on positive increments
    pub weight: f64,
    /// Multiplier on natural decay and reader-mode decay
    pub decay_multiplier: f64,
    /// Whether long idle periods count as deep reading
    pub passive_reading: bool,
}

impl CategoryProfile {
    pub const NEUTRAL: CategoryProfile = CategoryProfile {
        weight: 1.0,
        decay_multiplier: 1.0,
        passive_reading: false,
    };

    const fn new(weight: f64, decay_multiplier: f64, passive_reading: bool) -> Self {
        Self {
            weight,
            decay_multiplier,
            passive_reading,
        }
    }
}

/// Lookup table from category to profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryTable(BTreeMap<ContextCategory, CategoryProfile>);

impl Default for CategoryTable {
    fn default() -> Self {
        use ContextCategory::*;
        Self(BTreeMap::from([
            (Social, CategoryProfile::new(1.3, 0.8, false)),
            (News, CategoryProfile::new(1.1, 1.0, true)),
            (Video, CategoryProfile::new(0.9, 0.7, false)),
            (Document, CategoryProfile::new(0.8, 1.2, true)),
            (Shopping, CategoryProfile::new(1.2, 1.0, false)),
            (Other, CategoryProfile::NEUTRAL),
        ]))
    }
}

impl CategoryTable {
    /// Profile for a category; categories missing from the table are neutral.
    pub fn profile(&self, category: ContextCategory) -> CategoryProfile {
        self.0
            .get(&category)
            .copied()
            .unwrap_or(CategoryProfile::NEUTRAL)
    }

    pub fn set(&mut self, category: ContextCategory, profile: CategoryProfile) {
        self.0.insert(category, profile);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (category, profile) in &self.0 {
            if profile.weight < 0.0 || profile.decay_multiplier <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "category {category}: weight must not be negative and decay_multiplier must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

/// Serde support for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.tick_interval, Duration::from_millis(1000));
        assert!(config.validate().is_ok());
        assert_eq!(config.scoring.completion_score(), 45.0);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"tick_interval": 250, "scoring": {"levels": {"level2": 72.0}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.scoring.levels.level2, 72.0);
        assert_eq!(config.scoring.levels.level1_enter, 50.0);
        assert_eq!(config.signals.scroll_window_ms, 500.0);
    }

    #[test]
    fn test_category_table_roundtrip_keys() {
        let table = CategoryTable::default();
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["social"]["weight"], 1.3);
        assert_eq!(json["document"]["passive_reading"], true);
        assert_eq!(table.profile(ContextCategory::Video).decay_multiplier, 0.7);
    }

    #[test]
    fn test_rejects_inverted_hysteresis() {
        let mut config = Config::default();
        config.scoring.levels.level1_exit = 55.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.scoring.levels.level1_floor = 39.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_suggestions_outside_level_two() {
        let mut config = Config::default();
        config.scoring.levels.suggestion_strong = 90.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_windows() {
        let mut config = Config::default();
        config.signals.click_window_ms = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tick_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("dsi-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("config.json");

        let mut config = Config::default();
        config.tick_interval = Duration::from_millis(500);
        config.signals.max_clock_skew_ms = 2000.0;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.tick_interval, Duration::from_millis(500));
        assert_eq!(loaded.signals.max_clock_skew_ms, 2000.0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_rejects_negative_clock_skew() {
        let mut config = Config::default();
        config.signals.max_clock_skew_ms = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_band() {
        let band = Band::new(30.0, 60.0);
        assert!(band.contains(30.0));
        assert!(band.contains(60.0));
        assert!(!band.contains(60.1));
        assert_eq!(band.midpoint(), 45.0);
    }
}
