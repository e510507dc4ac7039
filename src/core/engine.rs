//! Score engine: the per-session stress estimator and level state machine.
//!
//! Each tick resolves the active mode first (therapy, then reader, then
//! standard scoring), updates the score, derives the level through the
//! hysteresis table and decides whether a level-change or suggestion signal
//! is due. Everything here is pure arithmetic over validated input, so no
//! operation can fail.

use crate::config::{CategoryProfile, ScoringConfig};
use crate::core::features::{classify_activity, compute_entropy, ActivityClass, TickFeatures};
use crate::core::hysteresis::{Level, LevelTable, MAX_LEVEL};
use crate::signal::{ContextCategory, LockMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Exclusive lock state overriding standard level derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Standard,
    ReaderLocked,
    TherapyLocked,
}

impl Mode {
    pub fn is_locked(&self) -> bool {
        !matches!(self, Mode::Standard)
    }
}

/// Strength of a level-2 suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    Gentle,
    Strong,
}

/// Signal produced by a tick, at most one per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineSignal {
    LevelChanged {
        mode: Mode,
        level: Level,
        score: f64,
        entropy: f64,
        in_flow_band: bool,
        category: ContextCategory,
    },
    Suggestion {
        score: f64,
        kind: SuggestionKind,
    },
}

/// Result of one evaluation, consumed immediately by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    /// Delta requested by the scoring model, before clamping to the bounds
    pub delta: f64,
    pub entropy: f64,
    pub new_level: Level,
    pub mode_locked: bool,
    pub mode: Mode,
    pub signal: Option<EngineSignal>,
}

/// Per-session score state machine.
#[derive(Debug, Clone)]
pub struct ScoreEngine {
    config: Arc<ScoringConfig>,
    levels: LevelTable,
    category: ContextCategory,
    profile: CategoryProfile,
    score: f64,
    /// Hysteresis state carried across ticks
    level: Level,
    /// Last level consumers were told about
    announced_level: Level,
    therapy_active: bool,
    reader_active: bool,
    last_activity: f64,
    idle: bool,
    deep_reading: bool,
    suggestion_pending: bool,
    entropy: f64,
}

impl ScoreEngine {
    /// Create an engine for a session first observed at `now` (ms).
    pub fn new(
        config: Arc<ScoringConfig>,
        category: ContextCategory,
        profile: CategoryProfile,
        now: f64,
    ) -> Self {
        let levels = LevelTable::from_thresholds(&config.levels);
        let score = config
            .initial_score
            .clamp(config.min_score, config.max_score);
        Self {
            levels,
            category,
            profile,
            score,
            level: 0,
            announced_level: 0,
            therapy_active: false,
            reader_active: false,
            last_activity: now,
            idle: false,
            deep_reading: false,
            suggestion_pending: false,
            entropy: 0.0,
            config,
        }
    }

    /// Run one tick.
    pub fn advance(&mut self, features: &TickFeatures, now: f64) -> TickOutput {
        let config = Arc::clone(&self.config);
        let active = features.is_active(&config.recovery);
        if active {
            let seen = features.last_activity.unwrap_or(now);
            self.last_activity = self.last_activity.max(seen);
        } else if let Some(seen) = features.last_activity {
            self.last_activity = self.last_activity.max(seen);
        }
        self.idle = !active && now - self.last_activity > config.idle.grace_ms;

        self.entropy = compute_entropy(features, &config.entropy).total();

        let mode = self.mode();
        let delta = match mode {
            Mode::TherapyLocked => {
                self.deep_reading = false;
                let decay = (config.recovery.base_recovery_rate
                    + self.score * config.decay.decay_factor)
                    * config.therapy.bonus_multiplier;
                self.apply(-decay);
                self.level = MAX_LEVEL;
                -decay
            }
            Mode::ReaderLocked => {
                self.deep_reading = false;
                let delta = self.reader_delta();
                self.apply(delta);
                self.level = self.levels.derive(self.score, self.level).max(2);
                delta
            }
            Mode::Standard => {
                let delta = if active {
                    self.deep_reading = false;
                    self.activity_delta(features)
                } else {
                    self.idle_delta(now)
                };
                let delta = self.floor_lock(delta);
                self.apply(delta);
                self.level = self.levels.derive(self.score, self.level);
                delta
            }
        };

        self.output(delta, mode)
    }

    /// Re-derive the level for the current score without applying any
    /// delta. Used after an external score override.
    pub fn reevaluate(&mut self) -> TickOutput {
        let mode = self.mode();
        self.level = match mode {
            Mode::TherapyLocked => MAX_LEVEL,
            Mode::ReaderLocked => self.levels.derive(self.score, self.level).max(2),
            Mode::Standard => self.levels.derive(self.score, self.level),
        };
        self.output(0.0, mode)
    }

    /// Force the score to a value (clamped to the bounds).
    pub fn set_score(&mut self, value: f64) {
        self.score = value.clamp(self.config.min_score, self.config.max_score);
    }

    /// Set or clear an externally signaled lock mode.
    pub fn set_mode(&mut self, mode: LockMode, active: bool) {
        match mode {
            LockMode::Therapy => self.therapy_active = active,
            LockMode::Reader => self.reader_active = active,
        }
    }

    /// Handle a completion signal from a lock-mode collaborator.
    ///
    /// Therapy completion clears the therapy lock, snaps the score to the
    /// completion target and resets the hysteresis state so the level
    /// resolves to 0 or 1. The change is announced on the next tick.
    pub fn complete(&mut self, mode: LockMode) {
        match mode {
            LockMode::Therapy => {
                self.therapy_active = false;
                self.score = self.config.completion_score();
                self.level = self.levels.derive(self.score, 0);
                self.suggestion_pending = false;
            }
            LockMode::Reader => self.reader_active = false,
        }
    }

    pub fn set_category(&mut self, category: ContextCategory, profile: CategoryProfile) {
        self.category = category;
        self.profile = profile;
    }

    /// Resume from a persisted score and level. The level is announced again
    /// on the next tick since consumers may have restarted with the host.
    pub fn restore(&mut self, score: f64, level: Level) {
        self.set_score(score);
        self.level = level.min(MAX_LEVEL);
        self.announced_level = 0;
    }

    pub fn mode(&self) -> Mode {
        if self.therapy_active {
            Mode::TherapyLocked
        } else if self.reader_active {
            Mode::ReaderLocked
        } else {
            Mode::Standard
        }
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn entropy(&self) -> f64 {
        self.entropy
    }

    pub fn category(&self) -> ContextCategory {
        self.category
    }

    pub fn idle(&self) -> bool {
        self.idle
    }

    pub fn deep_reading(&self) -> bool {
        self.deep_reading
    }

    pub fn suggestion_pending(&self) -> bool {
        self.suggestion_pending
    }

    pub fn in_flow_band(&self) -> bool {
        self.config.flow_band.contains(self.score)
    }

    pub fn last_activity(&self) -> f64 {
        self.last_activity
    }

    fn apply(&mut self, delta: f64) {
        self.score = (self.score + delta).clamp(self.config.min_score, self.config.max_score);
    }

    fn reader_delta(&self) -> f64 {
        let reader = &self.config.reader;
        if reader.band.contains(self.score) {
            0.0
        } else if self.score > reader.band.high {
            -reader.decay * self.profile.decay_multiplier
        } else {
            reader.nudge
        }
    }

    fn activity_delta(&self, features: &TickFeatures) -> f64 {
        let config = &self.config;
        let in_flow = self.in_flow_band();
        match classify_activity(
            features,
            &config.entropy,
            &config.increments,
            self.profile.weight,
        ) {
            ActivityClass::Chaotic(increment) => increment,
            // Purposeful activity inside the flow band is not penalised
            ActivityClass::Elevated(increment) if !in_flow => increment,
            _ => -self.recovery(in_flow),
        }
    }

    fn recovery(&self, in_flow: bool) -> f64 {
        let recovery = &self.config.recovery;
        if in_flow {
            recovery.flow_recovery
        } else if self.score > recovery.high_score {
            recovery.base_recovery_rate * recovery.high_score_multiplier
        } else {
            recovery.base_recovery_rate
        }
    }

    fn idle_delta(&mut self, now: f64) -> f64 {
        let idle = &self.config.idle;
        let idle_ms = now - self.last_activity;
        if idle_ms <= idle.grace_ms {
            self.deep_reading = false;
            return 0.0;
        }
        if idle_ms > idle.deep_idle_ms && self.profile.passive_reading {
            self.deep_reading = true;
            return -idle.deep_reading_reward;
        }
        self.deep_reading = false;
        -self.natural_decay()
    }

    fn natural_decay(&self) -> f64 {
        let decay = &self.config.decay;
        let mut amount = (decay.base_decay_rate + self.score * decay.decay_factor)
            * self.profile.decay_multiplier;
        if self.in_flow_band() {
            amount *= decay.flow_band_factor;
        }
        if self.score > self.config.min_score {
            amount = amount.max(decay.min_decay);
        }
        amount
    }

    /// At level 1, a delta that would carry the score from above the floor
    /// to below it lands exactly on the floor instead.
    fn floor_lock(&self, delta: f64) -> f64 {
        let floor = self.config.levels.level1_floor;
        if self.level == 1 && self.score > floor && self.score + delta < floor {
            tracing::trace!(score = self.score, delta, floor, "level-1 floor lock");
            floor - self.score
        } else {
            delta
        }
    }

    fn output(&mut self, delta: f64, mode: Mode) -> TickOutput {
        if self.score < self.config.levels.level2 {
            self.suggestion_pending = false;
        }

        let signal = if self.level != self.announced_level {
            self.announced_level = self.level;
            Some(EngineSignal::LevelChanged {
                mode,
                level: self.level,
                score: self.score,
                entropy: self.entropy,
                in_flow_band: self.in_flow_band(),
                category: self.category,
            })
        } else {
            self.suggestion(mode)
        };

        TickOutput {
            delta,
            entropy: self.entropy,
            new_level: self.level,
            mode_locked: mode.is_locked(),
            mode,
            signal,
        }
    }

    fn suggestion(&mut self, mode: Mode) -> Option<EngineSignal> {
        if mode != Mode::Standard || self.level != 2 || self.suggestion_pending {
            return None;
        }
        let levels = &self.config.levels;
        let kind = if self.score >= levels.suggestion_strong {
            SuggestionKind::Strong
        } else if self.score >= levels.suggestion_gentle {
            SuggestionKind::Gentle
        } else {
            return None;
        };
        self.suggestion_pending = true;
        Some(EngineSignal::Suggestion {
            score: self.score,
            kind,
        })
    }
}
