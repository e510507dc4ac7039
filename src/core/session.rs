//! One monitored browsing context: an aggregator and a score engine paired
//! under a single owner.

use crate::config::{CategoryTable, Config, ScoringConfig, SignalConfig};
use crate::core::aggregator::SignalAggregator;
use crate::core::engine::{EngineSignal, ScoreEngine, TickOutput};
use crate::core::features::TickFeatures;
use crate::core::snapshot::{PersistedSession, SessionSnapshot};
use crate::signal::{
    validate_timestamp, ContextCategory, ContextUpdate, InteractionEvent, LockMode, SignalError,
};
use std::sync::Arc;

/// Shared, immutable per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub signals: SignalConfig,
    pub scoring: Arc<ScoringConfig>,
    pub categories: Arc<CategoryTable>,
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            signals: config.signals.clone(),
            scoring: Arc::new(config.scoring.clone()),
            categories: Arc::new(config.categories.clone()),
        }
    }
}

/// Features read and output produced by one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub features: TickFeatures,
    pub output: TickOutput,
}

/// Aggregator and score engine for one session.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    aggregator: SignalAggregator,
    engine: ScoreEngine,
    categories: Arc<CategoryTable>,
    last_category_update: Option<f64>,
    max_clock_skew_ms: f64,
}

impl Session {
    /// Create a session first observed at `now` (ms), classified as `Other`
    /// until the context detector reports.
    pub fn new(id: impl Into<String>, config: &SessionConfig, now: f64) -> Self {
        let category = ContextCategory::default();
        Self {
            id: id.into(),
            aggregator: SignalAggregator::new(config.signals.clone()),
            engine: ScoreEngine::new(
                Arc::clone(&config.scoring),
                category,
                config.categories.profile(category),
                now,
            ),
            categories: Arc::clone(&config.categories),
            last_category_update: None,
            max_clock_skew_ms: config.signals.max_clock_skew_ms,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Feed a raw interaction event to the aggregator, with `now` as the
    /// host clock.
    pub fn record(&mut self, event: InteractionEvent, now: f64) -> Result<(), SignalError> {
        self.aggregator.observe(event, now)
    }

    /// Apply a context classification. Updates older than the last applied
    /// one are ignored.
    pub fn set_category(
        &mut self,
        update: &ContextUpdate,
        now: f64,
    ) -> Result<ContextCategory, SignalError> {
        let timestamp = validate_timestamp(update.timestamp)?;
        if timestamp - now > self.max_clock_skew_ms {
            return Err(SignalError::FutureTimestamp { timestamp, now });
        }
        let category: ContextCategory = update.category.parse()?;
        if self
            .last_category_update
            .is_some_and(|last| timestamp < last)
        {
            return Ok(self.engine.category());
        }
        self.last_category_update = Some(timestamp);
        self.engine
            .set_category(category, self.categories.profile(category));
        Ok(category)
    }

    /// Run one tick at `now`.
    ///
    /// The signal, if any, is handed to `emit` before the aggregator's
    /// counters are reset for the next tick.
    pub fn tick(&mut self, now: f64, mut emit: impl FnMut(&EngineSignal)) -> TickReport {
        let features = self.aggregator.peek(now);
        let output = self.engine.advance(&features, now);
        if let Some(signal) = &output.signal {
            emit(signal);
        }
        self.aggregator.consume();
        TickReport { features, output }
    }

    pub fn set_mode(&mut self, mode: LockMode, active: bool) {
        self.engine.set_mode(mode, active);
    }

    pub fn complete(&mut self, mode: LockMode) {
        self.engine.complete(mode);
    }

    /// Force the score and re-derive the level immediately.
    pub fn set_score(&mut self, value: f64) -> Result<TickOutput, SignalError> {
        if !value.is_finite() {
            return Err(SignalError::NonFinite {
                field: "score",
                value,
            });
        }
        self.engine.set_score(value);
        Ok(self.engine.reevaluate())
    }

    pub fn restore(&mut self, persisted: &PersistedSession) {
        self.engine.set_category(
            persisted.category,
            self.categories.profile(persisted.category),
        );
        self.engine.restore(persisted.score, persisted.level);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(&self.id, &self.engine)
    }

    pub fn persisted(&self) -> PersistedSession {
        PersistedSession::capture(&self.id, &self.engine)
    }

    pub fn engine(&self) -> &ScoreEngine {
        &self.engine
    }

    pub fn aggregator(&self) -> &SignalAggregator {
        &self.aggregator
    }
}
