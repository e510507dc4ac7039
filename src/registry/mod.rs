//! Session registry.
//!
//! Owns every live session together with its periodic tick task. Each
//! session sits behind its own lock shared by the timer, event ingestion
//! and mode signals, so ticks for one session never overlap and a signal
//! applied between two ticks is fully visible to the second one.
//!
//! Signals addressed to unknown sessions are ignored. Invalid input is
//! rejected at the boundary, logged and counted.

pub mod store;

pub use store::{SnapshotStore, StoreError};

use crate::config::{Config, ConfigError};
use crate::core::engine::EngineSignal;
use crate::core::session::{Session, SessionConfig};
use crate::core::snapshot::{PersistedSession, SessionSnapshot};
use crate::notify::{EngineEvent, EventBus};
use crate::signal::{ContextCategory, ContextUpdate, InteractionEvent, LockMode, SignalError};
use crate::stats::SharedEngineStats;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No Tokio runtime available to drive session timers")]
    NoRuntime,

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Snapshot store error: {0}")]
    Store(#[from] StoreError),
}

/// Wall clock in epoch milliseconds driven by the Tokio clock, so paused
/// runtimes advance it deterministically.
#[derive(Debug, Clone, Copy)]
struct Clock {
    origin: Instant,
    origin_ms: f64,
}

impl Clock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: Utc::now().timestamp_millis() as f64,
        }
    }

    fn now_ms(&self) -> f64 {
        self.origin_ms + self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// One live session and its timer.
struct SessionSlot {
    id: String,
    session: Mutex<Session>,
    /// Set under the session lock when teardown begins
    closed: AtomicBool,
    persist_in_flight: Arc<AtomicBool>,
    /// Set when the session ends so late snapshot writes are discarded
    evicted: Arc<AtomicBool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            id: session.id().to_string(),
            session: Mutex::new(session),
            closed: AtomicBool::new(false),
            persist_in_flight: Arc::new(AtomicBool::new(false)),
            evicted: Arc::new(AtomicBool::new(false)),
            timer: Mutex::new(None),
        }
    }

    /// Lock the session unless teardown has begun.
    fn open(&self) -> Option<MutexGuard<'_, Session>> {
        let guard = lock(&self.session);
        (!self.closed.load(Ordering::Acquire)).then_some(guard)
    }

    /// Mark the slot closed and stop its timer. No tick runs after this
    /// returns.
    fn close(&self) {
        {
            let _guard = lock(&self.session);
            self.closed.store(true, Ordering::Release);
        }
        if let Some(timer) = lock(&self.timer).take() {
            timer.abort();
        }
    }
}

struct Inner {
    config: Config,
    session_config: SessionConfig,
    bus: EventBus,
    stats: SharedEngineStats,
    store: Option<SnapshotStore>,
    sessions: Mutex<HashMap<String, Arc<SessionSlot>>>,
    clock: Clock,
}

/// Registry of live sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    /// Create a registry. Fails if the configuration is inconsistent or
    /// the snapshot directory cannot be created.
    pub fn new(
        config: Config,
        bus: EventBus,
        stats: SharedEngineStats,
    ) -> Result<Self, RegistryError> {
        config.validate()?;
        let store = if config.persist_snapshots {
            Some(SnapshotStore::open(config.sessions_dir())?)
        } else {
            None
        };
        Ok(Self {
            inner: Arc::new(Inner {
                session_config: SessionConfig::from(&config),
                config,
                bus,
                stats,
                store,
                sessions: Mutex::new(HashMap::new()),
                clock: Clock::new(),
            }),
        })
    }

    /// Start monitoring a session. Idempotent: returns `Ok(false)` if the
    /// session is already live. A persisted snapshot for the same id is
    /// restored.
    pub fn start_session(&self, session_id: &str) -> Result<bool, RegistryError> {
        if session_id.trim().is_empty() {
            return Err(RegistryError::InvalidSessionId(session_id.to_string()));
        }
        let handle = Handle::try_current().map_err(|_| RegistryError::NoRuntime)?;

        let existing = lock(&self.inner.sessions).get(session_id).cloned();
        if let Some(slot) = existing {
            self.inner.ensure_timer(&slot, &handle);
            return Ok(false);
        }

        // Disk reads stay outside the map lock
        let persisted = self.inner.load_snapshot(session_id);

        let mut sessions = lock(&self.inner.sessions);
        if let Some(slot) = sessions.get(session_id) {
            self.inner.ensure_timer(slot, &handle);
            return Ok(false);
        }

        let mut session = Session::new(
            session_id,
            &self.inner.session_config,
            self.inner.clock.now_ms(),
        );
        if let Some(persisted) = persisted {
            session.restore(&persisted);
            tracing::info!(
                session = session_id,
                score = persisted.score,
                level = persisted.level,
                "Restored session from snapshot"
            );
        }

        let slot = Arc::new(SessionSlot::new(session));
        self.inner.ensure_timer(&slot, &handle);
        sessions.insert(session_id.to_string(), slot);
        self.inner.stats.record_session_started();
        tracing::info!(session = session_id, "Session started");
        Ok(true)
    }

    /// Tear a session down: cancel its timer, evict its state and remove
    /// its persisted snapshot. Returns `false` for unknown sessions.
    pub fn end_session(&self, session_id: &str) -> bool {
        let Some(slot) = lock(&self.inner.sessions).remove(session_id) else {
            tracing::debug!(session = session_id, "end for unknown session ignored");
            return false;
        };
        slot.evicted.store(true, Ordering::Release);
        slot.close();
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.remove(session_id) {
                tracing::warn!(session = session_id, "Failed to remove snapshot: {}", e);
            }
        }
        self.inner.stats.record_session_ended();
        tracing::info!(session = session_id, "Session ended");
        true
    }

    /// Feed an interaction event. Returns `Ok(false)` for unknown sessions.
    pub fn record_event(
        &self,
        session_id: &str,
        event: InteractionEvent,
    ) -> Result<bool, SignalError> {
        let Some(slot) = self.inner.slot(session_id) else {
            return Ok(false);
        };
        let Some(mut session) = slot.open() else {
            return Ok(false);
        };
        match session.record(event, self.inner.clock.now_ms()) {
            Ok(()) => {
                self.inner.stats.record_event_accepted();
                Ok(true)
            }
            Err(e) => {
                self.inner.reject(session_id, &e);
                Err(e)
            }
        }
    }

    /// Apply a context classification. Returns the category now in effect,
    /// or `None` for unknown sessions.
    pub fn set_category(
        &self,
        session_id: &str,
        update: &ContextUpdate,
    ) -> Result<Option<ContextCategory>, SignalError> {
        let Some(slot) = self.inner.slot(session_id) else {
            return Ok(None);
        };
        let Some(mut session) = slot.open() else {
            return Ok(None);
        };
        match session.set_category(update, self.inner.clock.now_ms()) {
            Ok(category) => Ok(Some(category)),
            Err(e) => {
                self.inner.reject(session_id, &e);
                Err(e)
            }
        }
    }

    /// Set or clear a lock mode. Returns `false` for unknown sessions.
    pub fn set_mode(&self, session_id: &str, mode: LockMode, active: bool) -> bool {
        self.inner.with_session(session_id, |session| {
            session.set_mode(mode, active);
            tracing::info!(session = session_id, ?mode, active, "Lock mode updated");
        })
    }

    /// Deliver a completion signal. Returns `false` for unknown sessions.
    pub fn complete(&self, session_id: &str, mode: LockMode) -> bool {
        self.inner.with_session(session_id, |session| {
            session.complete(mode);
            tracing::info!(
                session = session_id,
                ?mode,
                score = session.engine().score(),
                "Lock mode completed"
            );
        })
    }

    /// Force a session's score. The level is re-derived at once and any
    /// resulting signal is published. Returns the resulting snapshot, or
    /// `None` for unknown sessions.
    pub fn set_score(
        &self,
        session_id: &str,
        value: f64,
    ) -> Result<Option<SessionSnapshot>, SignalError> {
        let Some(slot) = self.inner.slot(session_id) else {
            return Ok(None);
        };
        let Some(mut session) = slot.open() else {
            return Ok(None);
        };
        match session.set_score(value) {
            Ok(output) => {
                if let Some(signal) = &output.signal {
                    self.inner.publish(session_id, signal);
                }
                Ok(Some(session.snapshot()))
            }
            Err(e) => {
                self.inner.reject(session_id, &e);
                Err(e)
            }
        }
    }

    pub fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let slot = self.inner.slot(session_id)?;
        let session = slot.open()?;
        Some(session.snapshot())
    }

    /// Ids of all live sessions, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.sessions).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every session timer. Persisted snapshots are kept so the
    /// sessions resume on the next start.
    pub fn shutdown(&self) {
        let slots: Vec<Arc<SessionSlot>> = lock(&self.inner.sessions)
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        for slot in &slots {
            slot.close();
        }
        tracing::info!(sessions = slots.len(), "Session registry shut down");
    }

    /// Current time on the registry clock, in epoch milliseconds.
    pub fn now_ms(&self) -> f64 {
        self.inner.clock.now_ms()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn stats(&self) -> &SharedEngineStats {
        &self.inner.stats
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Inner {
    fn slot(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        let slot = lock(&self.sessions).get(session_id).cloned();
        if slot.is_none() {
            tracing::debug!(session = session_id, "signal for unknown session ignored");
        }
        slot
    }

    fn with_session(&self, session_id: &str, f: impl FnOnce(&mut Session)) -> bool {
        let Some(slot) = self.slot(session_id) else {
            return false;
        };
        let Some(mut session) = slot.open() else {
            return false;
        };
        f(&mut session);
        true
    }

    fn load_snapshot(&self, session_id: &str) -> Option<PersistedSession> {
        let store = self.store.as_ref()?;
        match store.load(session_id) {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::warn!(session = session_id, "Failed to load snapshot: {}", e);
                None
            }
        }
    }

    fn reject(&self, session_id: &str, error: &SignalError) {
        self.stats.record_event_rejected();
        tracing::warn!(session = session_id, "Rejected input: {}", error);
    }

    /// Spawn the session's tick task unless one is already running.
    fn ensure_timer(self: &Arc<Self>, slot: &Arc<SessionSlot>, handle: &Handle) {
        let mut timer = lock(&slot.timer);
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let inner = Arc::downgrade(self);
        let target = Arc::downgrade(slot);
        let period = self.config.tick_interval;
        *timer = Some(handle.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !tick_once(&inner, &target) {
                    break;
                }
            }
        }));
    }

    /// Run one tick. Returns `false` once the session is gone.
    fn tick(&self, slot: &SessionSlot) -> bool {
        let persisted = {
            let Some(mut session) = slot.open() else {
                return false;
            };
            let now = self.clock.now_ms();
            session.tick(now, |signal| self.publish(&slot.id, signal));
            self.stats.record_tick();
            self.store.is_some().then(|| session.persisted())
        };
        if let Some(persisted) = persisted {
            self.persist(slot, persisted);
        }
        true
    }

    fn publish(&self, session_id: &str, signal: &EngineSignal) {
        match signal {
            EngineSignal::LevelChanged {
                level, score, mode, ..
            } => {
                self.stats.record_level_change();
                tracing::info!(session = session_id, level, score, ?mode, "Level changed");
            }
            EngineSignal::Suggestion { score, kind } => {
                self.stats.record_suggestion();
                tracing::info!(session = session_id, score, ?kind, "Suggestion raised");
            }
        }
        self.bus.publish(&EngineEvent::from_signal(session_id, signal));
    }

    /// Write a snapshot off the tick path. Skipped while a previous write
    /// for the same session is still running.
    fn persist(&self, slot: &SessionSlot, persisted: PersistedSession) {
        let Some(store) = self.store.clone() else {
            return;
        };
        if slot.persist_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let in_flight = Arc::clone(&slot.persist_in_flight);
        let evicted = Arc::clone(&slot.evicted);
        let Ok(handle) = Handle::try_current() else {
            in_flight.store(false, Ordering::Release);
            return;
        };
        handle.spawn_blocking(move || {
            let id = &persisted.session_id;
            if !evicted.load(Ordering::Acquire) {
                if let Err(e) = store.save(&persisted) {
                    tracing::debug!(session = %id, "Snapshot write failed: {}", e);
                }
                // The session may have ended while the write was running.
                // A restart under the same id writes a newer snapshot.
                if evicted.load(Ordering::Acquire) {
                    let _ = store.remove_if_saved_at(id, persisted.saved_at);
                }
            }
            in_flight.store(false, Ordering::Release);
        });
    }
}

fn tick_once(inner: &Weak<Inner>, slot: &Weak<SessionSlot>) -> bool {
    match (inner.upgrade(), slot.upgrade()) {
        (Some(inner), Some(slot)) => inner.tick(&slot),
        _ => false,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::create_shared_stats;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Config::default(), EventBus::new(), create_shared_stats()).unwrap()
    }

    #[test]
    fn test_start_requires_runtime() {
        let registry = registry();
        assert!(matches!(
            registry.start_session("s1"),
            Err(RegistryError::NoRuntime)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.scoring.levels.level1_exit = config.scoring.levels.level1_enter + 1.0;
        let result = SessionRegistry::new(config, EventBus::new(), create_shared_stats());
        assert!(matches!(result, Err(RegistryError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_session_is_noop() {
        let registry = registry();
        let event = InteractionEvent::scroll(100.0, registry.now_ms());
        assert!(!registry.record_event("ghost", event).unwrap());
        assert!(!registry.set_mode("ghost", LockMode::Therapy, true));
        assert!(!registry.complete("ghost", LockMode::Therapy));
        assert!(registry.set_score("ghost", 50.0).unwrap().is_none());
        assert!(registry.snapshot("ghost").is_none());
        assert!(!registry.end_session("ghost"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_id_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.start_session("  "),
            Err(RegistryError::InvalidSessionId(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_input_counted() {
        let registry = registry();
        registry.start_session("s1").unwrap();
        let bad = InteractionEvent::scroll(f64::NAN, registry.now_ms());
        assert!(registry.record_event("s1", bad).is_err());
        assert_eq!(registry.stats().stats().events_rejected, 1);
        registry.shutdown();
    }
}
