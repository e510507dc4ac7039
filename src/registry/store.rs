//! On-disk session snapshots.
//!
//! One JSON file per open session under the sessions directory. Files are
//! written through a temporary sibling and renamed into place so a crash
//! never leaves a truncated snapshot behind.

use crate::core::snapshot::PersistedSession;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Snapshot storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Directory of persisted sessions. Clones share one write lock.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    writes: Arc<Mutex<()>>,
}

impl SnapshotStore {
    /// Open (and create if needed) a snapshot directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            writes: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        let _writes = self.lock_writes();
        self.write(session)
    }

    fn write(&self, session: &PersistedSession) -> Result<(), StoreError> {
        let path = self.path_for(&session.session_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(session)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load the snapshot for `session_id`, if one exists.
    pub fn load(&self, session_id: &str) -> Result<Option<PersistedSession>, StoreError> {
        let content = match std::fs::read(self.path_for(session_id)) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let session: PersistedSession = serde_json::from_slice(&content)?;
        if session.session_id != session_id {
            tracing::warn!(
                expected = session_id,
                found = %session.session_id,
                "ignoring snapshot with mismatched session id"
            );
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Delete the snapshot for `session_id`. Returns whether a file existed.
    pub fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        let _writes = self.lock_writes();
        self.unlink(session_id)
    }

    /// Delete the snapshot for `session_id` only if it is the one saved at
    /// `saved_at`. A newer snapshot written under the same id is kept.
    pub fn remove_if_saved_at(
        &self,
        session_id: &str,
        saved_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let _writes = self.lock_writes();
        match self.load(session_id)? {
            Some(current) if current.saved_at == saved_at => self.unlink(session_id),
            _ => Ok(false),
        }
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unlink(&self, session_id: &str) -> Result<bool, StoreError> {
        match std::fs::remove_file(self.path_for(session_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(session_id)))
    }
}

/// Map a session id onto a portable file stem. Bytes outside
/// `[A-Za-z0-9_-]` are hex-escaped so distinct ids never collide.
fn file_stem(session_id: &str) -> String {
    let mut stem = String::with_capacity(session_id.len());
    for byte in session_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            let _ = write!(stem, "%{byte:02x}");
        }
    }
    stem
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::PRODUCER_NAME;
    use crate::signal::ContextCategory;
    use chrono::Utc;

    fn temp_store() -> SnapshotStore {
        let dir = std::env::temp_dir().join(format!("dsi-store-{}", uuid::Uuid::new_v4()));
        SnapshotStore::open(dir).unwrap()
    }

    fn persisted(id: &str, score: f64) -> PersistedSession {
        PersistedSession {
            session_id: id.to_string(),
            score,
            level: 1,
            category: ContextCategory::News,
            producer: PRODUCER_NAME.to_string(),
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_load_remove() {
        let store = temp_store();
        assert!(store.load("tab-1").unwrap().is_none());

        store.save(&persisted("tab-1", 52.0)).unwrap();
        store.save(&persisted("tab-1", 55.0)).unwrap();
        let loaded = store.load("tab-1").unwrap().unwrap();
        assert_eq!(loaded.score, 55.0);
        assert_eq!(loaded.category, ContextCategory::News);

        assert!(store.remove("tab-1").unwrap());
        assert!(!store.remove("tab-1").unwrap());
        assert!(store.load("tab-1").unwrap().is_none());

        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_conditional_remove_keeps_newer_snapshot() {
        let store = temp_store();
        let stale = persisted("tab-1", 52.0);
        store.save(&stale).unwrap();

        let mut fresh = persisted("tab-1", 30.0);
        fresh.saved_at = stale.saved_at + chrono::Duration::milliseconds(5);
        store.save(&fresh).unwrap();

        assert!(!store.remove_if_saved_at("tab-1", stale.saved_at).unwrap());
        assert_eq!(store.load("tab-1").unwrap().unwrap().score, 30.0);

        assert!(store.remove_if_saved_at("tab-1", fresh.saved_at).unwrap());
        assert!(store.load("tab-1").unwrap().is_none());
        assert!(!store.remove_if_saved_at("tab-1", fresh.saved_at).unwrap());

        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_file_stems_are_distinct() {
        assert_eq!(file_stem("tab-1_a"), "tab-1_a");
        assert_eq!(file_stem("../etc"), "%2e%2e%2fetc");
        assert_ne!(file_stem("a/b"), file_stem("a_b"));
    }
}
