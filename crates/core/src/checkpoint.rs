//! Per-source opaque checkpoint persistence.
//!
//! The runtime never interprets checkpoint values; it stores whatever a
//! source plugin returned and replays it on the next poll. The
//! scheduler serializes polls per source, so there is at most one
//! writer per source id.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::error::CoreError;

/// Durable per-source checkpoint storage.
pub trait CheckpointStore: Send + Sync {
    fn get(&self, source_id: &str) -> Result<Option<String>, CoreError>;

    /// Atomic replace for one key: after a crash the value is either the
    /// old one or the new one, never a partial write.
    fn put(&self, source_id: &str, value: &str) -> Result<(), CoreError>;

    fn remove(&self, source_id: &str) -> Result<(), CoreError>;
}

// ── In-memory (tests, ephemeral deployments) ────────────────────────

#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get(&self, source_id: &str) -> Result<Option<String>, CoreError> {
        let guard = self.entries.read().expect("checkpoint lock poisoned");
        Ok(guard.get(source_id).cloned())
    }

    fn put(&self, source_id: &str, value: &str) -> Result<(), CoreError> {
        let mut guard = self.entries.write().expect("checkpoint lock poisoned");
        guard.insert(source_id.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, source_id: &str) -> Result<(), CoreError> {
        let mut guard = self.entries.write().expect("checkpoint lock poisoned");
        guard.remove(source_id);
        Ok(())
    }
}

// ── Filesystem (one file per source id) ─────────────────────────────

/// Checkpoints as one file per source under a directory, written with
/// temp-file + rename so a crash never leaves a partial value visible.
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, source_id: &str) -> PathBuf {
        // Source ids are restricted to an identifier charset by config
        // validation, so they are safe as file names.
        self.dir.join(source_id)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn get(&self, source_id: &str) -> Result<Option<String>, CoreError> {
        match fs::read_to_string(self.path_for(source_id)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Checkpoint {
                source_id: source_id.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn put(&self, source_id: &str, value: &str) -> Result<(), CoreError> {
        let final_path = self.path_for(source_id);
        let tmp_path = self.dir.join(format!(".{source_id}.tmp"));

        fs::write(&tmp_path, value).map_err(|e| CoreError::Checkpoint {
            source_id: source_id.to_string(),
            message: format!("write {}: {e}", tmp_path.display()),
        })?;
        fs::rename(&tmp_path, &final_path).map_err(|e| CoreError::Checkpoint {
            source_id: source_id.to_string(),
            message: format!("rename to {}: {e}", final_path.display()),
        })?;

        debug!(source_id = %source_id, "checkpoint persisted");
        Ok(())
    }

    fn remove(&self, source_id: &str) -> Result<(), CoreError> {
        match fs::remove_file(self.path_for(source_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Checkpoint {
                source_id: source_id.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_put_get_remove() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.get("s1").unwrap(), None);
        store.put("s1", "cp-1").unwrap();
        assert_eq!(store.get("s1").unwrap(), Some("cp-1".to_string()));
        store.put("s1", "cp-2").unwrap();
        assert_eq!(store.get("s1").unwrap(), Some("cp-2".to_string()));
        store.remove("s1").unwrap();
        assert_eq!(store.get("s1").unwrap(), None);
    }

    #[test]
    fn fs_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path()).unwrap();

        assert_eq!(store.get("s1").unwrap(), None);
        store.put("s1", "cursor-42").unwrap();
        assert_eq!(store.get("s1").unwrap(), Some("cursor-42".to_string()));

        // Replacement is total.
        store.put("s1", "cursor-43").unwrap();
        assert_eq!(store.get("s1").unwrap(), Some("cursor-43".to_string()));
    }

    #[test]
    fn fs_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsCheckpointStore::new(dir.path()).unwrap();
            store.put("s1", "durable").unwrap();
        }
        let reopened = FsCheckpointStore::new(dir.path()).unwrap();
        assert_eq!(reopened.get("s1").unwrap(), Some("durable".to_string()));
    }

    #[test]
    fn fs_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path()).unwrap();
        store.remove("never-seen").unwrap();
    }

    #[test]
    fn fs_keys_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path()).unwrap();
        store.put("a", "1").unwrap();
        store.put("b", "2").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), Some("2".to_string()));
    }
}
