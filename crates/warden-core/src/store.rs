//! Record store contract and the JSON-file adapter.
//!
//! The engine only consumes the CRUD contract; any durable backend can sit
//! behind [`RecordStore`]. The shipped adapter keeps every record in a
//! single JSON document rewritten atomically after each mutation.

use crate::crypto::write_atomic;
use crate::error::{Result, WardenError};
use crate::records::{AuditEvent, Credential, FileRecord, LockRecord};
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// CRUD contract consumed by the engine and the process guard.
pub trait RecordStore: Send + Sync {
    /// Add a lock record. Fails with `AlreadyLocked` if an active record
    /// already exists for the same path.
    fn add_lock(&self, record: LockRecord) -> Result<()>;
    /// Remove the active lock record for `path`. `NotFound` when absent.
    fn remove_lock(&self, path: &Path) -> Result<()>;
    fn active_locks(&self) -> Result<Vec<LockRecord>>;
    fn is_app_locked(&self, path: &Path) -> Result<bool>;

    /// Add a file record. Fails with `AlreadyLocked` if an active record
    /// already claims the same ciphertext path.
    fn add_file(&self, record: FileRecord) -> Result<()>;
    /// Remove the active file record for `ciphertext_path`.
    fn remove_file(&self, ciphertext_path: &Path) -> Result<()>;
    fn file_by_ciphertext_path(&self, ciphertext_path: &Path) -> Result<Option<FileRecord>>;
    fn active_files(&self) -> Result<Vec<FileRecord>>;

    fn credential(&self) -> Result<Option<Credential>>;
    /// Replace the singleton credential as one atomic write.
    fn set_credential(&self, credential: Credential) -> Result<()>;

    fn append_audit(&self, event: AuditEvent) -> Result<()>;
    /// Most recent events first, up to `limit`.
    fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEvent>>;
    /// Count of failed attempts within the last `minutes` minutes.
    fn failed_attempts_since(&self, minutes: i64) -> Result<usize>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    locks: Vec<LockRecord>,
    #[serde(default)]
    files: Vec<FileRecord>,
    #[serde(default)]
    credential: Option<Credential>,
    #[serde(default)]
    audit: Vec<AuditEvent>,
}

/// File-backed store: one JSON document, rewritten via temp-file + rename
/// after every mutation.
pub struct JsonStore {
    path: PathBuf,
    data: RwLock<StoreData>,
}

impl JsonStore {
    /// Open the store at `path`, creating an empty one if absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let raw = fs::read(&path)?;
            serde_json::from_slice(&raw)?
        } else {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            StoreData::default()
        };
        debug!(path = %path.display(), "record store opened");
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn save(&self, data: &StoreData) -> Result<()> {
        let raw = serde_json::to_vec_pretty(data)?;
        write_atomic(&self.path, &raw)
    }
}

impl RecordStore for JsonStore {
    fn add_lock(&self, record: LockRecord) -> Result<()> {
        let mut data = self.data.write();
        if data
            .locks
            .iter()
            .any(|l| l.active && l.app_path == record.app_path)
        {
            return Err(WardenError::AlreadyLocked(
                record.app_path.display().to_string(),
            ));
        }
        data.locks.push(record);
        self.save(&data)
    }

    fn remove_lock(&self, path: &Path) -> Result<()> {
        let mut data = self.data.write();
        let before = data.locks.len();
        data.locks.retain(|l| !(l.active && l.app_path == path));
        if data.locks.len() == before {
            return Err(WardenError::NotFound(path.display().to_string()));
        }
        self.save(&data)
    }

    fn active_locks(&self) -> Result<Vec<LockRecord>> {
        Ok(self
            .data
            .read()
            .locks
            .iter()
            .filter(|l| l.active)
            .cloned()
            .collect())
    }

    fn is_app_locked(&self, path: &Path) -> Result<bool> {
        Ok(self
            .data
            .read()
            .locks
            .iter()
            .any(|l| l.active && l.app_path == path))
    }

    fn add_file(&self, record: FileRecord) -> Result<()> {
        let mut data = self.data.write();
        if data
            .files
            .iter()
            .any(|f| f.active && f.ciphertext_path == record.ciphertext_path)
        {
            return Err(WardenError::AlreadyLocked(
                record.original_path.display().to_string(),
            ));
        }
        data.files.push(record);
        self.save(&data)
    }

    fn remove_file(&self, ciphertext_path: &Path) -> Result<()> {
        let mut data = self.data.write();
        let before = data.files.len();
        data.files
            .retain(|f| !(f.active && f.ciphertext_path == ciphertext_path));
        if data.files.len() == before {
            return Err(WardenError::NotFound(ciphertext_path.display().to_string()));
        }
        self.save(&data)
    }

    fn file_by_ciphertext_path(&self, ciphertext_path: &Path) -> Result<Option<FileRecord>> {
        Ok(self
            .data
            .read()
            .files
            .iter()
            .find(|f| f.active && f.ciphertext_path == ciphertext_path)
            .cloned())
    }

    fn active_files(&self) -> Result<Vec<FileRecord>> {
        Ok(self
            .data
            .read()
            .files
            .iter()
            .filter(|f| f.active)
            .cloned()
            .collect())
    }

    fn credential(&self) -> Result<Option<Credential>> {
        Ok(self.data.read().credential.clone())
    }

    fn set_credential(&self, credential: Credential) -> Result<()> {
        let mut data = self.data.write();
        data.credential = Some(credential);
        self.save(&data)
    }

    fn append_audit(&self, event: AuditEvent) -> Result<()> {
        let mut data = self.data.write();
        data.audit.push(event);
        self.save(&data)
    }

    fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let data = self.data.read();
        let mut events: Vec<AuditEvent> = data.audit.iter().rev().take(limit).cloned().collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(events)
    }

    fn failed_attempts_since(&self, minutes: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::minutes(minutes);
        Ok(self
            .data
            .read()
            .audit
            .iter()
            .filter(|e| !e.success && e.timestamp >= cutoff)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ResourceKind;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> JsonStore {
        JsonStore::open(dir.path().join("records.json")).unwrap()
    }

    #[test]
    fn duplicate_active_lock_is_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .add_lock(LockRecord::new("foo", "/usr/bin/foo"))
            .unwrap();
        let err = store
            .add_lock(LockRecord::new("foo2", "/usr/bin/foo"))
            .unwrap_err();
        assert!(matches!(err, WardenError::AlreadyLocked(_)));
        assert_eq!(store.active_locks().unwrap().len(), 1);
        assert_eq!(store.active_locks().unwrap()[0].app_name, "foo");
    }

    #[test]
    fn remove_unknown_lock_is_not_found() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let err = store.remove_lock(Path::new("/usr/bin/none")).unwrap_err();
        assert!(matches!(err, WardenError::NotFound(_)));
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        {
            let store = JsonStore::open(&path).unwrap();
            store
                .add_lock(LockRecord::new("vim", "/usr/bin/vim"))
                .unwrap();
            store
                .add_file(FileRecord::new("/tmp/a", "/tmp/a.locked", "kid", 5))
                .unwrap();
        }
        let store = JsonStore::open(&path).unwrap();
        assert!(store.is_app_locked(Path::new("/usr/bin/vim")).unwrap());
        assert!(store
            .file_by_ciphertext_path(Path::new("/tmp/a.locked"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn credential_replacement_is_single_record() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.credential().unwrap().is_none());

        let first = Credential {
            password_hash: "hash1".into(),
            salt: "salt1".into(),
            rotated_at: Utc::now(),
        };
        store.set_credential(first.clone()).unwrap();
        assert_eq!(store.credential().unwrap().unwrap(), first);

        let second = Credential {
            password_hash: "hash2".into(),
            salt: "salt2".into(),
            rotated_at: Utc::now(),
        };
        store.set_credential(second.clone()).unwrap();
        assert_eq!(store.credential().unwrap().unwrap(), second);
    }

    #[test]
    fn failed_attempt_window() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .append_audit(AuditEvent::new(ResourceKind::Application, "foo", false))
            .unwrap();
        store
            .append_audit(AuditEvent::new(ResourceKind::File, "/tmp/a", true))
            .unwrap();

        let mut old = AuditEvent::new(ResourceKind::File, "/tmp/b", false);
        old.timestamp = Utc::now() - Duration::minutes(30);
        store.append_audit(old).unwrap();

        assert_eq!(store.failed_attempts_since(5).unwrap(), 1);
        assert_eq!(store.failed_attempts_since(60).unwrap(), 2);
        assert_eq!(store.recent_audit(10).unwrap().len(), 3);
    }
}
