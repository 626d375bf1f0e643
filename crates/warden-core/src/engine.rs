//! Lock/unlock orchestration.
//!
//! Binds the crypto engine, key custody, and the record store under
//! per-resource mutual exclusion. Transactions against the same original
//! path serialize on a per-path mutex; the fatal ordering rule is that
//! plaintext is erased only after the ciphertext is durably written and its
//! key durably stored, never the reverse.

use crate::crypto;
use crate::custody::{key_id_for_path, KeyCustody};
use crate::error::{Result, WardenError};
use crate::records::{AuditEvent, FileRecord, LockRecord, ResourceKind};
use crate::store::RecordStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Suffix appended to a locked file's original path.
pub const LOCKED_SUFFIX: &str = ".locked";

/// Ciphertext path for an original path: the fixed suffix convention.
pub fn ciphertext_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(LOCKED_SUFFIX);
    PathBuf::from(os)
}

/// Original path for a ciphertext path, if it bears the locked suffix.
pub fn original_path_for(ciphertext_path: &Path) -> Option<PathBuf> {
    ciphertext_path
        .to_str()
        .and_then(|s| s.strip_suffix(LOCKED_SUFFIX))
        .map(PathBuf::from)
}

pub struct LockEngine {
    store: Arc<dyn RecordStore>,
    custody: Arc<dyn KeyCustody>,
    secure_delete_passes: u32,
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LockEngine {
    pub fn new(store: Arc<dyn RecordStore>, custody: Arc<dyn KeyCustody>) -> Self {
        Self {
            store,
            custody,
            secure_delete_passes: crypto::SECURE_DELETE_PASSES,
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_secure_delete_passes(mut self, passes: u32) -> Self {
        self.secure_delete_passes = passes;
        self
    }

    /// Per-path mutex. Entries are created on demand and kept for the
    /// process lifetime; the table is bounded by the number of distinct
    /// paths touched.
    fn path_guard(&self, path: &Path) -> Arc<Mutex<()>> {
        self.path_locks
            .lock()
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn audit_file(&self, path: &Path, success: bool) {
        let event = AuditEvent::new(ResourceKind::File, path.display().to_string(), success);
        if let Err(err) = self.store.append_audit(event) {
            warn!(error = %err, "failed to append audit event");
        }
    }

    /// Lock (encrypt) a single regular file.
    ///
    /// Transaction order: generate key → store in custody → encrypt to the
    /// derived ciphertext path → persist the record → securely erase the
    /// original. A failure at any step rolls back what the step left
    /// behind; an orphaned key is never kept past a failed encryption.
    pub fn lock_file(&self, path: &Path) -> Result<FileRecord> {
        let guard = self.path_guard(path);
        let _held = guard.lock();

        let ciphertext_path = ciphertext_path_for(path);
        if self
            .store
            .file_by_ciphertext_path(&ciphertext_path)?
            .is_some()
        {
            return Err(WardenError::AlreadyLocked(path.display().to_string()));
        }

        let meta = fs::metadata(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => WardenError::NotFound(path.display().to_string()),
            _ => WardenError::Io(err),
        })?;
        if !meta.is_file() {
            return Err(WardenError::NotRegularFile(path.display().to_string()));
        }

        let key = crypto::generate_key();
        let key_id = key_id_for_path(path);
        self.custody.store(&key_id, &key)?;

        if let Err(err) = crypto::encrypt_file(path, &ciphertext_path, &key) {
            // Roll back the orphaned key and any partial ciphertext.
            if let Err(del) = self.custody.delete(&key_id) {
                warn!(error = %del, "rollback: could not delete orphaned key");
            }
            let _ = fs::remove_file(&ciphertext_path);
            return Err(err);
        }

        let record = FileRecord::new(path, &ciphertext_path, &key_id, meta.len());
        if let Err(err) = self.store.add_file(record.clone()) {
            let _ = fs::remove_file(&ciphertext_path);
            if let Err(del) = self.custody.delete(&key_id) {
                warn!(error = %del, "rollback: could not delete orphaned key");
            }
            return Err(err);
        }

        // Ciphertext and key are durable; the plaintext may go.
        if let Err(err) = crypto::secure_delete(path, self.secure_delete_passes) {
            warn!(path = %path.display(), error = %err, "original not erased after lock");
            return Err(err);
        }

        info!(path = %path.display(), "file locked");
        Ok(record)
    }

    /// Unlock (decrypt) a file by its ciphertext path.
    ///
    /// Ciphertext, record, and key are removed only after decryption has
    /// succeeded, so no record ever references a ciphertext whose key is
    /// already gone.
    pub fn unlock_file(&self, ciphertext_path: &Path) -> Result<PathBuf> {
        let guard_key =
            original_path_for(ciphertext_path).unwrap_or_else(|| ciphertext_path.to_path_buf());
        let guard = self.path_guard(&guard_key);
        let _held = guard.lock();

        if !ciphertext_path.exists() {
            return Err(WardenError::NotFound(ciphertext_path.display().to_string()));
        }
        let record = self
            .store
            .file_by_ciphertext_path(ciphertext_path)?
            .ok_or_else(|| WardenError::NotFound(ciphertext_path.display().to_string()))?;

        let key = match self.custody.retrieve(&record.key_id) {
            Ok(Some(key)) => key,
            Ok(None) => {
                self.audit_file(&record.original_path, false);
                return Err(WardenError::KeyCustody(format!(
                    "no key in custody for {}",
                    record.original_path.display()
                )));
            }
            Err(err) => {
                self.audit_file(&record.original_path, false);
                return Err(err);
            }
        };

        if let Err(err) = crypto::decrypt_file(ciphertext_path, &record.original_path, &key) {
            self.audit_file(&record.original_path, false);
            return Err(err);
        }

        fs::remove_file(ciphertext_path)?;
        self.store.remove_file(ciphertext_path)?;
        self.custody.delete(&record.key_id)?;

        self.audit_file(&record.original_path, true);
        info!(path = %record.original_path.display(), "file unlocked");
        Ok(record.original_path)
    }

    /// Lock an application: record management only, no cryptographic work.
    pub fn lock_application(&self, app_name: &str, app_path: &Path) -> Result<LockRecord> {
        let record = LockRecord::new(app_name, app_path);
        self.store.add_lock(record.clone())?;
        info!(app = app_name, path = %app_path.display(), "application locked");
        Ok(record)
    }

    /// Remove the active lock record for an application path.
    pub fn unlock_application(&self, app_path: &Path) -> Result<()> {
        self.store.remove_lock(app_path)?;
        info!(path = %app_path.display(), "application unlocked");
        Ok(())
    }

    /// Lock every regular file under `dir`, skipping files that already
    /// bear the locked suffix. One file failing does not abort the sweep;
    /// returns the number of files locked.
    pub fn lock_directory(&self, dir: &Path, recursive: bool) -> Result<usize> {
        let meta = fs::metadata(dir).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => WardenError::NotFound(dir.display().to_string()),
            _ => WardenError::Io(err),
        })?;
        if !meta.is_dir() {
            return Err(WardenError::NotDirectory(dir.display().to_string()));
        }

        let walker = if recursive {
            WalkDir::new(dir).follow_links(false)
        } else {
            WalkDir::new(dir).max_depth(1).follow_links(false)
        };

        let mut locked = 0usize;
        for entry in walker.into_iter() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "unreadable entry in directory sweep");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(LOCKED_SUFFIX))
            {
                continue;
            }
            match self.lock_file(path) {
                Ok(_) => locked += 1,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping file in directory sweep")
                }
            }
        }

        info!(dir = %dir.display(), locked, "directory lock sweep finished");
        Ok(locked)
    }

    pub fn active_locks(&self) -> Result<Vec<LockRecord>> {
        self.store.active_locks()
    }

    pub fn locked_files(&self) -> Result<Vec<FileRecord>> {
        self.store.active_files()
    }

    /// Whether `path` (an original, unsuffixed path) is currently locked.
    pub fn is_file_locked(&self, path: &Path) -> Result<bool> {
        Ok(self
            .store
            .file_by_ciphertext_path(&ciphertext_path_for(path))?
            .is_some())
    }
}
