//! Record types persisted by the record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Application,
    File,
}

/// A locked application. At most one active record exists per path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub id: Uuid,
    pub app_name: String,
    pub app_path: PathBuf,
    pub locked_at: DateTime<Utc>,
    pub active: bool,
}

impl LockRecord {
    pub fn new(app_name: impl Into<String>, app_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            app_name: app_name.into(),
            app_path: app_path.into(),
            locked_at: Utc::now(),
            active: true,
        }
    }
}

/// An encrypted file. Holds the custody key-id, never key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub original_path: PathBuf,
    pub ciphertext_path: PathBuf,
    pub key_id: String,
    pub file_size: u64,
    pub encrypted_at: DateTime<Utc>,
    pub active: bool,
}

impl FileRecord {
    pub fn new(
        original_path: impl Into<PathBuf>,
        ciphertext_path: impl Into<PathBuf>,
        key_id: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_path: original_path.into(),
            ciphertext_path: ciphertext_path.into(),
            key_id: key_id.into(),
            file_size,
            encrypted_at: Utc::now(),
            active: true,
        }
    }
}

/// The master credential. Singleton; replaced atomically on rotation.
///
/// The Argon2 PHC string already embeds its salt; the separate column is
/// kept so the stored record is self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub password_hash: String,
    pub salt: String,
    pub rotated_at: DateTime<Utc>,
}

/// An access attempt or enforcement decision. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub kind: ResourceKind,
    pub resource_name: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: ResourceKind, resource_name: impl Into<String>, success: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            resource_name: resource_name.into(),
            success,
            timestamp: Utc::now(),
        }
    }
}
