//! Key custody: storage of per-file decryption keys, independent of the
//! ciphertext they protect. Key material never appears in logs or in the
//! record store; only opaque key-ids do.

use crate::error::{Result, WardenError};
use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use zeroize::Zeroizing;

pub const SERVICE_NAME: &str = "Lockwarden";

/// Derive the custody key-id for a resource from its original path.
///
/// Deterministic by design so unlock can find the key again without storing
/// anything but the id. Known weakness: renaming the plaintext path before
/// unlock orphans the key, since the id cannot be re-derived from the new
/// name.
pub fn key_id_for_path(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    hex::encode(digest)
}

/// Storage of secret key material keyed by an opaque string id.
///
/// `delete` of an absent key succeeds; rollback paths rely on that.
pub trait KeyCustody: Send + Sync {
    fn store(&self, key_id: &str, key: &[u8]) -> Result<()>;
    fn retrieve(&self, key_id: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;
    fn delete(&self, key_id: &str) -> Result<()>;

    fn exists(&self, key_id: &str) -> Result<bool> {
        Ok(self.retrieve(key_id)?.is_some())
    }
}

/// Custody backed by the OS secret service (Secret Service / Keychain /
/// Credential Manager) via the `keyring` crate. Keys are base64-encoded for
/// transport; the secret store holds the only persistent copy.
pub struct KeyringCustody {
    service: String,
}

impl KeyringCustody {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    fn entry(&self, key_id: &str) -> Result<Entry> {
        Entry::new(&self.service, key_id)
            .map_err(|e| WardenError::KeyCustody(format!("keyring init: {e}")))
    }
}

impl Default for KeyringCustody {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyCustody for KeyringCustody {
    fn store(&self, key_id: &str, key: &[u8]) -> Result<()> {
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(key));
        self.entry(key_id)?
            .set_password(&encoded)
            .map_err(|e| WardenError::KeyCustody(format!("store key: {e}")))
    }

    fn retrieve(&self, key_id: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match self.entry(key_id)?.get_password() {
            Ok(encoded) => {
                let encoded = Zeroizing::new(encoded);
                let decoded = general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| WardenError::KeyCustody(format!("decode key: {e}")))?;
                Ok(Some(Zeroizing::new(decoded)))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(WardenError::KeyCustody(format!("load key: {e}"))),
        }
    }

    fn delete(&self, key_id: &str) -> Result<()> {
        match self.entry(key_id)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(WardenError::KeyCustody(format!("delete key: {e}"))),
        }
    }
}

/// In-process custody used by tests and for ephemeral (non-persistent)
/// deployments where keys should die with the process.
#[derive(Default)]
pub struct MemoryCustody {
    keys: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyCustody for MemoryCustody {
    fn store(&self, key_id: &str, key: &[u8]) -> Result<()> {
        self.keys
            .write()
            .insert(key_id.to_string(), Zeroizing::new(key.to_vec()));
        Ok(())
    }

    fn retrieve(&self, key_id: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.keys.read().get(key_id).cloned())
    }

    fn delete(&self, key_id: &str) -> Result<()> {
        self.keys.write().remove(key_id);
        Ok(())
    }

    fn exists(&self, key_id: &str) -> Result<bool> {
        Ok(self.keys.read().contains_key(key_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn key_id_is_deterministic_and_path_sensitive() {
        let a = key_id_for_path(&PathBuf::from("/tmp/a.txt"));
        let b = key_id_for_path(&PathBuf::from("/tmp/a.txt"));
        let c = key_id_for_path(&PathBuf::from("/tmp/b.txt"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn memory_custody_roundtrip() {
        let custody = MemoryCustody::new();
        custody.store("k1", b"key material").unwrap();
        assert!(custody.exists("k1").unwrap());
        assert_eq!(&**custody.retrieve("k1").unwrap().unwrap(), b"key material");

        custody.delete("k1").unwrap();
        assert!(!custody.exists("k1").unwrap());
        assert!(custody.retrieve("k1").unwrap().is_none());

        // Deleting an absent key is not an error.
        custody.delete("k1").unwrap();
    }
}
