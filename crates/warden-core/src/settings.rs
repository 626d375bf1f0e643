use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementSettings {
    pub poll_interval_secs: u64,
    pub grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoSettings {
    pub secure_delete_passes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutSettings {
    pub max_failed_attempts: usize,
    pub window_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenSettings {
    #[serde(default = "default_enforcement")]
    pub enforcement: EnforcementSettings,
    #[serde(default = "default_crypto")]
    pub crypto: CryptoSettings,
    #[serde(default = "default_lockout")]
    pub lockout: LockoutSettings,
}

impl Default for WardenSettings {
    fn default() -> Self {
        Self {
            enforcement: default_enforcement(),
            crypto: default_crypto(),
            lockout: default_lockout(),
        }
    }
}

fn default_enforcement() -> EnforcementSettings {
    EnforcementSettings {
        poll_interval_secs: 1,
        grace_secs: 1,
    }
}

fn default_crypto() -> CryptoSettings {
    CryptoSettings {
        secure_delete_passes: crate::crypto::SECURE_DELETE_PASSES,
    }
}

fn default_lockout() -> LockoutSettings {
    LockoutSettings {
        max_failed_attempts: 3,
        window_minutes: 5,
    }
}

/// Load settings from `path`, falling back to defaults when the file is
/// absent. Unknown-but-missing fields are filled from defaults via serde.
pub fn load_settings(path: &Path) -> Result<WardenSettings> {
    if path.exists() {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    } else {
        Ok(WardenSettings::default())
    }
}

pub fn save_settings(path: &Path, settings: &WardenSettings) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let raw = serde_json::to_vec_pretty(settings)?;
    crate::crypto::write_atomic(path, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = load_settings(&dir.path().join("none.json")).unwrap();
        assert_eq!(settings.enforcement.poll_interval_secs, 1);
        assert_eq!(settings.crypto.secure_delete_passes, 3);
        assert_eq!(settings.lockout.max_failed_attempts, 3);
    }

    #[test]
    fn save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = WardenSettings::default();
        settings.enforcement.poll_interval_secs = 5;
        save_settings(&path, &settings).unwrap();
        let reloaded = load_settings(&path).unwrap();
        assert_eq!(reloaded.enforcement.poll_interval_secs, 5);
    }

    #[test]
    fn partial_file_is_filled_from_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"enforcement":{"poll_interval_secs":2,"grace_secs":1}}"#).unwrap();
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.enforcement.poll_interval_secs, 2);
        assert_eq!(settings.lockout.window_minutes, 5);
    }
}
