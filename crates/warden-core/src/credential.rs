//! Master credential: hashing, verification, strength policy, rotation.

use crate::crypto::{KDF_MEMORY_COST, KDF_PARALLELISM, KDF_TIME_COST};
use crate::error::{PolicyViolation, Result, WardenError};
use crate::records::Credential;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::Utc;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

fn hasher() -> Result<Argon2<'static>> {
    let params = Params::new(KDF_MEMORY_COST, KDF_TIME_COST, KDF_PARALLELISM, None)
        .map_err(|e| WardenError::KeyCustody(format!("argon2 params: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password with salted Argon2id at fixed cost.
/// Returns the PHC hash string and the salt it was generated with.
pub fn hash_password(password: &str) -> Result<(String, String)> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| WardenError::KeyCustody(format!("argon2 hash: {e}")))?;
    Ok((hash.to_string(), salt.as_str().to_string()))
}

/// Verify a password against a stored PHC hash string.
/// A malformed stored hash verifies as `false`, never as an error.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Check a candidate password against the strength policy; the first
/// failing rule is reported.
pub fn validate_strength(password: &str) -> std::result::Result<(), PolicyViolation> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PolicyViolation::TooShort(MIN_PASSWORD_LEN));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(PolicyViolation::MissingUppercase);
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(PolicyViolation::MissingLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PolicyViolation::MissingDigit);
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        return Err(PolicyViolation::MissingSpecial);
    }
    Ok(())
}

/// Advisory strength score, 0..=100.
pub fn strength_score(password: &str) -> u8 {
    let mut score = 0u8;
    let len = password.chars().count();
    if len >= 8 {
        score += 20;
    }
    if len >= 12 {
        score += 10;
    }
    if len >= 16 {
        score += 10;
    }
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        score += 15;
    }
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        score += 15;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        score += 15;
    }
    if password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        score += 15;
    }
    score.min(100)
}

/// Create the initial master credential from a policy-checked password.
pub fn create_credential(password: &str) -> Result<Credential> {
    validate_strength(password)?;
    let (password_hash, salt) = hash_password(password)?;
    Ok(Credential {
        password_hash,
        salt,
        rotated_at: Utc::now(),
    })
}

/// Rotate the master credential.
///
/// Two-phase check: `old` must verify against the stored hash before `new`
/// is even evaluated; `new` must pass the strength policy before a hash is
/// produced. The stored credential is only replaced by the caller
/// committing the returned record, so a failed rotation leaves it
/// untouched.
pub fn change_password(old: &str, new: &str, stored: &Credential) -> Result<Credential> {
    if !verify_password(old, &stored.password_hash) {
        return Err(WardenError::AuthenticationFailure);
    }
    validate_strength(new)?;
    let (password_hash, salt) = hash_password(new)?;
    Ok(Credential {
        password_hash,
        salt,
        rotated_at: Utc::now(),
    })
}
