//! Authenticated encryption for locked files.
//!
//! Uses ChaCha20-Poly1305. Key size: 32 bytes. Nonce: 12 bytes (random,
//! fresh per encryption). Tag: 16 bytes.
//!
//! On-disk ciphertext format:
//!   [ nonce (12 bytes) | ciphertext + tag ]

use crate::error::{Result, WardenError};
use argon2::{Argon2, Params};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const SECURE_DELETE_PASSES: u32 = 3;

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 65536; // 64MB
pub const KDF_PARALLELISM: u32 = 4;

const OVERWRITE_CHUNK: usize = 64 * 1024;

/// Generate a fresh random 256-bit key.
pub fn generate_key() -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut key);
    key
}

/// Generate a random salt for key derivation.
pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 32-byte key from a password with Argon2id at fixed cost.
/// Same password and salt always yield the same key.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let params = Params::new(KDF_MEMORY_COST, KDF_TIME_COST, KDF_PARALLELISM, Some(KEY_LEN))
        .map_err(|e| WardenError::KeyCustody(format!("argon2 params: {e}")))?;
    let argon = Argon2::from(params);
    let mut key = Zeroizing::new(vec![0u8; KEY_LEN]);
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| WardenError::KeyCustody(format!("argon2 derive: {e}")))?;
    Ok(key)
}

/// Encrypt `plaintext` with a 32-byte key, prepending a random 12-byte nonce.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WardenError::KeyCustody("invalid key length".into()))?;
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| WardenError::AuthenticationFailure)?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt wire-format bytes (nonce || ciphertext+tag).
///
/// Any bit flip in the nonce, ciphertext, or tag fails the Poly1305
/// authentication check; corrupted plaintext is never returned.
pub fn decrypt(key: &[u8], data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < NONCE_LEN {
        return Err(WardenError::AuthenticationFailure);
    }
    let (nonce_bytes, ct) = data.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WardenError::KeyCustody("invalid key length".into()))?;
    let plaintext = cipher
        .decrypt(nonce, ct)
        .map_err(|_| WardenError::AuthenticationFailure)?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt `src` into `dst`. The whole file is buffered in memory; the
/// output is written to a same-directory temp file, fsynced, then renamed
/// into place so a partially written ciphertext is never observable.
pub fn encrypt_file(src: &Path, dst: &Path, key: &[u8]) -> Result<()> {
    let mut plaintext = Zeroizing::new(Vec::new());
    File::open(src)?.read_to_end(&mut plaintext)?;
    let data = encrypt(key, &plaintext)?;
    write_atomic(dst, &data)
}

/// Decrypt `src` (nonce-prefixed ciphertext) into `dst`. Fails fast on tag
/// mismatch; nothing is written to `dst` unless decryption succeeded.
pub fn decrypt_file(src: &Path, dst: &Path, key: &[u8]) -> Result<()> {
    let mut data = Vec::new();
    File::open(src)?.read_to_end(&mut data)?;
    let plaintext = decrypt(key, &data)?;
    write_atomic(dst, &plaintext)
}

pub(crate) fn write_atomic(dst: &Path, data: &[u8]) -> Result<()> {
    let dir = dst.parent().ok_or_else(|| {
        WardenError::NotFound(format!("no parent directory for {}", dst.display()))
    })?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dst).map_err(|e| WardenError::Io(e.error))?;
    Ok(())
}

/// Overwrite `path` with fresh random bytes for `passes` passes, flushing to
/// stable storage after each pass, then remove the directory entry.
///
/// Best-effort only: on copy-on-write filesystems, snapshots, or
/// wear-leveled flash the old blocks may survive. This is not a
/// cryptographic erasure guarantee.
pub fn secure_delete(path: &Path, passes: u32) -> Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    let len = file.metadata()?.len();
    let mut chunk = vec![0u8; OVERWRITE_CHUNK];
    for _ in 0..passes {
        file.seek(SeekFrom::Start(0))?;
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(OVERWRITE_CHUNK as u64) as usize;
            OsRng.fill_bytes(&mut chunk[..n]);
            file.write_all(&chunk[..n])?;
            remaining -= n as u64;
        }
        file.sync_all()?;
    }
    drop(file);
    fs::remove_file(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_all_small_lengths() {
        let key = generate_key();
        for len in 0..=64 {
            let data: Vec<u8> = (0..len as u8).collect();
            let wire = encrypt(&key, &data).unwrap();
            assert_eq!(wire.len(), NONCE_LEN + len + 16);
            let plain = decrypt(&key, &wire).unwrap();
            assert_eq!(&*plain, &data[..]);
        }
    }

    #[test]
    fn any_single_bit_flip_fails_authentication() {
        let key = generate_key();
        let wire = encrypt(&key, b"attack at dawn").unwrap();
        for byte in 0..wire.len() {
            for bit in 0..8 {
                let mut corrupted = wire.clone();
                corrupted[byte] ^= 1 << bit;
                match decrypt(&key, &corrupted) {
                    Err(WardenError::AuthenticationFailure) => {}
                    other => panic!("expected auth failure, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn truncated_input_is_rejected() {
        let key = generate_key();
        assert!(matches!(
            decrypt(&key, &[0u8; NONCE_LEN - 1]),
            Err(WardenError::AuthenticationFailure)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let wire = encrypt(&generate_key(), b"secret").unwrap();
        assert!(decrypt(&generate_key(), &wire).is_err());
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("plain.txt");
        let dst = dir.path().join("plain.txt.locked");
        let out = dir.path().join("restored.txt");
        fs::write(&src, b"hello").unwrap();

        let key = generate_key();
        encrypt_file(&src, &dst, &key).unwrap();
        decrypt_file(&dst, &out, &key).unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"hello");
    }

    #[test]
    fn failed_file_decrypt_writes_nothing() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("a.txt.locked");
        let out = dir.path().join("a.out");
        fs::write(&src, b"payload").unwrap();

        let key = generate_key();
        encrypt_file(&src, &dst, &key).unwrap();

        // Corrupt the last byte (inside the Poly1305 tag).
        let mut data = fs::read(&dst).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0x01;
        fs::write(&dst, &data).unwrap();

        assert!(matches!(
            decrypt_file(&dst, &out, &key),
            Err(WardenError::AuthenticationFailure)
        ));
        assert!(!out.exists());
    }

    #[test]
    fn secure_delete_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doomed.txt");
        fs::write(&path, vec![0xAA; 200_000]).unwrap();
        secure_delete(&path, SECURE_DELETE_PASSES).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn derive_key_is_deterministic_per_salt() {
        let salt_a = generate_salt();
        let salt_b = generate_salt();
        assert_ne!(salt_a, salt_b);
        let k1 = derive_key("password", &salt_a).unwrap();
        let k2 = derive_key("password", &salt_a).unwrap();
        let k3 = derive_key("password", &salt_b).unwrap();
        assert_eq!(&*k1, &*k2);
        assert_ne!(&*k1, &*k3);
    }
}
