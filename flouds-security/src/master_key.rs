//! Process master key and value encryption
//!
//! A single 32-byte key lives in `{secrets_dir}/master.key` (hex encoded,
//! owner-read-only). It encrypts config values flagged `encrypted` and the
//! at-rest copy of client secrets. Ciphertexts are AES-256-GCM with a random
//! 96-bit nonce, serialised as `base64(nonce || ciphertext)`.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flouds_core::error::{GatewayError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const KEY_FILE_NAME: &str = "master.key";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Long-lived process encryption key
#[derive(Clone)]
pub struct MasterKey {
    key: Key<Aes256Gcm>,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").finish_non_exhaustive()
    }
}

impl MasterKey {
    /// Load the key from `{secrets_dir}/master.key`, generating it on first boot
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Encryption` when the key file is unreadable or
    /// malformed, or cannot be created.
    pub fn load_or_create(secrets_dir: &Path) -> Result<Self> {
        let path = secrets_dir.join(KEY_FILE_NAME);
        if path.is_file() {
            Self::load(&path)
        } else {
            Self::create(secrets_dir, &path)
        }
    }

    fn load(path: &PathBuf) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::encryption(format!("cannot read master key: {e}")))?;
        let bytes = hex::decode(raw.trim())
            .map_err(|e| GatewayError::encryption(format!("master key is not valid hex: {e}")))?;
        if bytes.len() != KEY_LEN {
            return Err(GatewayError::encryption(format!(
                "master key must be {KEY_LEN} bytes, found {}",
                bytes.len()
            )));
        }
        debug!("Loaded master key from {}", path.display());
        Ok(Self {
            key: *Key::<Aes256Gcm>::from_slice(&bytes),
        })
    }

    fn create(secrets_dir: &Path, path: &PathBuf) -> Result<Self> {
        std::fs::create_dir_all(secrets_dir)
            .map_err(|e| GatewayError::encryption(format!("cannot create secrets dir: {e}")))?;
        let key = Aes256Gcm::generate_key(OsRng);
        std::fs::write(path, hex::encode(key))
            .map_err(|e| GatewayError::encryption(format!("cannot write master key: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| GatewayError::encryption(format!("cannot restrict key file: {e}")))?;
        }
        info!("Generated new master key at {}", path.display());
        Ok(Self { key })
    }

    /// Encrypt a value; output is `base64(nonce || ciphertext)`
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Encryption` on cipher failure.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| GatewayError::encryption("value encryption failed"))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypt a value produced by [`Self::encrypt`]
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Encryption` when the payload is malformed or
    /// the key does not match.
    pub fn decrypt(&self, payload: &str) -> Result<String> {
        let raw = BASE64
            .decode(payload)
            .map_err(|e| GatewayError::encryption(format!("ciphertext is not valid base64: {e}")))?;
        if raw.len() <= NONCE_LEN {
            return Err(GatewayError::encryption("ciphertext too short"));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.key);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| GatewayError::encryption("value decryption failed"))?;
        String::from_utf8(plaintext)
            .map_err(|_| GatewayError::encryption("decrypted value is not UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let key = MasterKey::load_or_create(dir.path()).unwrap();
        let ciphertext = key.encrypt("s3cret value").unwrap();
        assert_ne!(ciphertext, "s3cret value");
        assert_eq!(key.decrypt(&ciphertext).unwrap(), "s3cret value");
    }

    #[test]
    fn test_key_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let first = MasterKey::load_or_create(dir.path()).unwrap();
        let ciphertext = first.encrypt("hello").unwrap();
        let second = MasterKey::load_or_create(dir.path()).unwrap();
        assert_eq!(second.decrypt(&ciphertext).unwrap(), "hello");
    }

    #[test]
    fn test_nonces_differ_between_encryptions() {
        let dir = tempfile::tempdir().unwrap();
        let key = MasterKey::load_or_create(dir.path()).unwrap();
        assert_ne!(key.encrypt("same").unwrap(), key.encrypt("same").unwrap());
    }

    #[test]
    fn test_decrypt_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let key = MasterKey::load_or_create(dir.path()).unwrap();
        assert!(key.decrypt("not base64!!!").is_err());
        assert!(key.decrypt("AAAA").is_err());
    }
}
