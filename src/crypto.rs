//! Payload encryption for persisted evidence
//!
//! One persistent 256-bit key, loaded from disk on first use and
//! generated if absent. Serialized events are sealed with AES-256-GCM
//! into a single opaque blob laid out as `[nonce (12 bytes)][ciphertext
//! + tag]`; decryption authenticates the tag and fails loudly on any
//! tampering or malformed input.

use crate::error::{Result, VigilError};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use std::path::Path;

/// AES-256-GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// Authenticated encryption for serialized event payloads
pub struct EventCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EventCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCipher").finish_non_exhaustive()
    }
}

impl EventCipher {
    /// Load the key from `key_path`, generating and persisting a fresh
    /// one if the file does not exist
    ///
    /// The key is held read-only for the lifetime of the cipher; on
    /// unix the key file is created with mode 0o600.
    pub fn load_or_create(key_path: &Path) -> Result<Self> {
        let key_bytes = if key_path.exists() {
            let bytes = std::fs::read(key_path).map_err(|e| {
                VigilError::NoKey(format!(
                    "failed to read key file {}: {}",
                    key_path.display(),
                    e
                ))
            })?;
            let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                VigilError::NoKey(format!(
                    "key file {} holds {} bytes, expected 32",
                    key_path.display(),
                    bytes.len()
                ))
            })?;
            key
        } else {
            let key = Aes256Gcm::generate_key(&mut OsRng);
            Self::persist_key(key_path, key.as_slice())?;
            key.into()
        };

        Self::from_key(&key_bytes)
    }

    /// Load or create the key at the platform-default location
    /// (`<local data dir>/vigil/evidence.key`)
    pub fn open_default() -> Result<Self> {
        let dir = dirs::data_local_dir()
            .ok_or_else(|| VigilError::NoKey("no local data directory available".to_string()))?
            .join("vigil");
        std::fs::create_dir_all(&dir).map_err(|e| {
            VigilError::NoKey(format!("failed to create {}: {}", dir.display(), e))
        })?;
        Self::load_or_create(&dir.join("evidence.key"))
    }

    /// Create a cipher from an explicit 32-byte key
    pub fn from_key(key: &[u8; 32]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| VigilError::NoKey(format!("failed to initialize cipher: {}", e)))?;
        Ok(Self { cipher })
    }

    fn persist_key(path: &Path, key: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                VigilError::NoKey(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(path, key).map_err(|e| {
            VigilError::NoKey(format!("failed to write key file {}: {}", path.display(), e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(
                |e| {
                    VigilError::NoKey(format!(
                        "failed to restrict key file {}: {}",
                        path.display(),
                        e
                    ))
                },
            )?;
        }

        tracing::info!(path = %path.display(), "Generated new evidence encryption key");
        Ok(())
    }

    /// Encrypt a serialized payload into one combined blob
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| VigilError::Encrypt(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a combined blob, verifying the authentication tag
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_LEN {
            return Err(VigilError::Decrypt(format!(
                "blob too short: {} bytes",
                blob.len()
            )));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| VigilError::Decrypt(e.to_string()))
    }
}
