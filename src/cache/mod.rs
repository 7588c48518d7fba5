//! Encrypted on-disk session token cache.
//!
//! # Responsibilities
//! - Persist one session token per connection identity
//! - Encrypt with AES-256-GCM under a scrypt-derived key (fresh salt and
//!   nonce per write, never reused)
//! - Check expiry twice: plaintext mirror before decrypting, decrypted token
//!   after
//! - Self-heal: any decode/derive/decrypt/parse failure deletes the slot so a
//!   poisoned entry degrades to a cache miss instead of failing forever
//!
//! # Design Decisions
//! - Writes go to a temp file in the cache directory and are renamed into
//!   place, so a concurrent reader never observes a partial file
//! - Expired tokens are never persisted

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::credentials::ConnectionIdentity;
use crate::session::SessionToken;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Errors raised by the token cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The entry could not be decoded, decrypted, or parsed. The slot has
    /// already been deleted when this is returned from `retrieve`.
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),

    /// The cached token (or the token being stored) is expired.
    #[error("session token expired")]
    Expired,

    /// Reading or writing the cache slot failed.
    #[error("cache I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk entry: plaintext expiry mirror plus base64(salt || nonce ||
/// authenticated ciphertext).
///
/// The mirror lets `retrieve` reject stale entries without paying for a key
/// derivation; the encrypted token remains the source of truth.
#[derive(Debug, Serialize, Deserialize)]
struct EncryptedEntry {
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none", default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(rename = "cookie")]
    cipher_b64: String,
}

/// Per-identity encrypted token store rooted at one cache directory.
#[derive(Debug, Clone)]
pub struct TokenCache {
    dir: PathBuf,
}

impl TokenCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the cache slot for an identity.
    pub fn entry_path(&self, identity: &ConnectionIdentity) -> PathBuf {
        self.dir.join(format!("{}.cookie", identity.cache_key()))
    }

    /// Encrypt and persist a token into the identity's slot.
    ///
    /// Generates a fresh salt and nonce, derives the key from the identity's
    /// password, and writes atomically. Refuses to persist an expired token.
    pub fn store(
        &self,
        identity: &ConnectionIdentity,
        token: &SessionToken,
    ) -> Result<(), CacheError> {
        if token.is_expired() {
            return Err(CacheError::Expired);
        }

        let path = self.entry_path(identity);
        std::fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))?;
        }

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce);

        let key = identity
            .derive_key(&salt, KEY_LEN)
            .map_err(|e| CacheError::Corrupt(format!("deriving key: {e}")))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CacheError::Corrupt("invalid key length".into()))?;

        let plaintext = serde_json::to_vec(token)
            .map_err(|e| CacheError::Corrupt(format!("encoding token: {e}")))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| CacheError::Corrupt("encryption failed".into()))?;

        let mut combined = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&salt);
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        let entry = EncryptedEntry {
            expires_at: token.expiry(),
            cipher_b64: BASE64.encode(&combined),
        };
        let data = serde_json::to_vec_pretty(&entry)
            .map_err(|e| CacheError::Corrupt(format!("serializing entry: {e}")))?;

        // Temp file + rename keeps concurrent readers from seeing a torn write.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&data)?;
        tmp.persist(&path).map_err(|e| CacheError::Io(e.error))?;

        tracing::debug!(path = %path.display(), "session token stored");
        Ok(())
    }

    /// Decrypt and return the token in the identity's slot.
    ///
    /// A stale or undecryptable entry is deleted before the error is
    /// returned, so the next call reports a clean miss.
    pub fn retrieve(&self, identity: &ConnectionIdentity) -> Result<SessionToken, CacheError> {
        let path = self.entry_path(identity);
        let data = std::fs::read(&path)?;

        let entry: EncryptedEntry = match serde_json::from_slice(&data) {
            Ok(entry) => entry,
            Err(e) => {
                self.clean_up(&path);
                return Err(CacheError::Corrupt(format!("parsing entry: {e}")));
            }
        };

        // Cheap pre-decryption check against the plaintext mirror.
        if let Some(expires_at) = entry.expires_at {
            if Utc::now() > expires_at {
                tracing::debug!(path = %path.display(), %expires_at, "cached token expired");
                self.clean_up(&path);
                return Err(CacheError::Expired);
            }
        }

        let decoded = match BASE64.decode(&entry.cipher_b64) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.clean_up(&path);
                return Err(CacheError::Corrupt(format!("invalid base64 encoding: {e}")));
            }
        };
        if decoded.len() < SALT_LEN + NONCE_LEN {
            self.clean_up(&path);
            return Err(CacheError::Corrupt("encrypted payload too short".into()));
        }
        let (salt, rest) = decoded.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let key = match identity.derive_key(salt, KEY_LEN) {
            Ok(key) => key,
            Err(e) => {
                self.clean_up(&path);
                return Err(CacheError::Corrupt(format!("deriving key: {e}")));
            }
        };
        let cipher = match Aes256Gcm::new_from_slice(&key) {
            Ok(cipher) => cipher,
            Err(_) => {
                self.clean_up(&path);
                return Err(CacheError::Corrupt("invalid key length".into()));
            }
        };
        let plaintext = match cipher.decrypt(Nonce::from_slice(nonce), ciphertext) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                self.clean_up(&path);
                return Err(CacheError::Corrupt("decryption failed".into()));
            }
        };

        let token: SessionToken = match serde_json::from_slice(&plaintext) {
            Ok(token) => token,
            Err(e) => {
                self.clean_up(&path);
                return Err(CacheError::Corrupt(format!("parsing token: {e}")));
            }
        };

        // Authoritative check on the decrypted token itself.
        if token.is_expired() {
            self.clean_up(&path);
            return Err(CacheError::Expired);
        }

        Ok(token)
    }

    /// Remove the identity's slot. Absence is not an error.
    pub fn delete(&self, identity: &ConnectionIdentity) -> Result<(), CacheError> {
        let path = self.entry_path(identity);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    fn clean_up(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "deleting cache entry failed");
            }
        }
    }
}
