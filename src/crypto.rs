//! Encryption for persisted API-key blobs (spec.md §4, encryption notes
//! in §6's `auth.encryption.*` config block).
//!
//! Wire format: `[keyIdLen: u8][keyId: utf8][IV: 12 bytes][ciphertext ||
//! 16-byte GCM tag]`, Base64-encoded. A `PLAIN:`-prefixed fallback lets
//! operators store unencrypted values (e.g. in development) that still
//! round-trip through the same decrypt path.
//!
//! New to this crate: the teacher never persisted secrets, so there is no
//! existing encryption idiom to generalize; `aes-gcm` is the ecosystem-
//! standard choice for authenticated encryption in Rust.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use crate::error::GatewayError;

const IV_LEN: usize = 12;
const PLAIN_PREFIX: &str = "PLAIN:";

/// A named encryption key, identified so multiple keys can be rotated
/// through without invalidating previously-encrypted blobs.
#[derive(Clone)]
pub struct EncryptionKey {
    /// Key identifier, persisted alongside the ciphertext.
    pub key_id: String,
    /// Raw 32-byte AES-256 key material.
    pub key_bytes: [u8; 32],
}

/// Looks up an [`EncryptionKey`] by its persisted `key_id`, for decryption
/// when multiple key generations may be in play.
pub trait KeyRing: Send + Sync {
    /// The key used for new encryptions.
    fn active_key(&self) -> &EncryptionKey;
    /// Look up a (possibly retired) key by ID, for decrypting old blobs.
    fn key(&self, key_id: &str) -> Option<&EncryptionKey>;
}

/// A `KeyRing` with exactly one key, active for both encryption and
/// decryption. Sufficient until key rotation is actually needed.
pub struct SingleKeyRing(pub EncryptionKey);

impl KeyRing for SingleKeyRing {
    fn active_key(&self) -> &EncryptionKey {
        &self.0
    }

    fn key(&self, key_id: &str) -> Option<&EncryptionKey> {
        if key_id == self.0.key_id {
            Some(&self.0)
        } else {
            None
        }
    }
}

/// Encrypt `plaintext` under the ring's active key, producing the
/// Base64-encoded wire format. When `encryption_enabled` is `false`,
/// returns the `PLAIN:`-prefixed fallback instead.
pub fn encrypt(plaintext: &str, ring: &dyn KeyRing, encryption_enabled: bool) -> Result<String, GatewayError> {
    if !encryption_enabled {
        return Ok(format!("{PLAIN_PREFIX}{plaintext}"));
    }

    let key_entry = ring.active_key();
    let key = Key::<Aes256Gcm>::from_slice(&key_entry.key_bytes);
    let cipher = Aes256Gcm::new(key);

    let mut iv_bytes = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv_bytes);
    let nonce = Nonce::from_slice(&iv_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| GatewayError::internal(format!("encryption failed: {e}")))?;

    if key_entry.key_id.len() > u8::MAX as usize {
        return Err(GatewayError::internal("key_id too long to encode"));
    }

    let mut blob = Vec::with_capacity(1 + key_entry.key_id.len() + IV_LEN + ciphertext.len());
    blob.push(key_entry.key_id.len() as u8);
    blob.extend_from_slice(key_entry.key_id.as_bytes());
    blob.extend_from_slice(&iv_bytes);
    blob.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(blob))
}

/// Decrypt a blob produced by [`encrypt`]. Transparently accepts the
/// `PLAIN:` fallback regardless of whether encryption is currently
/// enabled, so a config flip doesn't strand previously-stored plaintext.
pub fn decrypt(blob: &str, ring: &dyn KeyRing) -> Result<String, GatewayError> {
    if let Some(plain) = blob.strip_prefix(PLAIN_PREFIX) {
        return Ok(plain.to_string());
    }

    let bytes = BASE64
        .decode(blob)
        .map_err(|e| GatewayError::internal(format!("invalid base64 in encrypted blob: {e}")))?;

    let Some(&key_id_len) = bytes.first() else {
        return Err(GatewayError::internal("encrypted blob too short"));
    };
    let key_id_len = key_id_len as usize;
    let mut offset = 1;

    if bytes.len() < offset + key_id_len + IV_LEN {
        return Err(GatewayError::internal("encrypted blob too short"));
    }
    let key_id = String::from_utf8(bytes[offset..offset + key_id_len].to_vec())
        .map_err(|e| GatewayError::internal(format!("invalid key id: {e}")))?;
    offset += key_id_len;

    let iv_bytes = &bytes[offset..offset + IV_LEN];
    offset += IV_LEN;
    let ciphertext = &bytes[offset..];

    let key_entry = ring
        .key(&key_id)
        .ok_or_else(|| GatewayError::internal(format!("unknown encryption key id '{key_id}'")))?;
    let key = Key::<Aes256Gcm>::from_slice(&key_entry.key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(iv_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| GatewayError::internal("decryption failed: invalid key or corrupt blob"))?;

    String::from_utf8(plaintext).map_err(|e| GatewayError::internal(format!("decrypted blob not utf8: {e}")))
}
