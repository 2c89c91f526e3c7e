//! Passphrase-gated obfuscation of student identifiers.
//!
//! Tokens look like `enc:v1:<payload>` where the payload is unpadded
//! URL-safe base64 of `salt[16] || nonce[12] || ciphertext || tag[16]`.
//! The AES-256-GCM key is derived from the passphrase and salt with
//! Argon2id. Tokens produced by one [`PassphraseCipher::encrypt_batch`] call
//! share a salt, so decrypting a whole export costs a single derivation.

use crate::cache::{passphrase_digest, BoundedCache};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const TOKEN_PREFIX: &str = "enc:v1:";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const KDF_MEMORY_KIB: u32 = 8 * 1024;
const KDF_PASSES: u32 = 2;
const KDF_LANES: u32 = 1;
const KEY_CACHE_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("decryption failed")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
    #[error("random source unavailable: {0}")]
    Random(String),
}

/// The capability pair the resolver orchestrates. Implementations must be
/// shareable across the resolver's worker threads.
pub trait IdCipher: Send + Sync {
    fn is_encrypted(&self, value: &str) -> bool;
    fn decrypt(&self, value: &str, passphrase: &str) -> Result<String, CryptoError>;
}

/// A derived key, filled by whichever worker gets to it first.
type KeySlot = Arc<Mutex<Option<[u8; KEY_LEN]>>>;

pub struct PassphraseCipher {
    keys: Mutex<BoundedCache<KeySlot>>,
}

impl Default for PassphraseCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl PassphraseCipher {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(BoundedCache::new(KEY_CACHE_CAPACITY)),
        }
    }

    /// Encrypts every value under one fresh salt. Output order follows input.
    pub fn encrypt_batch(
        &self,
        values: &[String],
        passphrase: &str,
    ) -> Result<Vec<(String, String)>, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        getrandom::getrandom(&mut salt).map_err(|e| CryptoError::Random(e.to_string()))?;
        let key = self.key_for(passphrase, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(values.len());
        for value in values {
            let mut nonce = [0u8; NONCE_LEN];
            getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::Random(e.to_string()))?;
            let sealed = cipher
                .encrypt(Nonce::from_slice(&nonce), value.as_bytes())
                .map_err(|_| CryptoError::Encrypt)?;
            let mut payload = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
            payload.extend_from_slice(&salt);
            payload.extend_from_slice(&nonce);
            payload.extend_from_slice(&sealed);
            out.push((
                value.clone(),
                format!("{}{}", TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(payload)),
            ));
        }
        Ok(out)
    }

    fn key_slot(&self, passphrase: &str, salt: &[u8]) -> KeySlot {
        let cache_key = format!(
            "{}:{}",
            URL_SAFE_NO_PAD.encode(salt),
            passphrase_digest(passphrase)
        );
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = keys.get(&cache_key) {
            return slot;
        }
        let slot = KeySlot::default();
        keys.insert(cache_key, Arc::clone(&slot));
        slot
    }

    fn key_for(&self, passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
        let slot = self.key_slot(passphrase, salt);
        // Only callers of the same (salt, passphrase) wait on each other; the
        // first one derives and the rest reuse its key.
        let mut key = slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(k) = *key {
            return Ok(k);
        }
        let derived = derive_key(passphrase, salt)?;
        *key = Some(derived);
        Ok(derived)
    }
}

impl IdCipher for PassphraseCipher {
    fn is_encrypted(&self, value: &str) -> bool {
        decode_token(value).is_ok()
    }

    fn decrypt(&self, value: &str, passphrase: &str) -> Result<String, CryptoError> {
        let payload = decode_token(value)?;
        let (salt, rest) = payload.split_at(SALT_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);
        let key = self.key_for(passphrase, salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::Decrypt)?;
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plain).map_err(|e| CryptoError::Malformed(e.to_string()))
    }
}

fn decode_token(value: &str) -> Result<Vec<u8>, CryptoError> {
    let Some(encoded) = value.strip_prefix(TOKEN_PREFIX) else {
        return Err(CryptoError::Malformed("missing prefix".into()));
    };
    let payload = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| CryptoError::Malformed(e.to_string()))?;
    if payload.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Malformed(format!(
            "payload too short: {} bytes",
            payload.len()
        )));
    }
    Ok(payload)
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
    let params = Params::new(KDF_MEMORY_KIB, KDF_PASSES, KDF_LANES, Some(KEY_LEN))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; KEY_LEN];
    argon
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}
