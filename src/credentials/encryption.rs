//! AES-256-GCM encryption for credential tokens.
//!
//! Every call to [`TokenCipher::encrypt`] draws a fresh 96-bit nonce. The
//! nonce is prepended to the sealed output and the whole blob is base64
//! encoded, so a single text column holds everything needed to decrypt.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;
use thiserror::Error;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
pub const NONCE_SIZE: usize = 12;

/// Failures raised by [`TokenCipher`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("encryption key must be {KEY_SIZE} bytes (256 bits), got {0} bytes")]
    InvalidKeyLength(usize),

    #[error("encryption key is not valid base64")]
    InvalidKeyEncoding,

    #[error("ciphertext is not valid base64")]
    MalformedEncoding,

    #[error("ciphertext too short: {0} bytes, nonce alone is {NONCE_SIZE}")]
    CiphertextTooShort(usize),

    /// Wrong key, tampered nonce/ciphertext, or truncation.
    #[error("ciphertext failed authentication (wrong key or corrupted data)")]
    AuthenticationFailed,

    #[error("decrypted data is not valid UTF-8")]
    InvalidUtf8,

    #[error("encryption failed")]
    EncryptionFailed,
}

/// Authenticated cipher for secret strings, built once from a 32-byte key.
///
/// Holds no mutable state, so a single instance can be shared behind an
/// `Arc` across any number of tasks.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Creates a cipher from raw key bytes.
    ///
    /// # Returns
    /// * `Ok(TokenCipher)` - Key was exactly 32 bytes
    /// * `Err(CipherError::InvalidKeyLength)` - Any other length
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_SIZE {
            return Err(CipherError::InvalidKeyLength(key.len()));
        }

        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))?;

        Ok(Self { cipher })
    }

    /// Creates a cipher from a base64-encoded 32-byte key.
    pub fn from_base64(key_base64: &str) -> Result<Self, CipherError> {
        let key_bytes = BASE64
            .decode(key_base64.trim())
            .map_err(|_| CipherError::InvalidKeyEncoding)?;

        Self::new(&key_bytes)
    }

    /// Encrypts plaintext and returns `base64(nonce || ciphertext || tag)`.
    ///
    /// # Security
    /// - Uses a cryptographically secure random nonce (never reuse)
    /// - Encrypting the same plaintext twice yields different tokens
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);

        Ok(BASE64.encode(blob))
    }

    /// Decrypts a token produced by [`TokenCipher::encrypt`].
    ///
    /// Authentication is checked before any plaintext is released; on
    /// failure nothing of the payload is returned.
    pub fn decrypt(&self, token: &str) -> Result<String, CipherError> {
        let blob = BASE64
            .decode(token)
            .map_err(|_| CipherError::MalformedEncoding)?;

        if blob.len() < NONCE_SIZE {
            return Err(CipherError::CiphertextTooShort(blob.len()));
        }

        let (nonce, sealed) = blob.split_at(NONCE_SIZE);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::AuthenticationFailed)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
    }
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCipher")
            .field("key", &"<redacted>")
            .finish()
    }
}
