//! Encrypted credential storage for OAuth tokens.
//!
//! This module provides secure storage for per-identity OAuth access and
//! refresh tokens using AES-256-GCM encryption over a pluggable row backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - Save / Get / Exists / Delete / List   │
//! │  - Encrypt on write, decrypt on read     │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher                        │
//! │  - AES-256-GCM                           │
//! │  - Fresh nonce per token                 │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       RecordBackend                      │
//! │  - SQLite (durable) or memory            │
//! │  - One transaction per key               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use credkeeper::credentials::{CredentialStore, OAuthToken, TokenCipher};
//! use chrono::{Duration, Utc};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = std::env::var("CREDKEEPER_ENCRYPTION_KEY")?;
//! let cipher = Arc::new(TokenCipher::from_base64(&key)?);
//! let store = CredentialStore::open("credentials.db", cipher)?;
//!
//! let token = OAuthToken::bearer("ya29.access", Some("1//refresh"), Some(Utc::now() + Duration::hours(1)));
//! store.save("user-1", "alice@example.com", &token)?;
//!
//! let token = store.get("user-1", "alice@example.com")?;
//! println!("expires at {:?}", token.expiry);
//!
//! store.delete("user-1", "alice@example.com")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - Access and refresh tokens are encrypted at rest, each with its own nonce
//! - The key is injected as a [`TokenCipher`] value, never held globally
//! - Authenticated encryption: tampering surfaces as an error, never as data

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

mod backend;
mod encryption;
mod memory;
mod record;
mod sqlite;
mod storage;

pub use backend::{RecordBackend, RecordFilter, RecordTx};
pub use encryption::{CipherError, TokenCipher, KEY_SIZE, NONCE_SIZE};
pub use memory::MemoryBackend;
pub use record::CredentialRecord;
pub use sqlite::SqliteBackend;
pub use storage::{CredentialStore, StoredCredential};

/// Token type reported by providers that omit it.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Plaintext OAuth token for one identity.
///
/// This is what callers hand to an API client. It only ever exists in
/// memory; the persisted form is [`CredentialRecord`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    /// OAuth access token (used for API requests)
    pub access_token: String,

    /// OAuth refresh token, absent when the provider issued none.
    ///
    /// `Some("")` means the same as `None`: it is persisted as absent and
    /// reads back as `None`.
    pub refresh_token: Option<String>,

    /// Bearer-scheme label, e.g. "Bearer"
    pub token_type: String,

    /// Absolute expiry of the access token (UTC). `None` never expires.
    pub expiry: Option<DateTime<Utc>>,
}

impl OAuthToken {
    /// Builds a bearer token.
    pub fn bearer(
        access_token: impl Into<String>,
        refresh_token: Option<&str>,
        expiry: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.map(str::to_string),
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
            expiry,
        }
    }

    /// Returns the refresh token if one is present and non-empty.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Whether the access token must be treated as expired at `now`.
    ///
    /// A token expiring within `margin` of `now` counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= now + margin,
            None => false,
        }
    }

    /// Same as [`OAuthToken::is_expired_at`] against the current clock.
    pub fn is_expired(&self, margin: Duration) -> bool {
        self.is_expired_at(Utc::now(), margin)
    }
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token().is_some())
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_check() {
        let now = Utc::now();

        let past = OAuthToken::bearer("a", Some("r"), Some(now - Duration::seconds(1)));
        assert!(past.is_expired_at(now, Duration::zero()));

        let future = OAuthToken::bearer("a", Some("r"), Some(now + Duration::minutes(5)));
        assert!(!future.is_expired_at(now, Duration::zero()));
        // Inside the margin counts as expired
        assert!(future.is_expired_at(now, Duration::minutes(10)));

        // Exactly at expiry is expired
        let exact = OAuthToken::bearer("a", None, Some(now));
        assert!(exact.is_expired_at(now, Duration::zero()));
    }

    #[test]
    fn test_no_expiry_never_expires() {
        let token = OAuthToken::bearer("a", None, None);
        assert!(!token.is_expired(Duration::hours(24)));
    }

    #[test]
    fn test_empty_refresh_token_is_absent() {
        let token = OAuthToken::bearer("a", Some(""), None);
        assert!(token.refresh_token().is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = OAuthToken::bearer("secret-access", Some("secret-refresh"), None);
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
        assert!(rendered.contains("has_refresh_token: true"));
    }
}
