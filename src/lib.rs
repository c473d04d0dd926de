//! Per-user, per-identity OAuth credential lifecycle.
//!
//! Tokens are encrypted at rest, stored one row per (user, identity email),
//! and refreshed transparently when a caller asks for one that has expired.

// Typed error taxonomy
pub mod error;

// Encryption and transactional token storage
pub mod credentials;

// OAuth provider exchange / refresh / identity lookup
pub mod oauth;

// Refresh orchestration
pub mod session;

// TOML configuration
pub mod config;

pub use credentials::{CredentialStore, OAuthToken, TokenCipher};
pub use error::{CredentialError, StoreError};
pub use session::{CredentialSession, SessionSettings};
