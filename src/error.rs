//! Error types for credential storage and refresh.

use crate::credentials::CipherError;
use crate::oauth::ProviderError;
use thiserror::Error;

/// Errors raised by a [`RecordBackend`](crate::credentials::RecordBackend).
///
/// Any of these aborts the surrounding transaction.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("record store lock poisoned")]
    LockPoisoned,

    /// A second row for an existing (user, email) pair was attempted.
    #[error("a record already exists for user {user_id} and {email}")]
    Duplicate { user_id: String, email: String },

    #[error("record {0} not found for update")]
    MissingRecord(String),

    #[error("unreadable stored row: {0}")]
    InvalidRow(String),
}

/// Errors surfaced to callers of the credential store and session.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid user ID provided")]
    InvalidUserId,

    #[error("invalid email provided")]
    InvalidEmail,

    #[error("invalid token provided")]
    InvalidToken,

    #[error("invalid authorization code provided")]
    InvalidAuthorizationCode,

    /// Nothing on file; the user has to authorize again.
    #[error("token not found")]
    TokenNotFound,

    /// The stored token expired and no refresh token was ever issued.
    #[error("token expired and no refresh token is available")]
    RefreshUnavailable,

    /// The provider call failed. Only a 4xx answer (e.g. `invalid_grant`)
    /// means the grant itself is dead; transport errors may be transient.
    #[error("token refresh failed: {0}")]
    RefreshFailed(#[source] ProviderError),

    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(#[source] ProviderError),

    /// Stored ciphertext could not be decrypted, or encryption failed.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("credential storage failed: {0}")]
    Storage(#[from] StoreError),
}

impl CredentialError {
    /// Whether the caller has to send the user through authorization again.
    ///
    /// A refresh failure counts only when the provider answered with a client
    /// error. Network failures, 5xx answers and unparsable responses return
    /// `false`; retrying those is up to the caller.
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            CredentialError::TokenNotFound | CredentialError::RefreshUnavailable => true,
            CredentialError::RefreshFailed(ProviderError::Status { status, .. }) => {
                (400..500).contains(status)
            }
            _ => false,
        }
    }
}

pub type Result<T, E = CredentialError> = std::result::Result<T, E>;
