//! Encrypted credential storage keyed by (user, identity email).
//!
//! Stores OAuth tokens for every external identity a user has connected.
//! All tokens are encrypted at rest using AES-256-GCM.

use super::backend::{RecordBackend, RecordFilter};
use super::{CredentialRecord, OAuthToken, SqliteBackend, TokenCipher};
use crate::error::{CredentialError, Result, StoreError};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// A decrypted token together with the identity it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredCredential {
    pub id: String,
    pub user_id: String,
    pub email: String,
    pub token: OAuthToken,
}

/// Encrypted credential store over a [`RecordBackend`].
///
/// # Guarantees
/// - Exactly one record per (user_id, email); `save` is an upsert
/// - Record `id` is minted once and survives every later `save`
/// - Each `save` is a single transaction: a failure anywhere leaves no trace
/// - Decryption failures are reported, never turned into "not found"
pub struct CredentialStore<B = SqliteBackend> {
    backend: B,
    cipher: Arc<TokenCipher>,
}

impl CredentialStore<SqliteBackend> {
    /// Creates or opens a SQLite-backed store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file
    /// * `cipher` - Process-wide token cipher
    pub fn open<P: AsRef<Path>>(db_path: P, cipher: Arc<TokenCipher>) -> Result<Self, StoreError> {
        Ok(Self::new(SqliteBackend::open(db_path)?, cipher))
    }
}

impl<B: RecordBackend> CredentialStore<B> {
    pub fn new(backend: B, cipher: Arc<TokenCipher>) -> Self {
        Self { backend, cipher }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Stores a token for a user and identity.
    ///
    /// Inserts a new record on first save; afterwards overwrites the token
    /// fields and expiry of the existing record, keeping its id. An empty
    /// refresh token is stored as absent.
    ///
    /// # Returns
    /// * `Ok(())` - Committed
    /// * `Err(InvalidUserId | InvalidEmail | InvalidToken)` - Rejected before any I/O
    /// * `Err` - Encryption or storage failure, nothing written
    pub fn save(&self, user_id: &str, email: &str, token: &OAuthToken) -> Result<()> {
        validate_key(user_id, email)?;
        if token.access_token.is_empty() {
            return Err(CredentialError::InvalidToken);
        }

        let inserted = self.backend.transaction(|tx| -> Result<bool> {
            match tx.find_one(&RecordFilter::identity(user_id, email))? {
                None => {
                    let record = CredentialRecord::seal(user_id, email, token, &self.cipher)?;
                    tx.insert(&record)?;
                    Ok(true)
                }
                Some(mut record) => {
                    record.reseal(token, &self.cipher)?;
                    tx.update(&record)?;
                    Ok(false)
                }
            }
        })?;

        info!(
            user_id = %user_id,
            email = %email,
            backend = self.backend.name(),
            inserted,
            has_refresh_token = token.refresh_token().is_some(),
            expiry = ?token.expiry,
            "Stored credentials"
        );

        Ok(())
    }

    /// Retrieves and decrypts the token for a user and identity.
    ///
    /// # Returns
    /// * `Ok(OAuthToken)` - Found and decrypted
    /// * `Err(TokenNotFound)` - No record for this key
    /// * `Err(Cipher(_))` - Stored ciphertext could not be decrypted
    pub fn get(&self, user_id: &str, email: &str) -> Result<OAuthToken> {
        self.find_record(user_id, email)?
            .ok_or(CredentialError::TokenNotFound)
            .and_then(|record| self.decrypt_record(&record))
    }

    /// Checks whether a record exists, without decrypting anything.
    pub fn exists(&self, user_id: &str, email: &str) -> Result<bool> {
        validate_key(user_id, email)?;

        let count = self
            .backend
            .read(|tx| tx.count(&RecordFilter::identity(user_id, email)))?;

        Ok(count > 0)
    }

    /// Deletes the record for a user and identity.
    ///
    /// Idempotent: deleting an unknown key succeeds.
    ///
    /// # Returns
    /// * `Ok(true)` - A record was deleted
    /// * `Ok(false)` - Nothing matched
    pub fn delete(&self, user_id: &str, email: &str) -> Result<bool> {
        validate_key(user_id, email)?;

        let removed = self
            .backend
            .transaction(|tx| tx.delete_where(&RecordFilter::identity(user_id, email)))?;

        if removed > 0 {
            info!(
                user_id = %user_id,
                email = %email,
                backend = self.backend.name(),
                "Deleted credentials"
            );
        } else {
            debug!(user_id = %user_id, email = %email, "No credentials to delete");
        }

        Ok(removed > 0)
    }

    /// Lists every identity a user has connected, decrypted, in creation order.
    pub fn list_by_user(&self, user_id: &str) -> Result<Vec<StoredCredential>> {
        validate_user(user_id)?;

        let records = self
            .backend
            .read(|tx| tx.find_all(&RecordFilter::user(user_id)))?;

        records
            .into_iter()
            .map(|record| {
                let token = self.decrypt_record(&record)?;
                Ok(StoredCredential {
                    id: record.id,
                    user_id: record.user_id,
                    email: record.email,
                    token,
                })
            })
            .collect()
    }

    /// Returns the earliest-connected identity of a user.
    pub fn first_for_user(&self, user_id: &str) -> Result<StoredCredential> {
        validate_user(user_id)?;

        let record = self
            .backend
            .read(|tx| tx.find_one(&RecordFilter::user(user_id)))?
            .ok_or_else(|| {
                debug!(user_id = %user_id, "No credentials on file for user");
                CredentialError::TokenNotFound
            })?;

        let token = self.decrypt_record(&record)?;
        Ok(StoredCredential {
            id: record.id,
            user_id: record.user_id,
            email: record.email,
            token,
        })
    }

    /// Returns the raw, still-encrypted record for a key.
    pub fn find_record(&self, user_id: &str, email: &str) -> Result<Option<CredentialRecord>> {
        validate_key(user_id, email)?;

        let record = self
            .backend
            .read(|tx| tx.find_one(&RecordFilter::identity(user_id, email)))?;

        if record.is_none() {
            debug!(user_id = %user_id, email = %email, "No credentials on file");
        }

        Ok(record)
    }

    fn decrypt_record(&self, record: &CredentialRecord) -> Result<OAuthToken> {
        record.open(&self.cipher).map_err(|e| {
            error!(
                record_id = %record.id,
                user_id = %record.user_id,
                error = %e,
                "Failed to decrypt stored credentials"
            );
            CredentialError::Cipher(e)
        })
    }
}

fn validate_user(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(CredentialError::InvalidUserId);
    }
    Ok(())
}

fn validate_key(user_id: &str, email: &str) -> Result<()> {
    validate_user(user_id)?;
    if email.trim().is_empty() {
        return Err(CredentialError::InvalidEmail);
    }
    Ok(())
}
