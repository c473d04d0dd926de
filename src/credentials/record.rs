//! Persisted form of one identity's tokens.

use super::{CipherError, OAuthToken, TokenCipher};
use chrono::{DateTime, Utc};
use ulid::Ulid;

/// One row of the `oauth_tokens` table.
///
/// Token fields hold ciphertext produced by [`TokenCipher`]. The `id` is a
/// ULID minted on insert and never changed afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: String,
    pub user_id: String,
    pub email: String,
    /// Encrypted access token
    pub access_token: String,
    /// Encrypted refresh token, `None` when the provider issued none
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expiry: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Encrypts `token` into a brand-new record with a fresh id.
    pub fn seal(
        user_id: &str,
        email: &str,
        token: &OAuthToken,
        cipher: &TokenCipher,
    ) -> Result<Self, CipherError> {
        let mut record = Self {
            id: Ulid::new().to_string(),
            user_id: user_id.to_string(),
            email: email.to_string(),
            access_token: String::new(),
            refresh_token: None,
            token_type: String::new(),
            expiry: None,
        };
        record.reseal(token, cipher)?;
        Ok(record)
    }

    /// Overwrites token fields and expiry in place. Identity fields stay.
    ///
    /// On error the record is left untouched.
    pub fn reseal(&mut self, token: &OAuthToken, cipher: &TokenCipher) -> Result<(), CipherError> {
        let access_token = cipher.encrypt(&token.access_token)?;
        let refresh_token = token
            .refresh_token()
            .map(|t| cipher.encrypt(t))
            .transpose()?;

        self.access_token = access_token;
        self.refresh_token = refresh_token;
        self.token_type = token.token_type.clone();
        self.expiry = token.expiry;
        Ok(())
    }

    /// Decrypts the record back into a plaintext token.
    pub fn open(&self, cipher: &TokenCipher) -> Result<OAuthToken, CipherError> {
        let access_token = cipher.decrypt(&self.access_token)?;
        let refresh_token = match self.refresh_token.as_deref() {
            Some(sealed) if !sealed.is_empty() => Some(cipher.decrypt(sealed)?),
            _ => None,
        };

        Ok(OAuthToken {
            access_token,
            refresh_token,
            token_type: self.token_type.clone(),
            expiry: self.expiry,
        })
    }
}
