//! OAuth 2.0 provider capabilities consumed by the credential session.
//!
//! The session needs three things from a provider:
//! 1. Exchange an authorization code for an initial token pair
//! 2. Trade a refresh token for a new access token
//! 3. Resolve which external identity (email) an access token belongs to
//!
//! [`HttpOAuthProvider`] implements these against standard OAuth 2.0 token
//! and userinfo endpoints.

mod exchange;
mod provider;

pub use exchange::HttpOAuthProvider;
pub use provider::{
    default_scopes, OAuthProviderConfig, DRIVE_SCOPES, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL,
    GOOGLE_USERINFO_URL, USER_SCOPES,
};

use crate::credentials::OAuthToken;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by an [`OAuthProvider`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status, e.g. `invalid_grant`.
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("invalid client secret document: {0}")]
    InvalidClientSecret(String),
}

/// Basic profile of the identity behind an access token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub verified_email: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default)]
    pub picture: String,
    #[serde(default)]
    pub locale: String,
}

/// OAuth 2.0 operations against an external provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Exchanges an authorization code for an access/refresh token pair.
    async fn exchange(&self, code: &str) -> Result<OAuthToken, ProviderError>;

    /// Trades a refresh token for a new access token.
    ///
    /// The returned token carries `refresh_token: None` when the provider
    /// did not rotate it.
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthToken, ProviderError>;

    /// Looks up the identity that owns `access_token`.
    async fn user_info(&self, access_token: &str) -> Result<UserInfo, ProviderError>;
}

#[async_trait]
impl<P: OAuthProvider + ?Sized> OAuthProvider for std::sync::Arc<P> {
    async fn exchange(&self, code: &str) -> Result<OAuthToken, ProviderError> {
        (**self).exchange(code).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<OAuthToken, ProviderError> {
        (**self).refresh(refresh_token).await
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfo, ProviderError> {
        (**self).user_info(access_token).await
    }
}
