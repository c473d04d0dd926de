//! OAuth token exchange over HTTP.
//!
//! Handles exchanging authorization codes and refresh tokens for access
//! tokens, and looking up the identity behind an access token.

use super::{OAuthProvider, OAuthProviderConfig, ProviderError, UserInfo};
use crate::credentials::{OAuthToken, DEFAULT_TOKEN_TYPE};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    /// Converts the relative `expires_in` into an absolute expiry.
    fn into_token(self) -> OAuthToken {
        let expiry = self
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));

        OAuthToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            token_type: self
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            expiry,
        }
    }
}

/// [`OAuthProvider`] talking to real token and userinfo endpoints.
#[derive(Clone, Debug)]
pub struct HttpOAuthProvider {
    config: OAuthProviderConfig,
    client: reqwest::Client,
}

impl HttpOAuthProvider {
    pub fn new(config: OAuthProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Set the HTTP client (useful for testing or custom TLS config).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn config(&self) -> &OAuthProviderConfig {
        &self.config
    }

    async fn post_token_form(
        &self,
        form: &HashMap<&str, &str>,
    ) -> Result<OAuthToken, ProviderError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(ProviderError::Status { status, body });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if token_response.access_token.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "token response has an empty access_token".to_string(),
            ));
        }

        debug!(
            has_refresh_token = token_response.refresh_token.is_some(),
            expires_in = ?token_response.expires_in,
            "Token endpoint call successful"
        );

        Ok(token_response.into_token())
    }
}

#[async_trait]
impl OAuthProvider for HttpOAuthProvider {
    async fn exchange(&self, code: &str) -> Result<OAuthToken, ProviderError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("redirect_uri", self.config.redirect_uri.as_str());
        form.insert("client_id", self.config.client_id.as_str());
        form.insert("client_secret", self.config.client_secret.as_str());

        debug!("Exchanging authorization code for token at {}", self.config.token_url);

        self.post_token_form(&form).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<OAuthToken, ProviderError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", self.config.client_id.as_str());
        form.insert("client_secret", self.config.client_secret.as_str());

        debug!("Refreshing access token at {}", self.config.token_url);

        self.post_token_form(&form).await
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfo, ProviderError> {
        let response = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(ProviderError::Status { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}
