//! TOML configuration for the credential store and OAuth provider.
//!
//! Every section is optional; missing values fall back to defaults. The
//! encryption key itself never lives in the file, only the name of the
//! environment variable that holds it.

use crate::credentials::TokenCipher;
use crate::oauth::{
    default_scopes, OAuthProviderConfig, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GOOGLE_USERINFO_URL,
};
use crate::session::SessionSettings;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Complete configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or ":memory:"
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "credentials.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Encryption configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EncryptionConfig {
    /// Environment variable holding the base64-encoded 32-byte key
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

fn default_key_env() -> String {
    "CREDKEEPER_ENCRYPTION_KEY".to_string()
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_env: default_key_env(),
        }
    }
}

impl EncryptionConfig {
    /// Builds the process-wide cipher from the configured environment variable.
    pub fn cipher(&self) -> Result<TokenCipher> {
        let key = std::env::var(&self.key_env)
            .with_context(|| format!("Encryption key variable {} is not set", self.key_env))?;

        TokenCipher::from_base64(&key)
            .with_context(|| format!("Invalid encryption key in {}", self.key_env))
    }
}

/// OAuth provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Google client secret JSON; takes precedence over inline credentials
    #[serde(default)]
    pub client_secret_file: Option<String>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_userinfo_url")]
    pub userinfo_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_auth_url() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_userinfo_url() -> String {
    GOOGLE_USERINFO_URL.to_string()
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_secret_file: None,
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            userinfo_url: default_userinfo_url(),
            scopes: default_scopes(),
        }
    }
}

impl OAuthConfig {
    /// Resolves the provider configuration.
    ///
    /// With `client_secret_file` set, client credentials and endpoints come
    /// from that file; a non-empty inline `redirect_uri` still overrides the
    /// file's first redirect URI.
    pub fn provider_config(&self) -> Result<OAuthProviderConfig> {
        let mut config = match &self.client_secret_file {
            Some(path) => {
                let data = std::fs::read(path)
                    .with_context(|| format!("Failed to read client secret file {}", path))?;
                OAuthProviderConfig::from_client_secret_json(&data)
                    .with_context(|| format!("Failed to parse client secret file {}", path))?
            }
            None => {
                if self.client_id.is_empty() {
                    anyhow::bail!("oauth.client_id or oauth.client_secret_file is required");
                }
                let mut config = OAuthProviderConfig::google(
                    self.client_id.clone(),
                    self.client_secret.clone(),
                    self.redirect_uri.clone(),
                );
                config.auth_url = self.auth_url.clone();
                config.token_url = self.token_url.clone();
                config
            }
        };

        if !self.redirect_uri.is_empty() {
            config.redirect_uri = self.redirect_uri.clone();
        }
        config.userinfo_url = self.userinfo_url.clone();
        config.scopes = self.scopes.clone();

        Ok(config)
    }
}

/// Refresh configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Refresh tokens this many seconds before they expire
    #[serde(default)]
    pub expiry_margin_seconds: i64,
    /// One refresh in flight per (user, email) within this process
    #[serde(default = "default_serialize_per_key")]
    pub serialize_per_key: bool,
}

fn default_serialize_per_key() -> bool {
    true
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            expiry_margin_seconds: 0,
            serialize_per_key: default_serialize_per_key(),
        }
    }
}

impl RefreshConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            expiry_margin: chrono::Duration::seconds(self.expiry_margin_seconds.max(0)),
            serialize_per_key: self.serialize_per_key,
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<AppConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
    parse_config(&contents)
}

/// Parse configuration from TOML text
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    toml::from_str(contents).context("Failed to parse config")
}
