//! OAuth provider configuration.
//!
//! Defaults target Google's endpoints with the Drive scopes the API client
//! needs. Credentials come either from inline values or from the client
//! secret JSON downloaded from the Google Cloud console.

use super::ProviderError;
use serde::{Deserialize, Serialize};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Scopes needed to resolve the connected identity.
pub const USER_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

/// Scopes needed by the Drive API client.
pub const DRIVE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/drive.readonly",
    "https://www.googleapis.com/auth/drive.metadata.readonly",
    "https://www.googleapis.com/auth/drive.metadata",
    "https://www.googleapis.com/auth/drive.file",
    "https://www.googleapis.com/auth/drive.scripts",
];

/// OAuth provider configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Userinfo endpoint URL
    pub userinfo_url: String,

    /// Required OAuth scopes
    pub scopes: Vec<String>,

    pub client_id: String,

    pub client_secret: String,

    /// Redirect URI registered with the provider
    pub redirect_uri: String,
}

/// `{"web": {...}}` or `{"installed": {...}}`
#[derive(Deserialize)]
struct ClientSecretFile {
    web: Option<ClientSecretEntry>,
    installed: Option<ClientSecretEntry>,
}

#[derive(Deserialize)]
struct ClientSecretEntry {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    auth_uri: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// User + Drive scopes.
pub fn default_scopes() -> Vec<String> {
    USER_SCOPES
        .iter()
        .chain(DRIVE_SCOPES)
        .map(|s| s.to_string())
        .collect()
}

impl OAuthProviderConfig {
    /// Google endpoints with user + Drive scopes.
    pub fn google(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            scopes: default_scopes(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Parses a Google client secret JSON document.
    ///
    /// The first entry of `redirect_uris` becomes the redirect URI.
    pub fn from_client_secret_json(data: &[u8]) -> Result<Self, ProviderError> {
        if data.is_empty() {
            return Err(ProviderError::InvalidClientSecret(
                "client secret file is empty".to_string(),
            ));
        }

        let file: ClientSecretFile = serde_json::from_slice(data)
            .map_err(|e| ProviderError::InvalidClientSecret(e.to_string()))?;

        let entry = file.web.or(file.installed).ok_or_else(|| {
            ProviderError::InvalidClientSecret("missing \"web\" or \"installed\" section".to_string())
        })?;

        let mut config = Self::google(
            entry.client_id,
            entry.client_secret,
            entry.redirect_uris.into_iter().next().unwrap_or_default(),
        );
        if let Some(auth_uri) = entry.auth_uri {
            config.auth_url = auth_uri;
        }
        if let Some(token_uri) = entry.token_uri {
            config.token_url = token_uri;
        }

        Ok(config)
    }

    /// Build authorization URL with the given state.
    ///
    /// Requests offline access and forces the consent screen so the provider
    /// issues a refresh token every time.
    pub fn build_auth_url(&self, state: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code&access_type=offline&prompt=consent",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_google_defaults() {
        let config = OAuthProviderConfig::google("id", "secret", "http://localhost/cb");
        assert_eq!(config.token_url, GOOGLE_TOKEN_URL);
        assert_eq!(config.scopes.len(), USER_SCOPES.len() + DRIVE_SCOPES.len());
        assert!(config
            .scopes
            .contains(&"https://www.googleapis.com/auth/drive".to_string()));
    }

    #[test]
    fn test_build_auth_url() {
        let mut config = OAuthProviderConfig::google(
            "test_client_id",
            "test_secret",
            "http://localhost:3000/callback",
        );
        config.auth_url = "https://example.com/oauth/authorize".to_string();
        config.scopes = vec!["read".to_string(), "write".to_string()];

        let url = config.build_auth_url("redirect_url=%2Fhome");

        assert!(url.starts_with("https://example.com/oauth/authorize?"));
        assert!(url.contains("client_id=test_client_id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fcallback"));
        // URL encoding converts spaces to %20
        assert!(url.contains("scope=read%20write"));
        assert!(url.contains("state=redirect_url%3D%252Fhome"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
    }

    #[test]
    fn test_client_secret_web() {
        let json = br#"{
            "web": {
                "client_id": "123.apps.googleusercontent.com",
                "client_secret": "shh",
                "auth_uri": "https://accounts.example.com/auth",
                "token_uri": "https://oauth.example.com/token",
                "redirect_uris": ["http://localhost:8080/auth/google/callback"]
            }
        }"#;

        let config = OAuthProviderConfig::from_client_secret_json(json).unwrap();
        assert_eq!(config.client_id, "123.apps.googleusercontent.com");
        assert_eq!(config.client_secret, "shh");
        assert_eq!(config.auth_url, "https://accounts.example.com/auth");
        assert_eq!(config.token_url, "https://oauth.example.com/token");
        assert_eq!(config.redirect_uri, "http://localhost:8080/auth/google/callback");
        assert_eq!(config.userinfo_url, GOOGLE_USERINFO_URL);
    }

    #[test]
    fn test_client_secret_installed_minimal() {
        let json = br#"{"installed": {"client_id": "cid", "client_secret": "cs"}}"#;

        let config = OAuthProviderConfig::from_client_secret_json(json).unwrap();
        assert_eq!(config.client_id, "cid");
        assert_eq!(config.token_url, GOOGLE_TOKEN_URL);
        assert_eq!(config.redirect_uri, "");
    }

    #[test]
    fn test_client_secret_invalid() {
        assert!(matches!(
            OAuthProviderConfig::from_client_secret_json(b""),
            Err(ProviderError::InvalidClientSecret(_))
        ));
        assert!(matches!(
            OAuthProviderConfig::from_client_secret_json(b"{}"),
            Err(ProviderError::InvalidClientSecret(_))
        ));
        assert!(matches!(
            OAuthProviderConfig::from_client_secret_json(b"not json"),
            Err(ProviderError::InvalidClientSecret(_))
        ));
    }
}
