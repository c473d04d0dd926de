//! Credential session: hands out access tokens that are valid now.
//!
//! ```text
//! obtain(user, email)
//!   → store.get            (decrypt)
//!   → expired?  ── no ──→ return token
//!        │ yes
//!   → provider.refresh     (needs a refresh token)
//!   → store.save           (encrypt, same record id)
//!   → return fresh token
//! ```
//!
//! No retries happen here; a failed refresh is reported and the caller
//! decides whether to retry or re-authorize the user.

use crate::config::AppConfig;
use crate::credentials::{CredentialStore, OAuthToken, RecordBackend, SqliteBackend};
use crate::error::{CredentialError, Result};
use crate::oauth::{HttpOAuthProvider, OAuthProvider};
use anyhow::Context;
use chrono::Duration;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tuning for [`CredentialSession`].
#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Tokens expiring within this margin are refreshed early.
    pub expiry_margin: Duration,

    /// Allow one refresh in flight per (user, email) in this process.
    pub serialize_per_key: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            expiry_margin: Duration::zero(),
            serialize_per_key: true,
        }
    }
}

/// Result of a successful enrollment.
#[derive(Clone, Debug)]
pub struct Enrollment {
    pub email: String,
    pub token: OAuthToken,
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Refresh-aware access to stored credentials.
///
/// # Thread Safety
/// - Safe to share behind an `Arc` across tasks
/// - Concurrent refreshes of one key converge through the store's upsert;
///   with `serialize_per_key` only the first caller refreshes and the rest
///   pick up its result
pub struct CredentialSession<B, P> {
    store: Arc<CredentialStore<B>>,
    provider: P,
    settings: SessionSettings,
    locks: DashMap<(String, String), KeyLock>,
}

impl CredentialSession<SqliteBackend, HttpOAuthProvider> {
    /// Opens the SQLite store and HTTP provider described by `config`.
    ///
    /// Reads the encryption key from the environment variable named in
    /// `[encryption] key_env`.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let cipher = Arc::new(config.encryption.cipher()?);
        let store = CredentialStore::open(&config.database.path, cipher)
            .with_context(|| format!("Failed to open credential store at {}", config.database.path))?;
        let provider = HttpOAuthProvider::new(config.oauth.provider_config()?);

        info!(
            database = %config.database.path,
            token_url = %provider.config().token_url,
            "Credential session ready"
        );

        Ok(Self::new(Arc::new(store), provider).with_settings(config.refresh.settings()))
    }
}

impl<B: RecordBackend, P: OAuthProvider> CredentialSession<B, P> {
    pub fn new(store: Arc<CredentialStore<B>>, provider: P) -> Self {
        Self {
            store,
            provider,
            settings: SessionSettings::default(),
            locks: DashMap::new(),
        }
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore<B>> {
        &self.store
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Returns a token for (user, email) that is valid now.
    ///
    /// # Returns
    /// * `Ok(OAuthToken)` - Stored token, or a freshly refreshed and re-saved one
    /// * `Err(TokenNotFound)` - Nothing on file
    /// * `Err(RefreshUnavailable)` - Expired and no refresh token was issued
    /// * `Err(RefreshFailed)` - Provider rejected the refresh
    /// * `Err(Cipher(_))` - Stored ciphertext is unreadable
    pub async fn obtain(&self, user_id: &str, email: &str) -> Result<OAuthToken> {
        let token = self.store.get(user_id, email)?;
        if !token.is_expired(self.settings.expiry_margin) {
            return Ok(token);
        }

        if !self.settings.serialize_per_key {
            return self.refresh_and_save(user_id, email, token).await;
        }

        let lease = KeyLease::acquire(&self.locks, user_id, email);
        let _guard = lease.lock.lock().await;

        self.refresh_locked(user_id, email).await
    }

    /// Exchanges an authorization code and stores the resulting token under
    /// the identity the provider reports for it.
    pub async fn enroll(&self, user_id: &str, code: &str) -> Result<Enrollment> {
        if user_id.trim().is_empty() {
            return Err(CredentialError::InvalidUserId);
        }
        if code.trim().is_empty() {
            return Err(CredentialError::InvalidAuthorizationCode);
        }

        let token = self
            .provider
            .exchange(code)
            .await
            .map_err(CredentialError::ExchangeFailed)?;

        let info = self
            .provider
            .user_info(&token.access_token)
            .await
            .map_err(CredentialError::ExchangeFailed)?;

        if info.email.trim().is_empty() {
            return Err(CredentialError::InvalidEmail);
        }

        self.store.save(user_id, &info.email, &token)?;

        info!(
            user_id = %user_id,
            email = %info.email,
            has_refresh_token = token.refresh_token().is_some(),
            "Enrolled identity"
        );

        Ok(Enrollment {
            email: info.email,
            token,
        })
    }

    /// Removes the stored credentials for (user, email). Idempotent.
    pub fn revoke(&self, user_id: &str, email: &str) -> Result<bool> {
        self.store.delete(user_id, email)
    }

    async fn refresh_and_save(
        &self,
        user_id: &str,
        email: &str,
        stale: OAuthToken,
    ) -> Result<OAuthToken> {
        let refresh_token = stale
            .refresh_token()
            .ok_or_else(|| {
                info!(user_id = %user_id, email = %email, "Token expired and no refresh token on file");
                CredentialError::RefreshUnavailable
            })?
            .to_string();

        info!(
            user_id = %user_id,
            email = %email,
            expired_at = ?stale.expiry,
            "Refreshing OAuth token"
        );

        let mut fresh = self.provider.refresh(&refresh_token).await.map_err(|e| {
            warn!(user_id = %user_id, email = %email, error = %e, "Token refresh failed");
            CredentialError::RefreshFailed(e)
        })?;

        // Keep the existing refresh token if the provider did not rotate it
        if fresh.refresh_token().is_none() {
            fresh.refresh_token = Some(refresh_token);
        }
        if fresh.token_type.is_empty() {
            fresh.token_type = stale.token_type;
        }

        self.store.save(user_id, email, &fresh)?;

        Ok(fresh)
    }

    async fn refresh_locked(&self, user_id: &str, email: &str) -> Result<OAuthToken> {
        // Another caller may have refreshed while we waited
        let token = self.store.get(user_id, email)?;
        if !token.is_expired(self.settings.expiry_margin) {
            debug!(user_id = %user_id, email = %email, "Token refreshed by another caller");
            return Ok(token);
        }

        self.refresh_and_save(user_id, email, token).await
    }
}

/// A clone of one key's refresh mutex.
///
/// Dropping the last lease removes the map entry, so the map only holds keys
/// with a refresh in flight. Runs on cancellation too.
struct KeyLease<'a> {
    locks: &'a DashMap<(String, String), KeyLock>,
    key: (String, String),
    lock: KeyLock,
}

impl<'a> KeyLease<'a> {
    fn acquire(locks: &'a DashMap<(String, String), KeyLock>, user_id: &str, email: &str) -> Self {
        let key = (user_id.to_string(), email.to_string());
        let lock = locks.entry(key.clone()).or_default().clone();
        Self { locks, key, lock }
    }
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        // Map entry + this lease: nobody else holds or waits on it
        self.locks.remove_if(&self.key, |_, held| {
            Arc::ptr_eq(held, &self.lock) && Arc::strong_count(held) == 2
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{MemoryBackend, TokenCipher};
    use crate::oauth::{ProviderError, UserInfo};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider fake that counts calls and hands out numbered tokens.
    #[derive(Default)]
    struct FakeProvider {
        refreshes: AtomicUsize,
        reject: bool,
        rotate: bool,
        email: String,
    }

    #[async_trait]
    impl OAuthProvider for FakeProvider {
        async fn exchange(&self, code: &str) -> std::result::Result<OAuthToken, ProviderError> {
            if code == "bad-code" {
                return Err(ProviderError::Status {
                    status: 400,
                    body: "invalid_grant".to_string(),
                });
            }
            Ok(OAuthToken::bearer(
                format!("access-for-{}", code),
                Some("initial-refresh"),
                Some(Utc::now() + Duration::hours(1)),
            ))
        }

        async fn refresh(&self, refresh_token: &str) -> std::result::Result<OAuthToken, ProviderError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            // Widen the race window for concurrent callers
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;

            if self.reject {
                return Err(ProviderError::Status {
                    status: 400,
                    body: format!("invalid_grant for {}", refresh_token),
                });
            }

            let rotated = format!("rotated-{}", n);
            Ok(OAuthToken::bearer(
                format!("refreshed-{}", n),
                self.rotate.then_some(rotated.as_str()),
                Some(Utc::now() + Duration::hours(1)),
            ))
        }

        async fn user_info(&self, _access_token: &str) -> std::result::Result<UserInfo, ProviderError> {
            Ok(UserInfo {
                id: "google-id".to_string(),
                email: self.email.clone(),
                ..UserInfo::default()
            })
        }
    }

    fn session_with(provider: FakeProvider) -> CredentialSession<MemoryBackend, Arc<FakeProvider>> {
        let cipher = Arc::new(TokenCipher::new(&[5u8; 32]).unwrap());
        let store = Arc::new(CredentialStore::new(MemoryBackend::new(), cipher));
        CredentialSession::new(store, Arc::new(provider))
    }

    fn expired(refresh: Option<&str>) -> OAuthToken {
        OAuthToken::bearer("stale-access", refresh, Some(Utc::now() - Duration::minutes(5)))
    }

    #[tokio::test]
    async fn test_valid_token_is_returned_untouched() {
        let session = session_with(FakeProvider::default());
        let token = OAuthToken::bearer("A1", Some("R1"), Some(Utc::now() + Duration::hours(1)));
        session.store().save("u1", "a@x.com", &token).unwrap();

        let obtained = session.obtain("u1", "a@x.com").await.unwrap();

        assert_eq!(obtained, token);
        assert_eq!(session.provider.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_once_and_keeps_id() {
        let session = session_with(FakeProvider::default());
        session
            .store()
            .save("u1", "a@x.com", &expired(Some("R1")))
            .unwrap();
        let before = session.store().find_record("u1", "a@x.com").unwrap().unwrap();

        let obtained = session.obtain("u1", "a@x.com").await.unwrap();

        assert_eq!(session.provider.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(obtained.access_token, "refreshed-1");
        // Provider did not rotate, original refresh token must be kept
        assert_eq!(obtained.refresh_token.as_deref(), Some("R1"));

        let after = session.store().find_record("u1", "a@x.com").unwrap().unwrap();
        assert_eq!(after.id, before.id);
        assert_ne!(after.access_token, before.access_token);
        assert_eq!(after.expiry, obtained.expiry);
        assert_eq!(session.store().get("u1", "a@x.com").unwrap(), obtained);
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_stored() {
        let session = session_with(FakeProvider {
            rotate: true,
            ..FakeProvider::default()
        });
        session
            .store()
            .save("u1", "a@x.com", &expired(Some("R1")))
            .unwrap();

        session.obtain("u1", "a@x.com").await.unwrap();

        let stored = session.store().get("u1", "a@x.com").unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("rotated-1"));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_skips_upstream() {
        let session = session_with(FakeProvider::default());
        session.store().save("u1", "a@x.com", &expired(None)).unwrap();

        let result = session.obtain("u1", "a@x.com").await;

        assert!(matches!(result, Err(CredentialError::RefreshUnavailable)));
        assert_eq!(session.provider.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_refresh_leaves_record_alone() {
        let session = session_with(FakeProvider {
            reject: true,
            ..FakeProvider::default()
        });
        session
            .store()
            .save("u1", "a@x.com", &expired(Some("R1")))
            .unwrap();
        let before = session.store().find_record("u1", "a@x.com").unwrap().unwrap();

        let err = session.obtain("u1", "a@x.com").await.unwrap_err();

        assert!(matches!(err, CredentialError::RefreshFailed(_)));
        assert!(err.requires_reauthorization());
        let after = session.store().find_record("u1", "a@x.com").unwrap().unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_not_found_propagates() {
        let session = session_with(FakeProvider::default());

        let result = session.obtain("u1", "nobody@x.com").await;
        assert!(matches!(result, Err(CredentialError::TokenNotFound)));
    }

    #[tokio::test]
    async fn test_expiry_margin_triggers_early_refresh() {
        let session = session_with(FakeProvider::default()).with_settings(SessionSettings {
            expiry_margin: Duration::minutes(10),
            ..SessionSettings::default()
        });
        let soon = OAuthToken::bearer("A1", Some("R1"), Some(Utc::now() + Duration::minutes(5)));
        session.store().save("u1", "a@x.com", &soon).unwrap();

        let obtained = session.obtain("u1", "a@x.com").await.unwrap();

        assert_eq!(obtained.access_token, "refreshed-1");
    }

    #[tokio::test]
    async fn test_concurrent_obtain_refreshes_once_per_key() {
        let session = Arc::new(session_with(FakeProvider::default()));
        session
            .store()
            .save("u1", "a@x.com", &expired(Some("R1")))
            .unwrap();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.obtain("u1", "a@x.com").await })
            })
            .collect();

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.access_token, "refreshed-1");
        }

        assert_eq!(session.provider.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(session.store().list_by_user("u1").unwrap().len(), 1);
        assert!(session.locks.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_refresh_leaves_record_untouched() {
        let session = session_with(FakeProvider::default());
        session
            .store()
            .save("u1", "a@x.com", &expired(Some("R1")))
            .unwrap();
        let before = session.store().find_record("u1", "a@x.com").unwrap().unwrap();

        // Refresh sleeps 20ms, so the call is dropped mid-flight
        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            session.obtain("u1", "a@x.com"),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(session.provider.refreshes.load(Ordering::SeqCst), 1);

        let after = session.store().find_record("u1", "a@x.com").unwrap().unwrap();
        assert_eq!(after, before);
        assert!(session.locks.is_empty());

        let obtained = session.obtain("u1", "a@x.com").await.unwrap();
        assert_eq!(obtained.access_token, "refreshed-2");
        assert_eq!(obtained.refresh_token.as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_refresh_locks_are_released() {
        let session = session_with(FakeProvider::default());
        for email in ["a@x.com", "b@x.com", "c@x.com"] {
            session.store().save("u1", email, &expired(Some("R1"))).unwrap();
            session.obtain("u1", email).await.unwrap();
        }

        assert!(session.locks.is_empty());
    }

    #[tokio::test]
    async fn test_unserialized_racers_converge_to_one_row() {
        let session = Arc::new(
            session_with(FakeProvider::default()).with_settings(SessionSettings {
                serialize_per_key: false,
                ..SessionSettings::default()
            }),
        );
        session
            .store()
            .save("u1", "a@x.com", &expired(Some("R1")))
            .unwrap();

        let (a, b) = tokio::join!(
            session.obtain("u1", "a@x.com"),
            session.obtain("u1", "a@x.com")
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(session.provider.refreshes.load(Ordering::SeqCst), 2);
        assert_ne!(a.access_token, b.access_token);

        let stored = session.store().list_by_user("u1").unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].token == a || stored[0].token == b);
    }

    #[tokio::test]
    async fn test_enroll_saves_under_reported_identity() {
        let session = session_with(FakeProvider {
            email: "alice@example.com".to_string(),
            ..FakeProvider::default()
        });

        let enrollment = session.enroll("u1", "code-1").await.unwrap();

        assert_eq!(enrollment.email, "alice@example.com");
        assert_eq!(enrollment.token.access_token, "access-for-code-1");
        assert_eq!(
            session.store().get("u1", "alice@example.com").unwrap(),
            enrollment.token
        );
    }

    #[tokio::test]
    async fn test_enroll_validation_and_failures() {
        let session = session_with(FakeProvider::default());

        assert!(matches!(
            session.enroll("", "code").await,
            Err(CredentialError::InvalidUserId)
        ));
        assert!(matches!(
            session.enroll("u1", "").await,
            Err(CredentialError::InvalidAuthorizationCode)
        ));
        assert!(matches!(
            session.enroll("u1", "bad-code").await,
            Err(CredentialError::ExchangeFailed(_))
        ));
        // Provider reported no email
        assert!(matches!(
            session.enroll("u1", "code").await,
            Err(CredentialError::InvalidEmail)
        ));
        assert!(session.store().list_by_user("u1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke() {
        let session = session_with(FakeProvider::default());
        session
            .store()
            .save("u1", "a@x.com", &expired(Some("R1")))
            .unwrap();

        assert!(session.revoke("u1", "a@x.com").unwrap());
        assert!(!session.revoke("u1", "a@x.com").unwrap());
        assert!(matches!(
            session.obtain("u1", "a@x.com").await,
            Err(CredentialError::TokenNotFound)
        ));
    }
}
