//! Secure Session Storage
//!
//! Typed adapter over [`SecureStore`] for the three persisted session keys.
//!
//! ## Pairing
//!
//! The user record and the access token are written and cleared together. A
//! write that fails part-way clears every key so a later restore never finds a
//! user without a credential. A restore that finds only some of the keys treats
//! the leftovers as garbage and clears them as well.
//!
//! ## Ordering
//!
//! All writes go through a [`SessionWriter`], which holds the store's write lock
//! for its lifetime. Refresh completion and logout both take the writer before
//! touching storage, so a refresh that finishes after logout began cannot put a
//! credential back.

use crate::error::{AuthError, Result};
use crate::types::{Credential, StoredSession, UserRecord};
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const AUTH_TOKEN_KEY: &str = "authToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const USER_INFO_KEY: &str = "userInfo";

/// Every key the session owns, cleared together.
pub const SESSION_KEYS: [&str; 3] = [AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_INFO_KEY];

const CLEAR_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Which session keys are currently present. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageStatus {
    pub has_auth_token: bool,
    pub has_refresh_token: bool,
    pub has_user_info: bool,
}

impl StorageStatus {
    pub fn is_complete(&self) -> bool {
        self.has_auth_token && self.has_user_info
    }

    pub fn is_empty(&self) -> bool {
        !self.has_auth_token && !self.has_refresh_token && !self.has_user_info
    }
}

/// What a storage read found.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Loaded {
    Session(StoredSession),
    Empty,
    /// Some keys were present but not the pair; the leftovers were cleared.
    Incomplete,
}

#[derive(Clone)]
pub struct SessionStore {
    secure_store: Arc<dyn SecureStore>,
    write_lock: Arc<Mutex<()>>,
}

impl SessionStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        debug!("Initializing SessionStore");
        Self {
            secure_store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Acquire exclusive write access to the session keys.
    pub async fn write_guard(&self) -> SessionWriter<'_> {
        SessionWriter {
            store: self,
            _guard: self.write_lock.lock().await,
        }
    }

    /// Read the stored session.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(session))` when both `authToken` and `userInfo` are present
    /// - `Ok(None)` when nothing usable is stored (partial leftovers are cleared)
    /// - `Err(StorageCorruption)` when a value does not decode; all keys have
    ///   been cleared by the time this returns
    pub async fn load(&self) -> Result<Option<StoredSession>> {
        match self.load_checked().await? {
            Loaded::Session(session) => Ok(Some(session)),
            Loaded::Empty | Loaded::Incomplete => Ok(None),
        }
    }

    pub(crate) async fn load_checked(&self) -> Result<Loaded> {
        let writer = self.write_guard().await;

        let access_token = writer.read_string(AUTH_TOKEN_KEY).await;
        let user_info = self.get(USER_INFO_KEY).await;
        let refresh_token = writer.read_string(REFRESH_TOKEN_KEY).await;

        let (access_token, user_info, refresh_token) = match (access_token, user_info, refresh_token)
        {
            (Ok(a), Ok(u), Ok(r)) => (a, u, r),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                if let AuthError::StorageCorruption(reason) = &e {
                    warn!(reason = %reason, "Stored session is corrupted, clearing");
                    writer.clear_all().await?;
                }
                return Err(e);
            }
        };

        let (access_token, user_info) = match (access_token, user_info) {
            (Some(token), Some(user)) if !token.is_empty() => (token, user),
            (None, None) if refresh_token.is_none() => {
                debug!("No stored session");
                return Ok(Loaded::Empty);
            }
            _ => {
                warn!("Stored session is incomplete, clearing leftovers");
                writer.clear_all().await?;
                return Ok(Loaded::Incomplete);
            }
        };

        let user: UserRecord = match serde_json::from_slice(&user_info) {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Stored user record does not deserialize, clearing");
                writer.clear_all().await?;
                return Err(AuthError::StorageCorruption(format!(
                    "user record: {}",
                    e
                )));
            }
        };

        info!(
            user_id = %user.id,
            has_refresh_token = refresh_token.is_some(),
            "Stored session loaded"
        );

        Ok(Loaded::Session(StoredSession {
            user,
            credential: Credential::new(access_token, refresh_token),
        }))
    }

    /// Persist a user and credential as a pair.
    pub async fn save(&self, user: &UserRecord, credential: &Credential) -> Result<()> {
        self.write_guard().await.save(user, credential).await
    }

    /// Remove every session key.
    pub async fn clear_all(&self) -> Result<()> {
        self.write_guard().await.clear_all().await
    }

    pub async fn status(&self) -> Result<StorageStatus> {
        Ok(StorageStatus {
            has_auth_token: self.has(AUTH_TOKEN_KEY).await?,
            has_refresh_token: self.has(REFRESH_TOKEN_KEY).await?,
            has_user_info: self.has(USER_INFO_KEY).await?,
        })
    }

    /// The stored refresh token, if any. Used when memory has none.
    pub async fn refresh_token(&self) -> Result<Option<String>> {
        let writer = self.write_guard().await;
        writer
            .read_string(REFRESH_TOKEN_KEY)
            .await
            .map(|token| token.filter(|t| !t.is_empty()))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.secure_store.get_secret(key).await.map_err(|e| {
            warn!(key, error = %e, "Failed to read from secure storage");
            AuthError::from_storage(e)
        })
    }

    async fn has(&self, key: &str) -> Result<bool> {
        self.secure_store
            .has_secret(key)
            .await
            .map_err(AuthError::from_storage)
    }
}

/// Exclusive write access to the session keys. Released on drop.
pub struct SessionWriter<'a> {
    store: &'a SessionStore,
    _guard: MutexGuard<'a, ()>,
}

impl SessionWriter<'_> {
    /// Write user and credential. On any failure all keys are cleared.
    pub async fn save(&self, user: &UserRecord, credential: &Credential) -> Result<()> {
        let user_info = serde_json::to_vec(user).map_err(|e| {
            warn!(user_id = %user.id, error = %e, "Failed to serialize user record");
            AuthError::Serialization(e.to_string())
        })?;

        let result = async {
            self.write_credential(credential).await?;
            self.set(USER_INFO_KEY, &user_info).await
        }
        .await;

        if let Err(e) = result {
            warn!(user_id = %user.id, error = %e, "Paired session write failed, clearing");
            if let Err(clear_err) = self.clear_all().await {
                warn!(error = %clear_err, "Failed to clear after partial write");
            }
            return Err(e);
        }

        info!(
            user_id = %user.id,
            has_refresh_token = credential.refresh_token().is_some(),
            "Session stored securely"
        );
        Ok(())
    }

    /// Replace the stored credential, leaving the user record alone.
    pub async fn save_credential(&self, credential: &Credential) -> Result<()> {
        self.write_credential(credential).await?;
        debug!(
            has_refresh_token = credential.refresh_token().is_some(),
            "Credential stored"
        );
        Ok(())
    }

    /// Replace only the access token.
    pub async fn save_access_token(&self, access_token: &str) -> Result<()> {
        self.set(AUTH_TOKEN_KEY, access_token.as_bytes()).await?;
        debug!("Access token stored");
        Ok(())
    }

    /// Remove every session key, retrying once after a short pause.
    pub async fn clear_all(&self) -> Result<()> {
        let store = &self.store.secure_store;
        if let Err(first) = store.clear_all(&SESSION_KEYS).await {
            warn!(error = %first, "Clearing session keys failed, retrying once");
            tokio::time::sleep(CLEAR_RETRY_DELAY).await;
            store.clear_all(&SESSION_KEYS).await.map_err(|e| {
                warn!(error = %e, "Clearing session keys failed again");
                AuthError::from_storage(e)
            })?;
        }
        info!("Session keys cleared");
        Ok(())
    }

    async fn write_credential(&self, credential: &Credential) -> Result<()> {
        self.set(AUTH_TOKEN_KEY, credential.access_token().as_bytes())
            .await?;
        match credential.refresh_token() {
            Some(token) => self.set(REFRESH_TOKEN_KEY, token.as_bytes()).await,
            None => self
                .store
                .secure_store
                .delete_secret(REFRESH_TOKEN_KEY)
                .await
                .map_err(AuthError::from_storage),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.store
            .secure_store
            .set_secret(key, value)
            .await
            .map_err(|e| {
                warn!(key, error = %e, "Failed to write to secure storage");
                AuthError::from_storage(e)
            })
    }

    async fn read_string(&self, key: &str) -> Result<Option<String>> {
        match self.store.get(key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| AuthError::StorageCorruption(format!("{} is not valid UTF-8", key))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn user() -> UserRecord {
        UserRecord::new("42").with_display_name("Mina")
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let memory = MemoryStore::new();
        let store = SessionStore::new(Arc::new(memory.clone()));
        let credential = Credential::new("access", Some("refresh".to_string()));

        store.save(&user(), &credential).await.unwrap();

        assert_eq!(memory.get_string(AUTH_TOKEN_KEY).as_deref(), Some("access"));
        assert_eq!(memory.get_string(REFRESH_TOKEN_KEY).as_deref(), Some("refresh"));

        let loaded = store.load().await.unwrap().expect("session stored");
        assert_eq!(loaded.user, user());
        assert_eq!(loaded.credential, credential);
    }

    #[tokio::test]
    async fn test_load_without_refresh_token() {
        let memory = MemoryStore::new();
        let store = SessionStore::new(Arc::new(memory.clone()));
        store
            .save(&user(), &Credential::new("access", None))
            .await
            .unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.credential.refresh_token(), None);
    }

    #[tokio::test]
    async fn test_save_without_refresh_token_drops_old_one() {
        let memory = MemoryStore::new();
        let store = SessionStore::new(Arc::new(memory.clone()));
        store
            .save(&user(), &Credential::new("a1", Some("r1".to_string())))
            .await
            .unwrap();
        store
            .save(&user(), &Credential::new("a2", None))
            .await
            .unwrap();

        assert!(memory.get_string(REFRESH_TOKEN_KEY).is_none());
    }

    #[tokio::test]
    async fn test_load_empty() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()));
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(store.load_checked().await.unwrap(), Loaded::Empty);
    }

    #[tokio::test]
    async fn test_load_incomplete_clears_leftovers() {
        let memory = MemoryStore::new();
        memory.insert(AUTH_TOKEN_KEY, b"orphan");
        memory.insert(REFRESH_TOKEN_KEY, b"orphan-refresh");
        let store = SessionStore::new(Arc::new(memory.clone()));

        assert_eq!(store.load_checked().await.unwrap(), Loaded::Incomplete);
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_load_user_without_token_clears() {
        let memory = MemoryStore::new();
        memory.insert(USER_INFO_KEY, br#"{"id":"1"}"#);
        let store = SessionStore::new(Arc::new(memory.clone()));

        assert!(store.load().await.unwrap().is_none());
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_user_record_clears_everything() {
        let memory = MemoryStore::new();
        memory.insert(AUTH_TOKEN_KEY, b"access");
        memory.insert(REFRESH_TOKEN_KEY, b"refresh");
        memory.insert(USER_INFO_KEY, b"{not json");
        let store = SessionStore::new(Arc::new(memory.clone()));

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, AuthError::StorageCorruption(_)));
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_non_utf8_token_is_corruption() {
        let memory = MemoryStore::new();
        memory.insert(AUTH_TOKEN_KEY, &[0xff, 0xfe]);
        memory.insert(USER_INFO_KEY, br#"{"id":"1"}"#);
        let store = SessionStore::new(Arc::new(memory.clone()));

        assert!(matches!(
            store.load().await,
            Err(AuthError::StorageCorruption(_))
        ));
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_removes_every_key() {
        let memory = MemoryStore::new();
        let store = SessionStore::new(Arc::new(memory.clone()));
        store
            .save(&user(), &Credential::new("a", Some("r".to_string())))
            .await
            .unwrap();
        assert!(store.status().await.unwrap().is_complete());

        store.clear_all().await.unwrap();

        for key in SESSION_KEYS {
            assert!(memory.get_string(key).is_none(), "{} survived clear_all", key);
        }
        assert!(store.status().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_token_lookup() {
        let memory = MemoryStore::new();
        let store = SessionStore::new(Arc::new(memory.clone()));
        assert_eq!(store.refresh_token().await.unwrap(), None);

        memory.insert(REFRESH_TOKEN_KEY, b"r1");
        assert_eq!(store.refresh_token().await.unwrap().as_deref(), Some("r1"));
    }

    /// Fails the first `failures` writes of `userInfo`, then behaves.
    struct FlakyStore {
        inner: MemoryStore,
        user_info_failures: AtomicUsize,
        clear_failures: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SecureStore for FlakyStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            if key == USER_INFO_KEY
                && self
                    .user_info_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(BridgeError::OperationFailed("disk full".into()));
            }
            self.inner.set_secret(key, value).await
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            self.inner.get_secret(key).await
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.inner.delete_secret(key).await
        }

        async fn clear_all(&self, keys: &[&str]) -> BridgeResult<()> {
            if self
                .clear_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(BridgeError::OperationFailed("locked".into()));
            }
            self.inner.clear_all(keys).await
        }
    }

    #[tokio::test]
    async fn test_partial_write_clears_everything() {
        let memory = MemoryStore::new();
        let store = SessionStore::new(Arc::new(FlakyStore {
            inner: memory.clone(),
            user_info_failures: AtomicUsize::new(1),
            clear_failures: AtomicUsize::new(0),
        }));

        let err = store
            .save(&user(), &Credential::new("a", Some("r".to_string())))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::SecureStorageUnavailable(_)));
        assert!(memory.is_empty(), "token must not outlive a failed pair write");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_retries_once() {
        let memory = MemoryStore::new();
        memory.insert(AUTH_TOKEN_KEY, b"a");
        let store = SessionStore::new(Arc::new(FlakyStore {
            inner: memory.clone(),
            user_info_failures: AtomicUsize::new(0),
            clear_failures: AtomicUsize::new(1),
        }));

        store.clear_all().await.unwrap();
        assert!(memory.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_gives_up_after_retry() {
        let store = SessionStore::new(Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            user_info_failures: AtomicUsize::new(0),
            clear_failures: AtomicUsize::new(2),
        }));

        assert!(matches!(
            store.clear_all().await,
            Err(AuthError::SecureStorageUnavailable(_))
        ));
    }
}
