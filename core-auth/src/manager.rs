//! # Session Manager
//!
//! Public lifecycle façade of the session core.
//!
//! ## Overview
//!
//! `SessionManager` is built once at startup and shared by reference with the
//! HTTP client chain and the host UI. It owns no global state: everything it
//! touches is injected.
//!
//! ## Operations
//!
//! - [`login`](SessionManager::login): persist a user and credential as a pair
//! - [`update_token`](SessionManager::update_token): replace only the access token
//! - [`logout`](SessionManager::logout): raise the barrier, tell the server, clear storage
//! - [`restore_session`](SessionManager::restore_session): startup validation of the
//!   stored session
//!
//! ## Restore policy
//!
//! A credential that is expired by the clock is treated strictly: it is
//! refreshed once, and if that fails the stored session is discarded. A
//! credential that looks valid is optionally probed against the "who am I"
//! endpoint; only an explicit 401/403 (after one refresh-and-reprobe) discards
//! it. Timeouts, connectivity failures and other statuses keep the session.
//!
//! ## Usage
//!
//! ```ignore
//! use core_auth::{Credential, SessionManager, UserRecord};
//! use core_runtime::events::EventBus;
//!
//! let manager = SessionManager::from_config(&config, EventBus::default());
//!
//! match manager.restore_session().await? {
//!     RestoreOutcome::Authenticated(user) => show_home(user),
//!     RestoreOutcome::Unauthenticated => show_sign_in(),
//! }
//!
//! manager
//!     .login(UserRecord::new("42"), Some(Credential::new(token, Some(refresh))))
//!     .await?;
//! ```

use crate::codec;
use crate::error::{AuthError, Result};
use crate::refresh::RefreshCoordinator;
use crate::session_store::{Loaded, SessionStore, StorageStatus};
use crate::state::SessionState;
use crate::types::{AuthStatus, Credential, RestoreOutcome, StoredSession, UserRecord};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::Clock;
use core_runtime::config::SessionConfig;
use core_runtime::events::{ClearReason, CoreEvent, EventBus, SessionEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Tunables the manager and its interceptors read at run time.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub probe_url: String,
    pub logout_url: String,
    pub request_timeout: Duration,
    pub probe_on_restore: bool,
    pub expiry_leeway: Duration,
    pub rotation_header: String,
    pub rotation_min_len: usize,
}

impl SessionSettings {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            probe_url: config.probe_url(),
            logout_url: config.logout_url(),
            request_timeout: config.request_timeout,
            probe_on_restore: config.probe_on_restore,
            expiry_leeway: config.expiry_leeway,
            rotation_header: config.rotation_header.clone(),
            rotation_min_len: config.rotation_min_len,
        }
    }
}

enum ProbeResult {
    Valid,
    Rejected(u16),
    Inconclusive(String),
}

enum Validation {
    Keep,
    Clear(ClearReason),
    /// A logout or login replaced the session being restored.
    Superseded,
}

pub struct SessionManager {
    state: Arc<SessionState>,
    store: SessionStore,
    coordinator: RefreshCoordinator,
    http: Arc<dyn HttpClient>,
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
    events: EventBus,
    /// Serializes login, logout and restore against each other.
    lifecycle: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        state: Arc<SessionState>,
        store: SessionStore,
        coordinator: RefreshCoordinator,
        http: Arc<dyn HttpClient>,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            state,
            store,
            coordinator,
            http,
            settings,
            clock,
            events,
            lifecycle: Mutex::new(()),
        }
    }

    /// Build the manager and its collaborators from a validated config.
    pub fn from_config(config: &SessionConfig, events: EventBus) -> Self {
        let state = Arc::new(SessionState::new());
        let store = SessionStore::new(Arc::clone(&config.secure_store));
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&state),
            store.clone(),
            Arc::clone(&config.http_client),
            config.refresh_url(),
            config.request_timeout,
            events.clone(),
        );
        Self::new(
            state,
            store,
            coordinator,
            Arc::clone(&config.http_client),
            SessionSettings::from_config(config),
            Arc::clone(&config.clock),
            events,
        )
    }

    pub fn state(&self) -> Arc<SessionState> {
        Arc::clone(&self.state)
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn status(&self) -> AuthStatus {
        self.state.status()
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        self.state.current_user()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.access_token()
    }

    pub fn is_authenticated(&self) -> bool {
        self.status().is_authenticated()
            && self.state.current_user().is_some()
            && self.state.credential().is_some()
    }

    pub async fn storage_status(&self) -> Result<StorageStatus> {
        self.store.status().await
    }

    /// Sign in, or replace the signed-in user.
    ///
    /// With `credential: None` only the user record is replaced, which
    /// requires an existing session; passing the current user again is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidInput`] for an empty access token, or `None`
    ///   without a session
    /// - storage errors from the paired write, after which nothing is stored
    #[instrument(skip(self, user, credential), fields(user_id = %user.id))]
    pub async fn login(&self, user: UserRecord, credential: Option<Credential>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let Some(credential) = credential else {
            return self.replace_user(user).await;
        };

        if credential.access_token().trim().is_empty() {
            return Err(AuthError::InvalidInput(
                "access token cannot be empty".to_string(),
            ));
        }

        {
            let writer = self.store.write_guard().await;
            writer.save(&user, &credential).await?;
            self.state.install(user.clone(), credential);
        }

        info!("User signed in");
        let _ = self.events.emit(CoreEvent::Session(SessionEvent::SignedIn {
            user_id: user.id,
        }));
        Ok(())
    }

    async fn replace_user(&self, user: UserRecord) -> Result<()> {
        let Some(credential) = self.state.credential() else {
            return Err(AuthError::InvalidInput(
                "a credential is required when no session exists".to_string(),
            ));
        };
        if self.state.current_user().as_ref() == Some(&user) {
            debug!("Same user, nothing to do");
            return Ok(());
        }

        let writer = self.store.write_guard().await;
        if self.state.is_logging_out() {
            return Err(AuthError::Cancelled);
        }
        writer.save(&user, &credential).await?;
        self.state.update_user(user);
        debug!("User record replaced");
        Ok(())
    }

    /// Replace the access token, keeping the refresh token.
    ///
    /// Returns `false` when nothing changed: the token is the current one, or
    /// there is no session to update.
    #[instrument(skip(self, access_token))]
    pub async fn update_token(&self, access_token: &str) -> Result<bool> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(AuthError::InvalidInput(
                "access token cannot be empty".to_string(),
            ));
        }
        let generation = self.state.generation();
        self.apply_access_token(generation, access_token).await
    }

    /// [`update_token`](Self::update_token) for a token pushed in a response
    /// to a request issued under `generation`.
    pub async fn adopt_rotated_token(&self, generation: u64, access_token: &str) -> Result<bool> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Ok(false);
        }
        self.apply_access_token(generation, access_token).await
    }

    async fn apply_access_token(&self, generation: u64, access_token: &str) -> Result<bool> {
        if self.state.access_token().as_deref() == Some(access_token) {
            return Ok(false);
        }

        let writer = self.store.write_guard().await;
        if self.state.generation() != generation || self.state.is_logging_out() {
            debug!("Session changed, ignoring token update");
            return Ok(false);
        }
        let Some(current) = self.state.credential() else {
            return Ok(false);
        };
        if current.access_token() == access_token {
            return Ok(false);
        }

        writer.save_access_token(access_token).await?;
        let updated = current.with_access_token(access_token);
        let expires_at = updated.expires_at().map(|t| t.timestamp());
        if !self.state.replace_credential_if(generation, updated) {
            return Ok(false);
        }
        drop(writer);

        info!("Access token updated");
        let _ = self
            .events
            .emit(CoreEvent::Session(SessionEvent::TokenRotated { expires_at }));
        Ok(true)
    }

    /// Sign out.
    ///
    /// The barrier goes up before anything is awaited, so from the moment this
    /// is called every new request is rejected and responses still in flight
    /// are dropped. Only the first call contacts the server; every call clears
    /// storage. The barrier stays up until the next login or restore.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let early = self.state.begin_logout();
        let _lifecycle = self.lifecycle.lock().await;
        // A login that held the lifecycle lock may have installed a session
        // after the barrier went up; take that one down too.
        let late = self.state.begin_logout();
        let first = early.first || late.first;
        let credential = late.credential.or(early.credential);

        if first {
            info!("Signing out");
            if let Some(credential) = &credential {
                self.notify_server_logout(credential).await;
            }
        } else {
            debug!("Logout already performed, clearing storage only");
        }

        let cleared = self.store.clear_all().await;
        self.state.finish_logout();

        if first {
            let _ = self.events.emit(CoreEvent::Session(SessionEvent::SignedOut));
        }
        cleared
    }

    async fn notify_server_logout(&self, credential: &Credential) {
        let timeout = self.settings.request_timeout;
        let request = HttpRequest::new(HttpMethod::Post, self.settings.logout_url.clone())
            .bearer_token(credential.access_token())
            .timeout(timeout);

        match tokio::time::timeout(timeout, self.http.execute(request)).await {
            Ok(Ok(response)) if response.is_success() => debug!("Server session ended"),
            Ok(Ok(response)) => debug!(status = response.status, "Server logout not acknowledged"),
            Ok(Err(e)) => debug!(error = %e, "Server logout failed"),
            Err(_) => debug!("Server logout timed out"),
        }
    }

    /// Validate the stored session at startup.
    ///
    /// # Errors
    ///
    /// Only when secure storage itself cannot be read. Every other failure
    /// resolves to [`RestoreOutcome::Unauthenticated`].
    #[instrument(skip(self))]
    pub async fn restore_session(&self) -> Result<RestoreOutcome> {
        let _lifecycle = self.lifecycle.lock().await;
        let _ = self.events.emit(CoreEvent::Session(SessionEvent::Restoring));

        let StoredSession { user, credential } = match self.store.load_checked().await {
            Ok(Loaded::Session(session)) => session,
            Ok(Loaded::Empty) => {
                debug!("No stored session");
                return Ok(RestoreOutcome::Unauthenticated);
            }
            Ok(Loaded::Incomplete) => {
                self.emit_cleared(ClearReason::Incomplete);
                return Ok(RestoreOutcome::Unauthenticated);
            }
            Err(AuthError::StorageCorruption(reason)) => {
                warn!(reason = %reason, "Discarded corrupted session");
                self.emit_cleared(ClearReason::Corrupted);
                return Ok(RestoreOutcome::Unauthenticated);
            }
            Err(e) => return Err(e),
        };

        let generation = self.state.stage_credential(credential.clone());
        let leeway = self.settings.expiry_leeway;

        let validation =
            if codec::is_expired_with_leeway(credential.access_token(), self.clock.now(), leeway) {
                info!("Stored credential expired, refreshing");
                self.refresh_expired(leeway).await
            } else if self.settings.probe_on_restore {
                self.probe_with_refresh().await
            } else {
                Validation::Keep
            };

        let validation = if self.state.generation() != generation {
            Validation::Superseded
        } else {
            validation
        };

        match validation {
            Validation::Keep => {
                if !self.state.authenticate_if(generation, user.clone()) {
                    return Ok(RestoreOutcome::Unauthenticated);
                }
                let expires_at = self
                    .state
                    .credential()
                    .and_then(|c| c.expires_at())
                    .map(|t| t.timestamp());
                info!(user_id = %user.id, "Stored session restored");
                let _ = self.events.emit(CoreEvent::Session(SessionEvent::SessionRestored {
                    user_id: user.id.clone(),
                    expires_at,
                }));
                Ok(RestoreOutcome::Authenticated(user))
            }
            Validation::Clear(reason) => {
                let writer = self.store.write_guard().await;
                if self.state.generation() == generation {
                    writer.clear_all().await?;
                    self.state.reset_if(generation);
                }
                drop(writer);
                info!(?reason, "Stored session discarded");
                self.emit_cleared(reason);
                Ok(RestoreOutcome::Unauthenticated)
            }
            Validation::Superseded => {
                debug!("Session changed during restore");
                Ok(RestoreOutcome::Unauthenticated)
            }
        }
    }

    async fn refresh_expired(&self, leeway: Duration) -> Validation {
        match self.coordinator.refresh().await {
            Ok(fresh) => {
                if codec::is_expired_with_leeway(fresh.access_token(), self.clock.now(), leeway) {
                    warn!("Refreshed credential is already expired");
                    Validation::Clear(ClearReason::Expired)
                } else {
                    Validation::Keep
                }
            }
            Err(AuthError::Cancelled) => Validation::Superseded,
            Err(e) => {
                warn!(error = %e, "Refresh of expired credential failed");
                Validation::Clear(ClearReason::Expired)
            }
        }
    }

    async fn probe_with_refresh(&self) -> Validation {
        match self.probe().await {
            ProbeResult::Valid => Validation::Keep,
            ProbeResult::Inconclusive(reason) => {
                info!(reason = %reason, "Probe inconclusive, keeping session");
                Validation::Keep
            }
            ProbeResult::Rejected(status) => {
                info!(status, "Probe rejected credential, refreshing once");
                match self.coordinator.refresh().await {
                    Err(AuthError::Cancelled) => Validation::Superseded,
                    Err(e) => {
                        warn!(error = %e, "Refresh after probe rejection failed");
                        Validation::Clear(ClearReason::Rejected)
                    }
                    Ok(_) => match self.probe().await {
                        ProbeResult::Rejected(status) => {
                            warn!(status, "Probe still rejects refreshed credential");
                            Validation::Clear(ClearReason::Rejected)
                        }
                        ProbeResult::Valid | ProbeResult::Inconclusive(_) => Validation::Keep,
                    },
                }
            }
        }
    }

    async fn probe(&self) -> ProbeResult {
        let Some(token) = self.state.access_token() else {
            return ProbeResult::Inconclusive("no credential".to_string());
        };
        let timeout = self.settings.request_timeout;
        let request = HttpRequest::new(HttpMethod::Get, self.settings.probe_url.clone())
            .bearer_token(token)
            .timeout(timeout);

        match tokio::time::timeout(timeout, self.http.execute(request)).await {
            Err(_) => ProbeResult::Inconclusive("timed out".to_string()),
            Ok(Err(e)) => ProbeResult::Inconclusive(e.to_string()),
            Ok(Ok(response)) if response.is_success() => ProbeResult::Valid,
            Ok(Ok(response)) if matches!(response.status, 401 | 403) => {
                ProbeResult::Rejected(response.status)
            }
            Ok(Ok(response)) => ProbeResult::Inconclusive(format!("status {}", response.status)),
        }
    }

    fn emit_cleared(&self, reason: ClearReason) {
        let _ = self
            .events
            .emit(CoreEvent::Session(SessionEvent::SessionCleared { reason }));
    }
}
