//! Session service façade and bootstrap helpers.
//!
//! This crate wires a validated [`SessionConfig`] into the pieces of
//! `core-auth`: one session manager, one notice debouncer, the authenticated
//! client every API call goes through, and optionally the proactive refresh
//! task. Desktop apps enable the `desktop-shims` feature so the config builder
//! falls back to the keyring store and the reqwest client from
//! `bridge-desktop`.
//!
//! ```no_run
//! # async fn example() -> core_service::Result<()> {
//! use core_runtime::config::SessionConfig;
//! use core_service::SessionService;
//!
//! let service = SessionService::bootstrap(
//!     SessionConfig::builder().api_base_url("https://api.example.com"),
//! )?;
//! let outcome = service.restore_session().await?;
//! if !outcome.is_authenticated() {
//!     // show the sign-in screen
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use core_auth::{
    AuthenticatedClient, Credential, NoticeDebouncer, ProactiveRefresh, ProactiveRefreshHandle,
    RestoreOutcome, SessionManager, UserRecord,
};
use core_runtime::config::{SessionConfig, SessionConfigBuilder};
use core_runtime::events::{EventBus, EventStream};
use tracing::info;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::{KeyringSecureStore, ReqwestHttpClient};

const EVENT_BUS_CAPACITY: usize = 256;

/// Primary façade exposed to host applications.
pub struct SessionService {
    config: Arc<SessionConfig>,
    events: EventBus,
    manager: Arc<SessionManager>,
    notices: Arc<NoticeDebouncer>,
    client: AuthenticatedClient,
    scheduler: Option<ProactiveRefreshHandle>,
}

impl SessionService {
    /// Build the service from a validated config.
    ///
    /// # Errors
    ///
    /// [`CoreError::InitializationFailed`] when proactive refresh is enabled
    /// outside a Tokio runtime.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let manager = Arc::new(SessionManager::from_config(&config, events.clone()));
        let notices = Arc::new(NoticeDebouncer::new(
            config.notice_cooldowns,
            Arc::clone(&config.clock),
            events.clone(),
        ));
        let client = AuthenticatedClient::builder(Arc::clone(&config.http_client))
            .timeout(config.request_timeout)
            .session_chain(Arc::clone(&manager), Arc::clone(&notices))
            .build();

        let scheduler = match config.proactive_refresh_lead {
            Some(lead) => {
                if tokio::runtime::Handle::try_current().is_err() {
                    return Err(CoreError::InitializationFailed(
                        "proactive refresh requires a Tokio runtime".to_string(),
                    ));
                }
                let task = ProactiveRefresh::new(
                    manager.state(),
                    manager.coordinator().clone(),
                    Arc::clone(&config.clock),
                    events.clone(),
                    lead,
                );
                Some(task.spawn())
            }
            None => None,
        };

        info!(
            api_base_url = %config.api_base_url,
            proactive_refresh = scheduler.is_some(),
            "Session service ready"
        );

        Ok(Self {
            config: Arc::new(config),
            events,
            manager,
            notices,
            client,
            scheduler,
        })
    }

    /// Build the config from `builder` and start the service.
    pub fn bootstrap(builder: SessionConfigBuilder) -> Result<Self> {
        Self::new(builder.build()?)
    }

    pub fn config(&self) -> Arc<SessionConfig> {
        Arc::clone(&self.config)
    }

    pub fn manager(&self) -> Arc<SessionManager> {
        Arc::clone(&self.manager)
    }

    /// Client for API calls; cheap to clone.
    pub fn client(&self) -> AuthenticatedClient {
        self.client.clone()
    }

    pub fn notices(&self) -> Arc<NoticeDebouncer> {
        Arc::clone(&self.notices)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Session changes, token activity and debounced notices.
    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    pub fn proactive_refresh_running(&self) -> bool {
        self.scheduler.as_ref().is_some_and(|s| s.is_running())
    }

    pub async fn restore_session(&self) -> Result<RestoreOutcome> {
        Ok(self.manager.restore_session().await?)
    }

    pub async fn login(&self, user: UserRecord, credential: Option<Credential>) -> Result<()> {
        Ok(self.manager.login(user, credential).await?)
    }

    pub async fn update_token(&self, access_token: &str) -> Result<bool> {
        Ok(self.manager.update_token(access_token).await?)
    }

    /// Sign out and clear the dismissed notices so the next session starts
    /// fresh.
    pub async fn logout(&self) -> Result<()> {
        let result = self.manager.logout().await;
        self.notices.reset();
        Ok(result?)
    }

    /// Stop background work. Dropping the service does the same.
    pub fn shutdown(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
    }
}
