//! Single-flight credential refresh.
//!
//! Most backends invalidate a refresh token on first use, so two concurrent
//! refresh calls with the same token would leave one of them holding a dead
//! credential. [`RefreshCoordinator`] keeps at most one refresh call in flight:
//! the first caller starts it, everyone who asks while it runs receives a clone
//! of the same shared future, and the result is fanned out to all of them.
//!
//! The network call runs on its own task so a waiter that gives up (its
//! request was cancelled) does not abort the refresh for everybody else.

use crate::error::{AuthError, RefreshError};
use crate::session_store::SessionStore;
use crate::state::{RefreshFlight, SessionState, SharedRefresh};
use crate::types::Credential;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::BridgeError;
use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct Inner {
    state: Arc<SessionState>,
    store: SessionStore,
    http: Arc<dyn HttpClient>,
    refresh_url: String,
    timeout: Duration,
    events: EventBus,
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        state: Arc<SessionState>,
        store: SessionStore,
        http: Arc<dyn HttpClient>,
        refresh_url: impl Into<String>,
        timeout: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                store,
                http,
                refresh_url: refresh_url.into(),
                timeout,
                events,
            }),
        }
    }

    /// Join the in-flight refresh or start a new one.
    ///
    /// # Errors
    ///
    /// [`AuthError::Cancelled`] while a logout is in progress; no refresh is
    /// started.
    pub fn ensure_single_flight_refresh(&self) -> Result<SharedRefresh, AuthError> {
        let inner = Arc::clone(&self.inner);
        self.inner.state.attach_or_start_refresh(move |flight| {
            debug!(flight = flight.id, "Starting refresh");
            let handle = tokio::spawn(run_flight(inner, flight));
            async move {
                handle.await.unwrap_or_else(|e| {
                    warn!(error = %e, "Refresh task did not complete");
                    Err(RefreshError::Aborted)
                })
            }
            .boxed()
            .shared()
        })
    }

    /// Refresh and wait for the outcome.
    pub async fn refresh(&self) -> Result<Credential, AuthError> {
        let shared = self.ensure_single_flight_refresh()?;
        shared.await.map_err(AuthError::from)
    }
}

async fn run_flight(inner: Arc<Inner>, flight: RefreshFlight) -> Result<Credential, RefreshError> {
    let _ = inner
        .events
        .emit(CoreEvent::Session(SessionEvent::TokenRefreshing));

    let result = inner.refresh_once(flight).await;
    inner.state.complete_refresh(flight);

    match &result {
        Ok(credential) => {
            let _ = inner.events.emit(CoreEvent::Session(SessionEvent::TokenRefreshed {
                expires_at: credential.expires_at().map(|t| t.timestamp()),
            }));
        }
        Err(e) => {
            let _ = inner.events.emit(CoreEvent::Session(SessionEvent::AuthError {
                message: e.to_string(),
                recoverable: matches!(
                    e,
                    RefreshError::Network(_) | RefreshError::Timeout | RefreshError::Aborted
                ),
            }));
        }
    }

    result
}

impl Inner {
    #[instrument(skip(self), fields(flight = flight.id))]
    async fn refresh_once(&self, flight: RefreshFlight) -> Result<Credential, RefreshError> {
        let refresh_token = self.current_refresh_token().await?;

        let request = HttpRequest::new(HttpMethod::Post, self.refresh_url.clone())
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .map_err(|e| RefreshError::MalformedResponse(e.to_string()))?
            .timeout(self.timeout);

        let response = match tokio::time::timeout(self.timeout, self.http.execute(request)).await {
            Err(_) | Ok(Err(BridgeError::Timeout(_))) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Refresh timed out");
                return Err(RefreshError::Timeout);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Refresh request failed");
                return Err(RefreshError::Network(e.to_string()));
            }
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            warn!(status = response.status, "Refresh rejected");
            return Err(RefreshError::Rejected {
                status: response.status,
            });
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| RefreshError::MalformedResponse(e.to_string()))?;

        let token = body
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| RefreshError::MalformedResponse("missing token".to_string()))?;
        let rotated = body.refresh_token.filter(|t| !t.trim().is_empty());
        let rotated_refresh = rotated.is_some();
        let credential = Credential::new(token, rotated.or(Some(refresh_token)));

        self.commit(flight, &credential).await?;

        info!(
            rotated_refresh,
            expires_at = ?credential.expires_at(),
            "Access token refreshed"
        );
        Ok(credential)
    }

    async fn current_refresh_token(&self) -> Result<String, RefreshError> {
        let in_memory = self
            .state
            .credential()
            .and_then(|c| c.refresh_token().map(str::to_string));
        if let Some(token) = in_memory {
            return Ok(token);
        }

        self.store
            .refresh_token()
            .await
            .map_err(|e| RefreshError::Storage(e.to_string()))?
            .ok_or(RefreshError::NoRefreshToken)
    }

    /// Persist and install the new credential unless the session it was
    /// started for has gone away in the meantime.
    async fn commit(&self, flight: RefreshFlight, credential: &Credential) -> Result<(), RefreshError> {
        let writer = self.store.write_guard().await;
        if self.state.generation() != flight.generation || self.state.is_logging_out() {
            info!("Session changed during refresh, discarding result");
            return Err(RefreshError::Aborted);
        }

        writer
            .save_credential(credential)
            .await
            .map_err(|e| RefreshError::Storage(e.to_string()))?;

        if !self
            .state
            .replace_credential_if(flight.generation, credential.clone())
        {
            return Err(RefreshError::Aborted);
        }
        Ok(())
    }
}
