//! Response-side interceptors.
//!
//! [`CredentialRotation`] adopts access tokens the server pushes in a response
//! header. [`ResponseClassifier`] turns each outcome into one of the terminal
//! states below, running at most one refresh-and-retry per request:
//!
//! | Outcome                         | Result                                   |
//! |---------------------------------|------------------------------------------|
//! | logout began                    | `Cancelled`, no side effects             |
//! | 401, first time                 | wait for the shared refresh, then retry  |
//! | 401 after the retry             | `Unauthorized`, session-expired notice   |
//! | 503                             | `ServerMaintenance`, maintenance notice  |
//! | timeout / connectivity failure  | `Network`, network notice                |
//! | anything else                   | delivered unchanged                      |

use crate::client::{Disposition, Outcome, RequestContext, ResponseInterceptor};
use crate::error::AuthError;
use crate::manager::SessionManager;
use crate::notice::NoticeDebouncer;
use crate::refresh::RefreshCoordinator;
use crate::state::SessionState;
use async_trait::async_trait;
use core_runtime::events::NoticeEvent;
use std::sync::Arc;
use tracing::{debug, warn};

const UNAUTHORIZED: u16 = 401;
const SERVICE_UNAVAILABLE: u16 = 503;

/// Adopts a rotated access token from the configured response header.
pub struct CredentialRotation {
    manager: Arc<SessionManager>,
}

impl CredentialRotation {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ResponseInterceptor for CredentialRotation {
    async fn on_response(&self, ctx: &mut RequestContext, outcome: Outcome) -> Disposition {
        if ctx.is_cancelled() {
            return Disposition::Deliver(outcome);
        }

        let rotated = outcome.as_ref().ok().and_then(|response| {
            let settings = self.manager.settings();
            response
                .header(&settings.rotation_header)
                .map(str::trim)
                .filter(|token| token.chars().count() >= settings.rotation_min_len)
                .map(str::to_string)
        });

        if let Some(token) = rotated {
            match self.manager.adopt_rotated_token(ctx.generation, &token).await {
                Ok(true) => debug!("Adopted rotated access token"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Failed to adopt rotated access token"),
            }
        }

        Disposition::Deliver(outcome)
    }
}

pub struct ResponseClassifier {
    state: Arc<SessionState>,
    coordinator: RefreshCoordinator,
    notices: Arc<NoticeDebouncer>,
}

impl ResponseClassifier {
    pub fn new(
        state: Arc<SessionState>,
        coordinator: RefreshCoordinator,
        notices: Arc<NoticeDebouncer>,
    ) -> Self {
        Self {
            state,
            coordinator,
            notices,
        }
    }

    async fn on_unauthorized(&self, ctx: &mut RequestContext) -> Disposition {
        if ctx.retried {
            debug!("Still unauthorized after refresh");
            return self.expired();
        }

        let current = self.state.access_token();
        let Some(current) = current else {
            return Disposition::Deliver(Err(AuthError::Unauthorized {
                status: UNAUTHORIZED,
            }));
        };

        // Another request already refreshed (or the server rotated the token)
        // after this one was sent.
        if ctx.sent_token.as_deref() != Some(current.as_str()) {
            debug!("Credential changed since dispatch, retrying without refresh");
            return Disposition::Retry;
        }

        let shared = match self.coordinator.ensure_single_flight_refresh() {
            Ok(shared) => shared,
            Err(e) => return Disposition::Deliver(Err(e)),
        };

        tokio::select! {
            _ = ctx.cancel.cancelled() => Disposition::Deliver(Err(AuthError::Cancelled)),
            result = shared => match result {
                Ok(_) => Disposition::Retry,
                Err(_) if ctx.is_cancelled() => Disposition::Deliver(Err(AuthError::Cancelled)),
                Err(e) => {
                    warn!(error = %e, "Refresh failed, request stays unauthorized");
                    self.expired()
                }
            },
        }
    }

    fn expired(&self) -> Disposition {
        self.notices.notify(NoticeEvent::SessionExpired);
        Disposition::Deliver(Err(AuthError::Unauthorized {
            status: UNAUTHORIZED,
        }))
    }
}

#[async_trait]
impl ResponseInterceptor for ResponseClassifier {
    async fn on_response(&self, ctx: &mut RequestContext, outcome: Outcome) -> Disposition {
        if ctx.is_cancelled() || self.state.is_logging_out() {
            return Disposition::Deliver(Err(AuthError::Cancelled));
        }

        match outcome {
            Ok(response) if response.status == UNAUTHORIZED => self.on_unauthorized(ctx).await,
            Ok(response) if response.status == SERVICE_UNAVAILABLE => {
                warn!("Server reported maintenance");
                self.notices.notify(NoticeEvent::Maintenance);
                Disposition::Deliver(Err(AuthError::ServerMaintenance))
            }
            Err(AuthError::Network(message)) => {
                warn!(error = %message, "Request failed to reach the server");
                self.notices.notify(NoticeEvent::NetworkError);
                Disposition::Deliver(Err(AuthError::Network(message)))
            }
            other => Disposition::Deliver(other),
        }
    }
}
