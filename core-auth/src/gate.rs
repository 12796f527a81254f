//! Request gate: credential attachment and the logout barrier.

use crate::client::{RequestContext, RequestInterceptor};
use crate::error::{AuthError, Result};
use crate::state::{SessionSnapshot, SessionState};
use async_trait::async_trait;
use bridge_traits::HttpRequest;
use std::sync::Arc;
use tracing::debug;

/// Decide what happens to `request` given the session as it is now.
///
/// - logging out: rejected with [`AuthError::Cancelled`], never dispatched
/// - credential present: `Authorization: Bearer <token>` replaces any existing header
/// - no credential: forwarded untouched
pub fn before_send(snapshot: &SessionSnapshot, request: HttpRequest) -> Result<HttpRequest> {
    if snapshot.logging_out {
        return Err(AuthError::Cancelled);
    }
    match &snapshot.credential {
        Some(credential) => Ok(request.bearer_token(credential.access_token())),
        None => Ok(request),
    }
}

pub struct RequestGate {
    state: Arc<SessionState>,
}

impl RequestGate {
    pub fn new(state: Arc<SessionState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl RequestInterceptor for RequestGate {
    async fn on_request(
        &self,
        ctx: &mut RequestContext,
        request: HttpRequest,
    ) -> Result<HttpRequest> {
        let url = request.url.clone();
        let snapshot = self.state.snapshot();
        ctx.bind(snapshot.generation, snapshot.cancel.clone());

        if ctx.is_cancelled() {
            debug!(attempt = ctx.attempt, "Request rejected: session was logged out");
            return Err(AuthError::Cancelled);
        }

        before_send(&snapshot, request).map_err(|e| {
            debug!(%url, "Request rejected: logout in progress");
            e
        })
    }
}
