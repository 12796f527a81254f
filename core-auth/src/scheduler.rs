//! Proactive refresh.
//!
//! When enabled, a background task refreshes the access token `lead` before it
//! expires, so the first request after a quiet period does not pay for a 401
//! round trip. The deadline is recomputed from the current credential after
//! every session event; sign-in, refresh and rotation all reschedule it, and
//! logout parks the task until a new session appears.

use crate::codec;
use crate::error::AuthError;
use crate::refresh::RefreshCoordinator;
use crate::state::SessionState;
use bridge_traits::Clock;
use core_runtime::events::{CoreEvent, EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lower bound between two scheduled attempts, so a token that is already
/// inside the lead window (or a server that keeps issuing short-lived tokens)
/// cannot drive a tight loop.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

pub struct ProactiveRefresh {
    state: Arc<SessionState>,
    coordinator: RefreshCoordinator,
    clock: Arc<dyn Clock>,
    events: EventBus,
    lead: Duration,
}

impl ProactiveRefresh {
    pub fn new(
        state: Arc<SessionState>,
        coordinator: RefreshCoordinator,
        clock: Arc<dyn Clock>,
        events: EventBus,
        lead: Duration,
    ) -> Self {
        Self {
            state,
            coordinator,
            clock,
            events,
            lead,
        }
    }

    /// Start the background task. It stops when the handle is dropped.
    pub fn spawn(self) -> ProactiveRefreshHandle {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.run(shutdown.clone()));
        info!("Proactive refresh scheduler started");
        ProactiveRefreshHandle { shutdown, task }
    }

    /// Time to wait before the next refresh, or `None` when there is nothing
    /// to refresh.
    fn next_wait(&self) -> Option<Duration> {
        if self.state.is_logging_out() {
            return None;
        }
        let credential = self.state.credential()?;
        credential.refresh_token()?;
        let expires_at = codec::expires_at(credential.access_token())?;
        let lead = chrono::Duration::from_std(self.lead).ok()?;
        let remaining = (expires_at - lead) - self.clock.now();
        Some(remaining.to_std().unwrap_or(Duration::ZERO))
    }

    async fn run(self, shutdown: CancellationToken) {
        let mut events = self.events.subscribe();
        let mut last_attempt: Option<Instant> = None;

        loop {
            let wait = self.next_wait().map(|wait| match last_attempt {
                Some(at) => wait.max(MIN_REFRESH_INTERVAL.saturating_sub(at.elapsed())),
                None => wait,
            });
            if let Some(wait) = wait {
                debug!(wait_secs = wait.as_secs(), "Next proactive refresh scheduled");
            }

            let sleep = async {
                match wait {
                    Some(wait) => tokio::time::sleep(wait).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(CoreEvent::Session(_)) | Err(RecvError::Lagged(_)) => continue,
                    Ok(CoreEvent::Notice(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                _ = sleep => {
                    last_attempt = Some(Instant::now());
                    self.attempt().await;
                }
            }
        }

        debug!("Proactive refresh scheduler stopped");
    }

    async fn attempt(&self) {
        if self.state.is_logging_out() || self.state.credential().is_none() {
            return;
        }
        debug!("Refreshing ahead of expiry");
        match self.coordinator.refresh().await {
            Ok(_) => {}
            Err(AuthError::Cancelled) => debug!("Proactive refresh cancelled by logout"),
            Err(e) => warn!(error = %e, "Proactive refresh failed; the next 401 will retry"),
        }
    }
}

pub struct ProactiveRefreshHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ProactiveRefreshHandle {
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ProactiveRefreshHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.task.abort();
    }
}
