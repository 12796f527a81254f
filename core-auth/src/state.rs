//! In-memory session state.
//!
//! [`SessionState`] is the only shared mutable record in the session core. It
//! is guarded by a single synchronous mutex that is never held across an
//! `.await`; every method takes the lock, does its read or write, and returns.
//!
//! Each installed session gets a generation number. Asynchronous work that
//! started under one generation (a refresh, a restore, a rotated header)
//! commits only if the generation is still current, so results that arrive
//! after a logout or a re-login are dropped instead of resurrecting the old
//! session.

use crate::error::{AuthError, RefreshError};
use crate::types::{AuthStatus, Credential, UserRecord};
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The single in-flight refresh, cloneable by every waiter.
pub type SharedRefresh = Shared<BoxFuture<'static, Result<Credential, RefreshError>>>;

/// Identity of a started refresh, handed to the task that performs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshFlight {
    pub id: u64,
    pub generation: u64,
}

/// Read-only view taken by the request gate.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub credential: Option<Credential>,
    pub logging_out: bool,
    pub generation: u64,
    pub cancel: CancellationToken,
    pub refresh_pending: bool,
}

/// What [`SessionState::begin_logout`] took down.
#[derive(Debug)]
pub struct LogoutTicket {
    /// False when a logout was already in progress or completed.
    pub first: bool,
    /// Credential that was installed, for the server-side logout call.
    pub credential: Option<Credential>,
}

struct Inner {
    user: Option<UserRecord>,
    credential: Option<Credential>,
    status: AuthStatus,
    logging_out: bool,
    refresh_in_flight: Option<(u64, SharedRefresh)>,
    next_flight: u64,
    generation: u64,
    cancel: CancellationToken,
}

impl Inner {
    fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.refresh_in_flight = None;
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.generation
    }
}

pub struct SessionState {
    inner: Mutex<Inner>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                user: None,
                credential: None,
                status: AuthStatus::Unauthenticated,
                logging_out: false,
                refresh_in_flight: None,
                next_flight: 0,
                generation: 0,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot {
            credential: inner.credential.clone(),
            logging_out: inner.logging_out,
            generation: inner.generation,
            cancel: inner.cancel.clone(),
            refresh_pending: inner.refresh_in_flight.is_some(),
        }
    }

    pub fn status(&self) -> AuthStatus {
        self.inner.lock().status
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        self.inner.lock().user.clone()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.inner.lock().credential.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner
            .lock()
            .credential
            .as_ref()
            .map(|c| c.access_token().to_string())
    }

    pub fn is_logging_out(&self) -> bool {
        self.inner.lock().logging_out
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn refresh_pending(&self) -> bool {
        self.inner.lock().refresh_in_flight.is_some()
    }

    /// Install a signed-in session. Lifts the logout barrier.
    pub fn install(&self, user: UserRecord, credential: Credential) -> u64 {
        let mut inner = self.inner.lock();
        inner.logging_out = false;
        inner.user = Some(user);
        inner.credential = Some(credential);
        inner.status = AuthStatus::Authenticated;
        let generation = inner.bump_generation();
        debug!(generation, "Session installed");
        generation
    }

    /// Replace the user record of the current session.
    pub fn update_user(&self, user: UserRecord) {
        let mut inner = self.inner.lock();
        if inner.credential.is_some() && !inner.logging_out {
            inner.user = Some(user);
        }
    }

    /// Put a stored credential in place while restore validates it.
    ///
    /// The user record is withheld until [`authenticate_if`](Self::authenticate_if)
    /// so nothing reads the session as signed in before validation ends.
    pub fn stage_credential(&self, credential: Credential) -> u64 {
        let mut inner = self.inner.lock();
        inner.logging_out = false;
        inner.user = None;
        inner.credential = Some(credential);
        inner.status = AuthStatus::Restoring;
        let generation = inner.bump_generation();
        debug!(generation, "Stored credential staged");
        generation
    }

    /// Finish a restore started at `generation`.
    pub fn authenticate_if(&self, generation: u64, user: UserRecord) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.logging_out || inner.credential.is_none() {
            return false;
        }
        inner.user = Some(user);
        inner.status = AuthStatus::Authenticated;
        true
    }

    /// Swap the credential if `generation` is still current.
    pub fn replace_credential_if(&self, generation: u64, credential: Credential) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.logging_out || inner.credential.is_none() {
            return false;
        }
        inner.credential = Some(credential);
        true
    }

    /// Drop the session started at `generation`, if it is still current.
    pub fn reset_if(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        inner.user = None;
        inner.credential = None;
        inner.status = AuthStatus::Unauthenticated;
        inner.bump_generation();
        true
    }

    /// Raise the logout barrier and take the session down.
    ///
    /// Cancels the current generation's token, so requests already in the
    /// pipeline observe the barrier, and forgets any in-flight refresh.
    pub fn begin_logout(&self) -> LogoutTicket {
        let mut inner = self.inner.lock();
        let first = !inner.logging_out;
        inner.logging_out = true;
        inner.status = AuthStatus::LoggingOut;
        inner.user = None;
        let credential = inner.credential.take();
        inner.cancel.cancel();
        inner.generation += 1;
        inner.refresh_in_flight = None;
        debug!(first, generation = inner.generation, "Logout barrier raised");
        LogoutTicket { first, credential }
    }

    /// Logout finished. The barrier stays up until the next install.
    pub fn finish_logout(&self) {
        let mut inner = self.inner.lock();
        if inner.logging_out {
            inner.status = AuthStatus::Unauthenticated;
        }
    }

    /// Join the in-flight refresh, or start one with `start`.
    ///
    /// `start` runs under the state lock and must not block; it receives the
    /// flight identity the eventual [`complete_refresh`](Self::complete_refresh)
    /// call has to present.
    pub fn attach_or_start_refresh<F>(&self, start: F) -> Result<SharedRefresh, AuthError>
    where
        F: FnOnce(RefreshFlight) -> SharedRefresh,
    {
        let mut inner = self.inner.lock();
        if inner.logging_out {
            return Err(AuthError::Cancelled);
        }
        if let Some((_, shared)) = &inner.refresh_in_flight {
            return Ok(shared.clone());
        }

        inner.next_flight += 1;
        let flight = RefreshFlight {
            id: inner.next_flight,
            generation: inner.generation,
        };
        let shared = start(flight);
        inner.refresh_in_flight = Some((flight.id, shared.clone()));
        Ok(shared)
    }

    /// Clear the refresh slot if it still belongs to `flight`.
    pub fn complete_refresh(&self, flight: RefreshFlight) {
        let mut inner = self.inner.lock();
        if matches!(&inner.refresh_in_flight, Some((id, _)) if *id == flight.id) {
            inner.refresh_in_flight = None;
        }
    }
}
