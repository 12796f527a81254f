//! # Event Bus System
//!
//! Broadcasts session changes and user-facing notices using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The session core never talks to the UI directly. It emits typed events and the
//! host subscribes:
//! - **Session events**: sign-in, sign-out, refresh and restore progress
//! - **Notice events**: debounced interruptions (maintenance, connectivity,
//!   expired session) the UI should show as a toast or dialog
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   emit    ┌───────────┐
//! │ SessionManager ├──────────>│           │
//! └────────────────┘           │           │   subscribe   ┌─────────┐
//!                              │ EventBus  ├──────────────>│ Host UI │
//! ┌────────────────┐   emit    │ (broadcast│               └─────────┘
//! │ NoticeDebouncer├──────────>│  channel) │
//! └────────────────┘           └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Session(SessionEvent::SignedIn {
//!         user_id: "42".to_string(),
//!     }))
//!     .ok();
//!
//! assert!(subscriber.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emitters ignore `SendError`: having no subscriber is normal during startup.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Session lifecycle events
    Session(SessionEvent),
    /// User-facing notices, already debounced
    Notice(NoticeEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Session(e) => e.description(),
            CoreEvent::Notice(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Session(SessionEvent::AuthError {
                recoverable: false, ..
            }) => EventSeverity::Error,
            CoreEvent::Session(SessionEvent::AuthError { .. }) => EventSeverity::Warning,
            CoreEvent::Notice(_) => EventSeverity::Warning,
            CoreEvent::Session(SessionEvent::SignedIn { .. })
            | CoreEvent::Session(SessionEvent::SignedOut)
            | CoreEvent::Session(SessionEvent::SessionRestored { .. })
            | CoreEvent::Session(SessionEvent::SessionCleared { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Session Events
// ============================================================================

/// Why a stored session was discarded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClearReason {
    /// One of the persisted keys was missing.
    Incomplete,
    /// The stored user record could not be decoded.
    Corrupted,
    /// The credential expired and could not be refreshed.
    Expired,
    /// The server rejected the credential even after a refresh.
    Rejected,
}

/// Events related to the authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// Startup validation of the stored session began.
    Restoring,
    /// A user signed in (or a session was replaced).
    SignedIn { user_id: String },
    /// The session was terminated by the user.
    SignedOut,
    /// A single-flight refresh call started.
    TokenRefreshing,
    /// The refresh call succeeded.
    TokenRefreshed {
        /// Expiry of the new access token (Unix seconds), if it decodes.
        expires_at: Option<i64>,
    },
    /// The server pushed a new access token in a response header.
    TokenRotated { expires_at: Option<i64> },
    /// Startup validation kept the stored session.
    SessionRestored {
        user_id: String,
        expires_at: Option<i64>,
    },
    /// Startup validation discarded the stored session.
    SessionCleared { reason: ClearReason },
    /// A session operation failed.
    AuthError { message: String, recoverable: bool },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::Restoring => "Validating stored session",
            SessionEvent::SignedIn { .. } => "User signed in",
            SessionEvent::SignedOut => "User signed out",
            SessionEvent::TokenRefreshing => "Refreshing access token",
            SessionEvent::TokenRefreshed { .. } => "Access token refreshed",
            SessionEvent::TokenRotated { .. } => "Access token rotated by server",
            SessionEvent::SessionRestored { .. } => "Stored session restored",
            SessionEvent::SessionCleared { .. } => "Stored session discarded",
            SessionEvent::AuthError { .. } => "Session error",
        }
    }
}

// ============================================================================
// Notice Events
// ============================================================================

/// A user-facing interruption. Each kind is shown at most once per cool-down.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NoticeEvent {
    /// The server answered 503.
    Maintenance,
    /// A request timed out or could not reach the server.
    NetworkError,
    /// A request stayed unauthorized after the refresh attempt.
    SessionExpired,
}

impl NoticeEvent {
    fn description(&self) -> &str {
        match self {
            NoticeEvent::Maintenance => "Server is under maintenance",
            NoticeEvent::NetworkError => "Network connection problem",
            NoticeEvent::SessionExpired => "Session expired, please sign in again",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel. Cloning shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if nobody is subscribed.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let notices = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Notice(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching event is currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
