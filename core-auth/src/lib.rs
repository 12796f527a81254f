//! # Session Module
//!
//! Authenticated-session manager for the Mooddisk clients.
//!
//! ## Overview
//!
//! This module holds the current credential, decides when it is stale,
//! refreshes it at most once under contention, attaches it to outgoing calls,
//! and stops all traffic while a logout is in progress.
//!
//! ## Features
//!
//! - JWT expiry decoding with strict-by-default expiry checks
//! - Paired user/credential persistence via platform secure stores
//! - Single-flight refresh shared by every request that hits a 401
//! - Middleware-chain HTTP client with a logout barrier and cancellation
//! - Server-pushed token rotation
//! - Debounced maintenance / network / session-expired notices
//! - Optional proactive refresh ahead of expiry

pub mod classifier;
pub mod client;
pub mod codec;
pub mod error;
pub mod gate;
pub mod manager;
pub mod notice;
pub mod refresh;
pub mod scheduler;
pub mod session_store;
pub mod state;
pub mod types;

#[cfg(test)]
mod test_support;

pub use classifier::{CredentialRotation, ResponseClassifier};
pub use client::{
    AuthenticatedClient, AuthenticatedClientBuilder, Disposition, Outcome, RequestContext,
    RequestInterceptor, ResponseInterceptor,
};
pub use error::{AuthError, RefreshError, Result};
pub use gate::RequestGate;
pub use manager::{SessionManager, SessionSettings};
pub use notice::{DismissOnceFlag, NoticeDebouncer};
pub use refresh::RefreshCoordinator;
pub use scheduler::{ProactiveRefresh, ProactiveRefreshHandle};
pub use session_store::{SessionStore, SessionWriter, StorageStatus, SESSION_KEYS};
pub use state::{SessionSnapshot, SessionState};
pub use types::{AuthStatus, Credential, RestoreOutcome, StoredSession, UserRecord};
