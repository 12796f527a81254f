use crate::codec::DecodeError;
use bridge_traits::BridgeError;
use thiserror::Error;

/// Why a refresh call did not produce a new credential.
///
/// `Clone` so a single outcome can be handed to every waiter of the shared
/// refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh endpoint rejected the request with status {status}")]
    Rejected { status: u16 },

    #[error("Refresh response was malformed: {0}")]
    MalformedResponse(String),

    #[error("Refresh request failed: {0}")]
    Network(String),

    #[error("Refresh request timed out")]
    Timeout,

    #[error("Refresh task was aborted")]
    Aborted,

    #[error("Failed to persist refreshed credential: {0}")]
    Storage(String),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Malformed credential: {0}")]
    MalformedCredential(#[from] DecodeError),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(#[from] RefreshError),

    #[error("Request unauthorized (status {status})")]
    Unauthorized { status: u16 },

    #[error("Server is under maintenance")]
    ServerMaintenance,

    #[error("Unexpected response status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("Stored session is corrupted: {0}")]
    StorageCorruption(String),

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Operation cancelled by logout")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl AuthError {
    /// Map a failed HTTP dispatch: no status was received.
    pub fn from_transport(err: BridgeError) -> Self {
        if err.is_network() {
            AuthError::Network(err.to_string())
        } else {
            AuthError::Transport(err.to_string())
        }
    }

    /// Map a failed secure-store call.
    pub fn from_storage(err: BridgeError) -> Self {
        AuthError::SecureStorageUnavailable(err.to_string())
    }

    /// True when retrying later may succeed without user action.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AuthError::ServerMaintenance
            | AuthError::Network(_)
            | AuthError::Transport(_)
            | AuthError::SecureStorageUnavailable(_) => true,
            AuthError::RefreshFailed(e) => matches!(
                e,
                RefreshError::Network(_) | RefreshError::Timeout | RefreshError::Aborted
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
