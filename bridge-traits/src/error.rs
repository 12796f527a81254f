use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The request did not complete within its deadline.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The host could not reach the server (DNS, refused connection, TLS, offline).
    #[error("Connectivity failure: {0}")]
    Connectivity(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// True for failures that say nothing about the credential: the request
    /// never produced an HTTP status.
    pub fn is_network(&self) -> bool {
        matches!(self, BridgeError::Timeout(_) | BridgeError::Connectivity(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
