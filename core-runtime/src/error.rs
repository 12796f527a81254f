use thiserror::Error;

/// Failures while assembling the session runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// A config value failed validation, or logging was initialised twice.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required bridge was not supplied and no desktop default is compiled in.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
