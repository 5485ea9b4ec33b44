//! Error types for profile store operations

/// Errors from profile store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("profile store parse error: {0}")]
    Parse(String),

    #[error("profile not found: {0}")]
    NotFound(String),

    #[error("profile has no session credentials: {0}")]
    MissingCredentials(String),
}

/// Result alias for profile store operations.
pub type Result<T> = std::result::Result<T, Error>;
