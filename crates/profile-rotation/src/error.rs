//! Error types for the rotation collaborators
//!
//! The rotation decision itself never fails; these errors come from fetching
//! usage, swapping credentials and priming sessions.

/// Errors from rotation collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("usage fetch failed: {0}")]
    Fetch(String),

    #[error("usage endpoint rejected credentials: {0}")]
    Unauthorized(String),

    #[error("profile has no session credentials: {0}")]
    MissingCredentials(String),

    #[error("activation failed: {0}")]
    Activation(String),

    #[error("session prime failed: {0}")]
    Prime(String),

    #[error(transparent)]
    Store(#[from] claude_profiles::Error),
}

impl Error {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Fetch(_) => "fetch",
            Error::Unauthorized(_) => "unauthorized",
            Error::MissingCredentials(_) => "missing_credentials",
            Error::Activation(_) => "activation",
            Error::Prime(_) => "prime",
            Error::Store(_) => "store",
        }
    }
}

/// Result alias for rotation collaborators.
pub type Result<T> = std::result::Result<T, Error>;
