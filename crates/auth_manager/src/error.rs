//! Credential lifecycle error types

use thiserror::Error;

/// Errors surfaced by the credential lifecycle.
///
/// Clonable so one refresh outcome can be fanned out to every queued waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// A local precondition failed; no network call was attempted.
    #[error("missing session data: {0}")]
    MissingCredentials(String),

    /// The backend rejected the refresh credential. Fatal for the session.
    #[error("refresh rejected: {0}")]
    Unauthorized(String),

    /// Transient failure; stored credentials are untouched and a later
    /// attempt may succeed.
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Network(err.to_string())
    }
}

impl From<reqwest_middleware::Error> for AuthError {
    fn from(err: reqwest_middleware::Error) -> Self {
        AuthError::Network(err.to_string())
    }
}
