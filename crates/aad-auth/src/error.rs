//! Error types for IdP and resource API calls

use provider::CallError;

/// Errors from token endpoint and resource API operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token endpoint error: {0}")]
    TokenEndpoint(String),

    #[error("credentials rejected: {0}")]
    InvalidCredentials(String),

    #[error("invalid resource URL: {0}")]
    InvalidUrl(String),
}

/// Result alias for IdP operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for CallError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidCredentials(_) => CallError::Unauthorized,
            other => CallError::Transport(other.to_string()),
        }
    }
}
