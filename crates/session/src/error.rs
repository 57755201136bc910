//! Error taxonomy for token lifecycle operations

/// Errors from store, flow, exchange and proxy operations.
///
/// Credential rejection by an upstream (`provider::CallError::Unauthorized`)
/// never escapes this crate directly: the proxy turns it into a refresh, and
/// a failed refresh into `ReauthorizationRequired`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown or already-used public/temporary token
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// Missing or malformed caller input
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Callback state does not match the state issued at flow start
    #[error("authorization state mismatch")]
    StateMismatch,

    /// Stored credentials can no longer be refreshed; the client must restart authorization
    #[error("reauthorization required: {0}")]
    ReauthorizationRequired(String),

    /// Network failure or timeout talking to the IdP or resource API
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Record store unavailable or corrupt
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StorageFailure(format!("sqlite: {err}"))
    }
}
