//! Collaborator seams for the auth broker
//!
//! Defines the two capabilities the token lifecycle core consumes without
//! knowing how they are implemented:
//! - `IdentityProvider`: authorize URL, authorization-code exchange, refresh grant
//! - `ResourceApi`: profile lookup and arbitrary resource fetches with a bearer token
//!
//! Both report failures through `CallError`, which keeps "the credential was
//! rejected" (`Unauthorized`) apart from "the call did not complete"
//! (`Transport`). Only the former may trigger a refresh.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Resource path of the caller's profile document.
pub const PROFILE_PATH: &str = "/v1.0/me";

/// Resource path of the caller's profile photo (raw image bytes).
pub const PHOTO_PATH: &str = "/v1.0/me/photo/$value";

/// Boxed future used by the collaborator traits so they stay dyn-compatible
/// (`Arc<dyn IdentityProvider>`, `Arc<dyn ResourceApi>`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a failed upstream call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The IdP or resource API rejected the credential (401, or `invalid_grant`).
    #[error("credential rejected by upstream")]
    Unauthorized,

    /// Network failure, timeout, 5xx or an undecodable response.
    #[error("upstream call failed: {0}")]
    Transport(String),
}

/// Result alias for collaborator calls.
pub type CallResult<T> = std::result::Result<T, CallError>;

/// Access/refresh pair returned by the IdP on code exchange or refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry of the access token as unix milliseconds, when the IdP reported one
    pub expires_at: Option<u64>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Caller profile as returned by the resource API.
///
/// Only `id` is required. It is the stable identity the credential record is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
}

impl Profile {
    /// Human-readable label cached on the credential record.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.mail.as_deref())
            .or(self.user_principal_name.as_deref())
            .unwrap_or(&self.id)
    }
}

/// A GET against the resource API, relative to its base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl ResourceRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn profile() -> Self {
        Self::get(PROFILE_PATH)
    }

    pub fn photo() -> Self {
        Self::get(PHOTO_PATH)
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }
}

/// Resource API response, passed through to the client unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// The identity provider's authorization and token endpoints.
pub trait IdentityProvider: Send + Sync {
    /// Identifier for logging and health reporting (e.g. "aad")
    fn id(&self) -> &str;

    /// Authorize endpoint URL with the anti-forgery `state` embedded.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange an authorization code for an access/refresh pair.
    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, CallResult<TokenSet>>;

    /// Run the refresh-token grant. Each call is a single attempt.
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, CallResult<TokenSet>>;
}

/// The protected resource API.
pub trait ResourceApi: Send + Sync {
    /// Fetch the caller's profile. Any non-success status other than 401 is `Transport`.
    fn fetch_profile<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, CallResult<Profile>>;

    /// Fetch an arbitrary resource. 401 is `Unauthorized`; every other HTTP
    /// response is returned as-is for passthrough.
    fn fetch_resource<'a>(
        &'a self,
        access_token: &'a str,
        request: &'a ResourceRequest,
    ) -> BoxFuture<'a, CallResult<ResourceResponse>>;
}
