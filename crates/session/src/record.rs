//! Credential record and the token values flowing into the store

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use provider::{Profile, TokenSet};
use serde::{Deserialize, Serialize};

/// One record per authenticated identity.
///
/// `public_token` and `temporary_token` are `None` when unset. Each is unique
/// among the records that carry a value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Stable IdP identity (profile `id`), the record key
    pub identity_id: String,
    /// Cached profile label, informational only
    pub display_name: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub public_token: Option<String>,
    #[serde(default)]
    pub temporary_token: Option<String>,
    /// Access token expiry as unix milliseconds, when the IdP reported one
    #[serde(default)]
    pub expires_at: Option<u64>,
    /// Last write as unix milliseconds
    pub updated_at: u64,
}

impl CredentialRecord {
    /// Fresh record for an identity seen for the first time.
    pub fn new(profile: &Profile, tokens: IssuedTokens) -> Self {
        Self {
            identity_id: profile.id.clone(),
            display_name: profile.label().to_string(),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            public_token: tokens.public_token,
            temporary_token: tokens.temporary_token,
            expires_at: tokens.expires_at,
            updated_at: now_millis(),
        }
    }

    /// Apply a re-authorization. The public token is left as it was.
    pub fn reauthorize(&mut self, profile: &Profile, tokens: IssuedTokens) {
        self.display_name = profile.label().to_string();
        self.access_token = tokens.access_token;
        self.refresh_token = tokens.refresh_token;
        self.temporary_token = tokens.temporary_token;
        self.expires_at = tokens.expires_at;
        self.updated_at = now_millis();
    }

    /// Apply a refreshed token pair.
    pub fn rotate(&mut self, tokens: &TokenSet) {
        self.access_token = tokens.access_token.clone();
        self.refresh_token = tokens.refresh_token.clone();
        self.expires_at = tokens.expires_at;
        self.updated_at = now_millis();
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("identity_id", &self.identity_id)
            .field("display_name", &self.display_name)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("public_token", &self.public_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "temporary_token",
                &self.temporary_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Every token value the store accepts on upsert, in one shape.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub temporary_token: Option<String>,
    pub public_token: Option<String>,
    pub expires_at: Option<u64>,
}

impl IssuedTokens {
    /// Tokens from a completed code exchange, paired with a new temporary token.
    pub fn from_authorization(tokens: TokenSet, temporary_token: String) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            temporary_token: Some(temporary_token),
            public_token: None,
            expires_at: tokens.expires_at,
        }
    }
}

impl fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedTokens")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// A refreshed token pair plus the refresh token it was obtained from.
///
/// The store applies the rotation only while the record still holds
/// `previous_refresh`, so a slower concurrent refresh cannot overwrite a newer pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRotation {
    pub previous_refresh: String,
    pub tokens: TokenSet,
}

/// Result of `CredentialStore::update_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// The record was rotated by someone else since it was read; nothing written
    Stale,
}

/// Current time as unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
