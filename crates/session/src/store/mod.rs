//! Credential record store
//!
//! `CredentialStore` is the only place records are mutated. Both backends
//! serialize `upsert` and `promote_temporary_to_public` so concurrent callers
//! on the same identity or temporary token never interleave, and
//! `update_tokens` is a compare-and-set on the refresh token it replaces.

#[cfg(test)]
pub(crate) mod contract;
mod file;
mod sqlite;

use std::path::Path;
use std::sync::Arc;

use provider::{BoxFuture, Profile};
use serde::{Deserialize, Serialize};

pub use file::FileStore;
pub use sqlite::SqliteStore;

use crate::error::{Error, Result};
use crate::record::{CredentialRecord, IssuedTokens, TokenRotation, UpdateOutcome};

/// Durable mapping from identity to credential record.
pub trait CredentialStore: Send + Sync {
    /// Backend name for health reporting ("file" or "sqlite")
    fn backend(&self) -> &'static str;

    /// Create the record for `profile.id`, or update its token fields and
    /// temporary token in place. The public token is never touched.
    fn upsert<'a>(
        &'a self,
        profile: &'a Profile,
        tokens: IssuedTokens,
    ) -> BoxFuture<'a, Result<CredentialRecord>>;

    fn find_by_public_token<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<CredentialRecord>>;

    fn find_by_temporary_token<'a>(
        &'a self,
        token: &'a str,
    ) -> BoxFuture<'a, Result<CredentialRecord>>;

    /// Assign a fresh public token to the record holding `temporary_token` and
    /// clear the temporary token, as one check-and-set.
    fn promote_temporary_to_public<'a>(
        &'a self,
        temporary_token: &'a str,
    ) -> BoxFuture<'a, Result<String>>;

    /// Store a refreshed pair for the record holding `public_token`, provided
    /// its refresh token is still `rotation.previous_refresh`.
    fn update_tokens<'a>(
        &'a self,
        public_token: &'a str,
        rotation: &'a TokenRotation,
    ) -> BoxFuture<'a, Result<UpdateOutcome>>;
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    File,
    #[default]
    Sqlite,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreBackend::File => "file",
            StoreBackend::Sqlite => "sqlite",
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "json" => Ok(StoreBackend::File),
            "sqlite" | "sqlite3" => Ok(StoreBackend::Sqlite),
            other => Err(format!("unknown storage backend '{other}' (expected file or sqlite)")),
        }
    }
}

/// Open the configured backend at `path`.
pub async fn open_store(backend: StoreBackend, path: &Path) -> Result<Arc<dyn CredentialStore>> {
    match backend {
        StoreBackend::File => Ok(Arc::new(FileStore::load(path.to_path_buf()).await?)),
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(path)?)),
    }
}

/// New opaque token for temporary and public handles.
pub(crate) fn new_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Empty tokens never match a record.
pub(crate) fn reject_empty(token: &str, kind: &str) -> Result<()> {
    if token.is_empty() {
        return Err(Error::RecordNotFound(format!("empty {kind} token")));
    }
    Ok(())
}
