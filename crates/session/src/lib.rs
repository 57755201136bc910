//! Token lifecycle core of the auth broker
//!
//! Owns the credential records and every state transition on them:
//! 1. `AuthorizationFlow::start()` issues the anti-forgery state and authorize URL
//! 2. `AuthorizationFlow::complete()` validates the callback, exchanges the
//!    code, fetches the profile and upserts the record with a fresh temporary token
//! 3. `TokenExchange::exchange()` trades the temporary token for a public
//!    token, exactly once
//! 4. `RefreshingProxy::call()` serves resource calls for a public token,
//!    refreshing and retrying once when the access token is rejected
//!
//! Records are kept in a `CredentialStore` (JSON file or SQLite). IdP and
//! resource API access go through the `provider` traits.

pub mod error;
pub mod exchange;
pub mod flow;
pub mod record;
pub mod retry;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use exchange::TokenExchange;
pub use flow::{AuthorizationFlow, AuthorizationStart, CallbackParams, CompletedAuthorization};
pub use record::{CredentialRecord, IssuedTokens, TokenRotation, UpdateOutcome};
pub use retry::RefreshingProxy;
pub use state::generate_state;
pub use store::{CredentialStore, FileStore, SqliteStore, StoreBackend, open_store};
