//! One-time temporary → public token exchange

use std::sync::Arc;

use tracing::info;

use crate::error::{Error, Result};
use crate::store::CredentialStore;

pub struct TokenExchange {
    store: Arc<dyn CredentialStore>,
}

impl TokenExchange {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Trade `temporary_token` for a new public token. A second call with the
    /// same temporary token fails with `RecordNotFound`.
    pub async fn exchange(&self, temporary_token: &str) -> Result<String> {
        if temporary_token.is_empty() {
            return Err(Error::InvalidRequest("missing temporary_token".into()));
        }
        let public_token = self.store.promote_temporary_to_public(temporary_token).await?;
        info!("temporary token exchanged for public token");
        Ok(public_token)
    }
}
