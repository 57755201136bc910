//! Authorization flow controller
//!
//! `start` hands the caller a state value and the authorize URL carrying it.
//! The caller keeps the state client-side (the broker uses a cookie) and
//! passes it back to `complete` together with the callback parameters.
//!
//! `complete` runs state check → code exchange → profile fetch → upsert.
//! Any failure before the upsert aborts without touching the store.

use std::sync::Arc;

use provider::{CallError, IdentityProvider, ResourceApi};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::record::IssuedTokens;
use crate::state::generate_state;
use crate::store::{CredentialStore, new_token};

/// Query parameters the IdP appends to the callback redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationStart {
    /// Anti-forgery value to store client-side until the callback
    pub state: String,
    pub authorize_url: String,
}

#[derive(Debug, Clone)]
pub struct CompletedAuthorization {
    pub identity_id: String,
    /// Continuation URL with `temporary_token` appended
    pub redirect_url: Url,
}

pub struct AuthorizationFlow {
    idp: Arc<dyn IdentityProvider>,
    resources: Arc<dyn ResourceApi>,
    store: Arc<dyn CredentialStore>,
    continuation_url: Url,
}

impl AuthorizationFlow {
    pub fn new(
        idp: Arc<dyn IdentityProvider>,
        resources: Arc<dyn ResourceApi>,
        store: Arc<dyn CredentialStore>,
        continuation_url: Url,
    ) -> Self {
        Self {
            idp,
            resources,
            store,
            continuation_url,
        }
    }

    pub fn start(&self) -> AuthorizationStart {
        let state = generate_state();
        let authorize_url = self.idp.authorize_url(&state);
        AuthorizationStart {
            state,
            authorize_url,
        }
    }

    /// Handle the IdP callback. `stored_state` is the value kept since `start`;
    /// `None` is rejected like a mismatch.
    pub async fn complete(
        &self,
        params: &CallbackParams,
        stored_state: Option<&str>,
    ) -> Result<CompletedAuthorization> {
        if let Some(error) = params.error.as_deref() {
            let description = params.error_description.as_deref().unwrap_or("");
            warn!(error, description, "identity provider returned an error");
            return Err(Error::InvalidRequest(format!(
                "identity provider returned {error}: {description}"
            )));
        }

        match stored_state {
            Some(expected) if params.state.as_deref() == Some(expected) => {}
            Some(_) => {
                warn!("callback state does not match the issued state");
                return Err(Error::StateMismatch);
            }
            None => {
                warn!("callback arrived without a stored state");
                return Err(Error::StateMismatch);
            }
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::InvalidRequest("missing code parameter".into()))?;

        let tokens = self.idp.exchange_code(code).await.map_err(|e| match e {
            CallError::Unauthorized => {
                Error::InvalidRequest("authorization code rejected by identity provider".into())
            }
            CallError::Transport(msg) => {
                metrics::counter!("broker_upstream_errors_total", "operation" => "exchange_code")
                    .increment(1);
                Error::UpstreamUnavailable(format!("code exchange: {msg}"))
            }
        })?;

        let profile = self
            .resources
            .fetch_profile(&tokens.access_token)
            .await
            .map_err(|e| match e {
                CallError::Unauthorized => Error::InvalidRequest(
                    "issued access token rejected by resource API".into(),
                ),
                CallError::Transport(msg) => {
                    metrics::counter!("broker_upstream_errors_total", "operation" => "fetch_profile")
                        .increment(1);
                    Error::UpstreamUnavailable(format!("profile fetch: {msg}"))
                }
            })?;
        if profile.id.is_empty() {
            return Err(Error::UpstreamUnavailable("profile has no id".into()));
        }

        let temporary_token = new_token();
        let record = self
            .store
            .upsert(
                &profile,
                IssuedTokens::from_authorization(tokens, temporary_token.clone()),
            )
            .await?;

        let mut redirect_url = self.continuation_url.clone();
        redirect_url
            .query_pairs_mut()
            .append_pair("temporary_token", &temporary_token);

        info!(identity_id = %record.identity_id, "authorization completed");
        Ok(CompletedAuthorization {
            identity_id: record.identity_id,
            redirect_url,
        })
    }
}
