//! Refresh-and-retry proxy
//!
//! Serves resource calls for a public token. A rejected access token triggers
//! exactly one refresh and exactly one retry; whatever the retry returns is
//! final. Transport failures never trigger a refresh.

use std::sync::Arc;

use provider::{CallError, IdentityProvider, ResourceApi, ResourceRequest, ResourceResponse};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::{CredentialRecord, TokenRotation, UpdateOutcome};
use crate::store::CredentialStore;

pub struct RefreshingProxy {
    idp: Arc<dyn IdentityProvider>,
    resources: Arc<dyn ResourceApi>,
    store: Arc<dyn CredentialStore>,
}

fn record_refresh(outcome: &'static str) {
    metrics::counter!("broker_token_refresh_total", "outcome" => outcome).increment(1);
}

fn upstream_unavailable(operation: &'static str, msg: String) -> Error {
    metrics::counter!("broker_upstream_errors_total", "operation" => operation).increment(1);
    Error::UpstreamUnavailable(msg)
}

impl RefreshingProxy {
    pub fn new(
        idp: Arc<dyn IdentityProvider>,
        resources: Arc<dyn ResourceApi>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            idp,
            resources,
            store,
        }
    }

    /// Perform `request` with the credentials behind `public_token`.
    pub async fn call(
        &self,
        public_token: &str,
        request: &ResourceRequest,
    ) -> Result<ResourceResponse> {
        let record = self.store.find_by_public_token(public_token).await?;

        match self.resources.fetch_resource(&record.access_token, request).await {
            Ok(response) => return Ok(response),
            Err(CallError::Transport(msg)) => {
                return Err(upstream_unavailable("fetch_resource", msg));
            }
            Err(CallError::Unauthorized) => {
                debug!(identity_id = %record.identity_id, path = %request.path, "access token rejected, refreshing");
            }
        }

        let access_token = self.refresh(public_token, &record).await?;

        match self.resources.fetch_resource(&access_token, request).await {
            Ok(response) => Ok(response),
            Err(CallError::Unauthorized) => {
                warn!(identity_id = %record.identity_id, "refreshed access token rejected");
                Err(Error::ReauthorizationRequired(
                    "access token rejected after refresh".into(),
                ))
            }
            Err(CallError::Transport(msg)) => Err(upstream_unavailable("fetch_resource", msg)),
        }
    }

    /// Run the refresh grant once and store the result. Returns the access
    /// token to retry with.
    async fn refresh(&self, public_token: &str, record: &CredentialRecord) -> Result<String> {
        let tokens = match self.idp.refresh(&record.refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                record_refresh("failed");
                if let CallError::Transport(_) = e {
                    metrics::counter!("broker_upstream_errors_total", "operation" => "refresh")
                        .increment(1);
                }
                warn!(identity_id = %record.identity_id, error = %e, "token refresh failed");
                return Err(Error::ReauthorizationRequired(format!("token refresh failed: {e}")));
            }
        };

        let rotation = TokenRotation {
            previous_refresh: record.refresh_token.clone(),
            tokens,
        };
        match self.store.update_tokens(public_token, &rotation).await? {
            UpdateOutcome::Updated => {
                record_refresh("success");
                info!(identity_id = %record.identity_id, "access token refreshed");
                Ok(rotation.tokens.access_token)
            }
            UpdateOutcome::Stale => {
                // Another request rotated the record first; use what it stored.
                record_refresh("stale");
                let current = self.store.find_by_public_token(public_token).await?;
                debug!(identity_id = %record.identity_id, "using concurrently refreshed tokens");
                Ok(current.access_token)
            }
        }
    }
}
