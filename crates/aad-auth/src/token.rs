//! Token endpoint: authorization-code exchange and refresh
//!
//! Both operations POST a form to `Authority::token_endpoint()` with
//! different grant types. Rejections by the IdP (`invalid_grant`, 401, 403)
//! surface as `Error::InvalidCredentials`; everything else that goes wrong
//! is a transport-level failure.

use std::time::{SystemTime, UNIX_EPOCH};

use common::Secret;
use provider::{BoxFuture, CallResult, IdentityProvider, TokenSet};
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::authority::Authority;
use crate::authorize::build_authorization_url;
use crate::constants::{CLIENT_REQUEST_ID_HEADER, RETURN_CLIENT_REQUEST_ID_HEADER};
use crate::error::{Error, Result};

/// Registered application identity, shared read-only by every request.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
    /// Resource identifier the tokens are requested for
    pub resource: String,
    pub scopes: Vec<String>,
}

/// Token endpoint response for both exchange and refresh.
///
/// The v1 endpoint reports `expires_in` as a numeric string; both forms are accepted.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Convert to a `TokenSet`, keeping `previous_refresh` when the IdP did not rotate it.
    pub fn into_token_set(self, previous_refresh: Option<&str>) -> Result<TokenSet> {
        let refresh_token = match (self.refresh_token, previous_refresh) {
            (Some(rt), _) if !rt.is_empty() => rt,
            (_, Some(prev)) => prev.to_string(),
            _ => {
                return Err(Error::TokenEndpoint(
                    "response did not include a refresh_token (is offline_access granted?)".into(),
                ));
            }
        };
        Ok(TokenSet {
            access_token: self.access_token,
            refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| now_millis().saturating_add(secs.saturating_mul(1000))),
        })
    }
}

/// Error body returned by the token endpoint on failure.
#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn lenient_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    authority: &Authority,
    settings: &ClientSettings,
    code: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(authority.token_endpoint())
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", settings.redirect_uri.as_str()),
            ("client_id", settings.client_id.as_str()),
            ("client_secret", settings.client_secret.expose().as_str()),
            ("resource", settings.resource.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    read_token_response(response, "token exchange").await
}

/// Refresh an access token using a refresh token.
///
/// Each attempt carries a fresh `client-request-id` so IdP-side logs can be
/// correlated with ours.
pub async fn refresh_token(
    client: &reqwest::Client,
    authority: &Authority,
    settings: &ClientSettings,
    refresh: &str,
) -> Result<TokenResponse> {
    let request_id = uuid::Uuid::new_v4().to_string();
    debug!(client_request_id = %request_id, "posting refresh_token grant");

    let response = client
        .post(authority.token_endpoint())
        .header(CLIENT_REQUEST_ID_HEADER, &request_id)
        .header(RETURN_CLIENT_REQUEST_ID_HEADER, "true")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", settings.client_id.as_str()),
            ("client_secret", settings.client_secret.expose().as_str()),
            ("resource", settings.resource.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    read_token_response(response, "token refresh").await
}

async fn read_token_response(response: reqwest::Response, operation: &str) -> Result<TokenResponse> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::Http(format!("{operation} response read failed: {e}")))?;

    if !status.is_success() {
        let detail = serde_json::from_slice::<TokenErrorBody>(&body).ok();
        let rejected = matches!(status.as_u16(), 401 | 403)
            || detail
                .as_ref()
                .is_some_and(|d| d.error == "invalid_grant" || d.error == "interaction_required");
        let message = match detail {
            Some(d) => format!(
                "{operation} returned {status}: {} {}",
                d.error,
                d.error_description.unwrap_or_default()
            ),
            None => format!("{operation} returned {status}"),
        };

        if rejected {
            return Err(Error::InvalidCredentials(message));
        }
        warn!(%status, operation, "token endpoint returned an error");
        return Err(Error::TokenEndpoint(message));
    }

    serde_json::from_slice::<TokenResponse>(&body)
        .map_err(|e| Error::TokenEndpoint(format!("invalid {operation} response: {e}")))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// `IdentityProvider` backed by the Azure AD token and authorize endpoints.
pub struct AadClient {
    http: reqwest::Client,
    authority: Authority,
    settings: ClientSettings,
}

impl AadClient {
    /// `http` should carry the outbound timeout; a timeout surfaces as a transport failure.
    pub fn new(http: reqwest::Client, authority: Authority, settings: ClientSettings) -> Self {
        Self {
            http,
            authority,
            settings,
        }
    }
}

impl IdentityProvider for AadClient {
    fn id(&self) -> &str {
        "aad"
    }

    fn authorize_url(&self, state: &str) -> String {
        build_authorization_url(&self.authority, &self.settings, state)
    }

    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, CallResult<TokenSet>> {
        Box::pin(async move {
            let response = exchange_code(&self.http, &self.authority, &self.settings, code).await?;
            Ok(response.into_token_set(None)?)
        })
    }

    fn refresh<'a>(&'a self, refresh: &'a str) -> BoxFuture<'a, CallResult<TokenSet>> {
        Box::pin(async move {
            let response = refresh_token(&self.http, &self.authority, &self.settings, refresh).await?;
            Ok(response.into_token_set(Some(refresh))?)
        })
    }
}
