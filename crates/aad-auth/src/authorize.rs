//! Authorize endpoint URL construction
//!
//! The browser is sent here with the anti-forgery `state` embedded. The IdP
//! echoes the state back on the callback alongside the authorization code.

use url::Url;

use crate::authority::Authority;
use crate::token::ClientSettings;

/// Build the authorize URL with all required OAuth parameters.
pub fn build_authorization_url(
    authority: &Authority,
    settings: &ClientSettings,
    state: &str,
) -> String {
    let scope = settings.scopes.join(" ");
    let params = [
        ("client_id", settings.client_id.as_str()),
        ("response_type", "code"),
        ("redirect_uri", settings.redirect_uri.as_str()),
        ("response_mode", "query"),
        ("resource", settings.resource.as_str()),
        ("scope", scope.as_str()),
        ("state", state),
    ];

    let endpoint = authority.authorize_endpoint();
    match Url::parse_with_params(&endpoint, params) {
        Ok(url) => url.into(),
        // The endpoint comes from validated config; fall back to plain
        // concatenation rather than failing the redirect.
        Err(_) => {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params)
                .finish();
            format!("{endpoint}?{query}")
        }
    }
}
