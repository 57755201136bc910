//! Azure AD endpoint constants
//!
//! Defaults for a public-cloud tenant using the v1 endpoints, which take a
//! `resource` parameter rather than resource-qualified scopes.

/// Public-cloud login host
pub const DEFAULT_AUTHORITY_HOST: &str = "login.microsoftonline.com";

/// Token endpoint path, appended to `https://<host>/<tenant>`
pub const TOKEN_PATH: &str = "/oauth2/token";

/// Authorize endpoint path, appended to `https://<host>/<tenant>`
pub const AUTHORIZE_PATH: &str = "/oauth2/authorize";

/// Resource identifier (and base URL) of Microsoft Graph
pub const DEFAULT_RESOURCE: &str = "https://graph.microsoft.com";

/// `offline_access` is what makes the IdP issue a refresh token.
pub const DEFAULT_SCOPES: &[&str] = &["offline_access", "openid"];

/// Correlation header attached to every refresh attempt
pub const CLIENT_REQUEST_ID_HEADER: &str = "client-request-id";

/// Asks the IdP to echo the correlation id back on the response
pub const RETURN_CLIENT_REQUEST_ID_HEADER: &str = "client-return-client-request-id";
