//! Azure AD style identity-provider client
//!
//! Everything the broker needs to talk to the IdP and the protected resource API:
//! 1. `Authority` resolves the token/authorize endpoints from host + tenant
//! 2. `authorize::build_authorization_url()` embeds the anti-forgery state in the redirect
//! 3. `AadClient` builds the authorize URL and runs the code-exchange and
//!    refresh grants against the token endpoint (`IdentityProvider`)
//! 4. `GraphClient` performs bearer-authenticated calls against the resource
//!    API (`ResourceApi`)
//!
//! The crate holds no state of its own. Credentials live in the session store.

pub mod authority;
pub mod authorize;
pub mod constants;
pub mod error;
pub mod graph;
pub mod token;

pub use authority::{Authority, resolve};
pub use authorize::build_authorization_url;
pub use constants::*;
pub use error::{Error, Result};
pub use graph::GraphClient;
pub use token::{AadClient, ClientSettings, TokenResponse, exchange_code, refresh_token};
