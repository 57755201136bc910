//! Authority resolution
//!
//! Builds IdP endpoint URLs from a login host and tenant. Kept separate from
//! the protocol code so each deployment can point at its own host/tenant.

use std::fmt;

use crate::constants::{AUTHORIZE_PATH, TOKEN_PATH};

/// Login host + tenant pair identifying the IdP endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    host: String,
    tenant: String,
}

impl Authority {
    pub fn new(host: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            tenant: tenant.into(),
        }
    }

    /// Token endpoint, the target of code-exchange and refresh POSTs.
    pub fn token_endpoint(&self) -> String {
        format!("{}{TOKEN_PATH}", self.base())
    }

    /// Authorize endpoint the browser is redirected to.
    pub fn authorize_endpoint(&self) -> String {
        format!("{}{AUTHORIZE_PATH}", self.base())
    }

    /// `https://<host>/<tenant>`. A host that already carries a scheme is used as-is.
    fn base(&self) -> String {
        let host = self.host.trim_end_matches('/');
        let tenant = self.tenant.trim_matches('/');
        if host.starts_with("https://") || host.starts_with("http://") {
            format!("{host}/{tenant}")
        } else {
            format!("https://{host}/{tenant}")
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token_endpoint())
    }
}

/// Token endpoint URL for `host` and `tenant`.
pub fn resolve(host: &str, tenant: &str) -> String {
    Authority::new(host, tenant).token_endpoint()
}
