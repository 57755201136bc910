//! Configuration types and loading
//!
//! Precedence: env vars > config file > defaults. The config file itself is
//! optional when the environment supplies every required value.
//! The client secret comes from CLIENT_SECRET or client_secret_file and is
//! never read from the TOML directly.

use common::Secret;
use serde::Deserialize;
use session::StoreBackend;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

/// Config file used when neither `--config` nor CONFIG_PATH is given.
pub const DEFAULT_CONFIG_PATH: &str = "auth-broker.toml";

/// Callback route, relative to the broker's public URL.
pub const CALLBACK_PATH: &str = "/auth/azureactivedirectory/callback";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Identity provider registration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub client_id: String,
    pub tenant: String,
    pub authority_host: String,
    /// Resource identifier sent with token requests
    pub resource: String,
    /// Base URL of the resource API; defaults to `resource`
    pub resource_api_url: Option<String>,
    pub scopes: Vec<String>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to CLIENT_SECRET)
    pub client_secret_file: Option<PathBuf>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            tenant: String::new(),
            authority_host: aad_auth::DEFAULT_AUTHORITY_HOST.to_string(),
            resource: aad_auth::DEFAULT_RESOURCE.to_string(),
            resource_api_url: None,
            scopes: aad_auth::DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            client_secret: None,
            client_secret_file: None,
        }
    }
}

/// HTTP listener and client-facing URLs
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub listen_addr: SocketAddr,
    /// Externally reachable base URL of the broker; defaults to `http://<listen_addr>`
    pub public_url: Option<String>,
    /// Where the client is sent with its temporary token after authorization
    pub continuation_url: String,
    /// Outbound call timeout against the IdP and resource API
    pub timeout_secs: u64,
    pub max_connections: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            public_url: None,
            continuation_url: String::new(),
            timeout_secs: 5,
            max_connections: 1000,
        }
    }
}

/// Credential record storage
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("./authData"),
        }
    }
}

/// Non-empty value of an environment variable.
fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn http_url(field: &'static str, raw: &str) -> common::Result<Url> {
    let url = Url::parse(raw).map_err(|e| common::Error::Invalid {
        field,
        reason: format!("{raw}: {e}"),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(common::Error::Invalid {
            field,
            reason: format!("must start with http:// or https://, got: {raw}"),
        });
    }
    Ok(url)
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables
    /// and validate.
    ///
    /// A missing file is only tolerated at the default path.
    ///
    /// Client secret resolution order:
    /// 1. CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        Self::load_from(path, path == Path::new(DEFAULT_CONFIG_PATH))
    }

    fn load_from(path: &Path, optional: bool) -> common::Result<Self> {
        let mut config: Config = if optional && !path.exists() {
            Config::default()
        } else {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        };

        config.apply_env();

        if let Some(secret) = env_value("CLIENT_SECRET") {
            config.identity.client_secret = Secret::from_trimmed(&secret);
        } else if let Some(ref secret_file) = config.identity.client_secret_file {
            let raw = std::fs::read_to_string(secret_file).map_err(|e| common::Error::Invalid {
                field: "identity.client_secret_file",
                reason: format!("failed to read {}: {e}", secret_file.display()),
            })?;
            config.identity.client_secret = Secret::from_trimmed(&raw);
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_value("CLIENT_ID") {
            self.identity.client_id = v;
        }
        if let Some(v) = env_value("TENANT") {
            self.identity.tenant = v;
        }
        if let Some(v) = env_value("BASE_URL") {
            self.broker.continuation_url = v;
        }
    }

    fn validate(&self) -> common::Result<()> {
        if self.identity.client_id.is_empty() {
            return Err(common::Error::Missing("identity.client_id (CLIENT_ID)"));
        }
        if self.identity.tenant.is_empty() {
            return Err(common::Error::Missing("identity.tenant (TENANT)"));
        }
        if self.identity.client_secret.is_none() {
            return Err(common::Error::Missing(
                "client secret (CLIENT_SECRET or identity.client_secret_file)",
            ));
        }
        if self.identity.authority_host.trim().is_empty() {
            return Err(common::Error::Missing("identity.authority_host"));
        }
        if self.identity.resource.trim().is_empty() {
            return Err(common::Error::Missing("identity.resource"));
        }
        http_url("identity.resource_api_url", self.resource_api_url())?;

        if self.broker.continuation_url.is_empty() {
            return Err(common::Error::Missing("broker.continuation_url (BASE_URL)"));
        }
        self.continuation_url()?;
        http_url("broker.public_url", &self.public_url())?;

        if self.broker.timeout_secs == 0 {
            return Err(common::Error::Invalid {
                field: "broker.timeout_secs",
                reason: "must be greater than 0".into(),
            });
        }
        if self.broker.max_connections == 0 {
            return Err(common::Error::Invalid {
                field: "broker.max_connections",
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }

    /// Parsed continuation URL.
    pub fn continuation_url(&self) -> common::Result<Url> {
        http_url("broker.continuation_url", &self.broker.continuation_url)
    }

    /// Broker base URL without a trailing slash.
    pub fn public_url(&self) -> String {
        match &self.broker.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.broker.listen_addr),
        }
    }

    /// Redirect URI registered with the IdP.
    pub fn redirect_uri(&self) -> String {
        format!("{}{CALLBACK_PATH}", self.public_url())
    }

    pub fn resource_api_url(&self) -> &str {
        self.identity
            .resource_api_url
            .as_deref()
            .unwrap_or(&self.identity.resource)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: [&str; 5] = ["CLIENT_ID", "TENANT", "CLIENT_SECRET", "BASE_URL", "CONFIG_PATH"];

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn clear_env() {
        for key in ENV_KEYS {
            unsafe { remove_env(key) };
        }
    }

    fn valid_toml() -> &'static str {
        r#"
[identity]
client_id = "client-123"
tenant = "contoso.onmicrosoft.com"

[broker]
listen_addr = "127.0.0.1:3000"
public_url = "https://broker.example.com/"
continuation_url = "https://app.example.com/signed-in"
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("auth-broker.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_valid_config_applies_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe { set_env("CLIENT_SECRET", "s3cret") };
        let dir = tempfile::tempdir().unwrap();

        let config = Config::load(&write_config(&dir, valid_toml())).unwrap();
        assert_eq!(config.identity.client_id, "client-123");
        assert_eq!(config.identity.authority_host, "login.microsoftonline.com");
        assert_eq!(config.identity.resource, "https://graph.microsoft.com");
        assert_eq!(config.resource_api_url(), "https://graph.microsoft.com");
        assert_eq!(config.identity.scopes, vec!["offline_access", "openid"]);
        assert_eq!(config.broker.timeout_secs, 5);
        assert_eq!(config.broker.max_connections, 1000);
        assert_eq!(config.storage.backend, StoreBackend::Sqlite);
        assert_eq!(config.storage.path, PathBuf::from("./authData"));
        assert_eq!(
            config.redirect_uri(),
            "https://broker.example.com/auth/azureactivedirectory/callback"
        );
        clear_env();
    }

    #[test]
    fn env_overrides_file_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            set_env("CLIENT_ID", "env-client");
            set_env("TENANT", "env-tenant");
            set_env("CLIENT_SECRET", "env-secret");
            set_env("BASE_URL", "https://env.example.com/done");
        }
        let dir = tempfile::tempdir().unwrap();

        let config = Config::load(&write_config(&dir, valid_toml())).unwrap();
        assert_eq!(config.identity.client_id, "env-client");
        assert_eq!(config.identity.tenant, "env-tenant");
        assert_eq!(config.broker.continuation_url, "https://env.example.com/done");
        assert_eq!(
            config.identity.client_secret.as_ref().unwrap().expose(),
            "env-secret"
        );
        clear_env();
    }

    #[test]
    fn environment_alone_is_enough() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            set_env("CLIENT_ID", "env-client");
            set_env("TENANT", "env-tenant");
            set_env("CLIENT_SECRET", "env-secret");
            set_env("BASE_URL", "http://localhost:8080/");
        }

        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml"), true).unwrap();
        assert_eq!(config.public_url(), "http://127.0.0.1:3000");
        assert_eq!(config.broker.continuation_url, "http://localhost:8080/");
        clear_env();
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let result = Config::load(Path::new("/nonexistent/path/auth-broker.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn invalid_toml_is_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(&write_config(&dir, "not valid {{{{ toml"));
        assert!(matches!(result, Err(common::Error::Toml(_))));
    }

    #[test]
    fn client_secret_from_file_is_trimmed() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("secret");
        std::fs::write(&secret_path, "file-secret\n").unwrap();
        let toml = format!(
            "{}\n[storage]\nbackend = \"file\"\n",
            valid_toml().replace(
                "tenant = \"contoso.onmicrosoft.com\"",
                &format!(
                    "tenant = \"contoso.onmicrosoft.com\"\nclient_secret_file = \"{}\"",
                    secret_path.display()
                ),
            )
        );

        let config = Config::load(&write_config(&dir, &toml)).unwrap();
        assert_eq!(
            config.identity.client_secret.as_ref().unwrap().expose(),
            "file-secret"
        );
        assert_eq!(config.storage.backend, StoreBackend::File);
    }

    #[test]
    fn client_secret_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let toml = valid_toml().replace(
            "tenant = \"contoso.onmicrosoft.com\"",
            "tenant = \"contoso.onmicrosoft.com\"\nclient_secret_file = \"/nonexistent/secret\"",
        );
        unsafe { set_env("CLIENT_SECRET", "env-wins") };

        let config = Config::load(&write_config(&dir, &toml)).unwrap();
        assert_eq!(
            config.identity.client_secret.as_ref().unwrap().expose(),
            "env-wins"
        );
        clear_env();
    }

    #[test]
    fn client_secret_is_never_read_from_toml() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let toml = valid_toml().replace(
            "tenant = \"contoso.onmicrosoft.com\"",
            "tenant = \"contoso.onmicrosoft.com\"\nclient_secret = \"inline\"",
        );

        let result = Config::load(&write_config(&dir, &toml));
        assert!(
            matches!(result, Err(common::Error::Missing(field)) if field.contains("CLIENT_SECRET")),
            "inline client_secret must not satisfy the secret requirement"
        );
    }

    #[test]
    fn missing_required_values_are_named() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe { set_env("CLIENT_SECRET", "s3cret") };
        let dir = tempfile::tempdir().unwrap();

        let no_client = valid_toml().replace("client_id = \"client-123\"\n", "");
        let err = Config::load(&write_config(&dir, &no_client)).unwrap_err();
        assert!(err.to_string().contains("CLIENT_ID"), "got: {err}");

        let no_continuation =
            valid_toml().replace("continuation_url = \"https://app.example.com/signed-in\"\n", "");
        let err = Config::load(&write_config(&dir, &no_continuation)).unwrap_err();
        assert!(err.to_string().contains("BASE_URL"), "got: {err}");
        clear_env();
    }

    #[test]
    fn invalid_values_are_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe { set_env("CLIENT_SECRET", "s3cret") };
        let dir = tempfile::tempdir().unwrap();

        let bad_url = valid_toml().replace("https://app.example.com/signed-in", "app.example.com");
        let err = Config::load(&write_config(&dir, &bad_url)).unwrap_err();
        assert!(err.to_string().contains("broker.continuation_url"), "got: {err}");

        let zero_timeout = format!("{}timeout_secs = 0\n", valid_toml());
        let err = Config::load(&write_config(&dir, &zero_timeout)).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"), "got: {err}");

        let zero_conns = format!("{}max_connections = 0\n", valid_toml());
        let err = Config::load(&write_config(&dir, &zero_conns)).unwrap_err();
        assert!(err.to_string().contains("max_connections"), "got: {err}");

        let bad_backend = format!("{}\n[storage]\nbackend = \"postgres\"\n", valid_toml());
        assert!(Config::load(&write_config(&dir, &bad_backend)).is_err());
        clear_env();
    }

    #[test]
    fn resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert_eq!(Config::resolve_path(None), PathBuf::from(DEFAULT_CONFIG_PATH));

        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("/env/path.toml"));
        assert_eq!(
            Config::resolve_path(Some("/cli/wins.toml")),
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        clear_env();
    }
}
