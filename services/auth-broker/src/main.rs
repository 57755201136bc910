//! Delegated authentication broker
//!
//! Single-binary service that:
//! 1. Runs the authorization-code flow against Azure AD on the client's behalf
//! 2. Stores the resulting credentials and hands the client a temporary token
//! 3. Exchanges the temporary token, once, for a long-lived public token
//! 4. Proxies resource API calls for a public token, refreshing on 401

mod config;
mod error;
mod metrics;
mod routes;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use aad_auth::{AadClient, Authority, ClientSettings, GraphClient};
use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use provider::{IdentityProvider, ResourceApi};
use session::{AuthorizationFlow, CredentialStore, RefreshingProxy, TokenExchange};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::config::{CALLBACK_PATH, Config};
use crate::metrics::ServiceCounters;

/// Upper bound on draining in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    flow: Arc<AuthorizationFlow>,
    exchange: Arc<TokenExchange>,
    proxy: Arc<RefreshingProxy>,
    idp_id: String,
    store_backend: &'static str,
    /// `<public_url>/auth`, the reauthorization redirect target
    auth_url: String,
    secure_cookies: bool,
    counters: ServiceCounters,
    prometheus: PrometheusHandle,
}

impl AppState {
    fn new(
        idp: Arc<dyn IdentityProvider>,
        resources: Arc<dyn ResourceApi>,
        store: Arc<dyn CredentialStore>,
        continuation_url: Url,
        public_url: &str,
        prometheus: PrometheusHandle,
    ) -> Self {
        Self {
            flow: Arc::new(AuthorizationFlow::new(
                idp.clone(),
                resources.clone(),
                store.clone(),
                continuation_url,
            )),
            exchange: Arc::new(TokenExchange::new(store.clone())),
            proxy: Arc::new(RefreshingProxy::new(idp.clone(), resources, store.clone())),
            idp_id: idp.id().to_string(),
            store_backend: store.backend(),
            auth_url: format!("{public_url}/auth"),
            secure_cookies: public_url.starts_with("https://"),
            counters: ServiceCounters::new(),
            prometheus,
        }
    }
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/auth", get(routes::auth))
        .route("/auth_url", get(routes::auth_url))
        .route(CALLBACK_PATH, get(routes::callback))
        .route(
            "/auth_with_temporary_token",
            post(routes::exchange_temporary_token),
        )
        .route("/get_me", get(routes::get_me))
        .route("/get_user_photo", get(routes::get_user_photo))
        .route("/resource/{*path}", get(routes::resource))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            metrics::track_requests,
        ))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is read before the subscriber so it can carry LOG_LEVEL
    let dotenv_path = dotenvy::dotenv().ok();

    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting auth-broker");
    if let Some(path) = dotenv_path {
        info!(path = %path.display(), "loaded environment file");
    }

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let public_url = config.public_url();
    info!(
        listen_addr = %config.broker.listen_addr,
        public_url = %public_url,
        tenant = %config.identity.tenant,
        authority_host = %config.identity.authority_host,
        storage = config.storage.backend.as_str(),
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.broker.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let authority = Authority::new(&config.identity.authority_host, &config.identity.tenant);
    info!(token_endpoint = %authority, "identity provider resolved");

    let settings = ClientSettings {
        client_id: config.identity.client_id.clone(),
        client_secret: config
            .identity
            .client_secret
            .clone()
            .context("client secret not configured")?,
        redirect_uri: config.redirect_uri(),
        resource: config.identity.resource.clone(),
        scopes: config.identity.scopes.clone(),
    };
    let idp = Arc::new(AadClient::new(http.clone(), authority, settings));
    let resources = Arc::new(GraphClient::new(http, config.resource_api_url()));

    let store = session::open_store(config.storage.backend, &config.storage.path)
        .await
        .with_context(|| {
            format!(
                "failed to open {} store at {}",
                config.storage.backend.as_str(),
                config.storage.path.display()
            )
        })?;

    let continuation_url = config
        .continuation_url()
        .context("invalid continuation_url")?;

    let app_state = AppState::new(
        idp,
        resources,
        store,
        continuation_url,
        &public_url,
        prometheus_handle,
    );
    let app = build_router(app_state, config.broker.max_connections);

    let listen_addr = config.broker.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: JSON with status, uptime, request counters and store backend.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "identity_provider": state.idp_id,
        "store_backend": state.store_backend,
        "uptime_seconds": state.counters.started_at.elapsed().as_secs(),
        "requests_served": state.counters.requests_total.load(Ordering::Relaxed),
        "errors_total": state.counters.errors_total.load(Ordering::Relaxed),
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
