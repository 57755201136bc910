//! Prometheus metrics exposition
//!
//! - `broker_requests_total` (counter): labels `route`, `status`
//! - `broker_request_duration_seconds` (histogram): label `route`
//! - `broker_token_refresh_total` (counter): label `outcome`, recorded by the session crate
//! - `broker_upstream_errors_total` (counter): label `operation`, recorded by the session crate

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

use crate::AppState;

const DURATION_METRIC: &str = "broker_request_duration_seconds";

/// Bucket boundaries from 5ms to 30s. Outbound calls time out well inside that.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed request with route and status labels.
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "broker_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(DURATION_METRIC, "route" => route.to_string()).record(duration_secs);
}

/// Process-local counters reported by `/health`.
#[derive(Clone)]
pub struct ServiceCounters {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceCounters {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Middleware recording every routed request. Requests that matched no
/// route are labelled "unmatched" to keep label cardinality bounded.
pub async fn track_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    state.counters.requests_total.fetch_add(1, Ordering::Relaxed);
    if status.is_server_error() {
        state.counters.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    record_request(&route, status.as_u16(), started.elapsed().as_secs_f64());
    response
}
