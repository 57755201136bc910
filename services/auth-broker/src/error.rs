//! HTTP mapping of session failures
//!
//! Every failed request gets a JSON body
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`, except
//! `ReauthorizationRequired`, which redirects the client back to `/auth`.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use session::Error;
use tracing::{error, warn};

/// A session failure bound to the request it ended.
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub request_id: String,
    /// Target of the reauthorization redirect
    pub auth_url: String,
}

impl ApiError {
    pub fn new(error: Error, request_id: &str, auth_url: &str) -> Self {
        Self {
            error,
            request_id: request_id.to_string(),
            auth_url: auth_url.to_string(),
        }
    }
}

/// Status code and `type` field for a session error.
pub fn classify(error: &Error) -> (StatusCode, &'static str) {
    match error {
        Error::RecordNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        Error::StateMismatch => (StatusCode::BAD_REQUEST, "state_mismatch"),
        Error::ReauthorizationRequired(_) => (StatusCode::SEE_OTHER, "reauthorization_required"),
        Error::UpstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
        Error::StorageFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_failure"),
    }
}

pub fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = classify(&self.error);
        match &self.error {
            Error::ReauthorizationRequired(reason) => {
                warn!(request_id = %self.request_id, reason = %reason, "redirecting client to reauthorize");
                return Redirect::to(&self.auth_url).into_response();
            }
            Error::StorageFailure(msg) => {
                error!(request_id = %self.request_id, error = %msg, "storage failure");
            }
            other if status.is_server_error() => {
                warn!(request_id = %self.request_id, error = %other, "request failed upstream");
            }
            _ => {}
        }
        // Storage details stay in the logs
        let message = match &self.error {
            Error::StorageFailure(_) => "credential storage unavailable".to_string(),
            other => other.to_string(),
        };
        error_response(status, kind, &message, &self.request_id)
    }
}
