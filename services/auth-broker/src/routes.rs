//! Broker HTTP handlers
//!
//! Thin adapters between axum extractors and the session operations. Every
//! handler that can fail tags its work with a `req_<uuid>` request id, which
//! is echoed in the JSON error body.

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use provider::{ResourceRequest, ResourceResponse};
use serde::Deserialize;
use session::{CallbackParams, Error};
use tracing::{Instrument, info, info_span};

use crate::AppState;
use crate::error::ApiError;

/// Cookie holding the anti-forgery state between `/auth` and the callback.
pub const STATE_COOKIE: &str = "state";

/// Query parameter accepted as a fallback carrier of the public token.
pub const PUBLIC_TOKEN_PARAM: &str = "public_token";

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

fn fail(state: &AppState, error: Error, request_id: &str) -> Response {
    ApiError::new(error, request_id, &state.auth_url).into_response()
}

fn state_cookie(state: &AppState, value: String) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.secure_cookies)
        .build()
}

/// `GET /auth`: start authorization and send the browser to the IdP.
pub async fn auth(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    let start = state.flow.start();
    let jar = jar.add(state_cookie(&state, start.state));
    (jar, Redirect::to(&start.authorize_url))
}

/// `GET /auth_url`: like `/auth`, but return the authorize URL as text.
pub async fn auth_url(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, String) {
    let start = state.flow.start();
    let jar = jar.add(state_cookie(&state, start.state));
    (jar, start.authorize_url)
}

/// `GET /auth/azureactivedirectory/callback`
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let request_id = new_request_id();
    let stored_state = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(Cookie::build(STATE_COOKIE).path("/"));

    let result = state
        .flow
        .complete(&params, stored_state.as_deref())
        .instrument(info_span!("callback", %request_id))
        .await;

    match result {
        Ok(done) => (jar, Redirect::to(done.redirect_url.as_str())).into_response(),
        Err(e) => (jar, fail(&state, e, &request_id)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExchangeParams {
    pub temporary_token: Option<String>,
}

/// `POST /auth_with_temporary_token?temporary_token=...`: returns the public token as text.
pub async fn exchange_temporary_token(
    State(state): State<AppState>,
    Query(params): Query<ExchangeParams>,
) -> Response {
    let request_id = new_request_id();
    let temporary_token = params.temporary_token.unwrap_or_default();

    let result = state
        .exchange
        .exchange(&temporary_token)
        .instrument(info_span!("exchange", %request_id))
        .await;

    match result {
        Ok(public_token) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            public_token,
        )
            .into_response(),
        Err(e) => fail(&state, e, &request_id),
    }
}

/// `GET /get_me`
pub async fn get_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    proxy(&state, &headers, query.as_deref(), ResourceRequest::profile()).await
}

/// `GET /get_user_photo`
pub async fn get_user_photo(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    proxy(&state, &headers, query.as_deref(), ResourceRequest::photo()).await
}

/// `GET /resource/{*path}`: any resource API path.
pub async fn resource(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let request = ResourceRequest::get(format!("/{}", path.trim_start_matches('/')));
    proxy(&state, &headers, query.as_deref(), request).await
}

/// Public token from the Authorization header (raw or `Bearer <token>`),
/// falling back to the `public_token` query parameter.
pub fn public_token(headers: &HeaderMap, query: &[(String, String)]) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .map(|v| match v.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
            _ => v,
        })
        .filter(|v| !v.is_empty());

    from_header
        .or_else(|| {
            query
                .iter()
                .find(|(k, v)| k == PUBLIC_TOKEN_PARAM && !v.is_empty())
                .map(|(_, v)| v.as_str())
        })
        .map(str::to_string)
}

async fn proxy(
    state: &AppState,
    headers: &HeaderMap,
    raw_query: Option<&str>,
    request: ResourceRequest,
) -> Response {
    let request_id = new_request_id();
    let query: Vec<(String, String)> = raw_query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let Some(token) = public_token(headers, &query) else {
        return fail(
            state,
            Error::InvalidRequest("missing public token".into()),
            &request_id,
        );
    };

    let forwarded = query
        .into_iter()
        .filter(|(k, _)| k != PUBLIC_TOKEN_PARAM)
        .collect();
    let request = request.with_query(forwarded);

    let span = info_span!("proxy", %request_id, path = %request.path);
    match state.proxy.call(&token, &request).instrument(span.clone()).await {
        Ok(response) => {
            span.in_scope(|| info!(status = response.status, "resource call completed"));
            passthrough(response)
        }
        Err(e) => fail(state, e, &request_id),
    }
}

/// Resource API response relayed as-is.
fn passthrough(upstream: ResourceResponse) -> Response {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, upstream.body).into_response();
    match upstream
        .content_type
        .and_then(|v| HeaderValue::from_str(&v).ok())
    {
        Some(content_type) => {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        None => {
            response.headers_mut().remove(header::CONTENT_TYPE);
        }
    }
    response
}
