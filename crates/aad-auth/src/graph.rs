//! Resource API client (Microsoft Graph style)
//!
//! Bearer-authenticated GETs relative to a base URL. A 401 is reported as
//! `CallError::Unauthorized` so the caller can refresh; other responses are
//! returned verbatim.

use provider::{BoxFuture, CallError, CallResult, Profile, ResourceApi, ResourceRequest, ResourceResponse};
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::error::Error;

pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Absolute URL for `request`, with its query pairs appended.
    pub fn url_for(&self, request: &ResourceRequest) -> crate::Result<Url> {
        let base = self.base_url.trim_end_matches('/');
        let path = request.path.trim_start_matches('/');
        let mut url = Url::parse(&format!("{base}/{path}"))
            .map_err(|e| Error::InvalidUrl(format!("{base}/{path}: {e}")))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }

    async fn get(&self, access_token: &str, request: &ResourceRequest) -> CallResult<ResourceResponse> {
        let url = self.url_for(request)?;
        debug!(path = %request.path, "calling resource API");

        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Http(format!("resource request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(CallError::Unauthorized);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("resource response read failed: {e}")))?;

        Ok(ResourceResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

impl ResourceApi for GraphClient {
    fn fetch_profile<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, CallResult<Profile>> {
        Box::pin(async move {
            let response = self.get(access_token, &ResourceRequest::profile()).await?;
            if !(200..300).contains(&response.status) {
                return Err(CallError::Transport(format!(
                    "profile endpoint returned {}",
                    response.status
                )));
            }
            serde_json::from_slice::<Profile>(&response.body)
                .map_err(|e| CallError::Transport(format!("invalid profile response: {e}")))
        })
    }

    fn fetch_resource<'a>(
        &'a self,
        access_token: &'a str,
        request: &'a ResourceRequest,
    ) -> BoxFuture<'a, CallResult<ResourceResponse>> {
        Box::pin(self.get(access_token, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode as AxumStatus, header};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use tokio::net::TcpListener;

    fn bearer(headers: &HeaderMap) -> String {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    }

    async fn me(headers: HeaderMap) -> impl IntoResponse {
        match bearer(&headers).as_str() {
            "Bearer good" => (
                AxumStatus::OK,
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"id":"u1","displayName":"User One"}"#,
            ),
            "Bearer broken" => (
                AxumStatus::OK,
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"displayName":"no id"}"#,
            ),
            "Bearer flaky" => (
                AxumStatus::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                "oops",
            ),
            _ => (
                AxumStatus::UNAUTHORIZED,
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"error":{"code":"InvalidAuthenticationToken"}}"#,
            ),
        }
    }

    async fn photo(headers: HeaderMap) -> impl IntoResponse {
        if bearer(&headers) != "Bearer good" {
            return (AxumStatus::UNAUTHORIZED, [(header::CONTENT_TYPE, "text/plain")], Vec::new());
        }
        (
            AxumStatus::OK,
            [(header::CONTENT_TYPE, "image/jpeg")],
            vec![0xFF, 0xD8, 0xFF, 0xE0],
        )
    }

    async fn start_graph_server() -> GraphClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/v1.0/me", get(me))
            .route("/v1.0/me/photo/{value}", get(photo))
            .route(
                "/v1.0/missing",
                get(|| async { (AxumStatus::NOT_FOUND, r#"{"error":"nope"}"#) }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        GraphClient::new(reqwest::Client::new(), format!("http://{addr}/"))
    }

    #[test]
    fn url_for_joins_path_and_query() {
        let client = GraphClient::new(reqwest::Client::new(), "https://graph.microsoft.com/");
        let req = ResourceRequest::get("/v1.0/me/messages")
            .with_query(vec![("$top".into(), "5".into())]);
        let url = client.url_for(&req).unwrap();
        assert_eq!(url.as_str(), "https://graph.microsoft.com/v1.0/me/messages?%24top=5");
    }

    #[test]
    fn url_for_keeps_photo_value_segment() {
        let client = GraphClient::new(reqwest::Client::new(), "https://graph.microsoft.com");
        let url = client.url_for(&ResourceRequest::photo()).unwrap();
        assert_eq!(url.as_str(), "https://graph.microsoft.com/v1.0/me/photo/$value");
    }

    #[tokio::test]
    async fn fetch_profile_decodes_identity() {
        let client = start_graph_server().await;
        let profile = client.fetch_profile("good").await.unwrap();
        assert_eq!(profile.id, "u1");
        assert_eq!(profile.label(), "User One");
    }

    #[tokio::test]
    async fn fetch_profile_401_is_unauthorized() {
        let client = start_graph_server().await;
        assert_eq!(
            client.fetch_profile("stale").await.unwrap_err(),
            CallError::Unauthorized
        );
    }

    #[tokio::test]
    async fn fetch_profile_5xx_and_bad_body_are_transport() {
        let client = start_graph_server().await;
        assert!(matches!(
            client.fetch_profile("flaky").await.unwrap_err(),
            CallError::Transport(_)
        ));
        assert!(matches!(
            client.fetch_profile("broken").await.unwrap_err(),
            CallError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn fetch_resource_passes_binary_through() {
        let client = start_graph_server().await;
        let response = client
            .fetch_resource("good", &ResourceRequest::photo())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(response.body.as_ref(), &[0xFF, 0xD8, 0xFF, 0xE0]);
    }

    #[tokio::test]
    async fn fetch_resource_returns_non_401_errors_verbatim() {
        let client = start_graph_server().await;
        let response = client
            .fetch_resource("good", &ResourceRequest::get("/v1.0/missing"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.body.as_ref(), br#"{"error":"nope"}"#);
    }

    #[tokio::test]
    async fn unreachable_resource_api_is_transport() {
        let client = GraphClient::new(reqwest::Client::new(), "http://127.0.0.1:1");
        let err = client
            .fetch_resource("good", &ResourceRequest::profile())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Transport(_)));
    }
}
