// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::constants;

#[derive(thiserror::Error, Debug)]
pub enum ForwardError {
    #[error("invalid metadata endpoint: {0}")]
    Endpoint(String),
    #[error("metadata request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// A metadata service response, relayed without modification.
#[derive(Debug, Clone)]
pub struct Forwarded {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl IntoResponse for Forwarded {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        if let Some(content_type) = self.content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

/// Relays requests to the real instance metadata service.
///
/// No caching, rewriting or retries: callers of the metadata service already
/// retry on their own.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    endpoint: String,
}

impl Forwarder {
    pub fn new(endpoint: &str) -> Result<Self, ForwardError> {
        let endpoint = endpoint.trim_end_matches('/');
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ForwardError::Endpoint(endpoint.to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(constants::UPSTREAM_TIMEOUT)
            // the metadata service is link-local, never reach it through a proxy
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// GETs `path_and_query` from the metadata service.
    pub async fn get(&self, path_and_query: &str) -> Result<Forwarded, ForwardError> {
        self.forward(Method::GET, path_and_query, &HeaderMap::new())
            .await
    }

    /// Sends the request upstream with the same method, path and query string.
    ///
    /// Only the IMDSv2 session token headers are relayed from `headers`.
    #[tracing::instrument(skip(self, headers))]
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
    ) -> Result<Forwarded, ForwardError> {
        let url = format!("{}{}", self.endpoint, path_and_query);
        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            if name
                .as_str()
                .starts_with(constants::METADATA_TOKEN_HEADER_PREFIX)
            {
                request = request.header(name, value);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response.bytes().await?;

        tracing::trace!("[proxy] metadata responded {} ({} bytes)", status, body.len());

        Ok(Forwarded {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::{get, put};

    async fn stub_metadata() -> String {
        let app = Router::new()
            .route("/latest/meta-data/instance-id", get(|| async { "i-12345" }))
            .route(
                "/latest/meta-data/placement/region",
                get(|headers: HeaderMap| async move {
                    match headers.get("x-aws-ec2-metadata-token") {
                        Some(token) if token == "t0k3n" => (StatusCode::OK, "eu-west-1"),
                        _ => (StatusCode::UNAUTHORIZED, ""),
                    }
                }),
            )
            .route("/latest/api/token", put(|| async { "t0k3n" }))
            .route(
                "/echo",
                get(|uri: axum::http::Uri| async move { uri.to_string() }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{addr}")
    }

    #[test]
    fn test_rejects_endpoint_without_scheme() {
        assert!(matches!(
            Forwarder::new("169.254.169.254"),
            Err(ForwardError::Endpoint(_))
        ));
        let forwarder = Forwarder::new("http://169.254.169.254/").unwrap();
        assert_eq!(forwarder.endpoint(), "http://169.254.169.254");
    }

    #[tokio::test]
    async fn test_relays_body_and_status() {
        let forwarder = Forwarder::new(&stub_metadata().await).unwrap();

        let found = forwarder.get("/latest/meta-data/instance-id").await.unwrap();
        assert_eq!(found.status, StatusCode::OK);
        assert_eq!(found.body, Bytes::from_static(b"i-12345"));

        let missing = forwarder.get("/latest/meta-data/nothing").await.unwrap();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preserves_query_string() {
        let forwarder = Forwarder::new(&stub_metadata().await).unwrap();
        let echoed = forwarder.get("/echo?a=1&b=two").await.unwrap();
        assert_eq!(echoed.body, Bytes::from_static(b"/echo?a=1&b=two"));
    }

    #[tokio::test]
    async fn test_relays_imds_v2_token_headers() {
        let forwarder = Forwarder::new(&stub_metadata().await).unwrap();

        let token = forwarder
            .forward(Method::PUT, "/latest/api/token", &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(token.body, Bytes::from_static(b"t0k3n"));

        let mut headers = HeaderMap::new();
        headers.insert("x-aws-ec2-metadata-token", HeaderValue::from_static("t0k3n"));
        headers.insert("x-unrelated", HeaderValue::from_static("dropped"));
        let region = forwarder
            .forward(Method::GET, "/latest/meta-data/placement/region", &headers)
            .await
            .unwrap();
        assert_eq!(region.status, StatusCode::OK);
        assert_eq!(region.body, Bytes::from_static(b"eu-west-1"));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = Forwarder::new(&format!("http://{addr}")).unwrap();
        assert!(matches!(
            forwarder.get("/latest/meta-data/instance-id").await,
            Err(ForwardError::Request(_))
        ));
    }
}
