//! Origin fetcher.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

/// A fully buffered origin response.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Error type for origin fetches.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The inbound request target cannot be forwarded.
    #[error("request target {0:?} is not an absolute URI")]
    InvalidTarget(String),

    /// Connecting to or talking with the origin failed.
    #[error("origin request failed: {0}")]
    Request(#[source] hyper_util::client::legacy::Error),

    /// The origin response body could not be read to the end.
    #[error("failed to read origin response body: {0}")]
    Body(#[source] hyper::Error),
}

/// Issues an outbound request and returns the complete response.
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    async fn fetch(&self, request: Request<Body>) -> Result<OriginResponse, FetchError>;
}

/// Fetcher backed by hyper's pooled HTTP/1.1 client.
#[derive(Clone)]
pub struct HyperFetcher {
    client: Client<HttpConnector, Body>,
}

impl HyperFetcher {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for HyperFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OriginFetcher for HyperFetcher {
    async fn fetch(&self, request: Request<Body>) -> Result<OriginResponse, FetchError> {
        let uri = request.uri();
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(FetchError::InvalidTarget(uri.to_string()));
        }

        let response = self
            .client
            .request(request)
            .await
            .map_err(FetchError::Request)?;

        let (parts, body) = response.into_parts();
        let body = body.collect().await.map_err(FetchError::Body)?.to_bytes();

        Ok(OriginResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}
