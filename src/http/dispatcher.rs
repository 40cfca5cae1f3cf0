//! Per-request orchestration.
//!
//! # Data Flow
//! ```text
//! request ─▶ blacklist? ──yes──▶ 403
//!               │ no
//!               ▼
//!           CONNECT? ──yes──▶ tunnel (hijacked connections only)
//!               │ no
//!               ▼
//!           cached? ──yes──▶ replay (normalized)
//!               │ no
//!               ▼
//!           fetch origin ─▶ store ─▶ relay (verbatim)
//! ```
//!
//! The store and fetcher are injected so either side can be replaced.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::{IntoResponse, Response};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::Instrument;

use crate::cache::{CacheRecord, CacheStore};
use crate::error::ProxyError;
use crate::http::headers::HeaderList;
use crate::http::request::{cache_key, outbound_request, RequestId};
use crate::http::response;
use crate::net::hijack::HijackedConn;
use crate::net::tunnel;
use crate::observability::metrics;
use crate::upstream::OriginFetcher;

/// How a request was answered, for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Blacklisted,
    Hit,
    Miss,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Blacklisted => "blacklisted",
            Outcome::Hit => "hit",
            Outcome::Miss => "miss",
            Outcome::Error => "error",
        }
    }
}

/// Routes each request through blacklist, cache and origin.
pub struct Dispatcher {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn OriginFetcher>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn CacheStore>, fetcher: Arc<dyn OriginFetcher>) -> Self {
        Self { store, fetcher }
    }

    /// Answer a request arriving on a hyper-managed connection.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let start = Instant::now();
        let method = request.method().to_string();
        let url = cache_key(request.uri());
        let span = tracing::info_span!(
            "proxy_request",
            request_id = %RequestId::new(),
            method = %method,
            url = %url
        );

        let (response, outcome) = match self.dispatch(url, request).instrument(span.clone()).await {
            Ok(answered) => answered,
            Err(e) => {
                let outcome = match e {
                    ProxyError::Blacklisted(_) => Outcome::Blacklisted,
                    _ => Outcome::Error,
                };
                span.in_scope(|| match outcome {
                    Outcome::Blacklisted => tracing::info!("Rejected blacklisted URL"),
                    _ => tracing::error!(error = %e, "Request failed"),
                });
                (e.into_response(), outcome)
            }
        };

        metrics::record_request(&method, response.status().as_u16(), outcome.as_str(), start);
        response
    }

    async fn dispatch(
        &self,
        url: String,
        request: Request<Body>,
    ) -> Result<(Response, Outcome), ProxyError> {
        if self.store.is_blacklisted(&url).await {
            metrics::record_blacklisted();
            return Err(ProxyError::Blacklisted(url));
        }

        // Only the first request of a connection can be detached.
        if request.method() == Method::CONNECT {
            return Err(ProxyError::HijackUnsupported);
        }

        if self.store.exists(&url).await {
            match self.store.get(&url).await {
                Ok(cached) => {
                    metrics::record_cache_lookup(true);
                    tracing::debug!("Serving cached response");
                    return Ok((response::replay(cached), Outcome::Hit));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Cached entry unreadable, fetching from origin");
                }
            }
        }
        metrics::record_cache_lookup(false);

        let method = request.method().to_string();
        let request_headers = HeaderList::from_header_map(request.headers());
        let origin = self.fetcher.fetch(outbound_request(request)).await?;
        tracing::info!(status = origin.status.as_u16(), "Fetched from origin");

        match CacheRecord::from_origin(
            &url,
            &method,
            &request_headers,
            origin.status.as_u16(),
            &origin.headers,
            &origin.body,
        )
        .map_err(ProxyError::from)
        {
            Ok(record) => self.store.put(record).await,
            Err(e) => tracing::warn!(error = %e, "Response not cached"),
        }

        Ok((response::live(origin), Outcome::Miss))
    }

    /// Serve a connection detached for `CONNECT`.
    ///
    /// Rejections are written as raw responses; an unreachable origin closes
    /// the connection without a reply.
    pub async fn handle_tunnel<S>(&self, mut conn: HijackedConn<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let target = conn.target().to_string();
        let span = tracing::info_span!(
            "tunnel",
            request_id = %RequestId::new(),
            target = %target
        );

        async move {
            // Targets are authorities, so this only matches rows keyed that way.
            if self.store.is_blacklisted(&target).await {
                metrics::record_blacklisted();
                metrics::record_tunnel("rejected");
                tracing::info!("Rejected blacklisted tunnel target");
                reject(&mut conn, ProxyError::Blacklisted(target)).await;
                return;
            }

            let addr = match tunnel::parse_target(&target) {
                Ok(addr) => addr.to_string(),
                Err(e) => {
                    metrics::record_tunnel("bad_request");
                    tracing::warn!(error = %e, "Rejected tunnel target");
                    reject(&mut conn, ProxyError::from(e)).await;
                    return;
                }
            };

            let origin = match tunnel::dial(&addr).await {
                Ok(origin) => origin,
                Err(e) => {
                    metrics::record_tunnel("dial_failed");
                    tracing::warn!(error = %e, "Closing tunnel client");
                    return;
                }
            };

            metrics::record_tunnel("established");
            tracing::debug!("Tunnel established");

            let (stream, pending) = conn.detach();
            match tunnel::relay(stream, pending, origin).await {
                Ok(stats) => {
                    metrics::record_tunnel_bytes(stats.client_to_origin, stats.origin_to_client);
                    tracing::info!(
                        client_to_origin = stats.client_to_origin,
                        origin_to_client = stats.origin_to_client,
                        "Tunnel closed"
                    );
                }
                Err(e) => tracing::debug!(error = %e, "Tunnel ended with error"),
            }
        }
        .instrument(span)
        .await
    }
}

async fn reject<S>(conn: &mut HijackedConn<S>, error: ProxyError)
where
    S: AsyncWrite + Unpin,
{
    let raw = response::raw_status(error.status_code(), error.client_message());
    let stream = conn.stream_mut();
    if let Err(e) = stream.write_all(&raw).await {
        tracing::debug!(error = %e, "Client gone before rejection was written");
        return;
    }
    let _ = stream.shutdown().await;
}
