//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Create the Axum router around the dispatcher
//! - Accept connections and classify their first request
//! - Hand `CONNECT` connections to the tunnel path
//! - Serve everything else over HTTP/1.1 with hyper
//! - Drain open connections on shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, extract::State, http::Request, response::Response, Router};
use hyper::server::conn::http1;
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::cache::SqliteCacheStore;
use crate::config::ProxyConfig;
use crate::http::dispatcher::Dispatcher;
use crate::net::connection::ConnectionTracker;
use crate::net::hijack::{classify, Transport};
use crate::net::listener::{Listener, ListenerError};
use crate::upstream::HyperFetcher;

/// HTTP server for the caching proxy.
pub struct HttpServer {
    dispatcher: Arc<Dispatcher>,
    router: Router,
    connections: ConnectionTracker,
    max_head_bytes: usize,
    drain_timeout: Duration,
}

impl HttpServer {
    /// Create a server backed by the configured SQLite store and a hyper client.
    pub fn new(config: &ProxyConfig) -> Self {
        let store = SqliteCacheStore::new(config.cache.database_path.clone())
            .with_busy_timeout(Duration::from_millis(config.cache.busy_timeout_ms));
        let dispatcher = Dispatcher::new(Arc::new(store), Arc::new(HyperFetcher::new()));
        Self::with_dispatcher(config, dispatcher)
    }

    /// Create a server around an existing dispatcher.
    pub fn with_dispatcher(config: &ProxyConfig, dispatcher: Dispatcher) -> Self {
        let dispatcher = Arc::new(dispatcher);
        let router = Self::build_router(dispatcher.clone());
        Self {
            dispatcher,
            router,
            connections: ConnectionTracker::new(),
            max_head_bytes: config.listener.max_head_bytes,
            drain_timeout: Duration::from_secs(config.lifecycle.drain_timeout_secs),
        }
    }

    /// Every path and method lands on the proxy handler.
    fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(dispatcher)
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn connections(&self) -> ConnectionTracker {
        self.connections.clone()
    }

    /// Run the server until `shutdown` fires, then drain open connections.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "HTTP server starting");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Accept(e)) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    let guard = self.connections.track();
                    let span = tracing::info_span!(
                        "connection",
                        connection_id = %guard.id(),
                        peer_addr = %peer_addr
                    );
                    let dispatcher = self.dispatcher.clone();
                    let router = self.router.clone();
                    let max_head_bytes = self.max_head_bytes;
                    let shutdown = shutdown.resubscribe();

                    tokio::spawn(
                        async move {
                            let _permit = permit;
                            let _guard = guard;
                            serve_connection(stream, dispatcher, router, max_head_bytes, shutdown).await;
                        }
                        .instrument(span),
                    );
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }

        drop(listener);
        let remaining = self.connections.drain(self.drain_timeout).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Drain timeout elapsed with connections still open");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    router: Router,
    max_head_bytes: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    match classify(stream, max_head_bytes).await {
        Ok(Transport::Tunnel(conn)) => dispatcher.handle_tunnel(conn).await,
        Ok(Transport::Http(stream)) => {
            let service = TowerToHyperService::new(router);
            let conn = http1::Builder::new()
                .title_case_headers(true)
                .serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        tracing::debug!(error = %e, "Connection ended with error");
                    }
                }
                _ = shutdown.recv() => {
                    conn.as_mut().graceful_shutdown();
                    if let Err(e) = conn.await {
                        tracing::debug!(error = %e, "Connection ended with error during shutdown");
                    }
                }
            }
        }
        Ok(Transport::Closed) => tracing::trace!("Peer closed before sending a request"),
        Err(e) => tracing::debug!(error = %e, "Failed to read request head"),
    }
}

/// Main proxy handler.
async fn proxy_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    request: Request<Body>,
) -> Response {
    dispatcher.handle(request).await
}
