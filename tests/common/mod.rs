//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use caching_proxy::config::ProxyConfig;
use caching_proxy::lifecycle::startup::prepare_store;
use caching_proxy::lifecycle::Shutdown;
use caching_proxy::net::listener::{Listener, ListenerError};
use caching_proxy::HttpServer;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A canned origin response.
#[derive(Clone)]
pub struct Canned {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
    /// Send `Connection: close`; the proxy relays it to the client verbatim.
    pub close: bool,
}

impl Canned {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
            close: true,
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} Canned\r\n", self.status);
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        if self.close {
            head.push_str("Connection: close\r\n");
        }
        head.push_str("\r\n");
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Origin that serves `response` to every request and counts them.
pub async fn start_origin(response: Canned) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let raw = Arc::new(response.to_bytes());

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let counter = counter.clone();
            let raw = raw.clone();
            tokio::spawn(async move {
                if read_head(&mut socket).await.is_some() {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = socket.write_all(&raw).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    (addr, hits)
}

/// Origin that echoes every byte back.
pub async fn start_echo_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut read, mut write) = socket.into_split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

async fn read_head(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        head.extend_from_slice(&buf[..n]);
    }
    Some(head)
}

/// A running proxy backed by a throwaway database.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ListenerError>>,
    _dir: TempDir,
}

impl TestProxy {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client that sends every plain-HTTP request through the proxy.
    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .proxy(reqwest::Proxy::http(self.url()).unwrap())
            .build()
            .unwrap()
    }

    pub fn store(&self) -> caching_proxy::cache::SqliteCacheStore {
        caching_proxy::cache::SqliteCacheStore::new(self.db_path.clone())
    }
}

pub async fn start_proxy() -> TestProxy {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ProxyConfig::default();
    config.cache.database_path = dir.path().join("cache.db");
    config.lifecycle.drain_timeout_secs = 1;
    prepare_store(&config).await.unwrap();

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, 64);

    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config);
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestProxy {
        addr,
        db_path: config.cache.database_path,
        shutdown,
        handle,
        _dir: dir,
    }
}

/// Read from `stream` until `needle` shows up, EOF, or the timeout.
pub async fn read_until(stream: &mut TcpStream, needle: &[u8]) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while !received.windows(needle.len()).any(|w| w == needle) {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
    })
    .await;
    received
}

/// Read until the peer closes, bounded by a timeout.
pub async fn read_to_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received)).await;
    received
}
