//! CONNECT tunnel relay.
//!
//! ```text
//! Handshaking: validate host:port → dial origin
//! Relaying:    write "HTTP/1.1 200 OK\r\n\r\n" → splice bytes both ways
//! Closed:      either peer closed or an I/O error on either leg
//! ```
//!
//! Tunneled bytes are never inspected.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::uri::Authority;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::http::response::TUNNEL_ESTABLISHED;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// The CONNECT target has no host.
    #[error("invalid CONNECT target {0:?}")]
    BadRequest(String),

    #[error("failed to connect to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("tunnel I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Byte counts for a finished tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to origin, including bytes buffered before the tunnel opened.
    pub client_to_origin: u64,
    pub origin_to_client: u64,
}

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Validate a CONNECT target and return it as the dial address.
pub fn parse_target(raw: &str) -> Result<&str, TunnelError> {
    let target = raw.trim();
    match target.parse::<Authority>() {
        Ok(authority) if !authority.host().is_empty() => Ok(target),
        _ => Err(TunnelError::BadRequest(raw.to_string())),
    }
}

/// Open the origin leg of the tunnel.
pub async fn dial(target: &str) -> Result<TcpStream, TunnelError> {
    TcpStream::connect(target).await.map_err(|source| TunnelError::Dial {
        target: target.to_string(),
        source,
    })
}

/// Splice `client` and `origin` until either side is done.
///
/// `pending` is forwarded to the origin first. The client-to-origin copy runs
/// on a spawned task and the origin-to-client copy on the caller's task. The
/// first direction to finish ends the tunnel: the other copy is cancelled and
/// both sockets close. Counts cover every byte written before that point.
pub async fn relay<C>(client: C, pending: Bytes, origin: TcpStream) -> Result<RelayStats, TunnelError>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut origin_read, mut origin_write) = origin.into_split();

    client_write.write_all(TUNNEL_ESTABLISHED).await?;
    client_write.flush().await?;

    if !pending.is_empty() {
        origin_write.write_all(&pending).await?;
    }

    let client_to_origin = Arc::new(AtomicU64::new(pending.len() as u64));
    let upstream_count = client_to_origin.clone();
    let mut upstream = tokio::spawn(async move {
        let copied = copy_counted(&mut client_read, &mut origin_write, &upstream_count).await;
        let _ = origin_write.shutdown().await;
        copied
    });

    let origin_to_client = AtomicU64::new(0);
    tokio::select! {
        copied = copy_counted(&mut origin_read, &mut client_write, &origin_to_client) => {
            if let Err(e) = copied {
                tracing::debug!(error = %e, "Origin to client copy ended with error");
            }
        }
        joined = &mut upstream => {
            if let Ok(Err(e)) = joined {
                tracing::debug!(error = %e, "Client to origin copy ended with error");
            }
        }
    }
    let _ = client_write.shutdown().await;

    // Dropping the spawned half closes the origin's write side.
    upstream.abort();
    let _ = upstream.await;

    Ok(RelayStats {
        client_to_origin: client_to_origin.load(Ordering::Relaxed),
        origin_to_client: origin_to_client.load(Ordering::Relaxed),
    })
}

/// Copy until EOF, adding each chunk to `copied` once it has been written.
async fn copy_counted<R, W>(reader: &mut R, writer: &mut W, copied: &AtomicU64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        copied.fetch_add(n as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn empty_target_is_rejected() {
        assert!(matches!(parse_target(""), Err(TunnelError::BadRequest(_))));
        assert!(matches!(parse_target("   "), Err(TunnelError::BadRequest(_))));
        assert!(matches!(parse_target(":443"), Err(TunnelError::BadRequest(_))));
        assert_eq!(parse_target("example.com:443").unwrap(), "example.com:443");
        assert_eq!(parse_target("[::1]:8443").unwrap(), "[::1]:8443");
    }

    #[tokio::test]
    async fn dial_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(matches!(
            dial(&addr.to_string()).await,
            Err(TunnelError::Dial { .. })
        ));
    }

    #[tokio::test]
    async fn preamble_precedes_relayed_bytes() {
        // Echo origin that greets first.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hello").await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
        });

        let (client, mut peer) = tokio::io::duplex(1024);
        let origin = dial(&addr.to_string()).await.unwrap();
        let relay = tokio::spawn(relay(client, Bytes::from_static(b"early"), origin));

        let mut received = vec![0u8; TUNNEL_ESTABLISHED.len() + 5];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..TUNNEL_ESTABLISHED.len()], TUNNEL_ESTABLISHED);
        assert_eq!(&received[TUNNEL_ESTABLISHED.len()..], b"hello");

        let mut echoed = [0u8; 5];
        peer.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"early");

        drop(peer);
        let stats = relay.await.unwrap().unwrap();
        assert_eq!(stats.origin_to_client, 10);
        assert_eq!(stats.client_to_origin, 5);
    }

    #[tokio::test]
    async fn client_close_ends_tunnel() {
        // Origin that accepts and never speaks or closes.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let (client, mut peer) = tokio::io::duplex(1024);
        let origin = dial(&addr.to_string()).await.unwrap();
        let relay = tokio::spawn(relay(client, Bytes::new(), origin));

        let mut preamble = vec![0u8; TUNNEL_ESTABLISHED.len()];
        peer.read_exact(&mut preamble).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(peer);

        let stats = tokio::time::timeout(Duration::from_secs(3), relay)
            .await
            .expect("relay did not finish after client closed")
            .unwrap()
            .unwrap();
        assert_eq!(stats, RelayStats::default());
    }

    #[tokio::test]
    async fn client_bytes_are_counted_exactly() {
        // Origin that reads a fixed amount and then closes.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let origin_task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = vec![0u8; 3 + 4000];
            socket.read_exact(&mut received).await.unwrap();
            received
        });

        let (client, mut peer) = tokio::io::duplex(64 * 1024);
        let origin = dial(&addr.to_string()).await.unwrap();
        let relay = tokio::spawn(relay(client, Bytes::from_static(b"pre"), origin));

        let mut preamble = vec![0u8; TUNNEL_ESTABLISHED.len()];
        peer.read_exact(&mut preamble).await.unwrap();
        let payload = vec![b'x'; 4000];
        peer.write_all(&payload).await.unwrap();

        let received = origin_task.await.unwrap();
        assert_eq!(&received[..3], b"pre");
        assert_eq!(&received[3..], &payload[..]);

        let stats = tokio::time::timeout(Duration::from_secs(3), relay)
            .await
            .expect("relay did not finish after origin closed")
            .unwrap()
            .unwrap();
        assert_eq!(stats.client_to_origin, 4003);
        assert_eq!(stats.origin_to_client, 0);
    }
}
