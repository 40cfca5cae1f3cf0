//! Transport classification and connection take-over.
//!
//! The first request head on a new connection is read here, before hyper
//! sees any byte. A `CONNECT` head detaches the raw socket so the tunnel can
//! own it outright; anything else is replayed in front of the socket and
//! handed to hyper untouched.
//!
//! Connections already managed by hyper cannot be detached. A `CONNECT`
//! arriving there (a later request on a keep-alive connection) is refused by
//! the dispatcher.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use httparse::Status;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

const CONNECT_PREFIX: &[u8] = b"CONNECT ";
const MAX_HEADERS: usize = 64;

/// What a freshly accepted connection turned out to be.
pub enum Transport {
    /// First request is `CONNECT`; the socket is detached from HTTP handling.
    Tunnel(HijackedConn),
    /// Plain HTTP; serve with hyper.
    Http(PrefixedStream),
    /// Peer closed before sending a request.
    Closed,
}

/// A client connection taken over from HTTP handling.
#[derive(Debug)]
pub struct HijackedConn<S = TcpStream> {
    stream: S,
    target: String,
    pending: Bytes,
}

impl<S> HijackedConn<S> {
    /// `pending` holds bytes the client sent after the request head.
    pub fn new(stream: S, target: impl Into<String>, pending: Bytes) -> Self {
        Self {
            stream,
            target: target.into(),
            pending,
        }
    }

    /// Raw request target of the `CONNECT` line.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Take the raw duplex stream and any already-buffered client bytes.
    pub fn detach(self) -> (S, Bytes) {
        (self.stream, self.pending)
    }
}

/// Read enough of the first request to decide how to serve the connection.
///
/// Stops as soon as the method is known not to be `CONNECT`, or after
/// `max_head_bytes` without a complete head (hyper then rejects it).
pub async fn classify(mut stream: TcpStream, max_head_bytes: usize) -> std::io::Result<Transport> {
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        let checked = buf.len().min(CONNECT_PREFIX.len());
        if buf[..checked] != CONNECT_PREFIX[..checked] {
            return Ok(Transport::Http(PrefixedStream::new(stream, buf.freeze())));
        }

        if let Some(head) = parse_connect_head(&buf) {
            return Ok(match head {
                ConnectHead::Complete { len, target } => {
                    let pending = buf.split_off(len).freeze();
                    Transport::Tunnel(HijackedConn::new(stream, target, pending))
                }
                ConnectHead::Malformed => Transport::Http(PrefixedStream::new(stream, buf.freeze())),
            });
        }

        if buf.len() >= max_head_bytes {
            return Ok(Transport::Http(PrefixedStream::new(stream, buf.freeze())));
        }

        if stream.read_buf(&mut buf).await? == 0 {
            return Ok(if buf.is_empty() {
                Transport::Closed
            } else {
                Transport::Http(PrefixedStream::new(stream, buf.freeze()))
            });
        }
    }
}

enum ConnectHead {
    Complete { len: usize, target: String },
    Malformed,
}

/// `None` while the head is still incomplete.
fn parse_connect_head(buf: &[u8]) -> Option<ConnectHead> {
    if buf.len() < CONNECT_PREFIX.len() {
        return None;
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(buf) {
        Ok(Status::Complete(len)) => Some(ConnectHead::Complete {
            len,
            target: request.path.unwrap_or_default().to_string(),
        }),
        Ok(Status::Partial) => None,
        Err(_) => Some(ConnectHead::Malformed),
    }
}

/// A socket with bytes already read from it replayed first.
pub struct PrefixedStream<S = TcpStream> {
    inner: S,
    prefix: Bytes,
}

impl<S> PrefixedStream<S> {
    pub fn new(inner: S, prefix: Bytes) -> Self {
        Self { inner, prefix }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            let chunk = self.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
