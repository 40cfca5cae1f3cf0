//! Inbound request handling.
//!
//! # Responsibilities
//! - Derive the cache key from the request target
//! - Assign a request ID for log correlation
//! - Build the outbound copy forwarded to the origin
//!
//! # Design Decisions
//! - The request ID lives in tracing spans only; forwarded headers are
//!   exactly the client's
//! - The body is streamed through, never buffered on the way out

use axum::body::Body;
use axum::http::{Request, Uri};
use uuid::Uuid;

/// Unique identifier for one proxied request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cache key for a request target: the target exactly as received.
pub fn cache_key(uri: &Uri) -> String {
    uri.to_string()
}

/// Rebuild `request` for the origin: same method, target, headers and body.
///
/// Repeated headers are appended, so multi-valued headers such as `Cookie`
/// survive intact.
pub fn outbound_request(request: Request<Body>) -> Request<Body> {
    let (parts, body) = request.into_parts();

    let mut outbound = Request::new(body);
    *outbound.method_mut() = parts.method;
    *outbound.uri_mut() = parts.uri;

    let headers = outbound.headers_mut();
    for (name, value) in parts.headers.iter() {
        headers.append(name.clone(), value.clone());
    }

    outbound
}
