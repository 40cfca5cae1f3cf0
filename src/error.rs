//! Proxy error taxonomy.
//!
//! Subsystem errors are folded into [`ProxyError`], which decides what the
//! client sees. Store and decode failures never reach the client; they are
//! logged where they happen and the request degrades to pass-through.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::cache::{CacheError, StoreError};
use crate::net::tunnel::TunnelError;
use crate::upstream::FetchError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("{0} is blacklisted")]
    Blacklisted(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upstream(#[from] FetchError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("connection cannot be taken over for tunneling")]
    HijackUnsupported,

    #[error(transparent)]
    Decode(#[from] CacheError),
}

impl ProxyError {
    /// Status code reported to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Blacklisted(_) => StatusCode::FORBIDDEN,
            ProxyError::Tunnel(TunnelError::BadRequest(_)) => StatusCode::BAD_REQUEST,
            ProxyError::Store(_)
            | ProxyError::Upstream(_)
            | ProxyError::Tunnel(_)
            | ProxyError::HijackUnsupported
            | ProxyError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short plain-text body for the client; internal detail stays in logs.
    pub fn client_message(&self) -> &'static str {
        match self {
            ProxyError::Blacklisted(_) => "URL is blacklisted",
            ProxyError::Upstream(FetchError::InvalidTarget(_)) => "Error creating proxy request",
            ProxyError::Upstream(FetchError::Request(_)) => "Error sending proxy request",
            ProxyError::Upstream(FetchError::Body(_)) => "Error reading response body",
            ProxyError::Tunnel(TunnelError::BadRequest(_)) => "Invalid host",
            ProxyError::Tunnel(_) => "Error establishing server connection",
            ProxyError::HijackUnsupported => "Hijacking not supported",
            ProxyError::Store(_) | ProxyError::Decode(_) => "Internal proxy error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            ],
            format!("{}\n", self.client_message()),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status() {
        assert_eq!(
            ProxyError::Blacklisted("http://x/".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ProxyError::from(TunnelError::BadRequest(String::new())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::HijackUnsupported.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::from(FetchError::InvalidTarget("/".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_carries_plain_text_message() {
        let response = ProxyError::Blacklisted("http://x/".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }
}
