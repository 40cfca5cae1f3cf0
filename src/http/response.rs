//! Response assembly for the client.
//!
//! # Responsibilities
//! - Replay a stored response with cache normalization applied
//! - Relay a fresh origin response verbatim
//! - Render raw status responses for connections taken off hyper
//!
//! # Design Decisions
//! - Normalization applies to replays only; the first fetch is relayed
//!   exactly as the origin sent it
//! - Stored framing headers are dropped on replay; the stored body is
//!   decompressed so the origin's length no longer holds

use axum::body::Body;
use axum::http::{Response, StatusCode};

use crate::cache::CachedResponse;
use crate::http::headers::HeaderList;
use crate::upstream::OriginResponse;

/// Preamble written to a hijacked client once the origin is connected.
pub const TUNNEL_ESTABLISHED: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Status to serve for a stored status code.
///
/// A stored 304 is meaningless without the original conditional request, so
/// it is served as 200.
pub fn replay_status(code: u16) -> StatusCode {
    match StatusCode::from_u16(code) {
        Ok(StatusCode::NOT_MODIFIED) => StatusCode::OK,
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(status = code, "Stored status code is invalid");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Apply replay rules to stored headers.
pub fn normalize_replay_headers(headers: &mut HeaderList, body: &[u8]) {
    if !headers.contains("Content-Type") {
        let content_type = if contains_html(body) {
            HTML_CONTENT_TYPE
        } else {
            TEXT_CONTENT_TYPE
        };
        headers.set("Content-Type", content_type);
    }

    // Forced downloads of cached content
    headers.remove("Content-Disposition");
    // Stored bodies are already decoded
    headers.remove("Content-Encoding");

    headers.remove("Content-Length");
    headers.remove("Transfer-Encoding");
}

fn contains_html(body: &[u8]) -> bool {
    body.windows(5).any(|window| window == b"<html")
}

/// Build the client response for a cache hit.
pub fn replay(cached: CachedResponse) -> Response<Body> {
    let mut headers = HeaderList::from_json(&cached.response_headers).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Stored response headers are unreadable");
        HeaderList::new()
    });
    normalize_replay_headers(&mut headers, &cached.response_body);

    let mut response = Response::new(Body::from(cached.response_body));
    *response.status_mut() = replay_status(cached.status_code);
    *response.headers_mut() = headers.to_header_map();
    response
}

/// Build the client response for a fresh fetch, headers untouched.
pub fn live(origin: OriginResponse) -> Response<Body> {
    let mut response = Response::new(Body::from(origin.body));
    *response.status_mut() = origin.status;
    *response.headers_mut() = origin.headers;
    response
}

/// Raw HTTP/1.1 response for a connection the server no longer manages.
pub fn raw_status(status: StatusCode, message: &str) -> Vec<u8> {
    let body = format!("{message}\n");
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {TEXT_CONTENT_TYPE}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body.len(),
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderMap, HeaderValue};
    use http_body_util::BodyExt;

    fn cached(headers: &str, body: &[u8], status: u16) -> CachedResponse {
        CachedResponse {
            response_headers: headers.to_string(),
            response_body: body.to_vec(),
            status_code: status,
        }
    }

    #[test]
    fn not_modified_is_served_as_ok() {
        assert_eq!(replay_status(304), StatusCode::OK);
        assert_eq!(replay_status(404), StatusCode::NOT_FOUND);
        assert_eq!(replay_status(200), StatusCode::OK);
        assert_eq!(replay_status(0), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn content_type_is_synthesized_from_body() {
        let mut headers = HeaderList::new();
        normalize_replay_headers(&mut headers, b"<!doctype html><html><body></body></html>");
        assert_eq!(headers.get("Content-Type"), Some(HTML_CONTENT_TYPE));

        let mut headers = HeaderList::new();
        normalize_replay_headers(&mut headers, b"{\"json\": true}");
        assert_eq!(headers.get("Content-Type"), Some(TEXT_CONTENT_TYPE));

        let mut headers = HeaderList::parse_lines("Content-Type: image/png");
        normalize_replay_headers(&mut headers, b"<html");
        assert_eq!(headers.get("content-type"), Some("image/png"));
    }

    #[test]
    fn download_and_encoding_headers_are_stripped() {
        let mut headers = HeaderList::parse_lines(
            "Content-Disposition: attachment; filename=x.bin\nContent-Encoding: gzip\nContent-Length: 12\nX-Keep: 1",
        );
        normalize_replay_headers(&mut headers, b"abc");
        assert!(!headers.contains("Content-Disposition"));
        assert!(!headers.contains("Content-Encoding"));
        assert!(!headers.contains("Content-Length"));
        assert_eq!(headers.get("X-Keep"), Some("1"));
    }

    #[tokio::test]
    async fn replay_builds_normalized_response() {
        let response = replay(cached(
            r#"{"Content-Disposition":["attachment"],"X-Origin":["a","b"]}"#,
            b"<html>cached</html>",
            304,
        ));

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], HTML_CONTENT_TYPE);
        assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
        assert_eq!(response.headers().get_all("x-origin").iter().count(), 2);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"<html>cached</html>");
    }

    #[test]
    fn unreadable_stored_headers_still_replay() {
        let response = replay(cached("Content-Type: text/html", b"plain", 200));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], TEXT_CONTENT_TYPE);
    }

    #[test]
    fn live_response_is_verbatim() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("attachment"));

        let response = live(OriginResponse {
            status: StatusCode::NOT_MODIFIED,
            headers,
            body: bytes::Bytes::new(),
        });

        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
        assert_eq!(response.headers()[header::CONTENT_DISPOSITION], "attachment");
    }

    #[test]
    fn raw_status_is_a_complete_response() {
        let raw = String::from_utf8(raw_status(StatusCode::FORBIDDEN, "URL is blacklisted")).unwrap();
        assert!(raw.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(raw.contains("Content-Length: 19\r\n"));
        assert!(raw.ends_with("\r\n\r\nURL is blacklisted\n"));
    }
}
