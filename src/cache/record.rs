//! Cache record model and pre-storage normalization.

use std::io::Read;

use axum::http::HeaderMap;
use flate2::read::MultiGzDecoder;

use crate::http::headers::HeaderList;

/// Error raised while preparing an origin response for storage.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The body claimed `Content-Encoding: gzip` but did not decompress.
    #[error("failed to decompress gzip body: {0}")]
    Decode(#[source] std::io::Error),
}

/// One stored response, keyed by the request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    /// Full request target as seen by the proxy.
    pub url: String,
    /// Method of the request that produced the entry.
    pub method: String,
    /// Inbound request headers, newline-joined `Name: value` lines.
    pub request_headers: String,
    /// Origin response headers as a JSON multimap, without gzip marker.
    pub response_headers: String,
    /// Decompressed response payload.
    pub response_body: Vec<u8>,
    /// Origin status code as received.
    pub status_code: u16,
    /// Managed out of band; never set by the request path.
    pub blacklist: bool,
}

/// The columns needed to replay a stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub response_headers: String,
    pub response_body: Vec<u8>,
    pub status_code: u16,
}

impl CacheRecord {
    /// Build a record from a fetched origin response.
    ///
    /// A gzip-encoded body is decompressed and its `Content-Encoding` header
    /// dropped from the stored set. The caller's live response is untouched.
    pub fn from_origin(
        url: &str,
        method: &str,
        request_headers: &HeaderList,
        status_code: u16,
        response_headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Self, CacheError> {
        let mut headers = HeaderList::from_header_map(response_headers);

        let gzipped = headers
            .get("Content-Encoding")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));

        let response_body = if gzipped {
            let decoded = decompress_gzip(body).map_err(CacheError::Decode)?;
            headers.remove("Content-Encoding");
            decoded
        } else {
            body.to_vec()
        };

        Ok(Self {
            url: url.to_string(),
            method: method.to_string(),
            request_headers: request_headers.to_lines(),
            response_headers: headers.to_json(),
            response_body,
            status_code,
            blacklist: false,
        })
    }
}

/// Fully decompress a (possibly multi-member) gzip stream.
pub fn decompress_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(data);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded)?;
    Ok(decoded)
}
