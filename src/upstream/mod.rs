//! Origin access subsystem.
//!
//! # Data Flow
//! ```text
//! dispatcher (cache miss)
//!     → fetcher.rs (outbound HTTP/1.1 request, shared client)
//!     → origin server
//!     → OriginResponse (status, headers, fully buffered body)
//! ```
//!
//! # Design Decisions
//! - One client shared by every request; it pools keep-alive connections
//! - Redirects are never followed; the origin's answer is relayed as-is
//! - Bodies are buffered so the cached copy and the live copy are independent

pub mod fetcher;

pub use fetcher::{FetchError, HyperFetcher, OriginFetcher, OriginResponse};
