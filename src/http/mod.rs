//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Plain HTTP connection (hyper, HTTP/1.1)
//!     → server.rs (Axum router, trace layer)
//!     → request.rs (request ID, cache key, outbound copy)
//!     → dispatcher.rs (blacklist → cache → origin)
//!     → response.rs (replay normalization or verbatim relay)
//!     → Send to client
//!
//! CONNECT connection (detached before hyper)
//!     → dispatcher.rs (blacklist → tunnel)
//! ```

pub mod dispatcher;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::{Dispatcher, Outcome};
pub use headers::HeaderList;
pub use request::RequestId;
pub use server::HttpServer;
