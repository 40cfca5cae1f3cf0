//! Caching forward HTTP proxy library.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::{Dispatcher, HttpServer};
pub use lifecycle::Shutdown;
