//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! origin response (status, headers, body)
//!     → record.rs (gzip normalization, header encoding)
//!     → store.rs (CacheStore contract)
//!     → sqlite.rs (one connection per operation)
//!
//! replay:
//!     sqlite.rs get → CachedResponse → http::response (normalization)
//! ```
//!
//! # Design Decisions
//! - Keyed by the exact request URL, no normalization
//! - Writes are upserts; a URL holds one response
//! - Store failures degrade to pass-through, never fail the request
//! - The blacklist flag lives on the cached row and is managed out of band

pub mod record;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use record::{CacheError, CacheRecord, CachedResponse};
pub use sqlite::{CacheSummary, SqliteCacheStore};
pub use store::{CacheStore, StoreError};
