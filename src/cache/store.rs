//! Cache store contract.

use async_trait::async_trait;

use super::record::{CacheRecord, CachedResponse};

/// Errors surfaced by store lookups.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connection, prepare or execute failure against the backing store.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    /// No record for the requested URL.
    #[error("no cached response for {0}")]
    NotFound(String),
}

impl StoreError {
    pub(crate) fn unavailable(err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Persistent record store keyed by request URL.
///
/// Only `get` reports failure. The other operations log store errors and
/// degrade to "not cached", "not blacklisted" or "write skipped" so the proxy
/// keeps serving when the store is down.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// True if any record's URL equals `url` exactly.
    async fn exists(&self, url: &str) -> bool;

    /// True if a record for `url` carries the blacklist flag.
    async fn is_blacklisted(&self, url: &str) -> bool;

    /// Load the stored response for `url`.
    async fn get(&self, url: &str) -> Result<CachedResponse, StoreError>;

    /// Store `record`, replacing any previous response for the same URL.
    async fn put(&self, record: CacheRecord);
}
