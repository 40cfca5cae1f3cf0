//! SQLite-backed cache store.
//!
//! Every operation opens its own connection and closes it when done; there
//! is no pool and no transaction spanning two operations. Operations run on
//! tokio-rusqlite's background thread so request tasks never block on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_rusqlite::rusqlite::{
    self, types::ValueRef, OptionalExtension, Transaction, TransactionBehavior,
};
use tokio_rusqlite::{params, Connection};

use super::record::{CacheRecord, CachedResponse};
use super::store::{CacheStore, StoreError};

/// Default time a writer waits on a locked database before giving up.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Row summary used by the operator CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSummary {
    pub url: String,
    pub method: String,
    pub status_code: i64,
    pub body_len: usize,
    pub blacklist: bool,
}

/// Cache store backed by a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteCacheStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(self.path.clone())
            .await
            .map_err(StoreError::unavailable)?;

        let timeout = self.busy_timeout;
        conn.call(move |conn| -> rusqlite::Result<()> { conn.busy_timeout(timeout) })
            .await
            .map_err(StoreError::unavailable)?;

        Ok(conn)
    }

    /// Create the cache table from `schema`, dropping any existing table
    /// first when `reset` is set.
    pub async fn initialize(&self, schema: &str, reset: bool) -> Result<(), StoreError> {
        let conn = self.open().await?;
        let schema = schema.to_string();

        conn.call(move |conn| -> rusqlite::Result<()> {
            if reset {
                conn.execute_batch("DROP TABLE IF EXISTS cache")?;
            }
            conn.execute_batch(&schema)
        })
        .await
        .map_err(StoreError::unavailable)?;

        tracing::info!(path = %self.path.display(), reset, "Cache schema loaded");
        Ok(())
    }

    async fn query_flag(&self, sql: &'static str, url: &str) -> Result<bool, StoreError> {
        let conn = self.open().await?;
        let url = url.to_string();
        conn.call(move |conn| -> rusqlite::Result<bool> {
            conn.query_row(sql, params![url], |row| row.get(0))
        })
        .await
        .map_err(StoreError::unavailable)
    }

    async fn try_put(&self, record: CacheRecord) -> Result<bool, StoreError> {
        let conn = self.open().await?;
        conn.call(move |conn| -> rusqlite::Result<bool> {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            let updated = tx.execute(
                "UPDATE cache SET method = ?2, request_headers = ?3, response_headers = ?4,
                        response_body = ?5, status_code = ?6
                 WHERE url = ?1",
                params![
                    record.url,
                    record.method,
                    record.request_headers,
                    record.response_headers,
                    record.response_body,
                    record.status_code,
                ],
            )?;
            if updated == 0 {
                tx.execute(
                    "INSERT INTO cache (url, method, request_headers, response_headers,
                                        response_body, status_code, blacklist)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        record.url,
                        record.method,
                        record.request_headers,
                        record.response_headers,
                        record.response_body,
                        record.status_code,
                        record.blacklist,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(updated > 0)
        })
        .await
        .map_err(StoreError::unavailable)
    }

    /// Set or clear the blacklist flag on every row for `url`.
    ///
    /// Returns the number of rows changed; a URL that was never cached
    /// cannot be flagged.
    pub async fn set_blacklisted(&self, url: &str, blacklisted: bool) -> Result<usize, StoreError> {
        let conn = self.open().await?;
        let url = url.to_string();
        conn.call(move |conn| -> rusqlite::Result<usize> {
            conn.execute(
                "UPDATE cache SET blacklist = ?2 WHERE url = ?1",
                params![url, blacklisted],
            )
        })
        .await
        .map_err(StoreError::unavailable)
    }

    /// Load the full record for `url`, if any.
    pub async fn find(&self, url: &str) -> Result<Option<CacheRecord>, StoreError> {
        let conn = self.open().await?;
        let url = url.to_string();
        conn.call(move |conn| -> rusqlite::Result<Option<CacheRecord>> {
            conn.query_row(
                "SELECT url, method, request_headers, response_headers, response_body,
                        status_code, blacklist
                 FROM cache WHERE url = ?1 ORDER BY rowid DESC LIMIT 1",
                params![url],
                |row| {
                    Ok(CacheRecord {
                        url: row.get(0)?,
                        method: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        request_headers: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        response_headers: row
                            .get::<_, Option<String>>(3)?
                            .unwrap_or_else(|| "{}".to_string()),
                        response_body: body_bytes(row.get_ref(4)?),
                        status_code: u16::try_from(row.get::<_, i64>(5)?).unwrap_or(0),
                        blacklist: row.get::<_, Option<bool>>(6)?.unwrap_or(false),
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(StoreError::unavailable)
    }

    /// Summaries of every stored row, oldest first.
    pub async fn list(&self) -> Result<Vec<CacheSummary>, StoreError> {
        let conn = self.open().await?;
        conn.call(|conn| -> rusqlite::Result<Vec<CacheSummary>> {
            let mut stmt = conn.prepare(
                "SELECT url, method, status_code, length(response_body), blacklist
                 FROM cache ORDER BY rowid",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(CacheSummary {
                    url: row.get(0)?,
                    method: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    status_code: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
                    body_len: row.get::<_, Option<i64>>(3)?.unwrap_or_default() as usize,
                    blacklist: row.get::<_, Option<bool>>(4)?.unwrap_or(false),
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(StoreError::unavailable)
    }
}

/// Bodies are written as blobs, but rows loaded from an external schema may
/// hold text.
fn body_bytes(value: ValueRef<'_>) -> Vec<u8> {
    match value {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => bytes.to_vec(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn exists(&self, url: &str) -> bool {
        match self
            .query_flag("SELECT EXISTS(SELECT 1 FROM cache WHERE url = ?1)", url)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Cache lookup failed, treating as miss");
                false
            }
        }
    }

    async fn is_blacklisted(&self, url: &str) -> bool {
        match self
            .query_flag(
                "SELECT EXISTS(SELECT 1 FROM cache WHERE url = ?1 AND blacklist = 1)",
                url,
            )
            .await
        {
            Ok(flagged) => flagged,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Blacklist check failed, allowing request");
                false
            }
        }
    }

    async fn get(&self, url: &str) -> Result<CachedResponse, StoreError> {
        let conn = self.open().await?;
        let key = url.to_string();
        let row = conn
            .call(move |conn| -> rusqlite::Result<Option<(Option<String>, Vec<u8>, i64)>> {
                conn.query_row(
                    "SELECT response_headers, response_body, status_code
                     FROM cache WHERE url = ?1 ORDER BY rowid DESC LIMIT 1",
                    params![key],
                    |row| Ok((row.get(0)?, body_bytes(row.get_ref(1)?), row.get(2)?)),
                )
                .optional()
            })
            .await
            .map_err(StoreError::unavailable)?;

        let (headers, body, status) = row.ok_or_else(|| StoreError::NotFound(url.to_string()))?;
        let status_code = u16::try_from(status)
            .map_err(|_| StoreError::Unavailable(format!("stored status code {status} is invalid")))?;

        Ok(CachedResponse {
            response_headers: headers.unwrap_or_else(|| "{}".to_string()),
            response_body: body,
            status_code,
        })
    }

    async fn put(&self, record: CacheRecord) {
        let url = record.url.clone();
        match self.try_put(record).await {
            Ok(replaced) => tracing::info!(url = %url, replaced, "Response cached"),
            Err(e) => tracing::error!(url = %url, error = %e, "Failed to cache response"),
        }
    }
}
