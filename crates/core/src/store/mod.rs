//! Persistent key/value storage for cache entries.
//!
//! Entries are addressed by `(category, key)`. The [`CacheStore`] trait is the
//! only thing the proxy depends on; two backends ship with the crate:
//!
//! - [`SqliteStore`]: persistent, WAL mode, schema migrations
//! - [`MemoryStore`]: process-local, for tests and throwaway pipelines

pub mod connection;
pub mod entries;
pub mod memory;
pub mod migrations;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Error;

pub use connection::SqliteStore;
pub use memory::MemoryStore;

/// A stored cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub category: String,
    pub key: String,
    /// Serialized result set.
    pub contents: String,
    pub created_at: String,
}

/// Async storage backend for cache entries.
///
/// Implementations must tolerate concurrent calls for different keys.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the entry for `(category, key)`.
    async fn get(&self, category: &str, key: &str) -> Result<Option<CacheEntry>, Error>;

    /// Store `value` under `(category, key)`, replacing any existing entry.
    async fn put(&self, category: &str, key: &str, value: &str) -> Result<(), Error>;

    /// Delete the entry for `(category, key)`. Missing entries are not an error.
    async fn remove(&self, category: &str, key: &str) -> Result<(), Error>;

    /// Delete every entry in `category`, or the whole store when `None`.
    async fn clear(&self, category: Option<&str>) -> Result<(), Error>;
}
