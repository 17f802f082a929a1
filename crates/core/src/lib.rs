//! Content-addressed memoization for record-transforming tasks.
//!
//! This crate provides:
//! - Fingerprinting of records and a pluggable cache store (SQLite or in-memory)
//! - A proxy that replays stored task results or runs the task and stores them
//! - Stream adapters for caching, invalidation and clearing
//! - Unified error types and layered configuration

pub mod codec;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod options;
pub mod pipeline;
pub mod proxy;
pub mod record;
pub mod store;
pub mod task;

#[cfg(test)]
mod testing;

pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use fingerprint::Fingerprint;
pub use options::{CacheOptions, KeyFn, RestoreFn, Success, ValueSpec, WritePolicy};
pub use pipeline::{CachingTask, ClearEntries, clear_all_entries, clear_entry, create_caching_task};
pub use proxy::{Outcome, Processed, TaskProxy};
pub use record::{Contents, Record, Stat};
pub use store::{CacheEntry, CacheStore, MemoryStore, SqliteStore};
pub use task::{Push, TaskError, Transform};
