//! Task proxy: the per-record memoization state machine.
//!
//! Each input moves through `KEY_DERIVED -> CACHE_CHECKED -> {REPLAYED | RAN_FRESH} -> EMITTED`.
//! Replayed results are rebuilt on top of the current input so the pipeline's
//! structural fields survive; fresh results are written through the store
//! immediately or queued per fingerprint until [`TaskProxy::flush`]. A
//! fingerprint queues the outputs of its first completed invocation only.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::try_join_all;

use crate::Error;
use crate::codec::{self, CachedResult, PendingOutput, ResultMeta};
use crate::fingerprint::{Fingerprint, derive_key};
use crate::options::{CacheOptions, ResolvedOptions, WritePolicy};
use crate::record::Record;
use crate::task::events::DEFAULT_MAX_LISTENERS;
use crate::task::{ProxiedTask, Transform, invocation};

/// How a record was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Null contents: emitted untouched.
    Passthrough,
    /// Outputs rebuilt from the store without running the task.
    Replayed,
    /// The task ran. `cacheable` is false when no key could be derived.
    RanFresh { cacheable: bool },
}

/// Outputs for one input.
#[derive(Debug)]
pub struct Processed {
    pub outcome: Outcome,
    pub records: Vec<Record>,
}

type CacheQueue = HashMap<Fingerprint, Vec<PendingOutput>>;

/// Memoizing wrapper around one task.
pub struct TaskProxy {
    task: ProxiedTask,
    options: ResolvedOptions,
    queue: Mutex<CacheQueue>,
}

impl TaskProxy {
    /// Wrap `task`, layering `options` over the task's own defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the merged options have no store or an empty category.
    pub fn new(task: Arc<dyn Transform>, options: CacheOptions) -> Result<Self, Error> {
        Self::with_max_listeners(task, options, DEFAULT_MAX_LISTENERS)
    }

    pub fn with_max_listeners(
        task: Arc<dyn Transform>, options: CacheOptions, max_listeners: usize,
    ) -> Result<Self, Error> {
        let defaults = task.cacheable().unwrap_or_default();
        let options = options.or(defaults).resolve()?;
        tracing::debug!(
            task = task.name(),
            category = options.category(),
            write_policy = ?options.write_policy(),
            "task proxy created"
        );

        Ok(Self { task: ProxiedTask::with_max_listeners(task, max_listeners), options, queue: Mutex::new(HashMap::new()) })
    }

    pub fn task(&self) -> &ProxiedTask {
        &self.task
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    fn queue(&self) -> MutexGuard<'_, CacheQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of fingerprints waiting for [`TaskProxy::flush`].
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Run one record through the cache.
    ///
    /// # Errors
    ///
    /// `Error::UnsupportedStream` for streamed payloads; otherwise key, store,
    /// task and codec failures for this record only.
    pub async fn process_record(&self, input: Record) -> Result<Processed, Error> {
        if input.is_null() {
            return Ok(Processed { outcome: Outcome::Passthrough, records: vec![input] });
        }
        if input.is_stream() {
            return Err(Error::UnsupportedStream);
        }

        let key = derive_key(&input, &self.options.key).await?;
        if let Some(key) = &key
            && let Some(records) = self.check_for_cached_value(&input, key).await?
        {
            return Ok(Processed { outcome: Outcome::Replayed, records });
        }

        let cacheable = key.is_some();
        let records = self.run_and_queue(input, key).await?;
        Ok(Processed { outcome: Outcome::RanFresh { cacheable }, records })
    }

    /// Look up and replay a stored result for `input`.
    ///
    /// Misses, fallback entries, failed restores and path drift all return `Ok(None)`.
    pub async fn check_for_cached_value(&self, input: &Record, key: &Fingerprint) -> Result<Option<Vec<Record>>, Error> {
        let category = self.options.category();
        let Some(entry) = self.options.store.get(category, key.as_str()).await? else {
            tracing::debug!(category, key = %key, "cache miss");
            return Ok(None);
        };

        let items = codec::decode(&entry.contents);
        if items.iter().any(codec::is_fallback) {
            tracing::debug!(category, key = %key, "unreadable cache entry, running task");
            return Ok(None);
        }

        let results = match codec::restore_items(items, &self.options.restore) {
            Ok(results) => results,
            Err(error) => {
                tracing::warn!(category, key = %key, %error, "failed to restore cached result");
                return Ok(None);
            }
        };

        if !codec::is_replayable(&results, input) {
            tracing::debug!(category, key = %key, "cached result computed for another path");
            return Ok(None);
        }

        tracing::debug!(category, key = %key, outputs = results.len(), "cache hit");
        Ok(Some(results.into_iter().map(|result| replay(input, result)).collect()))
    }

    async fn run_and_queue(&self, input: Record, key: Option<Fingerprint>) -> Result<Vec<Record>, Error> {
        let original_path = input.path().map(Path::to_path_buf);
        let original_base = input.base.clone();

        let outputs = invocation::run(&self.task, input).await?;
        let Some(key) = key else {
            return Ok(outputs);
        };

        let pending: Vec<PendingOutput> = outputs
            .iter()
            .map(|record| PendingOutput {
                record: record.clone(),
                meta: ResultMeta::observe(record, original_path.as_deref(), &original_base),
            })
            .collect();

        match self.options.write_policy {
            WritePolicy::Immediate => {
                self.store_cached_result(&key, pending).await?;
            }
            WritePolicy::Deferred => {
                self.queue().entry(key).or_insert(pending);
            }
        }
        Ok(outputs)
    }

    /// Run the task's flush hook, then persist every queued batch.
    ///
    /// Returns the records the task pushed while flushing; those are never cached.
    pub async fn flush(&self) -> Result<Vec<Record>, Error> {
        let flushed = self.task.flush().await?;

        let batches = std::mem::take(&mut *self.queue());
        if !batches.is_empty() {
            tracing::debug!(batches = batches.len(), "storing queued results");
        }
        try_join_all(
            batches
                .into_iter()
                .map(|(key, items)| async move { self.store_cached_result(&key, items).await }),
        )
        .await?;

        Ok(flushed)
    }

    /// Apply the success gate and write the surviving outputs.
    ///
    /// Returns false when the gate rejected every output and nothing was written.
    pub async fn store_cached_result(&self, key: &Fingerprint, items: Vec<PendingOutput>) -> Result<bool, Error> {
        let category = self.options.category();
        let success = &self.options.success;

        let items: Vec<PendingOutput> = if success.is_always() {
            items
        } else {
            let items: Vec<_> = items.into_iter().filter(|item| success.admits(&item.record)).collect();
            if items.is_empty() {
                tracing::debug!(category, key = %key, "no output passed the success check, not caching");
                return Ok(false);
            }
            items
        };

        let value = codec::encode(&items, &self.options.value)?;
        self.options.store.put(category, key.as_str(), &value).await?;
        tracing::debug!(category, key = %key, outputs = items.len(), "stored result");
        Ok(true)
    }

    /// Drop the stored result for `record`.
    pub async fn remove_cached_result(&self, record: &Record) -> Result<bool, Error> {
        remove_cached_result(&self.options, record).await
    }
}

/// Derive the key for `record` and delete its entry.
///
/// Returns false without touching the store when no key can be derived.
pub async fn remove_cached_result(options: &ResolvedOptions, record: &Record) -> Result<bool, Error> {
    let Some(key) = derive_key(record, &options.key).await? else {
        return Ok(false);
    };

    options.store.remove(options.category(), key.as_str()).await?;
    tracing::debug!(category = options.category(), key = %key, "removed cached result");
    Ok(true)
}

/// Layer a cached result over the current input.
fn replay(input: &Record, cached: CachedResult) -> Record {
    let CachedResult { record: restored, meta, has_contents, has_base } = cached;
    let restored_path = restored.path().map(Path::to_path_buf);
    let Record { base, contents, fields, .. } = restored;

    let mut replayed = input.clone();
    replayed.token = None;
    replayed.fields.extend(fields);
    if has_contents {
        replayed.contents = contents;
    }
    if meta.path_changed_inside_task
        && let Some(path) = restored_path
    {
        replayed.set_path(path);
    }
    if meta.base_changed_inside_task && has_base {
        replayed.base = base;
    }
    replayed
}
