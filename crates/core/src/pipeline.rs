//! Stream-level surface for pipeline integrators.
//!
//! [`create_caching_task`] wraps a task so a stream of records flows through
//! the cache; [`clear_entry`] invalidates the entries of the records passing
//! through it; [`clear_all_entries`] wipes a store.

use std::sync::Arc;

use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};

use crate::Error;
use crate::config::AppConfig;
use crate::options::{CacheOptions, ResolvedOptions};
use crate::proxy::{TaskProxy, remove_cached_result};
use crate::record::Record;
use crate::store::CacheStore;
use crate::task::Transform;

/// Records processed at once unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Wrap `task` with caching.
///
/// # Errors
///
/// Returns `Error::Config` if no store is configured or the category is empty.
pub fn create_caching_task(task: Arc<dyn Transform>, options: CacheOptions) -> Result<CachingTask, Error> {
    Ok(CachingTask::new(TaskProxy::new(task, options)?))
}

/// A task wrapped with caching, applied to record streams.
pub struct CachingTask {
    proxy: Arc<TaskProxy>,
    concurrency: usize,
}

impl CachingTask {
    pub fn new(proxy: TaskProxy) -> Self {
        Self { proxy: Arc::new(proxy), concurrency: DEFAULT_CONCURRENCY }
    }

    /// Wrap `task` using loaded configuration as the lowest option layer.
    pub fn from_config(task: Arc<dyn Transform>, options: CacheOptions, config: &AppConfig) -> Result<Self, Error> {
        let task_defaults = task.cacheable().unwrap_or_default();
        let options = options.or(task_defaults).or(CacheOptions::from_config(config));
        let proxy = TaskProxy::with_max_listeners(task, options, config.max_listeners)?;
        Ok(Self::new(proxy).with_concurrency(config.concurrency))
    }

    /// Limit how many records are in flight at once. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn proxy(&self) -> &TaskProxy {
        &self.proxy
    }

    /// Run every record of `input` through the cache.
    ///
    /// Outputs of one input are emitted together once that input completes;
    /// different inputs may complete out of order. When `input` ends the
    /// proxy is flushed and the task's flush outputs follow. A failing record
    /// yields an `Err` item and does not stop the others.
    ///
    /// The deferred queue and the task's flush hook belong to the proxy, not
    /// to one stream: streams processed at the same time on one `CachingTask`
    /// share the queue, and each of them flushes it when its input ends. Use a
    /// separate `CachingTask` per stream when flushes must stay apart.
    pub fn process<S>(&self, input: S) -> BoxStream<'static, Result<Record, Error>>
    where
        S: Stream<Item = Record> + Send + 'static,
    {
        let proxy = Arc::clone(&self.proxy);
        let processed = input
            .map(move |record| {
                let proxy = Arc::clone(&proxy);
                async move { proxy.process_record(record).await.map(|processed| processed.records) }
            })
            .buffer_unordered(self.concurrency)
            .flat_map(|result| stream::iter(emit(result)));

        let proxy = Arc::clone(&self.proxy);
        let flushed = stream::once(async move { proxy.flush().await }).flat_map(|result| stream::iter(emit(result)));

        processed.chain(flushed).boxed()
    }
}

fn emit(result: Result<Vec<Record>, Error>) -> Vec<Result<Record, Error>> {
    match result {
        Ok(records) => records.into_iter().map(Ok).collect(),
        Err(error) => {
            tracing::error!(component = error.component(), %error, "record failed");
            vec![Err(error)]
        }
    }
}

/// Build an invalidation stage.
///
/// # Errors
///
/// Returns `Error::Config` if no store is configured or the category is empty.
pub fn clear_entry(options: CacheOptions) -> Result<ClearEntries, Error> {
    Ok(ClearEntries { options: Arc::new(options.resolve()?) })
}

/// Removes the cache entry of every record passing through.
pub struct ClearEntries {
    options: Arc<ResolvedOptions>,
}

impl ClearEntries {
    /// Remove the entry for one record. Null records are skipped.
    pub async fn clear(&self, record: &Record) -> Result<bool, Error> {
        clear_record(&self.options, record).await
    }

    /// Pass every record through after removing its entry.
    pub fn process<S>(&self, input: S) -> BoxStream<'static, Result<Record, Error>>
    where
        S: Stream<Item = Record> + Send + 'static,
    {
        let options = Arc::clone(&self.options);
        input
            .then(move |record| {
                let options = Arc::clone(&options);
                async move {
                    clear_record(&options, &record).await?;
                    Ok(record)
                }
            })
            .inspect_err(|error: &Error| {
                tracing::error!(component = error.component(), %error, "failed to clear cache entry");
            })
            .boxed()
    }
}

async fn clear_record(options: &ResolvedOptions, record: &Record) -> Result<bool, Error> {
    if record.is_null() {
        return Ok(false);
    }
    if record.is_stream() {
        return Err(Error::UnsupportedStream);
    }
    remove_cached_result(options, record).await
}

/// Wipe every entry in `store`.
pub async fn clear_all_entries(store: &dyn CacheStore) -> Result<(), Error> {
    store
        .clear(None)
        .await
        .map_err(|e| Error::Store(format!("Problem clearing the cache: {e}")))
}
