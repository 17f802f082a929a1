//! Transforms and stores shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::Error;
use crate::options::CacheOptions;
use crate::record::Record;
use crate::store::{CacheEntry, CacheStore};
use crate::task::{Push, TaskError, Transform};

fn text(record: &Record) -> String {
    record.bytes().map(|b| String::from_utf8_lossy(b).into_owned()).unwrap_or_default()
}

/// Appends a suffix to the contents and sets `ran = true`.
#[derive(Default)]
pub struct Suffix {
    suffix: String,
    calls: AtomicUsize,
    defaults: Option<fn() -> CacheOptions>,
}

impl Suffix {
    pub fn new(suffix: &str) -> Self {
        Self { suffix: suffix.to_string(), ..Default::default() }
    }

    pub fn with_defaults(mut self, defaults: fn() -> CacheOptions) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transform for Suffix {
    fn name(&self) -> &str {
        "suffix"
    }

    async fn transform(&self, mut record: Record, _push: &Push) -> Result<Option<Record>, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let contents = format!("{}{}", text(&record), self.suffix);
        record.set_contents(contents);
        record.set_field("ran", true);
        Ok(Some(record))
    }

    fn cacheable(&self) -> Option<CacheOptions> {
        self.defaults.map(|defaults| defaults())
    }
}

/// Pushes `count` outputs per input, `<contents>-1` through `<contents>-<count>`.
pub struct FanOut {
    count: usize,
    calls: AtomicUsize,
}

impl FanOut {
    pub fn new(count: usize) -> Self {
        Self { count, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transform for FanOut {
    async fn transform(&self, record: Record, push: &Push) -> Result<Option<Record>, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let base = text(&record);
        for i in 1..=self.count {
            let mut output = record.clone();
            output.set_contents(format!("{base}-{i}"));
            push.send(output);
            tokio::task::yield_now().await;
        }
        Ok(None)
    }
}

/// Echoes its input after sleeping `delay_ms` milliseconds.
pub struct Delayed;

#[async_trait]
impl Transform for Delayed {
    async fn transform(&self, record: Record, _push: &Push) -> Result<Option<Record>, TaskError> {
        let delay = record.field("delay_ms").and_then(|v| v.as_u64()).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(Some(record))
    }
}

/// Fails on inputs whose contents equal a given text, echoes the rest.
pub struct Failing {
    contents: String,
}

impl Failing {
    pub fn on(contents: &str) -> Self {
        Self { contents: contents.to_string() }
    }
}

#[async_trait]
impl Transform for Failing {
    async fn transform(&self, record: Record, _push: &Push) -> Result<Option<Record>, TaskError> {
        let contents = text(&record);
        if contents == self.contents {
            return Err(TaskError::new(format!("refusing {contents}")));
        }
        Ok(Some(record))
    }
}

/// Panics on inputs whose contents equal a given text, echoes the rest.
pub struct Panicking {
    contents: String,
}

impl Panicking {
    pub fn on(contents: &str) -> Self {
        Self { contents: contents.to_string() }
    }
}

#[async_trait]
impl Transform for Panicking {
    async fn transform(&self, record: Record, _push: &Push) -> Result<Option<Record>, TaskError> {
        let contents = text(&record);
        if contents == self.contents {
            panic!("cannot handle {contents}");
        }
        Ok(Some(record))
    }
}

/// Renames `<path>` to `<path>2` and uppercases the contents.
#[derive(Default)]
pub struct Renamer {
    calls: AtomicUsize,
}

impl Renamer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transform for Renamer {
    async fn transform(&self, mut record: Record, _push: &Push) -> Result<Option<Record>, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(path) = record.path().map(|p| format!("{}2", p.display())) {
            record.set_path(path);
        }
        let upper = text(&record).to_uppercase();
        record.set_contents(upper);
        Ok(Some(record))
    }
}

/// Store whose every operation fails.
pub struct BrokenStore;

#[async_trait]
impl CacheStore for BrokenStore {
    async fn get(&self, _category: &str, _key: &str) -> Result<Option<CacheEntry>, Error> {
        Err(Error::Store("store unavailable".to_string()))
    }

    async fn put(&self, _category: &str, _key: &str, _value: &str) -> Result<(), Error> {
        Err(Error::Store("store unavailable".to_string()))
    }

    async fn remove(&self, _category: &str, _key: &str) -> Result<(), Error> {
        Err(Error::Store("store unavailable".to_string()))
    }

    async fn clear(&self, _category: Option<&str>) -> Result<(), Error> {
        Err(Error::Store("store unavailable".to_string()))
    }
}

/// Store that reads as empty and refuses every write.
#[derive(Default)]
pub struct ReadOnlyStore {
    puts: AtomicUsize,
}

impl ReadOnlyStore {
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for ReadOnlyStore {
    async fn get(&self, _category: &str, _key: &str) -> Result<Option<CacheEntry>, Error> {
        Ok(None)
    }

    async fn put(&self, _category: &str, _key: &str, _value: &str) -> Result<(), Error> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(Error::Store("store is read-only".to_string()))
    }

    async fn remove(&self, _category: &str, _key: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn clear(&self, _category: Option<&str>) -> Result<(), Error> {
        Ok(())
    }
}
