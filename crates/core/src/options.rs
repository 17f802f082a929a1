//! Caching options and their normalization.
//!
//! Options are layered: caller-supplied options override the task's own
//! defaults ([`Transform::cacheable`](crate::task::Transform::cacheable)),
//! which override the system defaults. Function-or-field-or-flag options are
//! resolved once into uniform callables by [`CacheOptions::resolve`].

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::codec::{STANDARD_FIELDS, default_restore, standard_value};
use crate::config::AppConfig;
use crate::fingerprint::default_key;
use crate::record::Record;
use crate::store::CacheStore;
use crate::Error;

/// Boxed error returned by user-supplied key functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a key function.
pub type KeyFuture = BoxFuture<'static, Result<Option<String>, BoxError>>;

/// Object form of a cached result item.
pub type ValueMap = Map<String, Value>;

/// Default cache category.
pub const DEFAULT_CATEGORY: &str = "default";

/// Derives the fingerprint seed for a record.
///
/// Both constructors normalize to the same asynchronous calling convention.
#[derive(Clone)]
pub struct KeyFn(Arc<dyn Fn(&Record) -> KeyFuture + Send + Sync>);

impl KeyFn {
    /// Key function that computes the seed synchronously.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Record) -> Option<String> + Send + Sync + 'static,
    {
        Self(Arc::new(move |record: &Record| {
            let seed = f(record);
            let ready: KeyFuture = Box::pin(futures::future::ready(Ok(seed)));
            ready
        }))
    }

    /// Key function that resolves the seed asynchronously.
    ///
    /// The returned future must own whatever it needs from the record.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(&Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<String>, BoxError>> + Send + 'static,
    {
        Self(Arc::new(move |record: &Record| -> KeyFuture { Box::pin(f(record)) }))
    }

    pub(crate) fn call(&self, record: &Record) -> KeyFuture {
        (self.0)(record)
    }
}

/// Materializes a live record from a stored result item.
#[derive(Clone)]
pub struct RestoreFn(Arc<dyn Fn(ValueMap) -> Result<Record, Error> + Send + Sync>);

impl RestoreFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ValueMap) -> Result<Record, Error> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn call(&self, item: ValueMap) -> Result<Record, Error> {
        (self.0)(item)
    }
}

/// Which part of a task output gets persisted.
#[derive(Clone)]
pub enum ValueSpec {
    /// Arbitrary projection.
    Function(Arc<dyn Fn(&Record) -> ValueMap + Send + Sync>),
    /// A single field, standard or custom.
    Field(String),
    /// `{cwd, base, contents, stat, history, path}`.
    Standard,
}

impl ValueSpec {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Record) -> ValueMap + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    fn resolve(self) -> ValueFn {
        match self {
            ValueSpec::Function(f) => ValueFn(f),
            ValueSpec::Standard => ValueFn(Arc::new(standard_value)),
            ValueSpec::Field(name) => ValueFn(Arc::new(move |record: &Record| {
                let value = if STANDARD_FIELDS.contains(&name.as_str()) {
                    standard_value(record).remove(&name)
                } else {
                    record.field(&name).cloned()
                };
                let mut map = Map::new();
                if let Some(value) = value.filter(|v| !v.is_null()) {
                    map.insert(name.clone(), value);
                }
                map
            })),
        }
    }
}

/// Resolved value projection.
#[derive(Clone)]
pub struct ValueFn(Arc<dyn Fn(&Record) -> ValueMap + Send + Sync>);

impl ValueFn {
    pub fn project(&self, record: &Record) -> ValueMap {
        (self.0)(record)
    }
}

/// Gate deciding which task outputs are eligible for caching.
#[derive(Clone)]
pub enum Success {
    /// Cache every output, including an empty output set.
    Always,
    /// Cache only the outputs the predicate admits.
    Predicate(Arc<dyn Fn(&Record) -> bool + Send + Sync>),
}

impl Success {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Success::Always)
    }

    pub fn admits(&self, record: &Record) -> bool {
        match self {
            Success::Always => true,
            Success::Predicate(f) => f(record),
        }
    }
}

impl From<bool> for Success {
    fn from(always: bool) -> Self {
        if always { Success::Always } else { Success::predicate(|_| false) }
    }
}

/// When fresh results are written to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WritePolicy {
    /// Store as soon as the task completes for the record.
    #[default]
    Immediate,
    /// Queue per fingerprint and store everything at flush.
    Deferred,
}

/// Partial caching options.
#[derive(Clone, Default)]
pub struct CacheOptions {
    pub store: Option<Arc<dyn CacheStore>>,
    pub category: Option<String>,
    pub key: Option<KeyFn>,
    pub restore: Option<RestoreFn>,
    pub success: Option<Success>,
    pub value: Option<ValueSpec>,
    pub write_policy: Option<WritePolicy>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options seeded from loaded application configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let write_policy = if config.deferred_writes { WritePolicy::Deferred } else { WritePolicy::Immediate };
        Self { category: Some(config.category.clone()), write_policy: Some(write_policy), ..Self::default() }
    }

    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn key(mut self, key: KeyFn) -> Self {
        self.key = Some(key);
        self
    }

    pub fn restore(mut self, restore: RestoreFn) -> Self {
        self.restore = Some(restore);
        self
    }

    pub fn success(mut self, success: impl Into<Success>) -> Self {
        self.success = Some(success.into());
        self
    }

    pub fn value(mut self, value: ValueSpec) -> Self {
        self.value = Some(value);
        self
    }

    pub fn write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = Some(policy);
        self
    }

    /// Fill every unset option from `lower`.
    pub fn or(self, lower: CacheOptions) -> Self {
        Self {
            store: self.store.or(lower.store),
            category: self.category.or(lower.category),
            key: self.key.or(lower.key),
            restore: self.restore.or(lower.restore),
            success: self.success.or(lower.success),
            value: self.value.or(lower.value),
            write_policy: self.write_policy.or(lower.write_policy),
        }
    }

    /// Apply system defaults and normalize into uniform callables.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no store is configured or the category is empty.
    pub fn resolve(self) -> Result<ResolvedOptions, Error> {
        let store = self
            .store
            .ok_or_else(|| Error::Config("no cache store configured".to_string()))?;
        let category = self.category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        if category.trim().is_empty() {
            return Err(Error::Config("category must not be empty".to_string()));
        }

        Ok(ResolvedOptions {
            store,
            category,
            key: self.key.unwrap_or_else(|| KeyFn::sync(default_key)),
            restore: self.restore.unwrap_or_else(|| RestoreFn::new(default_restore)),
            success: self.success.unwrap_or(Success::Always),
            value: self.value.unwrap_or(ValueSpec::Standard).resolve(),
            write_policy: self.write_policy.unwrap_or_default(),
        })
    }
}

/// Fully resolved options used by a [`TaskProxy`](crate::proxy::TaskProxy).
#[derive(Clone)]
pub struct ResolvedOptions {
    pub(crate) store: Arc<dyn CacheStore>,
    pub(crate) category: String,
    pub(crate) key: KeyFn,
    pub(crate) restore: RestoreFn,
    pub(crate) success: Success,
    pub(crate) value: ValueFn,
    pub(crate) write_policy: WritePolicy,
}

impl ResolvedOptions {
    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }
}
