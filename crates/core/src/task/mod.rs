//! The proxied task: an opaque record transformer behind a shared event surface.
//!
//! Implement [`Transform`] for the unit of work to memoize. A [`ProxiedTask`]
//! drives it: every written record is transformed on its own tokio task and
//! the results are published on the shared [`Emitter`] as data, transformed
//! and error events. [`invocation::run`] attributes those events back to the
//! input that caused them.

pub mod events;
pub mod invocation;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;

use crate::options::CacheOptions;
use crate::record::{CorrelationToken, Record};

pub use events::{Emitter, EventKind, ListenerId, TaskEvent};
pub use invocation::{Invocation, run};

/// Failure reported by a proxied task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The unit of work being memoized.
#[async_trait]
pub trait Transform: Send + Sync + 'static {
    fn name(&self) -> &str {
        "task"
    }

    /// Process one record.
    ///
    /// Outputs may be sent through `push` (any number, possibly later from a
    /// clone of it) and/or returned. Returning marks the input as done.
    async fn transform(&self, record: Record, push: &Push) -> Result<Option<Record>, TaskError>;

    /// Called once after the last input. Records pushed here are not cached.
    async fn flush(&self, _push: &Push) -> Result<(), TaskError> {
        Ok(())
    }

    /// Default caching options this task declares for itself.
    fn cacheable(&self) -> Option<CacheOptions> {
        None
    }
}

/// Output sink handed to [`Transform`] calls.
#[derive(Clone)]
pub struct Push {
    events: Arc<Emitter>,
    token: Option<CorrelationToken>,
    flushing: bool,
}

impl Push {
    /// Publish an output record.
    ///
    /// Records that already carry a correlation token keep it, so outputs
    /// cloned from another input are attributed to that input.
    pub fn send(&self, mut record: Record) {
        if self.flushing {
            record.token = None;
        } else if record.token.is_none() {
            record.token = self.token;
        }
        self.events.emit(&TaskEvent::Data(record));
    }
}

/// A [`Transform`] wired to its event surface.
pub struct ProxiedTask {
    transform: Arc<dyn Transform>,
    events: Arc<Emitter>,
}

impl ProxiedTask {
    pub fn new(transform: Arc<dyn Transform>) -> Self {
        Self { transform, events: Arc::new(Emitter::default()) }
    }

    pub fn with_max_listeners(transform: Arc<dyn Transform>, max_listeners: usize) -> Self {
        Self { transform, events: Arc::new(Emitter::new(max_listeners)) }
    }

    pub fn transform(&self) -> &Arc<dyn Transform> {
        &self.transform
    }

    pub fn events(&self) -> &Emitter {
        &self.events
    }

    /// Hand a record to the task without waiting for it.
    ///
    /// A panic inside the task is reported as an error event for this record.
    /// Must be called from within a tokio runtime.
    pub fn write(&self, record: Record) {
        let transform = Arc::clone(&self.transform);
        let events = Arc::clone(&self.events);
        tokio::spawn(async move {
            let token = record.token;
            let push = Push { events: Arc::clone(&events), token, flushing: false };
            let result = AssertUnwindSafe(transform.transform(record, &push))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!(task = transform.name(), "proxied task panicked");
                    Err(TaskError::new("task panicked"))
                });
            match result {
                Ok(output) => {
                    if let Some(output) = output {
                        push.send(output);
                    }
                    events.emit(&TaskEvent::Transformed { token });
                }
                Err(error) => {
                    tracing::debug!(task = transform.name(), %error, "proxied task failed");
                    events.emit(&TaskEvent::Error { token, error });
                }
            }
        });
    }

    /// Run the task's flush hook and return what it pushed.
    pub async fn flush(&self) -> Result<Vec<Record>, TaskError> {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&flushed);
        let listener = self.events.on(
            EventKind::Data,
            Arc::new(move |event: &TaskEvent| match event {
                TaskEvent::Data(record) if record.token.is_none() => {
                    sink.lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(record.clone());
                    true
                }
                _ => false,
            }),
        );

        let push = Push { events: Arc::clone(&self.events), token: None, flushing: true };
        let result = self.transform.flush(&push).await;
        self.events.remove(listener);
        result?;

        let records = std::mem::take(&mut *flushed.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        Ok(records)
    }
}
