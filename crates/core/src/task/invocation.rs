//! Per-invocation controller for a proxied task.
//!
//! One [`Invocation`] owns the three listeners registered for one input: a
//! data listener that keeps outputs carrying its token, a once-listener for
//! its transformed event and a once-listener for errors. The listener budget
//! is raised while they are attached and lowered again on detach, so many
//! concurrent invocations never look like a leak.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::events::{Emitter, EventKind, Listener, ListenerId, TaskEvent};
use super::{ProxiedTask, TaskError};
use crate::record::{CorrelationToken, Record};

/// Listeners each invocation registers.
pub const LISTENERS_PER_INVOCATION: usize = 3;

enum Signal {
    Output(Record),
    Done,
    Failed(TaskError),
}

/// Listener set for one in-flight input.
pub struct Invocation<'a> {
    events: &'a Emitter,
    token: CorrelationToken,
    listeners: Vec<ListenerId>,
    signals: mpsc::UnboundedReceiver<Signal>,
}

impl<'a> Invocation<'a> {
    /// Register the listeners for `token`. Must happen before the input is written.
    pub fn attach(events: &'a Emitter, token: CorrelationToken) -> Self {
        let (tx, signals) = mpsc::unbounded_channel();
        events.raise_max_listeners(LISTENERS_PER_INVOCATION);

        let data_tx = tx.clone();
        let on_data: Listener = Arc::new(move |event: &TaskEvent| match event {
            TaskEvent::Data(record) if record.token == Some(token) => data_tx.send(Signal::Output(record.clone())).is_ok(),
            _ => false,
        });

        let done_tx = tx.clone();
        let on_transformed: Listener = Arc::new(move |event: &TaskEvent| match event {
            TaskEvent::Transformed { token: t } if *t == Some(token) => done_tx.send(Signal::Done).is_ok(),
            _ => false,
        });

        let on_error: Listener = Arc::new(move |event: &TaskEvent| match event {
            TaskEvent::Error { token: t, error } if t.is_none() || *t == Some(token) => {
                tx.send(Signal::Failed(error.clone())).is_ok()
            }
            _ => false,
        });

        let listeners = vec![
            events.on(EventKind::Data, on_data),
            events.once(EventKind::Transformed, on_transformed),
            events.once(EventKind::Error, on_error),
        ];

        Self { events, token, listeners, signals }
    }

    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    /// Wait for this input's outputs until it is done or fails.
    ///
    /// Listeners are detached as soon as either signal arrives.
    pub async fn collect(mut self) -> Result<Vec<Record>, TaskError> {
        let mut outputs = Vec::new();
        let result = loop {
            match self.signals.recv().await {
                Some(Signal::Output(mut record)) => {
                    record.token = None;
                    outputs.push(record);
                }
                Some(Signal::Done) => break Ok(outputs),
                Some(Signal::Failed(error)) => break Err(error),
                None => break Err(TaskError::new("task event channel closed")),
            }
        };
        self.detach();
        result
    }

    fn detach(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        for id in self.listeners.drain(..) {
            self.events.remove(id);
        }
        self.events.lower_max_listeners(LISTENERS_PER_INVOCATION);
    }
}

impl Drop for Invocation<'_> {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Push one record through the task and collect the outputs attributable to it.
pub async fn run(task: &ProxiedTask, mut record: Record) -> Result<Vec<Record>, TaskError> {
    let token = CorrelationToken::new();
    record.token = Some(token);

    let invocation = Invocation::attach(task.events(), token);
    task.write(record);
    invocation.collect().await
}
