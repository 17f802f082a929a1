//! Shared event surface of a proxied task.
//!
//! Many invocations listen on the same emitter at once. Listeners are
//! filtered closures; a `once` listener is detached after the first event it
//! consumes. The emitter keeps a listener budget and warns once per event
//! kind when it is exceeded, which is how leaked listeners show up.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::record::{CorrelationToken, Record};
use crate::task::TaskError;

/// Default listener budget per event kind.
pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// Events published by a proxied task.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// An output record, tagged with the token of the input it belongs to.
    Data(Record),
    /// The task finished processing the input carrying `token`.
    Transformed { token: Option<CorrelationToken> },
    /// The task failed. Untagged errors concern every in-flight input.
    Error { token: Option<CorrelationToken>, error: TaskError },
}

impl TaskEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TaskEvent::Data(_) => EventKind::Data,
            TaskEvent::Transformed { .. } => EventKind::Transformed,
            TaskEvent::Error { .. } => EventKind::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Data,
    Transformed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener callback. Returns whether it consumed the event.
pub type Listener = Arc<dyn Fn(&TaskEvent) -> bool + Send + Sync>;

struct Registration {
    kind: EventKind,
    once: bool,
    listener: Listener,
}

struct State {
    next_id: u64,
    listeners: HashMap<ListenerId, Registration>,
    max_listeners: usize,
    warned: HashSet<EventKind>,
    leak_warnings: usize,
}

/// Event emitter with a listener budget.
pub struct Emitter {
    state: Mutex<State>,
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LISTENERS)
    }
}

impl Emitter {
    /// `max_listeners` of 0 disables the budget.
    pub fn new(max_listeners: usize) -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 0,
                listeners: HashMap::new(),
                max_listeners,
                warned: HashSet::new(),
                leak_warnings: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Listeners never run under the lock, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.add(kind, false, listener)
    }

    pub fn once(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.add(kind, true, listener)
    }

    fn add(&self, kind: EventKind, once: bool, listener: Listener) -> ListenerId {
        let mut state = self.state();
        let id = ListenerId(state.next_id);
        state.next_id += 1;
        state.listeners.insert(id, Registration { kind, once, listener });

        let count = state.listeners.values().filter(|r| r.kind == kind).count();
        if state.max_listeners > 0 && count > state.max_listeners && state.warned.insert(kind) {
            state.leak_warnings += 1;
            tracing::warn!(
                ?kind,
                count,
                max_listeners = state.max_listeners,
                "possible listener leak: listener budget exceeded"
            );
        }
        id
    }

    /// Detach a listener. Returns false if it was already gone.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.state().listeners.remove(&id).is_some()
    }

    /// Deliver an event to every listener of its kind.
    ///
    /// Returns how many listeners consumed it.
    pub fn emit(&self, event: &TaskEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<(ListenerId, bool, Listener)> = self
            .state()
            .listeners
            .iter()
            .filter(|(_, r)| r.kind == kind)
            .map(|(id, r)| (*id, r.once, Arc::clone(&r.listener)))
            .collect();

        let mut consumed = 0;
        for (id, once, listener) in targets {
            if listener(event) {
                consumed += 1;
                if once {
                    self.remove(id);
                }
            }
        }
        consumed
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.state().listeners.values().filter(|r| r.kind == kind).count()
    }

    pub fn max_listeners(&self) -> usize {
        self.state().max_listeners
    }

    pub fn set_max_listeners(&self, max: usize) {
        self.state().max_listeners = max;
    }

    /// Raise the budget atomically, e.g. around one invocation.
    pub fn raise_max_listeners(&self, by: usize) {
        let mut state = self.state();
        state.max_listeners = state.max_listeners.saturating_add(by);
    }

    pub fn lower_max_listeners(&self, by: usize) {
        let mut state = self.state();
        state.max_listeners = state.max_listeners.saturating_sub(by);
    }

    /// Number of budget overruns observed so far.
    pub fn leak_warnings(&self) -> usize {
        self.state().leak_warnings
    }
}
