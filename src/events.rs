//! Store events and the sinks that receive them.
//!
//! Every store notifies its subscribers through [`QueryEventSink`]. Events
//! for one store are delivered in the order the underlying updates were
//! applied.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::QueryContext;
use crate::state::OperationState;
use crate::task::QueryTaskId;
use crate::QueryError;

/// Why a result reached the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultUpdateReason {
    /// Emitted through the continuation before the fetch returned.
    YieldedResult,
    /// Returned by the fetch.
    ReturnedFinalResult,
}

/// An event emitted by a [`QueryStore`](crate::QueryStore).
pub enum QueryStoreEvent<S: OperationState> {
    /// The state changed. Carries a snapshot taken right after the change.
    StateChanged {
        /// The new state.
        state: S,
        /// The context the change was applied with.
        context: QueryContext,
    },
    /// A task started running.
    FetchingStarted {
        /// The task.
        task_id: QueryTaskId,
    },
    /// A task finished, whatever its outcome.
    FetchingEnded {
        /// The task.
        task_id: QueryTaskId,
    },
    /// A task's result was applied to the state.
    ///
    /// Stale results are dropped without this event.
    ResultReceived {
        /// The task that produced the result.
        task_id: QueryTaskId,
        /// The applied result.
        result: Result<S::TaskValue, QueryError>,
        /// Whether the result was yielded or returned.
        reason: ResultUpdateReason,
    },
}

/// Discriminant of a [`QueryStoreEvent`], convenient for assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStoreEventKind {
    StateChanged,
    FetchingStarted,
    FetchingEnded,
    ResultReceived(ResultUpdateReason),
}

impl<S: OperationState> QueryStoreEvent<S> {
    /// The event's kind.
    pub fn kind(&self) -> QueryStoreEventKind {
        match self {
            QueryStoreEvent::StateChanged { .. } => QueryStoreEventKind::StateChanged,
            QueryStoreEvent::FetchingStarted { .. } => QueryStoreEventKind::FetchingStarted,
            QueryStoreEvent::FetchingEnded { .. } => QueryStoreEventKind::FetchingEnded,
            QueryStoreEvent::ResultReceived { reason, .. } => {
                QueryStoreEventKind::ResultReceived(*reason)
            }
        }
    }
}

impl<S: OperationState> Clone for QueryStoreEvent<S> {
    fn clone(&self) -> Self {
        match self {
            QueryStoreEvent::StateChanged { state, context } => QueryStoreEvent::StateChanged {
                state: state.clone(),
                context: context.clone(),
            },
            QueryStoreEvent::FetchingStarted { task_id } => {
                QueryStoreEvent::FetchingStarted { task_id: *task_id }
            }
            QueryStoreEvent::FetchingEnded { task_id } => {
                QueryStoreEvent::FetchingEnded { task_id: *task_id }
            }
            QueryStoreEvent::ResultReceived {
                task_id,
                result,
                reason,
            } => QueryStoreEvent::ResultReceived {
                task_id: *task_id,
                result: result.clone(),
                reason: *reason,
            },
        }
    }
}

impl<S: OperationState> fmt::Debug for QueryStoreEvent<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStoreEvent::StateChanged { .. } => f.write_str("StateChanged"),
            QueryStoreEvent::FetchingStarted { task_id } => {
                f.debug_tuple("FetchingStarted").field(task_id).finish()
            }
            QueryStoreEvent::FetchingEnded { task_id } => {
                f.debug_tuple("FetchingEnded").field(task_id).finish()
            }
            QueryStoreEvent::ResultReceived {
                task_id,
                result,
                reason,
            } => f
                .debug_struct("ResultReceived")
                .field("task_id", task_id)
                .field("ok", &result.is_ok())
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Receives store events.
///
/// Implemented for closures taking `&QueryStoreEvent<S>`.
///
/// # Example
///
/// ```ignore
/// let _subscription = store.subscribe(|event: &QueryStoreEvent<_>| {
///     if let QueryStoreEvent::StateChanged { state, .. } = event {
///         println!("value: {:?}", state.current_value());
///     }
/// });
/// ```
pub trait QueryEventSink<S: OperationState>: Send + Sync + 'static {
    /// Called for every event.
    fn on_event(&self, event: &QueryStoreEvent<S>);
}

impl<S, F> QueryEventSink<S> for F
where
    S: OperationState,
    F: Fn(&QueryStoreEvent<S>) + Send + Sync + 'static,
{
    fn on_event(&self, event: &QueryStoreEvent<S>) {
        self(event)
    }
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl<S: OperationState> QueryEventSink<S> for NullSink {
    fn on_event(&self, _event: &QueryStoreEvent<S>) {}
}

/// Event collector for testing - accumulates events for assertions.
///
/// Clones share the same buffer, so one clone can be subscribed while
/// another is inspected.
///
/// # Example
///
/// ```ignore
/// let collector = EventCollector::new();
/// let _subscription = store.subscribe(collector.clone());
/// store.fetch().await?;
/// assert_eq!(collector.kinds()[0], QueryStoreEventKind::FetchingStarted);
/// ```
pub struct EventCollector<S: OperationState> {
    events: Arc<Mutex<Vec<QueryStoreEvent<S>>>>,
}

impl<S: OperationState> EventCollector<S> {
    /// Create a new empty event collector.
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Get collected events as a vector.
    pub fn events(&self) -> Vec<QueryStoreEvent<S>> {
        self.events.lock().clone()
    }

    /// Kinds of the collected events, in order.
    pub fn kinds(&self) -> Vec<QueryStoreEventKind> {
        self.events.lock().iter().map(QueryStoreEvent::kind).collect()
    }

    /// Snapshots carried by the collected `StateChanged` events, in order.
    pub fn states(&self) -> Vec<S> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                QueryStoreEvent::StateChanged { state, .. } => Some(state.clone()),
                _ => None,
            })
            .collect()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Take collected events, clearing the collector.
    pub fn take(&self) -> Vec<QueryStoreEvent<S>> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Get the number of collected events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Check if no events have been collected.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl<S: OperationState> Clone for EventCollector<S> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}

impl<S: OperationState> Default for EventCollector<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: OperationState> QueryEventSink<S> for EventCollector<S> {
    fn on_event(&self, event: &QueryStoreEvent<S>) {
        self.events.lock().push(event.clone());
    }
}
