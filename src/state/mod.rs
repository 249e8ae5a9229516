//! Operation states: the data a store owns and the rules for updating it.
//!
//! One store engine serves three kinds of operation through the
//! [`OperationState`] trait:
//!
//! - [`QueryState`]: a single value with error tracking
//! - [`MutationState`]: a value derived from a bounded history of attempts
//! - [`InfiniteQueryState`]: an ordered list of pages with cursors
//!
//! States are plain data. They never run tasks themselves; the store calls
//! into them under its lock and reports the changes to subscribers.

mod infinite;
mod mutation;
mod query;

pub use infinite::{
    InfiniteFetchKind, InfiniteFetchKindKey, InfinitePageCursors, InfinitePageCursorsKey,
    InfinitePageTracker, InfinitePageTrackerKey, InfiniteQueryPage, InfiniteQueryPageResult,
    InfiniteQueryPaging, InfiniteQueryPagingKey, InfiniteQueryRequest, InfiniteQueryState,
    InfiniteQueryValue,
};
pub use mutation::{
    MaxHistoryLengthKey, MutationArgumentsKey, MutationHistoryEntry, MutationState,
    MutationStatus,
};
pub use query::QueryState;

use std::time::SystemTime;

use tokio_util::sync::CancellationToken;

use crate::context::QueryContext;
use crate::path::QueryPath;
use crate::task::{QueryTask, QueryTaskId};
use crate::QueryError;

/// The kind of operation a state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    InfiniteQuery,
}

/// Capability interface of a store's state.
///
/// `Value` is what the state exposes as its current value; `TaskValue` is
/// what a single fetch produces. They differ for infinite queries, where a
/// fetch produces one page but the value is the whole page list.
///
/// Every `update_*` method is called with the store lock held and returns
/// whether the state changed in a way subscribers must hear about as a
/// received result.
pub trait OperationState: Clone + Send + Sync + 'static {
    /// The externally visible value.
    type Value: Clone + Send + Sync + 'static;

    /// The value produced by one fetch task.
    type TaskValue: Clone + Send + Sync + 'static;

    /// Which kind of operation this is.
    fn kind() -> OperationKind;

    /// Whether stores of this kind fetch automatically when first observed.
    fn default_automatic_fetching() -> bool {
        true
    }

    fn current_value(&self) -> Option<&Self::Value>;

    fn initial_value(&self) -> Option<&Self::Value>;

    fn error(&self) -> Option<&QueryError>;

    fn value_update_count(&self) -> u64;

    fn value_last_updated_at(&self) -> Option<SystemTime>;

    fn error_update_count(&self) -> u64;

    fn error_last_updated_at(&self) -> Option<SystemTime>;

    fn is_loading(&self) -> bool;

    /// Resolve what the next fetch will do, recording it in `context`.
    ///
    /// Called before a task is created. An error aborts the fetch.
    fn prepare_fetch(&self, _path: &QueryPath, _context: &mut QueryContext) -> Result<(), QueryError> {
        Ok(())
    }

    /// Fetches that resolve to the same key share one in-flight task.
    /// `None` disables sharing for this fetch.
    fn deduplication_key(&self, context: &QueryContext) -> Option<&'static str>;

    /// Register a task that is about to run.
    fn schedule_fetch_task(&mut self, task: &QueryTask<Self::TaskValue>, context: &QueryContext);

    /// The task registered by `schedule_fetch_task` started running.
    fn begin_fetch_task(&mut self, _task_id: QueryTaskId, _context: &QueryContext) {}

    /// Apply a task's final result. Stale results are ignored.
    fn update_with_task_result(
        &mut self,
        result: &Result<Self::TaskValue, QueryError>,
        task_id: QueryTaskId,
        context: &QueryContext,
    ) -> bool;

    /// Apply a result yielded by a running task. Stale results are ignored.
    fn update_with_yield(
        &mut self,
        result: &Result<Self::TaskValue, QueryError>,
        task_id: QueryTaskId,
        context: &QueryContext,
    ) -> bool;

    /// Apply a result supplied directly, outside any task.
    fn update_with_context(&mut self, result: Result<Self::Value, QueryError>, context: &QueryContext);

    /// Return to the initial value, forgetting every task.
    fn reset(&mut self, context: &QueryContext) -> ResetEffect;
}

/// Tasks a state wants cancelled as part of a reset.
#[derive(Debug, Default)]
pub struct ResetEffect {
    tokens: Vec<CancellationToken>,
}

impl ResetEffect {
    /// An effect that cancels nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task to cancel.
    pub fn cancel<V>(&mut self, task: &QueryTask<V>) {
        self.tokens.push(task.cancellation_token());
    }

    /// Number of tasks to cancel.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check if there is nothing to cancel.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Cancel every collected task.
    pub fn apply(self) {
        for token in self.tokens {
            token.cancel();
        }
    }
}
