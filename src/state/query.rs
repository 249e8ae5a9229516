use std::time::SystemTime;

use super::{OperationKind, OperationState, ResetEffect};
use crate::context::QueryContext;
use crate::task::{QueryTask, QueryTaskId};
use crate::QueryError;

/// State of a plain query: one current value and the last error.
///
/// A task's result is applied only if no task scheduled after it has already
/// applied one, so a slow early fetch never overwrites a faster later one.
/// Errors leave the current value in place.
#[derive(Debug, Clone)]
pub struct QueryState<V> {
    initial_value: Option<V>,
    current_value: Option<V>,
    value_update_count: u64,
    value_last_updated_at: Option<SystemTime>,
    error: Option<QueryError>,
    error_update_count: u64,
    error_last_updated_at: Option<SystemTime>,
    active_tasks: Vec<QueryTaskId>,
    last_applied_task: Option<QueryTaskId>,
}

impl<V: Clone> QueryState<V> {
    /// Create a state holding `initial_value`.
    pub fn new(initial_value: Option<V>) -> Self {
        Self {
            current_value: initial_value.clone(),
            initial_value,
            value_update_count: 0,
            value_last_updated_at: None,
            error: None,
            error_update_count: 0,
            error_last_updated_at: None,
            active_tasks: Vec::new(),
            last_applied_task: None,
        }
    }

    /// Tasks scheduled and not yet finished, oldest first.
    pub fn active_tasks(&self) -> &[QueryTaskId] {
        &self.active_tasks
    }

    /// Record `result` as of `at`, bumping the matching counter.
    pub(crate) fn apply_at(&mut self, result: Result<V, QueryError>, at: SystemTime) {
        match result {
            Ok(value) => {
                self.current_value = Some(value);
                self.value_update_count += 1;
                self.value_last_updated_at = Some(at);
                self.error = None;
            }
            Err(error) => {
                self.error = Some(error);
                self.error_update_count += 1;
                self.error_last_updated_at = Some(at);
            }
        }
    }

    pub(crate) fn reset_values(&mut self) {
        *self = Self::new(self.initial_value.clone());
    }

    pub(crate) fn schedule(&mut self, task_id: QueryTaskId) {
        self.active_tasks.push(task_id);
    }

    /// Forget `task_id`. Returns `false` if it was not active.
    pub(crate) fn finish(&mut self, task_id: QueryTaskId) -> bool {
        match self.active_tasks.iter().position(|id| *id == task_id) {
            Some(index) => {
                self.active_tasks.remove(index);
                true
            }
            None => false,
        }
    }

    fn is_superseded(&self, task_id: QueryTaskId) -> bool {
        self.last_applied_task.is_some_and(|applied| applied > task_id)
    }

    fn apply_from_task(&mut self, result: &Result<V, QueryError>, task_id: QueryTaskId, context: &QueryContext) -> bool {
        if matches!(result, Err(error) if error.is_cancellation()) {
            return false;
        }
        if self.is_superseded(task_id) {
            tracing::trace!(?task_id, "dropping result superseded by a later task");
            return false;
        }
        self.apply_at(result.clone(), context.clock().now());
        self.last_applied_task = Some(task_id);
        true
    }
}

impl<V: Clone + Send + Sync + 'static> OperationState for QueryState<V> {
    type Value = V;
    type TaskValue = V;

    fn kind() -> OperationKind {
        OperationKind::Query
    }

    fn current_value(&self) -> Option<&V> {
        self.current_value.as_ref()
    }

    fn initial_value(&self) -> Option<&V> {
        self.initial_value.as_ref()
    }

    fn error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }

    fn value_update_count(&self) -> u64 {
        self.value_update_count
    }

    fn value_last_updated_at(&self) -> Option<SystemTime> {
        self.value_last_updated_at
    }

    fn error_update_count(&self) -> u64 {
        self.error_update_count
    }

    fn error_last_updated_at(&self) -> Option<SystemTime> {
        self.error_last_updated_at
    }

    fn is_loading(&self) -> bool {
        !self.active_tasks.is_empty()
    }

    fn deduplication_key(&self, _context: &QueryContext) -> Option<&'static str> {
        Some("fetch")
    }

    fn schedule_fetch_task(&mut self, task: &QueryTask<V>, _context: &QueryContext) {
        self.schedule(task.id());
    }

    fn update_with_task_result(
        &mut self,
        result: &Result<V, QueryError>,
        task_id: QueryTaskId,
        context: &QueryContext,
    ) -> bool {
        if !self.finish(task_id) {
            return false;
        }
        self.apply_from_task(result, task_id, context)
    }

    fn update_with_yield(
        &mut self,
        result: &Result<V, QueryError>,
        task_id: QueryTaskId,
        context: &QueryContext,
    ) -> bool {
        if !self.active_tasks.contains(&task_id) {
            return false;
        }
        self.apply_from_task(result, task_id, context)
    }

    fn update_with_context(&mut self, result: Result<V, QueryError>, context: &QueryContext) {
        self.apply_at(result, context.clock().now());
    }

    fn reset(&mut self, _context: &QueryContext) -> ResetEffect {
        self.reset_values();
        ResetEffect::new()
    }
}
