use std::collections::VecDeque;
use std::marker::PhantomData;
use std::time::SystemTime;

use super::{OperationKind, OperationState, QueryState, ResetEffect};
use crate::context::{ContextKey, QueryContext};
use crate::error::Misuse;
use crate::path::QueryPath;
use crate::task::{QueryTask, QueryTaskId};
use crate::QueryError;

/// Arguments for the next mutation attempt.
///
/// When unset, a fetch retries the latest history entry's arguments.
pub struct MutationArgumentsKey<A>(PhantomData<fn() -> A>);

impl<A: Clone + Send + Sync + 'static> ContextKey for MutationArgumentsKey<A> {
    type Value = Option<A>;

    fn default_value() -> Self::Value {
        None
    }
}

/// Maximum number of attempts a mutation keeps in its history. Defaults to `1`;
/// values below `1` are treated as `1`.
pub struct MaxHistoryLengthKey;

impl ContextKey for MaxHistoryLengthKey {
    type Value = usize;

    fn default_value() -> Self::Value {
        1
    }
}

/// Status of one mutation attempt.
#[derive(Debug, Clone)]
pub enum MutationStatus<V> {
    /// Scheduled but not started.
    Idle,
    /// Running.
    Loading,
    /// Finished.
    Result(Result<V, QueryError>),
}

impl<V> MutationStatus<V> {
    pub fn is_loading(&self) -> bool {
        matches!(self, MutationStatus::Loading)
    }

    /// The outcome, if finished.
    pub fn result(&self) -> Option<&Result<V, QueryError>> {
        match self {
            MutationStatus::Result(result) => Some(result),
            _ => None,
        }
    }
}

/// One attempt in a mutation's history.
#[derive(Debug, Clone)]
pub struct MutationHistoryEntry<A, V> {
    arguments: A,
    task: QueryTask<V>,
    status: MutationStatus<V>,
    started_at: SystemTime,
    last_updated_at: Option<SystemTime>,
    sequence: u64,
}

impl<A, V> MutationHistoryEntry<A, V> {
    /// The arguments the attempt was made with.
    pub fn arguments(&self) -> &A {
        &self.arguments
    }

    /// The task running the attempt.
    pub fn task(&self) -> &QueryTask<V> {
        &self.task
    }

    pub fn status(&self) -> &MutationStatus<V> {
        &self.status
    }

    /// When the attempt was scheduled.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// When the attempt's result arrived.
    pub fn last_updated_at(&self) -> Option<SystemTime> {
        self.last_updated_at
    }
}

#[derive(Debug, Clone)]
struct Yielded<V> {
    result: Result<V, QueryError>,
    at: SystemTime,
    sequence: u64,
}

/// State of a mutation: a bounded history of attempts plus out-of-band yields.
///
/// The current value and error come from whichever is more recent: the
/// newest history entry that has a result, or the last yielded result.
/// "More recent" compares timestamps first and application order second.
#[derive(Debug, Clone)]
pub struct MutationState<A, V> {
    base: QueryState<V>,
    history: VecDeque<MutationHistoryEntry<A, V>>,
    yielded: Option<Yielded<V>>,
    applied_sequence: Option<u64>,
    next_sequence: u64,
}

impl<A: Clone, V: Clone> MutationState<A, V> {
    pub fn new() -> Self {
        Self {
            base: QueryState::new(None),
            history: VecDeque::new(),
            yielded: None,
            applied_sequence: None,
            next_sequence: 0,
        }
    }

    /// Attempts from oldest to newest.
    pub fn history(&self) -> &VecDeque<MutationHistoryEntry<A, V>> {
        &self.history
    }

    fn entry_mut(&mut self, task_id: QueryTaskId) -> Option<&mut MutationHistoryEntry<A, V>> {
        self.history.iter_mut().find(|entry| entry.task.id() == task_id)
    }

    fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn record_yield(&mut self, result: Result<V, QueryError>, at: SystemTime) -> bool {
        let sequence = self.next_sequence();
        self.yielded = Some(Yielded {
            result,
            at,
            sequence,
        });
        self.reconcile()
    }

    /// Recompute the current value from history and yields. Returns `true`
    /// if a different update than before became current.
    fn reconcile(&mut self) -> bool {
        let from_history = self.history.iter().rev().find_map(|entry| {
            let result = entry.status.result()?;
            if matches!(result, Err(error) if error.is_cancellation()) {
                return None;
            }
            Some((entry.last_updated_at?, entry.sequence, result))
        });
        let from_yield = self
            .yielded
            .as_ref()
            .map(|yielded| (yielded.at, yielded.sequence, &yielded.result));

        let (at, sequence, result) = match (from_history, from_yield) {
            (Some(history), Some(yielded)) => {
                if (yielded.0, yielded.1) > (history.0, history.1) {
                    yielded
                } else {
                    history
                }
            }
            (Some(history), None) => history,
            (None, Some(yielded)) => yielded,
            (None, None) => return false,
        };
        if self.applied_sequence == Some(sequence) {
            return false;
        }
        let result = result.clone();
        self.applied_sequence = Some(sequence);
        self.base.apply_at(result, at);
        true
    }
}

impl<A: Clone, V: Clone> Default for MutationState<A, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, V> OperationState for MutationState<A, V>
where
    A: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Value = V;
    type TaskValue = V;

    fn kind() -> OperationKind {
        OperationKind::Mutation
    }

    fn default_automatic_fetching() -> bool {
        false
    }

    fn current_value(&self) -> Option<&V> {
        self.base.current_value()
    }

    fn initial_value(&self) -> Option<&V> {
        None
    }

    fn error(&self) -> Option<&QueryError> {
        self.base.error()
    }

    fn value_update_count(&self) -> u64 {
        self.base.value_update_count()
    }

    fn value_last_updated_at(&self) -> Option<SystemTime> {
        self.base.value_last_updated_at()
    }

    fn error_update_count(&self) -> u64 {
        self.base.error_update_count()
    }

    fn error_last_updated_at(&self) -> Option<SystemTime> {
        self.base.error_last_updated_at()
    }

    fn is_loading(&self) -> bool {
        self.history.iter().any(|entry| entry.status.is_loading())
    }

    fn prepare_fetch(&self, path: &QueryPath, context: &mut QueryContext) -> Result<(), QueryError> {
        if context.get::<MutationArgumentsKey<A>>().is_some() {
            return Ok(());
        }
        match self.history.back() {
            Some(latest) => {
                context.set::<MutationArgumentsKey<A>>(Some(latest.arguments.clone()));
                Ok(())
            }
            None => {
                let misuse = Misuse::MutationWithoutArguments {
                    path: path.debug_repr(),
                };
                context.issue_reporter().report(&misuse);
                Err(QueryError::Misuse(misuse))
            }
        }
    }

    fn deduplication_key(&self, _context: &QueryContext) -> Option<&'static str> {
        None
    }

    fn schedule_fetch_task(&mut self, task: &QueryTask<V>, context: &QueryContext) {
        let Some(arguments) = context.get::<MutationArgumentsKey<A>>() else {
            return;
        };
        self.history.push_back(MutationHistoryEntry {
            arguments,
            task: task.clone(),
            status: MutationStatus::Idle,
            started_at: context.clock().now(),
            last_updated_at: None,
            sequence: 0,
        });
        let max_length = context.get::<MaxHistoryLengthKey>().max(1);
        while self.history.len() > max_length {
            if let Some(evicted) = self.history.pop_front() {
                tracing::trace!(task_id = ?evicted.task.id(), "evicted mutation history entry");
            }
        }
    }

    fn begin_fetch_task(&mut self, task_id: QueryTaskId, _context: &QueryContext) {
        if let Some(entry) = self.entry_mut(task_id) {
            entry.status = MutationStatus::Loading;
        }
    }

    fn update_with_task_result(
        &mut self,
        result: &Result<V, QueryError>,
        task_id: QueryTaskId,
        context: &QueryContext,
    ) -> bool {
        let now = context.clock().now();
        let sequence = self.next_sequence();
        let Some(entry) = self.entry_mut(task_id) else {
            tracing::trace!(?task_id, "dropping result of evicted mutation attempt");
            return false;
        };
        entry.status = MutationStatus::Result(result.clone());
        entry.last_updated_at = Some(now);
        entry.sequence = sequence;
        if matches!(result, Err(error) if error.is_cancellation()) {
            return false;
        }
        self.reconcile()
    }

    fn update_with_yield(
        &mut self,
        result: &Result<V, QueryError>,
        task_id: QueryTaskId,
        context: &QueryContext,
    ) -> bool {
        if self.entry_mut(task_id).is_none() {
            return false;
        }
        if matches!(result, Err(error) if error.is_cancellation()) {
            return false;
        }
        self.record_yield(result.clone(), context.clock().now())
    }

    fn update_with_context(&mut self, result: Result<V, QueryError>, context: &QueryContext) {
        self.record_yield(result, context.clock().now());
    }

    fn reset(&mut self, _context: &QueryContext) -> ResetEffect {
        let mut effect = ResetEffect::new();
        for entry in &self.history {
            effect.cancel(&entry.task);
        }
        *self = Self::new();
        effect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::CollectingIssueReporter;
    use crate::task::QueryTaskConfiguration;
    use std::sync::Arc;
    use std::time::Duration;

    type State = MutationState<&'static str, i32>;

    fn task() -> QueryTask<i32> {
        QueryTask::new(QueryTaskConfiguration::default(), async { Ok(0) })
    }

    fn with_arguments(context: &QueryContext, arguments: &'static str) -> QueryContext {
        context
            .clone()
            .with::<MutationArgumentsKey<&'static str>>(Some(arguments))
    }

    fn start(state: &mut State, context: &QueryContext, arguments: &'static str) -> QueryTask<i32> {
        let task = task();
        let context = with_arguments(context, arguments);
        state.schedule_fetch_task(&task, &context);
        state.begin_fetch_task(task.id(), &context);
        task
    }

    #[test]
    fn test_history_is_bounded() {
        let context = QueryContext::new().with::<MaxHistoryLengthKey>(2);
        let mut state = State::new();
        for arguments in ["a", "b", "c"] {
            let task = start(&mut state, &context, arguments);
            state.update_with_task_result(&Ok(1), task.id(), &context);
        }
        let arguments: Vec<_> = state.history().iter().map(|e| *e.arguments()).collect();
        assert_eq!(arguments, vec!["b", "c"]);
    }

    #[test]
    fn test_zero_max_length_keeps_one() {
        let context = QueryContext::new().with::<MaxHistoryLengthKey>(0);
        let mut state = State::new();
        start(&mut state, &context, "a");
        start(&mut state, &context, "b");
        assert_eq!(state.history().len(), 1);
        assert!(state.is_loading());
    }

    #[test]
    fn test_later_history_entry_wins_regardless_of_completion_order() {
        let context = QueryContext::new().with::<MaxHistoryLengthKey>(5);
        let mut state = State::new();
        let a = start(&mut state, &context, "a");
        let b = start(&mut state, &context, "b");

        assert!(state.update_with_task_result(&Ok(2), b.id(), &context));
        assert!(!state.update_with_task_result(&Ok(1), a.id(), &context));
        assert_eq!(state.current_value(), Some(&2));
        assert_eq!(state.value_update_count(), 1);
    }

    #[test]
    fn test_most_recent_timestamp_wins() {
        let clock = Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(10)));
        let context = QueryContext::new().with_clock(clock.clone());
        let mut state = State::new();

        let task = start(&mut state, &context, "a");
        state.update_with_context(Ok(100), &context);

        clock.set(SystemTime::UNIX_EPOCH + Duration::from_secs(5));
        assert!(!state.update_with_task_result(&Ok(1), task.id(), &context));
        assert_eq!(state.current_value(), Some(&100));

        clock.set(SystemTime::UNIX_EPOCH + Duration::from_secs(20));
        let task = start(&mut state, &context, "b");
        assert!(state.update_with_task_result(&Ok(2), task.id(), &context));
        assert_eq!(state.current_value(), Some(&2));
    }

    #[test]
    fn test_ties_go_to_the_last_applied_update() {
        let context = QueryContext::new().with_clock(Arc::new(ManualClock::default()));
        let mut state = State::new();
        let task = start(&mut state, &context, "a");
        state.update_with_task_result(&Ok(1), task.id(), &context);
        state.update_with_context(Ok(2), &context);
        assert_eq!(state.current_value(), Some(&2));
    }

    #[test]
    fn test_evicted_attempt_is_ignored() {
        let context = QueryContext::new();
        let mut state = State::new();
        let first = start(&mut state, &context, "a");
        start(&mut state, &context, "b");
        assert!(!state.update_with_task_result(&Ok(1), first.id(), &context));
        assert!(state.current_value().is_none());
    }

    #[test]
    fn test_prepare_fetch_without_arguments_reports_misuse() {
        let reporter = Arc::new(CollectingIssueReporter::new());
        let mut context = QueryContext::new().with_issue_reporter(reporter.clone());
        let state = State::new();

        let error = state
            .prepare_fetch(&QueryPath::from("m"), &mut context)
            .unwrap_err();
        assert!(matches!(
            error.misuse(),
            Some(Misuse::MutationWithoutArguments { .. })
        ));
        assert_eq!(reporter.len(), 1);
    }

    #[test]
    fn test_prepare_fetch_retries_latest_arguments() {
        let context = QueryContext::new();
        let mut state = State::new();
        start(&mut state, &context, "latest");

        let mut retry = QueryContext::new();
        state.prepare_fetch(&QueryPath::empty(), &mut retry).unwrap();
        assert_eq!(retry.get::<MutationArgumentsKey<&'static str>>(), Some("latest"));
    }

    #[test]
    fn test_reset_cancels_history_tasks() {
        let context = QueryContext::new().with::<MaxHistoryLengthKey>(3);
        let mut state = State::new();
        let a = start(&mut state, &context, "a");
        let b = start(&mut state, &context, "b");
        state.update_with_task_result(&Ok(1), b.id(), &context);

        let effect = state.reset(&context);
        assert_eq!(effect.len(), 2);
        effect.apply();
        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(state.history().is_empty());
        assert!(state.current_value().is_none());
        assert_eq!(state.value_update_count(), 0);
    }
}
