//! The per-query store: state, context, in-flight tasks and subscribers.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use ahash::HashMap;
use parking_lot::{Mutex, ReentrantMutex};

use crate::condition::AlwaysCondition;
use crate::context::QueryContext;
use crate::continuation::QueryContinuation;
use crate::controller::{ControllersKey, QueryController, QueryControls};
use crate::events::{QueryEventSink, QueryStoreEvent, ResultUpdateReason};
use crate::path::QueryPath;
use crate::pipeline;
use crate::query::{
    InfiniteQuery, InfiniteQueryAdapter, Mutation, MutationAdapter, Query, QueryAdapter,
    StoreRequest,
};
use crate::state::{
    InfiniteFetchKind, InfiniteFetchKindKey, InfiniteQueryPage, InfiniteQueryState,
    InfiniteQueryValue, MutationArgumentsKey, MutationHistoryEntry, MutationState, OperationKind,
    OperationState, QueryState,
};
use crate::subscriptions::{QuerySubscription, QuerySubscriptions};
use crate::task::{QueryTask, QueryTaskConfiguration, QueryTaskHandle, QueryTaskId, QueryTaskStatus};
use crate::QueryError;

/// Owns the state of one query, mutation or infinite query.
///
/// A store runs fetches through its retry pipeline, shares in-flight fetches
/// between callers, applies every result to its state and tells subscribers
/// about each change. Cloning is cheap; clones refer to the same store.
///
/// Dropping the last handle cancels every task the store still tracks.
///
/// # Example
///
/// ```ignore
/// let store = QueryStore::detached(UserProfile { id: 1 });
/// let _subscription = store.subscribe(|event: &QueryStoreEvent<_>| {
///     println!("{:?}", event.kind());
/// });
/// let profile = store.fetch().await?;
/// ```
pub struct QueryStore<S: OperationState> {
    inner: Arc<StoreInner<S>>,
}

impl<S: OperationState> Clone for QueryStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// A handle that does not keep its store alive.
pub struct WeakQueryStore<S: OperationState> {
    inner: Weak<StoreInner<S>>,
}

impl<S: OperationState> WeakQueryStore<S> {
    /// The store, if it is still alive.
    pub fn upgrade(&self) -> Option<QueryStore<S>> {
        self.inner.upgrade().map(|inner| QueryStore { inner })
    }
}

impl<S: OperationState> Clone for WeakQueryStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct StoreInner<S: OperationState> {
    path: QueryPath,
    request: Arc<dyn StoreRequest<State = S>>,
    core: Mutex<StoreCore<S>>,
    subscriptions: QuerySubscriptions<Arc<dyn QueryEventSink<S>>>,
    /// Serializes event delivery. Reentrant so handlers may call back in.
    emission: ReentrantMutex<RefCell<EmitQueue<S>>>,
    controllers: Mutex<Vec<QuerySubscription>>,
    condition_subscription: Mutex<Option<QuerySubscription>>,
}

struct StoreCore<S: OperationState> {
    state: S,
    context: QueryContext,
    tasks: HashMap<QueryTaskId, QueryTask<S::TaskValue>>,
    deduplicated: HashMap<&'static str, QueryTaskId>,
}

struct EmitQueue<S: OperationState> {
    pending: VecDeque<QueryStoreEvent<S>>,
    draining: bool,
}

impl<S: OperationState> StoreInner<S> {
    /// Run `f` under the core lock, then deliver the events it produced.
    ///
    /// Events are delivered in the order transactions commit. A transaction
    /// started by a handler queues its events behind the ones being delivered.
    fn transact<R>(&self, f: impl FnOnce(&mut StoreCore<S>, &mut Vec<QueryStoreEvent<S>>) -> R) -> R {
        let emission = self.emission.lock();
        let mut events = Vec::new();
        let output = {
            let mut core = self.core.lock();
            f(&mut core, &mut events)
        };

        {
            let mut queue = emission.borrow_mut();
            queue.pending.extend(events);
            if queue.draining {
                return output;
            }
            queue.draining = true;
        }
        loop {
            let next = emission.borrow_mut().pending.pop_front();
            let Some(event) = next else { break };
            for sink in self.subscriptions.handlers() {
                sink.on_event(&event);
            }
        }
        emission.borrow_mut().draining = false;
        output
    }

    fn state_changed(core: &StoreCore<S>, context: &QueryContext) -> QueryStoreEvent<S> {
        QueryStoreEvent::StateChanged {
            state: core.state.clone(),
            context: context.clone(),
        }
    }

    /// Register a task that is about to run. Returns `false` if the task was
    /// cancelled or forgotten in the meantime.
    fn begin_task(&self, task: &QueryTask<S::TaskValue>, context: &QueryContext) -> bool {
        self.transact(|core, events| {
            if task.is_cancelled() || !core.tasks.contains_key(&task.id()) {
                return false;
            }
            core.state.schedule_fetch_task(task, context);
            core.state.begin_fetch_task(task.id(), context);
            events.push(QueryStoreEvent::FetchingStarted { task_id: task.id() });
            events.push(Self::state_changed(core, context));
            true
        })
    }

    fn apply_yield(&self, task_id: QueryTaskId, result: Result<S::TaskValue, QueryError>, context: &QueryContext) {
        self.transact(|core, events| {
            if !core.tasks.contains_key(&task_id) {
                tracing::trace!(?task_id, "dropping yield from a forgotten task");
                return;
            }
            if core.state.update_with_yield(&result, task_id, context) {
                events.push(QueryStoreEvent::ResultReceived {
                    task_id,
                    result,
                    reason: ResultUpdateReason::YieldedResult,
                });
                events.push(Self::state_changed(core, context));
            }
        })
    }

    /// Stop tracking a task that never began.
    fn forget_task(&self, task_id: QueryTaskId) -> Option<QueryTask<S::TaskValue>> {
        self.transact(|core, _events| {
            let removed = core.tasks.remove(&task_id)?;
            core.deduplicated.retain(|_, id| *id != task_id);
            Some(removed)
        })
    }

    fn finish_task(&self, task_id: QueryTaskId, result: &Result<S::TaskValue, QueryError>, context: &QueryContext) {
        let removed = self.transact(|core, events| {
            let removed = core.tasks.remove(&task_id)?;
            core.deduplicated.retain(|_, id| *id != task_id);
            if core.state.update_with_task_result(result, task_id, context) {
                events.push(QueryStoreEvent::ResultReceived {
                    task_id,
                    result: result.clone(),
                    reason: ResultUpdateReason::ReturnedFinalResult,
                });
            }
            events.push(Self::state_changed(core, context));
            events.push(QueryStoreEvent::FetchingEnded { task_id });
            Some(removed)
        });
        if removed.is_none() {
            tracing::trace!(?task_id, "task finished after its store forgot it");
        }
    }

    fn stop_automatic_fetching(&self) {
        let subscription = self.condition_subscription.lock().take();
        drop(subscription);
    }
}

impl<S: OperationState> Drop for StoreInner<S> {
    fn drop(&mut self) {
        for task in self.core.get_mut().tasks.values() {
            task.cancel();
        }
    }
}

/// Body of every task a store creates.
async fn run_store_task<S: OperationState>(
    store: Weak<StoreInner<S>>,
    handle: QueryTaskHandle<S::TaskValue>,
    context: QueryContext,
) -> Result<S::TaskValue, QueryError> {
    let task_id = handle.id();
    let token = handle.token().clone();
    let (request, path) = {
        let (Some(inner), Some(task)) = (store.upgrade(), handle.upgrade()) else {
            return Err(QueryError::Cancelled);
        };
        if !inner.begin_task(&task, &context) {
            drop(inner.forget_task(task_id));
            return Err(QueryError::Cancelled);
        }
        (inner.request.clone(), inner.path.clone())
    };
    tracing::debug!(path = %path.debug_repr(), ?task_id, "fetch started");

    let continuation = {
        let store = store.clone();
        let context = context.clone();
        QueryContinuation::new(move |result, yield_context: Option<QueryContext>| {
            if let Some(inner) = store.upgrade() {
                match yield_context {
                    Some(extra) => {
                        let mut merged = context.clone();
                        merged.merge(&extra);
                        inner.apply_yield(task_id, result, &merged);
                    }
                    None => inner.apply_yield(task_id, result, &context),
                }
            }
        })
    };
    let result = tokio::select! {
        biased;
        _ = token.cancelled() => Err(QueryError::Cancelled),
        result = pipeline::fetch_with_retry(request.as_ref(), &context, &continuation) => result,
    };
    tracing::debug!(path = %path.debug_repr(), ?task_id, ok = result.is_ok(), "fetch finished");

    if let Some(inner) = store.upgrade() {
        inner.finish_task(task_id, &result, &context);
    }
    result
}

impl<S: OperationState> QueryStore<S> {
    /// Create a store for `request`, letting it adjust `context` first.
    pub(crate) fn from_request<R>(request: R, mut context: QueryContext) -> Self
    where
        R: StoreRequest<State = S>,
    {
        request.setup(&mut context);
        let path = request.path();
        let state = request.initial_state();
        let controllers = context.get::<ControllersKey<S>>();
        let store = Self {
            inner: Arc::new(StoreInner {
                path,
                request: Arc::new(request),
                core: Mutex::new(StoreCore {
                    state,
                    context,
                    tasks: HashMap::default(),
                    deduplicated: HashMap::default(),
                }),
                subscriptions: QuerySubscriptions::new(),
                emission: ReentrantMutex::new(RefCell::new(EmitQueue {
                    pending: VecDeque::new(),
                    draining: false,
                })),
                controllers: Mutex::new(Vec::new()),
                condition_subscription: Mutex::new(None),
            }),
        };
        for controller in controllers {
            store.attach_controller(controller.as_ref());
        }
        store
    }

    /// The store's path.
    pub fn path(&self) -> &QueryPath {
        &self.inner.path
    }

    /// The kind of operation this store runs.
    pub fn kind(&self) -> OperationKind {
        S::kind()
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> S {
        self.inner.core.lock().state.clone()
    }

    /// The context every fetch starts from.
    pub fn context(&self) -> QueryContext {
        self.inner.core.lock().context.clone()
    }

    /// Replace the context every fetch starts from.
    pub fn set_context(&self, context: QueryContext) {
        self.inner.core.lock().context = context;
    }

    /// Edit the context every fetch starts from.
    pub fn with_context(&self, edit: impl FnOnce(&mut QueryContext)) {
        edit(&mut self.inner.core.lock().context);
    }

    pub fn current_value(&self) -> Option<S::Value> {
        self.inner.core.lock().state.current_value().cloned()
    }

    pub fn error(&self) -> Option<QueryError> {
        self.inner.core.lock().state.error().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.core.lock().state.is_loading()
    }

    pub fn value_update_count(&self) -> u64 {
        self.inner.core.lock().state.value_update_count()
    }

    pub fn value_last_updated_at(&self) -> Option<SystemTime> {
        self.inner.core.lock().state.value_last_updated_at()
    }

    pub fn error_update_count(&self) -> u64 {
        self.inner.core.lock().state.error_update_count()
    }

    pub fn error_last_updated_at(&self) -> Option<SystemTime> {
        self.inner.core.lock().state.error_last_updated_at()
    }

    /// Fetch with the store's context and wait for the result.
    ///
    /// Joins an equivalent fetch already in flight instead of starting a new
    /// one, unless deduplication is disabled.
    pub async fn fetch(&self) -> Result<S::TaskValue, QueryError> {
        self.fetch_task().run_if_needed().await
    }

    /// Fetch with `context` layered over the store's context.
    pub async fn fetch_with(&self, context: QueryContext) -> Result<S::TaskValue, QueryError> {
        self.fetch_task_with(context).run_if_needed().await
    }

    /// The task [`QueryStore::fetch`] would wait on, without starting it.
    pub fn fetch_task(&self) -> QueryTask<S::TaskValue> {
        self.fetch_task_with(QueryContext::new())
    }

    /// The task [`QueryStore::fetch_with`] would wait on, without starting it.
    ///
    /// If the fetch cannot be prepared, for instance a mutation with nothing
    /// to retry, the returned task fails with the preparation error.
    pub fn fetch_task_with(&self, context: QueryContext) -> QueryTask<S::TaskValue> {
        let inner = &self.inner;
        let weak = Arc::downgrade(inner);
        let (task, pruned) = inner.transact(|core, _events| {
            let mut context = {
                let mut merged = core.context.clone();
                merged.merge(&context);
                merged
            };
            if let Err(error) = core.state.prepare_fetch(&inner.path, &mut context) {
                let configuration = QueryTaskConfiguration::new(context);
                return (QueryTask::new(configuration, async move { Err(error) }), Vec::new());
            }

            let key = if context.is_deduplication_enabled() {
                core.state.deduplication_key(&context)
            } else {
                None
            };
            if let Some(existing) = key
                .and_then(|key| core.deduplicated.get(key))
                .and_then(|id| core.tasks.get(id))
            {
                if !existing.is_cancelled() && !existing.is_finished() {
                    return (existing.clone(), Vec::new());
                }
            }

            let pruned = prune_abandoned(core);
            let configuration = QueryTaskConfiguration::new(context.clone());
            let task = QueryTask::new_cooperative(configuration, |handle| {
                run_store_task(weak, handle, context)
            });
            core.tasks.insert(task.id(), task.clone());
            if let Some(key) = key {
                core.deduplicated.insert(key, task.id());
            }
            (task, pruned)
        });
        drop(pruned);
        task
    }

    /// Return to the initial state and cancel every task in flight.
    ///
    /// Anyone awaiting a cancelled task gets [`QueryError::Cancelled`].
    pub fn reset_state(&self) {
        self.reset_state_with(QueryContext::new());
    }

    /// [`QueryStore::reset_state`] with `context` layered over the store's context.
    pub fn reset_state_with(&self, context: QueryContext) {
        let drained = self.inner.transact(|core, events| {
            let context = {
                let mut merged = core.context.clone();
                merged.merge(&context);
                merged
            };
            let effect = core.state.reset(&context);
            core.deduplicated.clear();
            let drained: Vec<_> = core.tasks.drain().map(|(_, task)| task).collect();
            for task in &drained {
                task.cancel();
            }
            effect.apply();
            events.push(StoreInner::state_changed(core, &context));
            for task in &drained {
                if task.status() == QueryTaskStatus::Running {
                    events.push(QueryStoreEvent::FetchingEnded { task_id: task.id() });
                }
            }
            drained
        });
        tracing::debug!(path = %self.inner.path.debug_repr(), cancelled = drained.len(), "store reset");
    }

    /// Apply a result directly, outside any task.
    pub(crate) fn apply_imperative(&self, result: Result<S::Value, QueryError>, context: QueryContext) {
        self.inner.transact(|core, events| {
            let context = {
                let mut merged = core.context.clone();
                merged.merge(&context);
                merged
            };
            core.state.update_with_context(result, &context);
            events.push(StoreInner::state_changed(core, &context));
        });
    }

    /// Listen to every event of this store until the subscription is dropped.
    ///
    /// The first such subscriber starts automatic fetching.
    pub fn subscribe(&self, sink: impl QueryEventSink<S>) -> QuerySubscription {
        self.subscribe_with(Arc::new(sink), false)
    }

    /// Listen without counting as an observer: no automatic fetching, and the
    /// store stays evictable.
    pub fn subscribe_temporary(&self, sink: impl QueryEventSink<S>) -> QuerySubscription {
        self.subscribe_with(Arc::new(sink), true)
    }

    fn subscribe_with(&self, sink: Arc<dyn QueryEventSink<S>>, temporary: bool) -> QuerySubscription {
        let inserted = self.inner.subscriptions.insert(sink, temporary);
        if inserted.is_first_durable {
            self.start_automatic_fetching();
        }
        let store = Arc::downgrade(&self.inner);
        let id = inserted.id;
        QuerySubscription::new(move || {
            let Some(inner) = store.upgrade() else { return };
            if inner.subscriptions.remove(id).is_some_and(|removed| removed.was_last_durable) {
                inner.stop_automatic_fetching();
            }
        })
    }

    /// Number of tasks the store is tracking.
    pub fn task_count(&self) -> usize {
        self.inner.core.lock().tasks.len()
    }

    /// Number of subscribers, temporary ones included.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    pub fn has_durable_subscribers(&self) -> bool {
        self.inner.subscriptions.has_durable()
    }

    fn start_automatic_fetching(&self) {
        let context = self.context();
        let condition = match context.automatic_fetching_condition() {
            Some(condition) => condition,
            None if S::default_automatic_fetching() => Arc::new(AlwaysCondition(true)),
            None => return,
        };

        let store = Arc::downgrade(&self.inner);
        let subscription = condition.subscribe(
            &context,
            Arc::new(move |satisfied| {
                if satisfied {
                    if let Some(inner) = store.upgrade() {
                        QueryStore { inner }.spawn_fetch();
                    }
                }
            }),
        );
        let previous = self.inner.condition_subscription.lock().replace(subscription);
        drop(previous);

        let needs_value = {
            let core = self.inner.core.lock();
            core.state.value_update_count() == 0 && !core.state.is_loading()
        };
        if needs_value && condition.is_satisfied(&context) {
            self.spawn_fetch();
        }
    }

    /// Start a fetch on the ambient tokio runtime without waiting for it.
    pub(crate) fn spawn_fetch(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(path = %self.inner.path.debug_repr(), "no tokio runtime, skipping background fetch");
            return;
        };
        let task = self.fetch_task();
        drop(runtime.spawn(task.run_if_needed()));
    }

    /// Attach a controller for the lifetime of the store.
    pub fn add_controller(&self, controller: impl QueryController<S>) {
        self.attach_controller(&controller);
    }

    fn attach_controller(&self, controller: &dyn QueryController<S>) {
        let subscription = controller.control(QueryControls::new(self.downgrade()));
        self.inner.controllers.lock().push(subscription);
    }

    /// A handle that does not keep the store alive.
    pub fn downgrade(&self) -> WeakQueryStore<S> {
        WeakQueryStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns `true` if both handles refer to the same store.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Forget tasks that will never report back: finished ones, ones cancelled
/// before they started, and ones nobody ever ran and nobody holds anymore.
fn prune_abandoned<S: OperationState>(core: &mut StoreCore<S>) -> Vec<QueryTask<S::TaskValue>> {
    let abandoned: Vec<QueryTaskId> = core
        .tasks
        .iter()
        .filter(|(_, task)| {
            task.is_abandoned()
                || task.is_finished()
                || (task.is_cancelled() && task.status() == QueryTaskStatus::Created)
        })
        .map(|(id, _)| *id)
        .collect();
    if abandoned.is_empty() {
        return Vec::new();
    }
    core.deduplicated.retain(|_, id| !abandoned.contains(id));
    abandoned
        .iter()
        .filter_map(|id| core.tasks.remove(id))
        .collect()
}

impl<S: OperationState> fmt::Debug for QueryStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("QueryStore")
            .field("path", &self.inner.path)
            .field("kind", &S::kind())
            .field("tasks", &core.tasks.len())
            .field("subscribers", &self.inner.subscriptions.len())
            .finish()
    }
}

impl<V: Clone + Send + Sync + 'static> QueryStore<QueryState<V>> {
    /// A store for `query` that belongs to no client.
    pub fn detached<Q: Query<Value = V>>(query: Q) -> Self {
        Self::detached_with(query, QueryContext::new())
    }

    /// [`QueryStore::detached`] starting from `context`.
    pub fn detached_with<Q: Query<Value = V>>(query: Q, context: QueryContext) -> Self {
        Self::from_request(QueryAdapter(query), context)
    }
}

impl<A, V> QueryStore<MutationState<A, V>>
where
    A: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// A store for `mutation` that belongs to no client.
    pub fn detached_mutation<M>(mutation: M, context: QueryContext) -> Self
    where
        M: Mutation<Arguments = A, Value = V>,
    {
        Self::from_request(MutationAdapter(mutation), context)
    }

    /// Run the mutation with `arguments` and wait for the result.
    pub async fn mutate(&self, arguments: A) -> Result<V, QueryError> {
        self.mutate_task(arguments).run_if_needed().await
    }

    /// [`QueryStore::mutate`] with `context` layered over the store's context.
    pub async fn mutate_with(&self, arguments: A, context: QueryContext) -> Result<V, QueryError> {
        self.mutate_task_with(arguments, context).run_if_needed().await
    }

    /// The task [`QueryStore::mutate`] would wait on, without starting it.
    pub fn mutate_task(&self, arguments: A) -> QueryTask<V> {
        self.mutate_task_with(arguments, QueryContext::new())
    }

    pub fn mutate_task_with(&self, arguments: A, context: QueryContext) -> QueryTask<V> {
        self.fetch_task_with(context.with::<MutationArgumentsKey<A>>(Some(arguments)))
    }

    /// Run the mutation again with the arguments of the latest attempt.
    ///
    /// Fails with [`Misuse::MutationWithoutArguments`](crate::Misuse) if the
    /// mutation never ran.
    pub async fn retry_latest(&self) -> Result<V, QueryError> {
        self.fetch().await
    }

    /// Attempts from oldest to newest.
    pub fn history(&self) -> Vec<MutationHistoryEntry<A, V>> {
        self.inner.core.lock().state.history().iter().cloned().collect()
    }
}

impl<P, V> QueryStore<InfiniteQueryState<P, V>>
where
    P: Clone + PartialEq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// A store for `query` that belongs to no client.
    pub fn detached_infinite<Q>(query: Q, context: QueryContext) -> Self
    where
        Q: InfiniteQuery<PageId = P, PageValue = V>,
    {
        Self::from_request(InfiniteQueryAdapter(Arc::new(query)), context)
    }

    fn fetch_kind_task(&self, kind: InfiniteFetchKind) -> QueryTask<InfiniteQueryValue<P, V>> {
        self.fetch_task_with(QueryContext::new().with::<InfiniteFetchKindKey>(Some(kind)))
    }

    /// The task fetching the page after the last one, or the initial page if
    /// nothing was fetched yet. `None` if the list is known to be complete.
    pub fn fetch_next_page_task(&self) -> Option<QueryTask<InfiniteQueryValue<P, V>>> {
        {
            let core = self.inner.core.lock();
            if !core.state.pages().is_empty() && !core.state.has_next_page() {
                return None;
            }
        }
        Some(self.fetch_kind_task(InfiniteFetchKind::NextPage))
    }

    /// The task fetching the page before the first one, or the initial page
    /// if nothing was fetched yet. `None` if there is no earlier page.
    pub fn fetch_previous_page_task(&self) -> Option<QueryTask<InfiniteQueryValue<P, V>>> {
        {
            let core = self.inner.core.lock();
            if !core.state.pages().is_empty() && !core.state.has_previous_page() {
                return None;
            }
        }
        Some(self.fetch_kind_task(InfiniteFetchKind::PreviousPage))
    }

    /// The task refetching every page.
    pub fn fetch_all_pages_task(&self) -> QueryTask<InfiniteQueryValue<P, V>> {
        self.fetch_kind_task(InfiniteFetchKind::AllPages)
    }

    /// Fetch the next page. `Ok(None)` if there is none.
    pub async fn fetch_next_page(&self) -> Result<Option<InfiniteQueryValue<P, V>>, QueryError> {
        match self.fetch_next_page_task() {
            Some(task) => task.run_if_needed().await.map(Some),
            None => Ok(None),
        }
    }

    /// Fetch the previous page. `Ok(None)` if there is none.
    pub async fn fetch_previous_page(&self) -> Result<Option<InfiniteQueryValue<P, V>>, QueryError> {
        match self.fetch_previous_page_task() {
            Some(task) => task.run_if_needed().await.map(Some),
            None => Ok(None),
        }
    }

    /// Refetch every page front to back, keeping the current page count.
    pub async fn fetch_all_pages(&self) -> Result<InfiniteQueryValue<P, V>, QueryError> {
        self.fetch_all_pages_task().run_if_needed().await
    }

    pub fn pages(&self) -> Vec<InfiniteQueryPage<P, V>> {
        self.inner.core.lock().state.pages().to_vec()
    }

    pub fn next_page_id(&self) -> Option<P> {
        self.inner.core.lock().state.next_page_id().cloned()
    }

    pub fn previous_page_id(&self) -> Option<P> {
        self.inner.core.lock().state.previous_page_id().cloned()
    }

    pub fn has_next_page(&self) -> bool {
        self.inner.core.lock().state.has_next_page()
    }

    pub fn has_previous_page(&self) -> bool {
        self.inner.core.lock().state.has_previous_page()
    }

    pub fn is_loading_next_page(&self) -> bool {
        self.inner.core.lock().state.is_loading_next_page()
    }

    pub fn is_loading_previous_page(&self) -> bool {
        self.inner.core.lock().state.is_loading_previous_page()
    }

    pub fn is_loading_all_pages(&self) -> bool {
        self.inner.core.lock().state.is_loading_all_pages()
    }
}
