//! Cancellable, lazily started, memoized units of work.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::context::{QueryContext, TaskNameKey};
use crate::QueryError;

/// Unique identifier of a [`QueryTask`].
///
/// Identifiers are handed out in creation order, so a larger id always
/// belongs to a task created later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryTaskId(pub u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl QueryTaskId {
    fn next() -> Self {
        QueryTaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Diagnostic configuration captured when a task is created.
#[derive(Debug, Clone, Default)]
pub struct QueryTaskConfiguration {
    /// Human-readable name.
    pub name: Option<String>,
    /// Snapshot of the context the task was created with.
    pub context: QueryContext,
}

impl QueryTaskConfiguration {
    /// Capture `context`, taking the name from its task-name entry.
    pub fn new(context: QueryContext) -> Self {
        Self {
            name: context.get::<TaskNameKey>(),
            context,
        }
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Lifecycle of a [`QueryTask`]. The last three states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTaskStatus {
    /// Created but never run.
    Created,
    /// The work is executing.
    Running,
    /// The work produced a value.
    Completed,
    /// The work produced an error.
    Failed,
    /// The task was cancelled before its work finished.
    Cancelled,
}

impl QueryTaskStatus {
    /// Returns `true` for `Completed`, `Failed` and `Cancelled`.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            QueryTaskStatus::Completed | QueryTaskStatus::Failed | QueryTaskStatus::Cancelled
        )
    }
}

/// One attempt to produce a value asynchronously.
///
/// The work does not start until [`QueryTask::run_if_needed`] is first
/// awaited. However many callers await it, concurrently or later, the work
/// runs at most once and every caller observes the same outcome.
///
/// Cloning is cheap; clones share the same work and outcome.
///
/// # Example
///
/// ```ignore
/// let task = QueryTask::new(QueryTaskConfiguration::default(), async { Ok(42) });
/// let (a, b) = tokio::join!(task.run_if_needed(), task.run_if_needed());
/// assert_eq!(a.unwrap(), b.unwrap());
/// ```
pub struct QueryTask<V> {
    inner: Arc<TaskInner<V>>,
}

struct TaskInner<V> {
    id: QueryTaskId,
    configuration: QueryTaskConfiguration,
    token: CancellationToken,
    status: Mutex<QueryTaskStatus>,
    future: Shared<BoxFuture<'static, Result<V, QueryError>>>,
}

impl<V> Clone for QueryTask<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// What the work of a cooperative task can see of the task running it.
pub(crate) struct QueryTaskHandle<V> {
    id: QueryTaskId,
    token: CancellationToken,
    task: Weak<TaskInner<V>>,
}

impl<V> QueryTaskHandle<V> {
    pub(crate) fn id(&self) -> QueryTaskId {
        self.id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn upgrade(&self) -> Option<QueryTask<V>> {
        self.task.upgrade().map(|inner| QueryTask { inner })
    }
}

impl<V: Clone + Send + Sync + 'static> QueryTask<V> {
    /// Create a dormant task around `work`.
    ///
    /// Cancellation is checked before the work is first polled and raced
    /// against it afterwards.
    pub fn new<F>(configuration: QueryTaskConfiguration, work: F) -> Self
    where
        F: Future<Output = Result<V, QueryError>> + Send + 'static,
    {
        Self::new_cooperative(configuration, move |handle| {
            let token = handle.token().clone();
            async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(QueryError::Cancelled),
                    result = work => result,
                }
            }
        })
    }

    /// Create a dormant task whose work observes cancellation itself.
    ///
    /// The work is built immediately but receives a handle through which it
    /// can check the cancellation token and reach the task it runs in.
    pub(crate) fn new_cooperative<M, F>(configuration: QueryTaskConfiguration, make_work: M) -> Self
    where
        M: FnOnce(QueryTaskHandle<V>) -> F,
        F: Future<Output = Result<V, QueryError>> + Send + 'static,
    {
        let id = QueryTaskId::next();
        let token = CancellationToken::new();
        let inner = Arc::new_cyclic(|weak: &Weak<TaskInner<V>>| {
            let work = make_work(QueryTaskHandle {
                id,
                token: token.clone(),
                task: weak.clone(),
            });
            let this = weak.clone();
            let future = async move {
                set_status(&this, QueryTaskStatus::Running);
                let result = work.await;
                let status = match &result {
                    Ok(_) => QueryTaskStatus::Completed,
                    Err(error) if error.is_cancellation() => QueryTaskStatus::Cancelled,
                    Err(_) => QueryTaskStatus::Failed,
                };
                set_status(&this, status);
                result
            }
            .boxed()
            .shared();

            TaskInner {
                id,
                configuration,
                token,
                status: Mutex::new(QueryTaskStatus::Created),
                future,
            }
        });
        Self { inner }
    }

    /// Start the work if nobody has yet, then wait for its outcome.
    ///
    /// The returned future owns a handle to the task and can be spawned.
    pub fn run_if_needed(&self) -> impl Future<Output = Result<V, QueryError>> + Send + 'static {
        let task = self.clone();
        async move { task.inner.future.clone().await }
    }

    /// The outcome, if the work has finished.
    pub fn result(&self) -> Option<Result<V, QueryError>> {
        self.inner.future.peek().cloned()
    }
}

impl<V> QueryTask<V> {
    /// The task's identifier.
    pub fn id(&self) -> QueryTaskId {
        self.inner.id
    }

    /// The configuration captured at creation.
    pub fn configuration(&self) -> &QueryTaskConfiguration {
        &self.inner.configuration
    }

    /// The task's name, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.inner.configuration.name.as_deref()
    }

    /// The context snapshot captured at creation.
    pub fn context(&self) -> &QueryContext {
        &self.inner.configuration.context
    }

    /// The current lifecycle status.
    pub fn status(&self) -> QueryTaskStatus {
        *self.inner.status.lock()
    }

    /// Returns `true` once the work has reached a final state.
    pub fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    /// Request cancellation.
    ///
    /// Has no effect on a task that already finished. Otherwise every current
    /// and future caller of `run_if_needed` fails with
    /// [`QueryError::Cancelled`].
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    /// Returns `true` if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// A handle that does not keep the task alive.
    pub fn downgrade(&self) -> WeakQueryTask<V> {
        WeakQueryTask {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Never started, and nobody but the caller holds it.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.status() == QueryTaskStatus::Created && Arc::strong_count(&self.inner) == 1
    }
}

/// A non-owning reference to a [`QueryTask`].
pub struct WeakQueryTask<V> {
    inner: Weak<TaskInner<V>>,
}

impl<V> WeakQueryTask<V> {
    /// The task, if it is still alive.
    pub fn upgrade(&self) -> Option<QueryTask<V>> {
        self.inner.upgrade().map(|inner| QueryTask { inner })
    }
}

impl<V> Clone for WeakQueryTask<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn set_status<V>(task: &Weak<TaskInner<V>>, status: QueryTaskStatus) {
    if let Some(inner) = task.upgrade() {
        *inner.status.lock() = status;
    }
}

impl<V> fmt::Debug for QueryTask<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryTask")
            .field("id", &self.inner.id)
            .field("name", &self.inner.configuration.name)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: Arc<AtomicUsize>) -> QueryTask<usize> {
        QueryTask::new(QueryTaskConfiguration::default(), async move {
            tokio::task::yield_now().await;
            Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
        })
    }

    #[tokio::test]
    async fn test_runs_once_for_concurrent_callers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task(counter.clone());
        assert_eq!(task.status(), QueryTaskStatus::Created);

        let results = futures::future::join_all((0..10).map(|_| task.run_if_needed())).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Ok(1))));
        assert_eq!(task.status(), QueryTaskStatus::Completed);

        // Later callers see the memoized value.
        assert_eq!(task.run_if_needed().await.unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_does_not_start_until_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task(counter.clone());
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(task.result().is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task(counter.clone());
        task.cancel();

        assert!(matches!(task.run_if_needed().await, Err(QueryError::Cancelled)));
        assert!(matches!(task.run_if_needed().await, Err(QueryError::Cancelled)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(task.status(), QueryTaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_while_running() {
        let task: QueryTask<i32> = QueryTask::new(QueryTaskConfiguration::default(), async {
            futures::future::pending::<()>().await;
            Ok(1)
        });

        let waiter = tokio::spawn(task.run_if_needed());
        tokio::task::yield_now().await;
        task.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(QueryError::Cancelled)));
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn test_cancel_after_completion_keeps_result() {
        let task = QueryTask::new(QueryTaskConfiguration::default(), async { Ok("done") });
        assert_eq!(task.run_if_needed().await.unwrap(), "done");
        task.cancel();
        assert_eq!(task.run_if_needed().await.unwrap(), "done");
        assert_eq!(task.status(), QueryTaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_failure_is_shared() {
        let task: QueryTask<i32> = QueryTask::new(QueryTaskConfiguration::default(), async {
            Err(anyhow::anyhow!("nope").into())
        });
        let (a, b) = tokio::join!(task.run_if_needed(), task.run_if_needed());
        assert!(a.unwrap_err().to_string().contains("nope"));
        assert!(b.unwrap_err().to_string().contains("nope"));
        assert_eq!(task.status(), QueryTaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_weak_handle() {
        let task = QueryTask::new(QueryTaskConfiguration::default(), async { Ok(1) });
        let weak = task.downgrade();
        assert_eq!(weak.upgrade().unwrap().id(), task.id());
        drop(task);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_ids_are_monotonic_and_named() {
        let context = QueryContext::new().with_task_name("load user");
        let a = QueryTask::new(QueryTaskConfiguration::new(context), async { Ok(()) });
        let b = QueryTask::new(QueryTaskConfiguration::default().with_name("b"), async { Ok(()) });
        assert!(a.id() < b.id());
        assert_eq!(a.name(), Some("load user"));
        assert_eq!(b.name(), Some("b"));
    }
}
