//! Intermediate results emitted by a running fetch.

use std::fmt;
use std::sync::Arc;

use crate::context::QueryContext;
use crate::QueryError;

type YieldHandler<V> = dyn Fn(Result<V, QueryError>, Option<QueryContext>) + Send + Sync;

/// Lets a fetch implementation emit results before returning its final one.
///
/// Every yield is applied to the store's state synchronously, before `yield_*`
/// returns, and is reported to subscribers as a yielded result. The value the
/// fetch finally returns is applied after all of its yields.
///
/// # Example
///
/// ```ignore
/// async fn fetch(
///     &self,
///     context: &QueryContext,
///     continuation: &QueryContinuation<Self::Value>,
/// ) -> Result<Self::Value, QueryError> {
///     if let Some(cached) = self.disk_cache.load() {
///         continuation.yield_value(cached);
///     }
///     self.api.load().await
/// }
/// ```
pub struct QueryContinuation<V> {
    handler: Arc<YieldHandler<V>>,
}

impl<V> Clone for QueryContinuation<V> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<V: Send + 'static> QueryContinuation<V> {
    /// Create a continuation that forwards every yield to `handler`.
    pub fn new(
        handler: impl Fn(Result<V, QueryError>, Option<QueryContext>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// A continuation that drops everything yielded to it.
    pub fn ignoring() -> Self {
        Self::new(|_, _| {})
    }

    /// Yield an intermediate value.
    pub fn yield_value(&self, value: V) {
        self.yield_result(Ok(value));
    }

    /// Yield an intermediate error.
    pub fn yield_error(&self, error: impl Into<QueryError>) {
        self.yield_result(Err(error.into()));
    }

    /// Yield an intermediate result.
    pub fn yield_result(&self, result: Result<V, QueryError>) {
        (self.handler)(result, None);
    }

    /// Yield an intermediate result, applying it with `context` instead of
    /// the context of the running task.
    pub fn yield_result_with_context(&self, result: Result<V, QueryError>, context: QueryContext) {
        (self.handler)(result, Some(context));
    }

    /// Build a continuation of another value type that converts before forwarding here.
    pub fn map<U, F>(&self, transform: F) -> QueryContinuation<U>
    where
        U: Send + 'static,
        F: Fn(U) -> V + Send + Sync + 'static,
    {
        let handler = self.handler.clone();
        QueryContinuation::new(move |result: Result<U, QueryError>, context| {
            handler(result.map(&transform), context)
        })
    }
}

impl<V> fmt::Debug for QueryContinuation<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContinuation").finish_non_exhaustive()
    }
}
