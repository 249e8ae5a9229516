//! The fetch pipeline: retry, backoff and delay around a store request.
//!
//! Deduplication happens one level up, in the store, before a task is
//! created. Everything here runs inside the task and therefore outside the
//! store lock.

use crate::context::{ContextKey, QueryContext};
use crate::continuation::QueryContinuation;
use crate::query::StoreRequest;
use crate::state::OperationState;
use crate::QueryError;

/// How many times a failed fetch is retried. Defaults to `0`.
pub struct RetryLimitKey;

impl ContextKey for RetryLimitKey {
    type Value = usize;

    fn default_value() -> Self::Value {
        0
    }
}

/// Index of the attempt currently running; `0` is the initial attempt.
///
/// Set by the pipeline on the context handed to each attempt.
pub struct RetryIndexKey;

impl ContextKey for RetryIndexKey {
    type Value = usize;

    fn default_value() -> Self::Value {
        0
    }
}

/// Whether concurrent fetches of the same kind share one task. Defaults to `true`.
pub struct DeduplicationKey;

impl ContextKey for DeduplicationKey {
    type Value = bool;

    fn default_value() -> Self::Value {
        true
    }
}

impl QueryContext {
    /// The retry limit.
    pub fn retry_limit(&self) -> usize {
        self.get::<RetryLimitKey>()
    }

    /// Set the retry limit.
    pub fn with_retry_limit(self, limit: usize) -> Self {
        self.with::<RetryLimitKey>(limit)
    }

    /// Index of the running attempt.
    pub fn retry_index(&self) -> usize {
        self.get::<RetryIndexKey>()
    }

    /// Whether deduplication is enabled.
    pub fn is_deduplication_enabled(&self) -> bool {
        self.get::<DeduplicationKey>()
    }

    /// Enable or disable deduplication.
    pub fn with_deduplication(self, enabled: bool) -> Self {
        self.with::<DeduplicationKey>(enabled)
    }
}

/// Run `request`, retrying retryable failures up to the context's limit.
///
/// Attempts run sequentially. Before retry `n` the pipeline waits
/// `backoff.duration(n)` on the context's delayer. The last error is returned
/// unchanged once the limit is exhausted.
pub(crate) async fn fetch_with_retry<S: OperationState>(
    request: &dyn StoreRequest<State = S>,
    context: &QueryContext,
    continuation: &QueryContinuation<S::TaskValue>,
) -> Result<S::TaskValue, QueryError> {
    let limit = context.retry_limit();
    let mut attempt = 0;
    loop {
        let attempt_context = context.clone().with::<RetryIndexKey>(attempt);
        let error = match request.fetch(&attempt_context, continuation).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if !error.is_retryable() || attempt >= limit {
            return Err(error);
        }

        attempt += 1;
        let wait = context.backoff().duration(attempt);
        tracing::debug!(
            path = %request.path().debug_repr(),
            attempt,
            limit,
            ?wait,
            %error,
            "retrying fetch"
        );
        context.delayer().delay(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{BackoffFunction, QueryDelayer};
    use crate::state::QueryState;
    use crate::QueryPath;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
        indices: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl StoreRequest for Flaky {
        type State = QueryState<usize>;

        fn path(&self) -> QueryPath {
            QueryPath::from("flaky")
        }

        fn initial_state(&self) -> QueryState<usize> {
            QueryState::new(None)
        }

        async fn fetch(
            &self,
            context: &QueryContext,
            _continuation: &QueryContinuation<usize>,
        ) -> Result<usize, QueryError> {
            self.indices.lock().push(context.retry_index());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(anyhow::anyhow!("failure {}", call).into())
            } else {
                Ok(call)
            }
        }
    }

    #[derive(Default)]
    struct RecordingDelayer {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl QueryDelayer for RecordingDelayer {
        async fn delay(&self, duration: Duration) {
            self.waits.lock().push(duration);
        }
    }

    fn flaky(failures: usize) -> Flaky {
        Flaky {
            failures,
            calls: AtomicUsize::new(0),
            indices: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success_with_backoff() {
        let delayer = Arc::new(RecordingDelayer::default());
        let context = QueryContext::new()
            .with_retry_limit(3)
            .with_backoff(BackoffFunction::exponential(Duration::from_millis(10)))
            .with_delayer(delayer.clone());
        let request = flaky(2);

        let value =
            fetch_with_retry::<QueryState<usize>>(&request, &context, &QueryContinuation::ignoring())
                .await
                .unwrap();

        assert_eq!(value, 2);
        assert_eq!(*request.indices.lock(), vec![0, 1, 2]);
        assert_eq!(
            *delayer.waits.lock(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let context = QueryContext::new()
            .with_retry_limit(1)
            .with_delayer(Arc::new(RecordingDelayer::default()));
        let request = flaky(5);

        let error =
            fetch_with_retry::<QueryState<usize>>(&request, &context, &QueryContinuation::ignoring())
                .await
                .unwrap_err();

        assert!(error.to_string().contains("failure 1"));
        assert_eq!(request.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_retries_by_default() {
        let request = flaky(1);
        let context = QueryContext::new();
        let result =
            fetch_with_retry::<QueryState<usize>>(&request, &context, &QueryContinuation::ignoring())
                .await;
        assert!(result.is_err());
        assert_eq!(request.calls.load(Ordering::SeqCst), 1);
    }
}
