//! Backoff functions and delayers used between retry attempts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::context::{ContextKey, QueryContext};

/// Maps a retry attempt index to the time to wait before that attempt.
///
/// Attempt `0` is the initial fetch and never waits, except for
/// [`BackoffFunction::linear`] which is `0` there by construction.
///
/// # Example
///
/// ```ignore
/// let backoff = BackoffFunction::exponential(Duration::from_secs(1)).jittered();
/// let wait = backoff.duration(3); // somewhere in [0s, 4s)
/// ```
#[derive(Clone)]
pub struct BackoffFunction {
    description: String,
    function: Arc<dyn Fn(usize) -> Duration + Send + Sync>,
}

impl BackoffFunction {
    /// Create a backoff function from a closure.
    pub fn new(
        description: impl Into<String>,
        function: impl Fn(usize) -> Duration + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            function: Arc::new(function),
        }
    }

    /// Never wait. This is the default.
    pub fn no_backoff() -> Self {
        Self::new("no backoff", |_| Duration::ZERO)
    }

    /// Wait `base` before every retry.
    pub fn constant(base: Duration) -> Self {
        Self::new(format!("constant({:?})", base), move |attempt| {
            if attempt == 0 {
                Duration::ZERO
            } else {
                base
            }
        })
    }

    /// Wait `attempt * base`.
    pub fn linear(base: Duration) -> Self {
        Self::new(format!("linear({:?})", base), move |attempt| {
            base.saturating_mul(saturating_u32(attempt))
        })
    }

    /// Wait `base * 2^(attempt - 1)`.
    pub fn exponential(base: Duration) -> Self {
        Self::new(format!("exponential({:?})", base), move |attempt| {
            if attempt == 0 {
                return Duration::ZERO;
            }
            let factor = 1u32.checked_shl(saturating_u32(attempt - 1)).unwrap_or(u32::MAX);
            base.saturating_mul(factor)
        })
    }

    /// Wait `base * fib(attempt)` with `fib(1) = fib(2) = 1`.
    pub fn fibonacci(base: Duration) -> Self {
        Self::new(format!("fibonacci({:?})", base), move |attempt| {
            base.saturating_mul(fibonacci(attempt))
        })
    }

    /// Scale every duration by a factor sampled uniformly from `[0, 1)`.
    pub fn jittered(self) -> Self {
        self.jittered_with(StdRng::from_entropy())
    }

    /// Like [`BackoffFunction::jittered`] with an explicit random source.
    ///
    /// A generator that always yields zero makes the result deterministic.
    pub fn jittered_with(self, rng: impl RngCore + Send + 'static) -> Self {
        let rng = Mutex::new(rng);
        let inner = self.function;
        Self::new(format!("jittered({})", self.description), move |attempt| {
            let factor: f64 = rng.lock().gen();
            inner(attempt).mul_f64(factor)
        })
    }

    /// The wait before `attempt`.
    pub fn duration(&self, attempt: usize) -> Duration {
        (self.function)(attempt)
    }

    /// Human-readable description of the function.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl Default for BackoffFunction {
    fn default() -> Self {
        Self::no_backoff()
    }
}

impl fmt::Debug for BackoffFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackoffFunction({})", self.description)
    }
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn fibonacci(n: usize) -> u32 {
    let (mut previous, mut current) = (0u32, 1u32);
    if n == 0 {
        return 0;
    }
    for _ in 1..n {
        let next = previous.saturating_add(current);
        previous = current;
        current = next;
    }
    current
}

/// Suspends the current task for a duration.
///
/// Abstracted so that tests can skip real sleeps.
#[async_trait]
pub trait QueryDelayer: Send + Sync + 'static {
    /// Wait for `duration`.
    async fn delay(&self, duration: Duration);
}

/// Sleeps on the tokio timer. This is the default delayer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelayer;

#[async_trait]
impl QueryDelayer for TokioDelayer {
    async fn delay(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelayer;

#[async_trait]
impl QueryDelayer for NoDelayer {
    async fn delay(&self, _duration: Duration) {}
}

/// The backoff function consulted between retries.
pub struct BackoffKey;

impl ContextKey for BackoffKey {
    type Value = BackoffFunction;

    fn default_value() -> Self::Value {
        BackoffFunction::no_backoff()
    }
}

/// The delayer that waits out backoff durations.
pub struct DelayerKey;

impl ContextKey for DelayerKey {
    type Value = Arc<dyn QueryDelayer>;

    fn default_value() -> Self::Value {
        Arc::new(TokioDelayer)
    }
}

impl QueryContext {
    /// The backoff function for retries.
    pub fn backoff(&self) -> BackoffFunction {
        self.get::<BackoffKey>()
    }

    /// Replace the backoff function.
    pub fn with_backoff(self, backoff: BackoffFunction) -> Self {
        self.with::<BackoffKey>(backoff)
    }

    /// The delayer for backoff waits.
    pub fn delayer(&self) -> Arc<dyn QueryDelayer> {
        self.get::<DelayerKey>()
    }

    /// Replace the delayer.
    pub fn with_delayer(self, delayer: Arc<dyn QueryDelayer>) -> Self {
        self.with::<DelayerKey>(delayer)
    }
}
