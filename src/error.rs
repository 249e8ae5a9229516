//! Error types for query execution.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

/// Query errors including both runtime-level and user errors.
///
/// User errors can be propagated using the `?` operator, which automatically
/// converts any `Into<anyhow::Error>` type into `QueryError::UserError`.
#[derive(Debug, Clone)]
pub enum QueryError {
    /// The task producing the result was cancelled.
    ///
    /// Raised by explicit task cancellation, by `reset_state`, and when a
    /// store is dropped while one of its tasks is still pending.
    Cancelled,

    /// The store was used in a way that can never succeed.
    ///
    /// This is reported through the context's [`IssueReporter`] before being
    /// returned to the caller.
    Misuse(Misuse),

    /// User-defined error.
    ///
    /// Anything thrown by a fetch implementation ends up here unchanged, so
    /// the original error can be recovered with [`QueryError::downcast_ref`].
    UserError(Arc<anyhow::Error>),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Cancelled => write!(f, "query cancelled"),
            QueryError::Misuse(misuse) => write!(f, "query store misuse: {}", misuse),
            QueryError::UserError(e) => write!(f, "user error: {}", e),
        }
    }
}

impl<T: Into<anyhow::Error>> From<T> for QueryError {
    fn from(err: T) -> Self {
        QueryError::UserError(Arc::new(err.into()))
    }
}

impl QueryError {
    /// Returns a reference to the inner user error if this is a `UserError` variant.
    pub fn user_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            QueryError::UserError(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to downcast the user error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.user_error().and_then(|e| e.downcast_ref::<E>())
    }

    /// Returns `true` if this is a `UserError` containing an error of type `E`.
    pub fn is<E: std::error::Error + Send + Sync + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Returns `true` if this error represents a cancelled task.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }

    /// Returns the misuse description if this is a `Misuse` variant.
    pub fn misuse(&self) -> Option<&Misuse> {
        match self {
            QueryError::Misuse(misuse) => Some(misuse),
            _ => None,
        }
    }

    /// Whether the retry loop may attempt the fetch again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::UserError(_))
    }
}

/// Programmer misuse of a store.
///
/// These never come from a fetch implementation; they indicate a call that
/// the store cannot satisfy no matter how often it is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Misuse {
    /// A mutation store was fetched through the generic entry point before
    /// any `mutate` call, so there are no arguments to retry with.
    #[error("mutation at {path} was fetched without arguments and has no history to retry")]
    MutationWithoutArguments {
        /// Debug representation of the store's path.
        path: String,
    },

    /// A page fetch was requested in a direction that has no further page.
    #[error("infinite query at {path} has no {direction} page to fetch")]
    NoPageInDirection {
        /// Debug representation of the store's path.
        path: String,
        /// `"next"` or `"previous"`.
        direction: &'static str,
    },
}

/// A user error known to be an `E`. Dereferences to the `E`.
#[derive(Clone)]
pub struct TypedErr<E> {
    error: Arc<anyhow::Error>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: std::error::Error + Send + Sync + 'static> Deref for TypedErr<E> {
    type Target = E;

    fn deref(&self) -> &E {
        match self.error.downcast_ref::<E>() {
            Some(error) => error,
            None => unreachable!("TypedErr is only built around an E"),
        }
    }
}

impl<E: std::error::Error + Send + Sync + 'static> fmt::Debug for TypedErr<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<E: std::error::Error + Send + Sync + 'static> fmt::Display for TypedErr<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

/// Splits out user errors of one type from a fetch result.
///
/// ```ignore
/// match store.fetch().await.downcast_err::<NotFound>()? {
///     Ok(profile) => show(profile),
///     Err(not_found) => show_missing(&not_found.id),
/// }
/// ```
pub trait QueryResultExt<T> {
    /// `Ok(Err(_))` for a user error of type `E`, `Err(_)` for any other error.
    fn downcast_err<E: std::error::Error + Send + Sync + 'static>(
        self,
    ) -> Result<Result<T, TypedErr<E>>, QueryError>;
}

impl<T> QueryResultExt<T> for Result<T, QueryError> {
    fn downcast_err<E: std::error::Error + Send + Sync + 'static>(
        self,
    ) -> Result<Result<T, TypedErr<E>>, QueryError> {
        match self {
            Ok(value) => Ok(Ok(value)),
            Err(error) if error.is::<E>() => match error {
                QueryError::UserError(error) => Ok(Err(TypedErr {
                    error,
                    _marker: PhantomData,
                })),
                other => Err(other),
            },
            Err(other) => Err(other),
        }
    }
}

/// Receives programmer-misuse issues raised by stores.
///
/// Misuse is always returned to the caller as [`QueryError::Misuse`] as well;
/// the reporter exists so that the problem is visible even when the caller
/// discards the error.
pub trait IssueReporter: Send + Sync + 'static {
    /// Report a misuse issue.
    fn report(&self, misuse: &Misuse);
}

/// Reports issues as `tracing` warnings. This is the default reporter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingIssueReporter;

impl IssueReporter for TracingIssueReporter {
    fn report(&self, misuse: &Misuse) {
        tracing::warn!(issue = %misuse, "query store misuse");
    }
}

/// Collects reported issues for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingIssueReporter {
    issues: parking_lot::Mutex<Vec<Misuse>>,
}

impl CollectingIssueReporter {
    /// Create an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// All issues reported so far.
    pub fn issues(&self) -> Vec<Misuse> {
        self.issues.lock().clone()
    }

    /// Number of issues reported so far.
    pub fn len(&self) -> usize {
        self.issues.lock().len()
    }

    /// Check if no issues have been reported.
    pub fn is_empty(&self) -> bool {
        self.issues.lock().is_empty()
    }
}

impl IssueReporter for CollectingIssueReporter {
    fn report(&self, misuse: &Misuse) {
        self.issues.lock().push(misuse.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct CustomError {
        code: i32,
    }

    impl fmt::Display for CustomError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "CustomError({})", self.code)
        }
    }

    impl std::error::Error for CustomError {}

    #[test]
    fn test_user_error_from_anyhow() {
        let err: QueryError = anyhow::anyhow!("something went wrong").into();
        assert!(matches!(err, QueryError::UserError(_)));
        assert!(err.to_string().contains("something went wrong"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_downcast_user_error() {
        let err: QueryError = CustomError { code: 7 }.into();
        assert_eq!(err.downcast_ref::<CustomError>(), Some(&CustomError { code: 7 }));
        assert!(err.is::<CustomError>());
        assert!(!err.is::<std::io::Error>());
    }

    #[test]
    fn test_downcast_err_ext() {
        let result: Result<i32, QueryError> = Err(CustomError { code: 3 }.into());
        let typed = result.downcast_err::<CustomError>().unwrap();
        assert_eq!(typed.unwrap_err().code, 3);

        let result: Result<i32, QueryError> = Err(QueryError::Cancelled);
        assert!(matches!(
            result.downcast_err::<CustomError>(),
            Err(QueryError::Cancelled)
        ));
    }

    #[test]
    fn test_misuse_is_not_retryable() {
        // `Misuse` is an `std::error::Error`, so `into()` would wrap it as a user error.
        let err = QueryError::Misuse(Misuse::MutationWithoutArguments {
            path: "[\"m\"]".to_string(),
        });
        assert!(!err.is_retryable());
        assert!(err.misuse().is_some());
        assert!(!QueryError::Cancelled.is_retryable());
    }

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingIssueReporter::new();
        assert!(reporter.is_empty());
        reporter.report(&Misuse::NoPageInDirection {
            path: "[]".to_string(),
            direction: "next",
        });
        assert_eq!(reporter.len(), 1);
    }
}
