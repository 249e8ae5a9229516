//! Query-Store: a UI-agnostic runtime for cacheable async queries.
//!
//! Every query, mutation and infinite (paginated) query lives in a
//! [`QueryStore`] that owns its state, runs fetches and tells subscribers
//! about every change. A [`QueryClient`] keeps one store per [`QueryPath`].
//!
//! # Key Features
//!
//! - **Deduplication**: concurrent fetches of one store share a single task
//! - **Retry with backoff**: configurable per context, with injectable delays
//! - **Multi-stage fetches**: yield intermediate results through a [`QueryContinuation`]
//! - **Mutations**: bounded attempt history, most recent update wins
//! - **Infinite queries**: page lists with next/previous cursors and resumable refetch
//! - **Deterministic testing**: [`ManualClock`], [`NoDelayer`], [`EventCollector`], [`TestStoreCreator`]
//!
//! # Example
//!
//! ```ignore
//! use query_store::{query_path, Query, QueryClient, QueryContext, QueryContinuation, QueryError, QueryPath};
//!
//! struct Greeting(String);
//!
//! #[async_trait::async_trait]
//! impl Query for Greeting {
//!     type Value = String;
//!
//!     fn path(&self) -> QueryPath {
//!         query_path!["greeting", self.0.clone()]
//!     }
//!
//!     async fn fetch(
//!         &self,
//!         _context: &QueryContext,
//!         _continuation: &QueryContinuation<String>,
//!     ) -> Result<String, QueryError> {
//!         Ok(format!("hello, {}", self.0))
//!     }
//! }
//!
//! let client = QueryClient::new();
//! let store = client.store(Greeting("world".into()));
//! assert_eq!(store.fetch().await?, "hello, world");
//! ```
//!
//! # Cache control
//!
//! - [`QueryClient::stores_matching`] - Enumerate stores under a path prefix
//! - [`QueryClient::reset_matching`] / [`QueryClient::refetch_matching`] - Bulk invalidation
//! - [`QueryClient::handle_memory_pressure`] - Evict stores nobody observes

mod backoff;
mod client;
mod clock;
pub mod condition;
mod context;
mod continuation;
mod controller;
mod error;
pub mod events;
mod key;
mod path;
mod pipeline;
mod query;
pub mod state;
mod store;
mod subscriptions;
mod task;

pub use backoff::{BackoffFunction, BackoffKey, DelayerKey, NoDelayer, QueryDelayer, TokioDelayer};
pub use client::{
    DefaultStoreCreator, OpaqueQueryStore, QueryClient, QueryClientBuilder, QueryClientKey,
    StoreCreator, TestStoreCreator, WeakQueryClient,
};
pub use clock::{ManualClock, QueryClock, SystemClock};
pub use condition::{
    AllConditions, AlwaysCondition, AnyCondition, AutomaticFetchingConditionKey, FetchCondition,
    ManualCondition, NotCondition,
};
pub use context::{
    ClockKey, ContextKey, EvictableOnMemoryPressureKey, IssueReporterKey, QueryContext,
    TaskNameKey,
};
pub use continuation::QueryContinuation;
pub use controller::{ControllersKey, QueryController, QueryControls};
pub use error::{
    CollectingIssueReporter, IssueReporter, Misuse, QueryError, QueryResultExt,
    TracingIssueReporter, TypedErr,
};
pub use events::{
    EventCollector, QueryEventSink, QueryStoreEvent, QueryStoreEventKind, ResultUpdateReason,
};
pub use key::{CacheKey, OpaqueKey};
pub use path::{PathSegment, QueryPath};
pub use pipeline::{DeduplicationKey, RetryIndexKey, RetryLimitKey};
pub use query::{InfiniteQuery, Mutation, Query};
pub use state::{
    InfiniteQueryPage, InfiniteQueryState, InfiniteQueryValue, MutationState, OperationKind,
    OperationState, QueryState,
};
pub use store::{QueryStore, WeakQueryStore};
pub use subscriptions::{QuerySubscription, QuerySubscriptionId, QuerySubscriptions};
pub use task::{QueryTask, QueryTaskConfiguration, QueryTaskId, QueryTaskStatus, WeakQueryTask};
