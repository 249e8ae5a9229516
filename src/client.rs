//! The client: a registry of stores keyed by path.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use papaya::HashMap;
use parking_lot::ReentrantMutex;

use crate::backoff::{BackoffFunction, BackoffKey, DelayerKey, NoDelayer, TokioDelayer};
use crate::context::{ContextKey, QueryContext};
use crate::path::QueryPath;
use crate::pipeline::RetryLimitKey;
use crate::query::{InfiniteQuery, InfiniteQueryAdapter, Mutation, MutationAdapter, Query, QueryAdapter};
use crate::state::{InfiniteQueryState, MutationState, OperationKind, OperationState, QueryState};
use crate::store::QueryStore;

/// Type-erased view of a store, used where stores of different state types
/// live side by side.
trait AnyQueryStore: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn path(&self) -> &QueryPath;
    fn kind(&self) -> OperationKind;
    fn reset_state(&self);
    fn spawn_fetch(&self);
    fn has_durable_subscribers(&self) -> bool;
    fn is_evictable(&self) -> bool;
}

impl<S: OperationState> AnyQueryStore for QueryStore<S> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn path(&self) -> &QueryPath {
        QueryStore::path(self)
    }

    fn kind(&self) -> OperationKind {
        S::kind()
    }

    fn reset_state(&self) {
        QueryStore::reset_state(self)
    }

    fn spawn_fetch(&self) {
        QueryStore::spawn_fetch(self)
    }

    fn has_durable_subscribers(&self) -> bool {
        QueryStore::has_durable_subscribers(self)
    }

    fn is_evictable(&self) -> bool {
        self.context().is_evictable_on_memory_pressure()
    }
}

/// A store of unknown state type.
#[derive(Clone)]
pub struct OpaqueQueryStore {
    inner: Arc<dyn AnyQueryStore>,
}

impl OpaqueQueryStore {
    fn new<S: OperationState>(store: QueryStore<S>) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// The typed store, if its state type is `S`.
    pub fn downcast<S: OperationState>(&self) -> Option<QueryStore<S>> {
        self.inner.as_any().downcast_ref::<QueryStore<S>>().cloned()
    }

    pub fn path(&self) -> &QueryPath {
        self.inner.path()
    }

    pub fn kind(&self) -> OperationKind {
        self.inner.kind()
    }

    /// Reset the store, cancelling its tasks.
    pub fn reset_state(&self) {
        self.inner.reset_state();
    }

    pub fn has_durable_subscribers(&self) -> bool {
        self.inner.has_durable_subscribers()
    }
}

impl fmt::Debug for OpaqueQueryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueQueryStore")
            .field("path", self.path())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Policy seeding the context of every store a client creates.
///
/// Entries the client's context already sets explicitly are left alone.
pub trait StoreCreator: Send + Sync + 'static {
    fn prepare(&self, path: &QueryPath, context: QueryContext) -> QueryContext;
}

/// Production policy: retry 3 times with jittered exponential backoff
/// starting at one second, waiting on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStoreCreator;

impl StoreCreator for DefaultStoreCreator {
    fn prepare(&self, _path: &QueryPath, context: QueryContext) -> QueryContext {
        seed(
            context,
            3,
            || BackoffFunction::exponential(Duration::from_secs(1)).jittered(),
            || Arc::new(TokioDelayer),
        )
    }
}

/// Test policy: no retries, no backoff and no waiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestStoreCreator;

impl StoreCreator for TestStoreCreator {
    fn prepare(&self, _path: &QueryPath, context: QueryContext) -> QueryContext {
        seed(context, 0, BackoffFunction::no_backoff, || Arc::new(NoDelayer))
    }
}

fn seed(
    mut context: QueryContext,
    retry_limit: usize,
    backoff: impl FnOnce() -> BackoffFunction,
    delayer: impl FnOnce() -> <DelayerKey as ContextKey>::Value,
) -> QueryContext {
    if !context.contains::<RetryLimitKey>() {
        context.set::<RetryLimitKey>(retry_limit);
    }
    if !context.contains::<BackoffKey>() {
        context.set::<BackoffKey>(backoff());
    }
    if !context.contains::<DelayerKey>() {
        context.set::<DelayerKey>(delayer());
    }
    context
}

/// Owns one store per path.
///
/// Asking for the same path twice returns the same store. Each store's
/// context starts from the client's context, seeded by its
/// [`StoreCreator`], and carries a weak reference back to the client.
///
/// # Example
///
/// ```ignore
/// let client = QueryClient::new();
/// let store = client.store(UserProfile { id: 1 });
/// assert!(store.ptr_eq(&client.store(UserProfile { id: 1 })));
///
/// // After a write, refresh everything under "user".
/// client.refetch_matching(&query_path!["user"]);
/// ```
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    stores: HashMap<QueryPath, OpaqueQueryStore, ahash::RandomState>,
    /// Serializes store creation. Reentrant because setup and controllers
    /// of a new store may ask the client for other stores.
    creation: ReentrantMutex<()>,
    context: QueryContext,
    creator: Arc<dyn StoreCreator>,
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClient {
    /// Create a client with the default store policy.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for customizing the client.
    pub fn builder() -> QueryClientBuilder {
        QueryClientBuilder::new()
    }

    /// The store for `query`, created on first use.
    pub fn store<Q: Query>(&self, query: Q) -> QueryStore<QueryState<Q::Value>> {
        let path = query.path();
        self.get_or_create(path, |context| QueryStore::from_request(QueryAdapter(query), context))
    }

    /// The store for `mutation`, created on first use.
    pub fn mutation_store<M: Mutation>(&self, mutation: M) -> QueryStore<MutationState<M::Arguments, M::Value>> {
        let path = mutation.path();
        self.get_or_create(path, |context| {
            QueryStore::from_request(MutationAdapter(mutation), context)
        })
    }

    /// The store for `query`, created on first use.
    pub fn infinite_store<Q: InfiniteQuery>(
        &self,
        query: Q,
    ) -> QueryStore<InfiniteQueryState<Q::PageId, Q::PageValue>> {
        let path = query.path();
        self.get_or_create(path, |context| {
            QueryStore::from_request(InfiniteQueryAdapter(Arc::new(query)), context)
        })
    }

    fn get_or_create<S: OperationState>(
        &self,
        path: QueryPath,
        create: impl FnOnce(QueryContext) -> QueryStore<S>,
    ) -> QueryStore<S> {
        if let Some(store) = self.inner.stores.pin().get(&path).and_then(|store| store.downcast()) {
            return store;
        }

        let _creation = self.inner.creation.lock();
        let stores = self.inner.stores.pin();
        if let Some(existing) = stores.get(&path) {
            match existing.downcast::<S>() {
                Some(store) => return store,
                None => tracing::warn!(
                    path = %path.debug_repr(),
                    found = ?existing.kind(),
                    expected = std::any::type_name::<S>(),
                    "store type mismatch, replacing the cached store"
                ),
            }
        }

        let store = create(self.store_context(&path));
        tracing::debug!(path = %path.debug_repr(), kind = ?S::kind(), "created store");
        stores.insert(path, OpaqueQueryStore::new(store.clone()));
        store
    }

    fn store_context(&self, path: &QueryPath) -> QueryContext {
        let context = self
            .inner
            .context
            .clone()
            .with::<QueryClientKey>(Some(WeakQueryClient {
                inner: Arc::downgrade(&self.inner),
            }));
        self.inner.creator.prepare(path, context)
    }

    /// The store at `path`, if any.
    pub fn get(&self, path: &QueryPath) -> Option<OpaqueQueryStore> {
        self.inner.stores.pin().get(path).cloned()
    }

    /// Every store whose path starts with `prefix`.
    pub fn stores_matching(&self, prefix: &QueryPath) -> Vec<OpaqueQueryStore> {
        self.inner
            .stores
            .pin()
            .iter()
            .filter(|(path, _)| prefix.is_prefix_of(path))
            .map(|(_, store)| store.clone())
            .collect()
    }

    /// Forget the store at `path`. Existing handles keep working.
    pub fn remove(&self, path: &QueryPath) -> Option<OpaqueQueryStore> {
        self.inner.stores.pin().remove(path).cloned()
    }

    /// Forget every store whose path starts with `prefix`.
    pub fn remove_matching(&self, prefix: &QueryPath) -> Vec<OpaqueQueryStore> {
        let stores = self.inner.stores.pin();
        let paths: Vec<QueryPath> = stores
            .keys()
            .filter(|path| prefix.is_prefix_of(path))
            .cloned()
            .collect();
        paths
            .iter()
            .filter_map(|path| stores.remove(path).cloned())
            .collect()
    }

    /// Forget every store.
    pub fn clear(&self) {
        self.inner.stores.pin().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.stores.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reset every store whose path starts with `prefix`.
    pub fn reset_matching(&self, prefix: &QueryPath) {
        for store in self.stores_matching(prefix) {
            store.reset_state();
        }
    }

    /// Refetch in the background every query and infinite query whose path
    /// starts with `prefix`. Mutations are never refetched.
    pub fn refetch_matching(&self, prefix: &QueryPath) {
        for store in self.stores_matching(prefix) {
            if store.kind() != OperationKind::Mutation {
                store.inner.spawn_fetch();
            }
        }
    }

    /// Evict every evictable store nobody durably subscribes to. Returns the
    /// number of stores evicted.
    pub fn handle_memory_pressure(&self) -> usize {
        let stores = self.inner.stores.pin();
        let evictable: Vec<QueryPath> = stores
            .iter()
            .filter(|(_, store)| store.inner.is_evictable() && !store.has_durable_subscribers())
            .map(|(path, _)| path.clone())
            .collect();
        for path in &evictable {
            stores.remove(path);
        }
        tracing::debug!(evicted = evictable.len(), remaining = stores.len(), "handled memory pressure");
        evictable.len()
    }

    /// The client's default context.
    pub fn context(&self) -> &QueryContext {
        &self.inner.context
    }
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient").field("stores", &self.len()).finish()
    }
}

/// Builder for [`QueryClient`].
///
/// # Example
///
/// ```ignore
/// let client = QueryClient::builder()
///     .store_creator(TestStoreCreator)
///     .context(QueryContext::new().with_automatic_fetching(false))
///     .build();
/// ```
pub struct QueryClientBuilder {
    context: QueryContext,
    creator: Arc<dyn StoreCreator>,
}

impl Default for QueryClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClientBuilder {
    pub fn new() -> Self {
        Self {
            context: QueryContext::new(),
            creator: Arc::new(DefaultStoreCreator),
        }
    }

    /// The context every store starts from.
    pub fn context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    pub fn store_creator(mut self, creator: impl StoreCreator) -> Self {
        self.creator = Arc::new(creator);
        self
    }

    pub fn build(self) -> QueryClient {
        QueryClient {
            inner: Arc::new(ClientInner {
                stores: HashMap::with_hasher(ahash::RandomState::new()),
                creation: ReentrantMutex::new(()),
                context: self.context,
                creator: self.creator,
            }),
        }
    }
}

/// A client reference that does not keep the client alive.
#[derive(Clone)]
pub struct WeakQueryClient {
    inner: Weak<ClientInner>,
}

impl WeakQueryClient {
    pub fn upgrade(&self) -> Option<QueryClient> {
        self.inner.upgrade().map(|inner| QueryClient { inner })
    }
}

/// The client that created the store.
pub struct QueryClientKey;

impl ContextKey for QueryClientKey {
    type Value = Option<WeakQueryClient>;

    fn default_value() -> Self::Value {
        None
    }
}

impl QueryContext {
    /// The client that created the store this context belongs to, if it is
    /// still alive.
    pub fn query_client(&self) -> Option<QueryClient> {
        self.get::<QueryClientKey>().and_then(|client| client.upgrade())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{query_path, QueryContinuation, QueryError};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Query for Named {
        type Value = String;

        fn path(&self) -> QueryPath {
            query_path!["named", self.0]
        }

        async fn fetch(
            &self,
            _context: &QueryContext,
            _continuation: &QueryContinuation<String>,
        ) -> Result<String, QueryError> {
            Ok(self.0.to_string())
        }
    }

    struct Numbered(&'static str);

    #[async_trait]
    impl Query for Numbered {
        type Value = u32;

        fn path(&self) -> QueryPath {
            query_path!["named", self.0]
        }

        async fn fetch(
            &self,
            _context: &QueryContext,
            _continuation: &QueryContinuation<u32>,
        ) -> Result<u32, QueryError> {
            Ok(1)
        }
    }

    #[test]
    fn test_type_mismatch_replaces_store() {
        let client = QueryClient::builder().store_creator(TestStoreCreator).build();
        let named = client.store(Named("a"));
        let numbered = client.store(Numbered("a"));
        assert_eq!(named.path(), numbered.path());
        assert_eq!(client.len(), 1);
        assert!(client.get(named.path()).unwrap().downcast::<QueryState<u32>>().is_some());
    }

    #[test]
    fn test_creator_seeds_only_unset_entries() {
        let client = QueryClient::builder()
            .context(QueryContext::new().with::<RetryLimitKey>(7))
            .build();
        let store = client.store(Named("a"));
        let context = store.context();
        assert_eq!(context.retry_limit(), 7);
        assert!(context.contains::<BackoffKey>());
        assert!(context.query_client().is_some());
    }
}
