//! Out-of-band control of a store.
//!
//! A controller is handed a [`QueryControls`] when it is attached and can
//! push values, errors or resets into the store from outside the fetch
//! pipeline, for example from a websocket feed. The controls hold the store
//! weakly, so a controller never keeps its store alive.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::{ContextKey, QueryContext};
use crate::state::OperationState;
use crate::store::WeakQueryStore;
use crate::subscriptions::QuerySubscription;
use crate::QueryError;

/// Something that drives a store from outside.
///
/// Implemented for closures taking [`QueryControls`].
///
/// # Example
///
/// ```ignore
/// store.add_controller(|controls: QueryControls<QueryState<Price>>| {
///     let feed = price_feed.subscribe(move |price| controls.yield_value(price));
///     QuerySubscription::new(move || feed.close())
/// });
/// ```
pub trait QueryController<S: OperationState>: Send + Sync + 'static {
    /// Start controlling. The store keeps the returned subscription and
    /// drops it when the store itself is dropped.
    fn control(&self, controls: QueryControls<S>) -> QuerySubscription;
}

impl<S, F> QueryController<S> for F
where
    S: OperationState,
    F: Fn(QueryControls<S>) -> QuerySubscription + Send + Sync + 'static,
{
    fn control(&self, controls: QueryControls<S>) -> QuerySubscription {
        self(controls)
    }
}

/// Handle a controller uses to act on its store.
///
/// Every operation is a no-op once the store is gone.
pub struct QueryControls<S: OperationState> {
    store: WeakQueryStore<S>,
}

impl<S: OperationState> Clone for QueryControls<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: OperationState> QueryControls<S> {
    pub(crate) fn new(store: WeakQueryStore<S>) -> Self {
        Self { store }
    }

    /// Returns `true` while the store is alive.
    pub fn is_alive(&self) -> bool {
        self.store.upgrade().is_some()
    }

    /// A snapshot of the store's state.
    pub fn state(&self) -> Option<S> {
        self.store.upgrade().map(|store| store.state())
    }

    /// The store's context.
    pub fn context(&self) -> Option<QueryContext> {
        self.store.upgrade().map(|store| store.context())
    }

    pub fn yield_value(&self, value: S::Value) {
        self.yield_result(Ok(value));
    }

    pub fn yield_error(&self, error: impl Into<QueryError>) {
        self.yield_result(Err(error.into()));
    }

    /// Apply `result` to the state as if it arrived now.
    pub fn yield_result(&self, result: Result<S::Value, QueryError>) {
        self.yield_result_with_context(result, QueryContext::new());
    }

    /// [`QueryControls::yield_result`] with `context` layered over the store's context.
    pub fn yield_result_with_context(&self, result: Result<S::Value, QueryError>, context: QueryContext) {
        if let Some(store) = self.store.upgrade() {
            store.apply_imperative(result, context);
        }
    }

    /// Reset the store, cancelling its tasks.
    pub fn yield_reset_state(&self) {
        if let Some(store) = self.store.upgrade() {
            store.reset_state();
        }
    }

    /// Start a fetch in the background on the ambient tokio runtime.
    pub fn yield_refetch(&self) {
        if let Some(store) = self.store.upgrade() {
            store.spawn_fetch();
        }
    }
}

/// Controllers attached to every store created with this context.
pub struct ControllersKey<S>(PhantomData<fn() -> S>);

impl<S: OperationState> ContextKey for ControllersKey<S> {
    type Value = Vec<Arc<dyn QueryController<S>>>;

    fn default_value() -> Self::Value {
        Vec::new()
    }
}

impl QueryContext {
    /// Add a controller attached to every store created with this context.
    pub fn with_controller<S: OperationState>(mut self, controller: impl QueryController<S>) -> Self {
        let mut controllers = self.get::<ControllersKey<S>>();
        controllers.push(Arc::new(controller));
        self.set::<ControllersKey<S>>(controllers);
        self
    }
}
