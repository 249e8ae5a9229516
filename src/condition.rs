//! Boolean conditions that gate automatic fetching.
//!
//! Platform observers such as connectivity or window focus live outside this
//! crate; they plug in by implementing [`FetchCondition`]. [`ManualCondition`]
//! is a settable stand-in for them.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::{ContextKey, QueryContext};
use crate::subscriptions::{QuerySubscription, QuerySubscriptions};

/// Callback invoked with a condition's new value.
pub type ConditionObserver = Arc<dyn Fn(bool) + Send + Sync>;

/// A subscribable boolean.
pub trait FetchCondition: Send + Sync + 'static {
    /// The current value.
    fn is_satisfied(&self, context: &QueryContext) -> bool;

    /// Call `observer` whenever the value changes, until the returned
    /// subscription is dropped.
    fn subscribe(&self, context: &QueryContext, observer: ConditionObserver) -> QuerySubscription;
}

/// A condition that never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlwaysCondition(pub bool);

impl FetchCondition for AlwaysCondition {
    fn is_satisfied(&self, _context: &QueryContext) -> bool {
        self.0
    }

    fn subscribe(&self, _context: &QueryContext, _observer: ConditionObserver) -> QuerySubscription {
        QuerySubscription::empty()
    }
}

/// A condition set by hand.
///
/// Clones share the same value and observers.
///
/// # Example
///
/// ```ignore
/// let online = ManualCondition::new(false);
/// let context = QueryContext::new().with_automatic_fetching_condition(Arc::new(online.clone()));
/// // ...
/// online.set(true); // observing stores refetch
/// ```
#[derive(Clone)]
pub struct ManualCondition {
    inner: Arc<ManualInner>,
}

struct ManualInner {
    value: Mutex<bool>,
    observers: QuerySubscriptions<ConditionObserver>,
}

impl ManualCondition {
    pub fn new(value: bool) -> Self {
        Self {
            inner: Arc::new(ManualInner {
                value: Mutex::new(value),
                observers: QuerySubscriptions::new(),
            }),
        }
    }

    pub fn get(&self) -> bool {
        *self.inner.value.lock()
    }

    /// Set the value, notifying observers if it changed.
    pub fn set(&self, value: bool) {
        {
            let mut current = self.inner.value.lock();
            if *current == value {
                return;
            }
            *current = value;
        }
        self.inner.observers.for_each(|observer| observer(value));
    }

    /// Number of active observers.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }
}

impl fmt::Debug for ManualCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualCondition")
            .field("value", &self.get())
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl FetchCondition for ManualCondition {
    fn is_satisfied(&self, _context: &QueryContext) -> bool {
        self.get()
    }

    fn subscribe(&self, _context: &QueryContext, observer: ConditionObserver) -> QuerySubscription {
        let id = self.inner.observers.insert(observer, false).id;
        let inner = Arc::downgrade(&self.inner);
        QuerySubscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.observers.remove(id);
            }
        })
    }
}

/// Subscribe to every child, reporting the combined value whenever any child changes.
fn subscribe_combined(
    children: &[Arc<dyn FetchCondition>],
    context: &QueryContext,
    observer: ConditionObserver,
    combine: fn(&[Arc<dyn FetchCondition>], &QueryContext) -> bool,
) -> QuerySubscription {
    let subscriptions = children
        .iter()
        .map(|child| {
            let children = children.to_vec();
            let context = context.clone();
            let observer = observer.clone();
            child.subscribe(
                &context.clone(),
                Arc::new(move |_| observer(combine(&children, &context))),
            )
        })
        .collect();
    QuerySubscription::combined(subscriptions)
}

/// Satisfied when every child is. An empty list is satisfied.
#[derive(Clone)]
pub struct AllConditions(pub Vec<Arc<dyn FetchCondition>>);

impl AllConditions {
    fn evaluate(children: &[Arc<dyn FetchCondition>], context: &QueryContext) -> bool {
        children.iter().all(|child| child.is_satisfied(context))
    }
}

impl FetchCondition for AllConditions {
    fn is_satisfied(&self, context: &QueryContext) -> bool {
        Self::evaluate(&self.0, context)
    }

    fn subscribe(&self, context: &QueryContext, observer: ConditionObserver) -> QuerySubscription {
        subscribe_combined(&self.0, context, observer, Self::evaluate)
    }
}

/// Satisfied when any child is. An empty list is not satisfied.
#[derive(Clone)]
pub struct AnyCondition(pub Vec<Arc<dyn FetchCondition>>);

impl AnyCondition {
    fn evaluate(children: &[Arc<dyn FetchCondition>], context: &QueryContext) -> bool {
        children.iter().any(|child| child.is_satisfied(context))
    }
}

impl FetchCondition for AnyCondition {
    fn is_satisfied(&self, context: &QueryContext) -> bool {
        Self::evaluate(&self.0, context)
    }

    fn subscribe(&self, context: &QueryContext, observer: ConditionObserver) -> QuerySubscription {
        subscribe_combined(&self.0, context, observer, Self::evaluate)
    }
}

/// Negates its child.
#[derive(Clone)]
pub struct NotCondition(pub Arc<dyn FetchCondition>);

impl FetchCondition for NotCondition {
    fn is_satisfied(&self, context: &QueryContext) -> bool {
        !self.0.is_satisfied(context)
    }

    fn subscribe(&self, context: &QueryContext, observer: ConditionObserver) -> QuerySubscription {
        self.0.subscribe(context, Arc::new(move |value| observer(!value)))
    }
}

/// Overrides whether and when a store fetches automatically.
///
/// Unset means the state kind's default: always for queries, never for
/// mutations.
pub struct AutomaticFetchingConditionKey;

impl ContextKey for AutomaticFetchingConditionKey {
    type Value = Option<Arc<dyn FetchCondition>>;

    fn default_value() -> Self::Value {
        None
    }
}

impl QueryContext {
    /// The automatic-fetching override, if any.
    pub fn automatic_fetching_condition(&self) -> Option<Arc<dyn FetchCondition>> {
        self.get::<AutomaticFetchingConditionKey>()
    }

    /// Turn automatic fetching on or off.
    pub fn with_automatic_fetching(self, enabled: bool) -> Self {
        self.with::<AutomaticFetchingConditionKey>(Some(Arc::new(AlwaysCondition(enabled))))
    }

    /// Fetch automatically only while `condition` holds.
    pub fn with_automatic_fetching_condition(self, condition: Arc<dyn FetchCondition>) -> Self {
        self.with::<AutomaticFetchingConditionKey>(Some(condition))
    }
}
