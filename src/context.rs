//! Typed key/value bag threaded through every store operation.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use ahash::HashMap;

use crate::clock::{QueryClock, SystemClock};
use crate::error::{IssueReporter, TracingIssueReporter};

/// A key for a [`QueryContext`] entry.
///
/// Each key type names one entry and declares the value returned when the
/// entry was never set.
///
/// # Example
///
/// ```ignore
/// struct Locale;
///
/// impl ContextKey for Locale {
///     type Value = String;
///
///     fn default_value() -> String {
///         "en".to_string()
///     }
/// }
///
/// let mut context = QueryContext::new();
/// assert_eq!(context.get::<Locale>(), "en");
/// context.set::<Locale>("fr".to_string());
/// ```
pub trait ContextKey: 'static {
    /// The type stored under this key.
    type Value: Clone + Send + Sync + 'static;

    /// The value of an unset entry.
    fn default_value() -> Self::Value;
}

/// An extensible, typed bag of configuration and ambient references.
///
/// A context is created once per top-level call and passed by value down the
/// call graph. Setting an entry on a copy never affects other copies. Entries
/// can be overwritten but never removed.
#[derive(Clone, Default)]
pub struct QueryContext {
    entries: HashMap<TypeId, Entry>,
}

#[derive(Clone)]
struct Entry {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl QueryContext {
    /// Create a context where every entry has its default value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read an entry, falling back to the key's default.
    pub fn get<K: ContextKey>(&self) -> K::Value {
        self.entries
            .get(&TypeId::of::<K>())
            .and_then(|entry| entry.value.downcast_ref::<K::Value>())
            .cloned()
            .unwrap_or_else(K::default_value)
    }

    /// Overwrite an entry.
    pub fn set<K: ContextKey>(&mut self, value: K::Value) {
        self.entries.insert(
            TypeId::of::<K>(),
            Entry {
                type_name: std::any::type_name::<K>(),
                value: Arc::new(value),
            },
        );
    }

    /// Builder form of [`QueryContext::set`].
    pub fn with<K: ContextKey>(mut self, value: K::Value) -> Self {
        self.set::<K>(value);
        self
    }

    /// Returns `true` if the entry was explicitly set.
    pub fn contains<K: ContextKey>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<K>())
    }

    /// Copy every explicitly set entry of `other` into this context.
    pub fn merge(&mut self, other: &QueryContext) {
        for (key, entry) in &other.entries {
            self.entries.insert(*key, entry.clone());
        }
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.values().map(|e| e.type_name).collect();
        names.sort_unstable();
        f.debug_struct("QueryContext").field("entries", &names).finish()
    }
}

/// The clock used to stamp state updates.
pub struct ClockKey;

impl ContextKey for ClockKey {
    type Value = Arc<dyn QueryClock>;

    fn default_value() -> Self::Value {
        Arc::new(SystemClock)
    }
}

/// Where programmer-misuse issues are reported.
pub struct IssueReporterKey;

impl ContextKey for IssueReporterKey {
    type Value = Arc<dyn IssueReporter>;

    fn default_value() -> Self::Value {
        Arc::new(TracingIssueReporter)
    }
}

/// Human-readable name given to tasks created with this context.
pub struct TaskNameKey;

impl ContextKey for TaskNameKey {
    type Value = Option<String>;

    fn default_value() -> Self::Value {
        None
    }
}

/// Whether the client may evict the store under memory pressure.
pub struct EvictableOnMemoryPressureKey;

impl ContextKey for EvictableOnMemoryPressureKey {
    type Value = bool;

    fn default_value() -> Self::Value {
        true
    }
}

impl QueryContext {
    /// The clock for this context.
    pub fn clock(&self) -> Arc<dyn QueryClock> {
        self.get::<ClockKey>()
    }

    /// Replace the clock.
    pub fn with_clock(self, clock: Arc<dyn QueryClock>) -> Self {
        self.with::<ClockKey>(clock)
    }

    /// The issue reporter for this context.
    pub fn issue_reporter(&self) -> Arc<dyn IssueReporter> {
        self.get::<IssueReporterKey>()
    }

    /// Replace the issue reporter.
    pub fn with_issue_reporter(self, reporter: Arc<dyn IssueReporter>) -> Self {
        self.with::<IssueReporterKey>(reporter)
    }

    /// Name tasks created with this context.
    pub fn with_task_name(self, name: impl Into<String>) -> Self {
        self.with::<TaskNameKey>(Some(name.into()))
    }

    /// Whether the owning client may evict the store under memory pressure.
    pub fn is_evictable_on_memory_pressure(&self) -> bool {
        self.get::<EvictableOnMemoryPressureKey>()
    }

    /// Opt the store in or out of memory-pressure eviction.
    pub fn with_evictable_on_memory_pressure(self, evictable: bool) -> Self {
        self.with::<EvictableOnMemoryPressureKey>(evictable)
    }
}
