//! Hierarchical paths that address stores.

use std::fmt;
use std::hash::Hash;

use crate::key::{CacheKey, OpaqueKey};

/// One element of a [`QueryPath`].
///
/// Equality is type-sensitive: `Int(1)` never equals `String("1")`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// An integer segment.
    Int(i64),
    /// A string segment.
    String(String),
    /// A boolean segment.
    Bool(bool),
    /// A nested list of segments.
    List(Vec<PathSegment>),
    /// Any other hashable value.
    Opaque(OpaqueKey),
}

impl PathSegment {
    /// Wrap an arbitrary hashable value as a segment.
    pub fn opaque<K: CacheKey + 'static>(key: K) -> Self {
        PathSegment::Opaque(OpaqueKey::new(key))
    }
}

impl fmt::Debug for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Int(value) => write!(f, "{}", value),
            PathSegment::String(value) => write!(f, "{:?}", value),
            PathSegment::Bool(value) => write!(f, "{}", value),
            PathSegment::List(values) => f.debug_list().entries(values).finish(),
            PathSegment::Opaque(key) => write!(f, "{:?}", key),
        }
    }
}

macro_rules! impl_int_segment {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for PathSegment {
                fn from(value: $ty) -> Self {
                    PathSegment::Int(value as i64)
                }
            }
        )*
    };
}

impl_int_segment!(i8, i16, i32, i64, u8, u16, u32);

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        PathSegment::String(value.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(value: String) -> Self {
        PathSegment::String(value)
    }
}

impl From<bool> for PathSegment {
    fn from(value: bool) -> Self {
        PathSegment::Bool(value)
    }
}

impl From<Vec<PathSegment>> for PathSegment {
    fn from(values: Vec<PathSegment>) -> Self {
        PathSegment::List(values)
    }
}

impl From<OpaqueKey> for PathSegment {
    fn from(key: OpaqueKey) -> Self {
        PathSegment::Opaque(key)
    }
}

/// An ordered sequence of segments identifying a store.
///
/// Paths are the cache key of a [`QueryClient`](crate::QueryClient) and the
/// unit of bulk operations: `["posts"]` is a prefix of `["posts", 1]` and
/// `["posts", 2]`, so removing everything under `["posts"]` removes both.
///
/// # Example
///
/// ```ignore
/// use query_store::query_path;
///
/// let all_posts = query_path!["posts"];
/// let post = query_path!["posts", 1];
/// assert!(all_posts.is_prefix_of(&post));
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct QueryPath {
    segments: Vec<PathSegment>,
}

impl QueryPath {
    /// The empty path. It is a prefix of every path.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a path from segments.
    pub fn new(segments: impl IntoIterator<Item = PathSegment>) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    /// The segments of this path.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if the path has no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns `true` if every segment of `self` equals the segment at the
    /// same position in `other`.
    pub fn is_prefix_of(&self, other: &QueryPath) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// Concatenate two paths.
    pub fn appending(&self, other: &QueryPath) -> QueryPath {
        let mut segments = Vec::with_capacity(self.segments.len() + other.segments.len());
        segments.extend(self.segments.iter().cloned());
        segments.extend(other.segments.iter().cloned());
        QueryPath { segments }
    }

    /// Append one segment, consuming the path.
    pub fn with(mut self, segment: impl Into<PathSegment>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Get the debug representation of this path.
    pub fn debug_repr(&self) -> String {
        format!("{:?}", self)
    }
}

impl fmt::Debug for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.segments).finish()
    }
}

impl From<Vec<PathSegment>> for QueryPath {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }
}

impl From<PathSegment> for QueryPath {
    fn from(segment: PathSegment) -> Self {
        Self {
            segments: vec![segment],
        }
    }
}

impl From<&str> for QueryPath {
    fn from(value: &str) -> Self {
        PathSegment::from(value).into()
    }
}

impl FromIterator<PathSegment> for QueryPath {
    fn from_iter<I: IntoIterator<Item = PathSegment>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Build a [`QueryPath`] from values convertible into [`PathSegment`].
///
/// ```ignore
/// let path = query_path!["users", 42, true];
/// ```
#[macro_export]
macro_rules! query_path {
    () => {
        $crate::QueryPath::empty()
    };
    ($($segment:expr),+ $(,)?) => {
        $crate::QueryPath::new([$($crate::PathSegment::from($segment)),+])
    };
}
