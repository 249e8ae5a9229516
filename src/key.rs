//! Opaque path segments built from arbitrary hashable values.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dyn_hash::DynHash;

/// Values usable as opaque path segments.
///
/// Implemented for every `Hash + Eq + Debug + Send + Sync + 'static` type.
pub trait CacheKey: Hash + Eq + fmt::Debug + Send + Sync + 'static {}

impl<T: Hash + Eq + fmt::Debug + Send + Sync + 'static> CacheKey for T {}

trait ErasedKey: DynHash + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn eq_erased(&self, other: &dyn ErasedKey) -> bool;
}

impl<K: CacheKey> ErasedKey for K {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_erased(&self, other: &dyn ErasedKey) -> bool {
        other.as_any().downcast_ref::<K>() == Some(self)
    }
}

dyn_hash::hash_trait_object!(ErasedKey);

/// A type-erased [`CacheKey`].
///
/// Equal only to keys wrapping the same concrete type with an equal value.
#[derive(Clone)]
pub struct OpaqueKey(Arc<dyn ErasedKey>);

impl OpaqueKey {
    pub fn new<K: CacheKey>(key: K) -> Self {
        Self(Arc::new(key))
    }

    /// The wrapped value, if it is a `K`.
    pub fn downcast<K: CacheKey>(&self) -> Option<&K> {
        self.0.as_any().downcast_ref()
    }
}

impl fmt::Debug for OpaqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl Hash for OpaqueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_any().type_id().hash(state);
        self.0.hash(state);
    }
}

impl PartialEq for OpaqueKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_erased(&*other.0)
    }
}

impl Eq for OpaqueKey {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Hash, PartialEq, Eq)]
    struct UserId(u64);

    #[derive(Debug, Hash, PartialEq, Eq)]
    struct PostId(u64);

    #[test]
    fn test_equality_is_type_sensitive() {
        assert_eq!(OpaqueKey::new(UserId(1)), OpaqueKey::new(UserId(1)));
        assert_ne!(OpaqueKey::new(UserId(1)), OpaqueKey::new(UserId(2)));
        assert_ne!(OpaqueKey::new(UserId(1)), OpaqueKey::new(PostId(1)));
    }

    #[test]
    fn test_downcast_and_debug() {
        let key = OpaqueKey::new(UserId(9));
        assert_eq!(key.downcast::<UserId>(), Some(&UserId(9)));
        assert!(key.downcast::<PostId>().is_none());
        assert_eq!(format!("{:?}", key), "UserId(9)");
    }
}
