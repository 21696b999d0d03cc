//! Thread-safe bounded caches (spec §5): descriptor bytes by UUID, codec
//! pairs by `(in_id, out_id, out_type)`, and type IDs by query key. All
//! three are the same shape underneath — a mutex-guarded `lru::LruCache`
//! — so this module exposes one generic wrapper and the specific caches
//! are just type aliases over it.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

/// A bounded, thread-safe, O(1) LRU cache. Eviction happens inside the
/// mutex, so a reader never observes a partially-evicted entry.
pub struct SharedLruCache<K, V> {
  inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> SharedLruCache<K, V> {
  pub fn new(capacity: usize) -> Self {
    let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
    Self {
      inner: Mutex::new(LruCache::new(capacity)),
    }
  }

  pub fn get(&self, key: &K) -> Option<V> {
    self.inner.lock().unwrap().get(key).cloned()
  }

  pub fn insert(&self, key: K, value: V) {
    self.inner.lock().unwrap().put(key, value);
  }

  pub fn remove(&self, key: &K) {
    self.inner.lock().unwrap().pop(key);
  }

  pub fn len(&self) -> usize {
    self.inner.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn clear(&self) {
    self.inner.lock().unwrap().clear();
  }
}

/// Default capacities (spec gives no fixed numbers; these match the
/// order of magnitude of a client that talks to a handful of distinct
/// query shapes against one schema).
pub const DEFAULT_DESCRIPTOR_CACHE_CAPACITY: usize = 256;
pub const DEFAULT_CODEC_CACHE_CAPACITY: usize = 256;
pub const DEFAULT_TYPE_ID_CACHE_CAPACITY: usize = 1024;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn evicts_least_recently_used_entry() {
    let cache: SharedLruCache<u32, &'static str> = SharedLruCache::new(2);
    cache.insert(1, "a");
    cache.insert(2, "b");
    cache.get(&1); // touch 1 so 2 becomes the LRU entry
    cache.insert(3, "c");

    assert_eq!(cache.get(&1), Some("a"));
    assert_eq!(cache.get(&2), None);
    assert_eq!(cache.get(&3), Some("c"));
  }

  #[test]
  fn remove_drops_a_single_entry() {
    let cache: SharedLruCache<u32, &'static str> = SharedLruCache::new(4);
    cache.insert(1, "a");
    cache.remove(&1);
    assert_eq!(cache.get(&1), None);
  }
}
