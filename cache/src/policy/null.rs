use crate::policy::EvictionPolicy;

/// A default "no-op" policy. It does no accounting and never requests a
/// collection; the item-count limit alone bounds the cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPolicy;

impl<K, V> EvictionPolicy<K, V> for NullPolicy {
  fn on_insert(&self, _key: &K, _value: &V) {}

  fn on_remove(&self, _key: &K, _value: &V) {}

  fn clear(&self) {}

  fn describe(&self) -> String {
    "{\"empty_cache_policy\":{}}".to_string()
  }
}
