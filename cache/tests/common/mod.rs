#![allow(dead_code)]

use std::hash::{BuildHasher, Hasher};
use std::thread;
use std::time::{Duration, Instant};

use fibre_lru::{CacheBuilder, CacheConfig, LruCache};

// A custom hasher that allows us to control which shard a key is assigned to.
// The shard comes from the top bits of the hash, so the key is rotated to put
// its low two bits there. For a 4-shard cache:
// - key 0 -> shard 0 (0 & 3 = 0)
// - key 1 -> shard 1 (1 & 3 = 1)
// - key 5 -> shard 1 (5 & 3 = 1)
#[derive(Clone, Default)]
pub struct ShardControllingHasher;
impl BuildHasher for ShardControllingHasher {
  type Hasher = TestHasher;
  fn build_hasher(&self) -> Self::Hasher {
    TestHasher(0)
  }
}
pub struct TestHasher(u64);
impl Hasher for TestHasher {
  fn finish(&self) -> u64 {
    self.0
  }
  fn write(&mut self, _: &[u8]) {
    unimplemented!()
  }
  fn write_u32(&mut self, i: u32) {
    self.0 = u64::from(i).rotate_right(2);
  }
}

/// The worker configuration the tests run with: no sleeping between passes.
pub fn fast_config() -> CacheConfig {
  CacheConfig {
    worker_sleep_ms: 0,
    ..Default::default()
  }
}

/// Builds and starts a cache with `config`.
pub fn started_cache<K, V>(config: CacheConfig) -> LruCache<K, V>
where
  K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  let cache = LruCache::with_config(config);
  cache.start().unwrap();
  cache
}

/// A started 4-shard cache keyed so that `key & 3` is the shard.
pub fn sharded_test_cache(config: CacheConfig) -> LruCache<u32, u32, ShardControllingHasher, 2> {
  CacheBuilder::new()
    .config(config)
    .hasher(ShardControllingHasher)
    .shard_bits::<2>()
    .start(true)
    .build()
    .unwrap()
}

/// Polls `condition` until it holds or a generous timeout passes.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + Duration::from_secs(2);
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    thread::sleep(Duration::from_millis(1));
  }
  condition()
}

/// Gives the worker time to drain whatever is queued.
pub fn settle() {
  thread::sleep(Duration::from_millis(20));
}
