use crate::cache::LruCache;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::policy::ram::RamPolicy;
use crate::policy::EvictionPolicy;

use core::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// A builder for [`LruCache`] instances.
///
/// The shard count is a type-level parameter; pick it with
/// [`CacheBuilder::shard_bits`]. The built cache is not started.
pub struct CacheBuilder<K, V, H = ahash::RandomState, const SHARD_BITS: u32 = 5> {
  config: CacheConfig,
  hasher: H,
  policy: Option<Arc<dyn EvictionPolicy<K, V>>>,
  ram_budget: Option<i64>,
  start: bool,
}

// Manual Debug implementation for CacheBuilder.
impl<K, V, H, const SHARD_BITS: u32> fmt::Debug for CacheBuilder<K, V, H, SHARD_BITS> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("config", &self.config)
      .field("shard_bits", &SHARD_BITS)
      .field("has_policy", &self.policy.is_some())
      .field("ram_budget", &self.ram_budget)
      .field("start", &self.start)
      .finish_non_exhaustive()
  }
}

// --- Default Constructor ---
impl<K, V> CacheBuilder<K, V> {
  /// Creates a new `CacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      config: CacheConfig::default(),
      hasher: ahash::RandomState::new(),
      policy: None,
      ram_budget: None,
      start: false,
    }
  }
}

impl<K, V> Default for CacheBuilder<K, V> {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(feature = "rapidhash")]
impl<K, V> CacheBuilder<K, V, rapidhash::RapidRandomState> {
  /// Creates a builder that routes keys with `rapidhash`.
  pub fn rapidhash() -> Self {
    CacheBuilder::new().hasher(rapidhash::RapidRandomState::default())
  }
}

// --- General Configuration Methods ---
// This impl block has no restrictive bounds on K or V.
impl<K, V, H, const SHARD_BITS: u32> CacheBuilder<K, V, H, SHARD_BITS> {
  /// Replaces the whole configuration. Setters called afterwards still
  /// apply on top of it.
  pub fn config(mut self, config: CacheConfig) -> Self {
    self.config = config;
    self
  }

  /// Sets the number of linked entries above which a GC pass runs.
  pub fn max_item_num(mut self, max_item_num: usize) -> Self {
    self.config.max_item_num = max_item_num;
    self
  }

  pub fn prune_batch_size(mut self, prune_batch_size: usize) -> Self {
    self.config.prune_batch_size = prune_batch_size;
    self
  }

  /// Sets how many reads a linked entry needs before it moves to the front.
  pub fn promote_per_times(mut self, promote_per_times: u32) -> Self {
    self.config.promote_per_times = promote_per_times;
    self
  }

  pub fn item_expire_sec(mut self, item_expire_sec: u32) -> Self {
    self.config.item_expire_sec = item_expire_sec;
    self
  }

  pub fn item_gen_time_threshold_ms(mut self, threshold_ms: f64) -> Self {
    self.config.item_gen_time_threshold_ms = threshold_ms;
    self
  }

  pub fn delete_buffer_len(mut self, len: usize) -> Self {
    self.config.delete_buffer_len = len;
    self
  }

  pub fn promote_buffer_len(mut self, len: usize) -> Self {
    self.config.promote_buffer_len = len;
    self
  }

  /// Sets the worker poll interval. `0` makes the worker spin with a yield.
  pub fn worker_sleep_ms(mut self, sleep_ms: u64) -> Self {
    self.config.worker_sleep_ms = sleep_ms;
    self
  }

  /// Sets a custom eviction policy for the cache.
  ///
  /// By default, the cache uses a `NullPolicy`. Overrides any earlier
  /// [`CacheBuilder::ram_policy`].
  pub fn policy<Policy>(mut self, policy: Policy) -> Self
  where
    Policy: EvictionPolicy<K, V> + 'static,
  {
    self.policy = Some(Arc::new(policy));
    self.ram_budget = None;
    self
  }

  /// Uses a [`RamPolicy`] with the given byte budget.
  pub fn ram_policy(mut self, max_ram_bytes: i64) -> Self {
    self.ram_budget = Some(max_ram_bytes);
    self.policy = None;
    self
  }

  /// Starts the background worker as part of `build`.
  pub fn start(mut self, start: bool) -> Self {
    self.start = start;
    self
  }

  /// Sets the hasher used to pick a key's shard.
  pub fn hasher<H2>(self, hasher: H2) -> CacheBuilder<K, V, H2, SHARD_BITS> {
    CacheBuilder {
      config: self.config,
      hasher,
      policy: self.policy,
      ram_budget: self.ram_budget,
      start: self.start,
    }
  }

  /// Sets the number of shards to `1 << BITS`.
  pub fn shard_bits<const BITS: u32>(self) -> CacheBuilder<K, V, H, BITS> {
    CacheBuilder {
      config: self.config,
      hasher: self.hasher,
      policy: self.policy,
      ram_budget: self.ram_budget,
      start: self.start,
    }
  }
}

// --- Build Methods ---
impl<K, V, H, const SHARD_BITS: u32> CacheBuilder<K, V, H, SHARD_BITS>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Builds an `LruCache`.
  ///
  /// Fails if the configuration or the RAM budget is invalid, or if the
  /// worker was requested and could not be spawned.
  pub fn build(self) -> Result<LruCache<K, V, H, SHARD_BITS>> {
    self.config.validate()?;

    let policy: Option<Arc<dyn EvictionPolicy<K, V>>> = match self.ram_budget {
      Some(budget) => Some(Arc::new(RamPolicy::<K, V>::new(budget)?)),
      None => self.policy,
    };

    let cache = LruCache::with_hasher(self.config, self.hasher);
    if let Some(policy) = policy {
      cache.install_policy(policy);
    }
    if self.start {
      cache.start()?;
    }
    Ok(cache)
  }
}
