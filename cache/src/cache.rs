use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::Result;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::policy::ram::RamPolicy;
use crate::policy::{EvictionPolicy, SizeEstimator};
use crate::ring_queue::fix_capacity;
use crate::shared::CacheShared;
use crate::store::Restore;
use crate::task::worker::{Worker, WorkerSettings};

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// A thread-safe, sharded LRU cache with per-entry expiration.
///
/// Lookups and writes go straight to one of `1 << SHARD_BITS` shards and
/// never wait on recency bookkeeping. Recency order is kept by a single
/// background worker (see [`LruCache::start`]) that links new entries,
/// moves frequently read ones to the front and evicts from the back once
/// the cache holds more than `max_item_num` entries or the installed
/// policy asks for a collection.
///
/// Until `start` is called entries are stored and served, but nothing is
/// ever linked or evicted.
pub struct LruCache<K, V, H = ahash::RandomState, const SHARD_BITS: u32 = 5> {
  shared: Arc<CacheShared<K, V, H>>,
  worker: Mutex<Option<Worker>>,
}

impl<K, V, H, const SHARD_BITS: u32> fmt::Debug for LruCache<K, V, H, SHARD_BITS> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LruCache")
      .field("shards", &(1usize << SHARD_BITS))
      .field("running", &self.is_running())
      .field("shared", &self.shared)
      .finish()
  }
}

impl<K, V, H, const SHARD_BITS: u32> Drop for LruCache<K, V, H, SHARD_BITS> {
  fn drop(&mut self) {
    self.stop();
  }
}

// --- Worker lifecycle that needs no bounds (also used by `Drop`) ---
impl<K, V, H, const SHARD_BITS: u32> LruCache<K, V, H, SHARD_BITS> {
  /// Stops the background worker and waits for it to exit.
  ///
  /// Idempotent. Linked entries keep their order and are picked up again by
  /// the next `start`.
  pub fn stop(&self) {
    if let Some(worker) = self.worker.lock().take() {
      worker.stop();
      info!("cache worker stopped");
    }
  }

  pub fn is_running(&self) -> bool {
    self.worker.lock().is_some()
  }
}

impl<K, V> LruCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  /// Creates a cache with the default configuration.
  pub fn new() -> Self {
    Self::with_config(CacheConfig::default())
  }

  pub fn with_config(config: CacheConfig) -> Self {
    Self::with_hasher(config, ahash::RandomState::new())
  }
}

impl<K, V> Default for LruCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V, H, const SHARD_BITS: u32> LruCache<K, V, H, SHARD_BITS>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Creates a cache that routes keys to shards with `hasher`.
  pub fn with_hasher(config: CacheConfig, hasher: H) -> Self {
    Self {
      shared: Arc::new(CacheShared::new(config, hasher, SHARD_BITS)),
      worker: Mutex::new(None),
    }
  }

  /// Looks up `key`.
  ///
  /// An expired entry is removed on the spot and reported as a miss. A live
  /// entry is handed to the worker as a promotion signal; if the promote
  /// queue is full the signal is dropped and the lookup still succeeds.
  pub fn get<Q>(&self, key: &Q) -> Option<Arc<CacheEntry<K, V>>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let shard = self.shared.store.get_shard(key);
    let entry = shard.get(key)?;

    if entry.is_expired() {
      // Identity removal, so a fresh write racing with us survives.
      if shard.remove_entry(&entry) {
        Metrics::incr(&self.shared.metrics.expired);
        self.shared.notify_remove(&entry);
        self.shared.signal_delete(entry);
      }
      return None;
    }

    self.shared.signal_promote(entry.clone());
    Some(entry)
  }

  /// Inserts `value` with the configured default TTL.
  pub fn set(&self, key: K, value: V) -> Option<Arc<CacheEntry<K, V>>> {
    self.insert(key, value, None, f64::INFINITY)
  }

  pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) -> Option<Arc<CacheEntry<K, V>>> {
    self.insert(key, value, Some(ttl), f64::INFINITY)
  }

  /// Inserts `value`, declaring that producing it took `generation_cost_ms`.
  ///
  /// Values cheaper to produce than `item_gen_time_threshold_ms` are not
  /// worth caching and are refused with `None`.
  pub fn set_with_cost(
    &self,
    key: K,
    value: V,
    generation_cost_ms: f64,
  ) -> Option<Arc<CacheEntry<K, V>>> {
    self.insert(key, value, None, generation_cost_ms)
  }

  pub fn set_with(
    &self,
    key: K,
    value: V,
    ttl: Duration,
    generation_cost_ms: f64,
  ) -> Option<Arc<CacheEntry<K, V>>> {
    self.insert(key, value, Some(ttl), generation_cost_ms)
  }

  fn insert(
    &self,
    key: K,
    value: V,
    ttl: Option<Duration>,
    generation_cost_ms: f64,
  ) -> Option<Arc<CacheEntry<K, V>>> {
    let (threshold, default_ttl) = {
      let config = self.shared.config.read();
      (config.item_gen_time_threshold_ms, config.default_ttl())
    };
    if generation_cost_ms < threshold {
      Metrics::incr(&self.shared.metrics.rejected_by_cost);
      return None;
    }

    let shard = self.shared.store.get_shard(&key);
    let (entry, previous) = shard.set(key, value, ttl.unwrap_or(default_ttl));
    if let Some(previous) = &previous {
      self.shared.notify_remove(previous);
    }
    self.shared.notify_insert(&entry);

    if self.shared.promote_queue.push_back(entry.clone()).is_err() {
      // The worker could never link this entry, so the write is undone.
      Metrics::incr(&self.shared.metrics.rejected_by_backpressure);
      match shard.restore(&entry, previous.clone()) {
        Restore::Reinstated => {
          self.shared.notify_remove(&entry);
          if let Some(previous) = &previous {
            self.shared.notify_insert(previous);
          }
        }
        // Either there was nothing to put back or the worker already evicted
        // `previous`; the policy saw its removal at the swap above.
        Restore::Removed => self.shared.notify_remove(&entry),
        Restore::Superseded => {
          if let Some(previous) = previous {
            self.shared.signal_delete(previous);
          }
        }
      }
      return None;
    }

    if let Some(previous) = previous {
      self.shared.signal_delete(previous);
    }
    Metrics::incr(&self.shared.metrics.inserts);
    Some(entry)
  }

  /// Removes `key`. Returns whether an entry was present.
  pub fn del<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    match self.shared.store.get_shard(key).remove(key) {
      Some(entry) => {
        Metrics::incr(&self.shared.metrics.invalidations);
        self.shared.notify_remove(&entry);
        self.shared.signal_delete(entry);
        true
      }
      None => false,
    }
  }

  /// Returns the live entry for `key`, or stores the value produced by
  /// `generator` with the given TTL.
  ///
  /// The generator is not run on a hit. The write is subject to the same
  /// backpressure as [`LruCache::set_with_ttl`].
  pub fn get_or_set<F>(&self, key: K, ttl: Duration, generator: F) -> Option<Arc<CacheEntry<K, V>>>
  where
    F: FnOnce() -> V,
  {
    if let Some(entry) = self.get(&key) {
      return Some(entry);
    }
    self.set_with_ttl(key, generator(), ttl)
  }

  /// Drops every entry, resets hit/miss statistics and the policy's
  /// accounting. Calling it twice is the same as calling it once.
  ///
  /// A shard whose lock cannot be taken within a short bound is skipped and
  /// keeps its entries.
  pub fn clear(&self) {
    // Holding the worker slot keeps `start`/`stop` out while we decide who
    // owns the recency list.
    let worker = self.worker.lock();

    let skipped = self
      .shared
      .store
      .iter_shards()
      .filter(|shard| !shard.clear())
      .count();
    if skipped > 0 {
      warn!(skipped, "cache clear could not lock every shard");
    }

    self.shared.linked.store(0, Ordering::Release);
    if worker.is_some() {
      self.shared.clear_requested.store(true, Ordering::Release);
    } else if let Some(list) = self.shared.parked_list.lock().as_mut() {
      if skipped == 0 {
        list.clear();
      } else {
        let store = &self.shared.store;
        let kept = list.retain(|entry| store.get_shard(entry.key()).contains_entry(entry));
        self.shared.linked.store(kept as i64, Ordering::Release);
      }
    }

    self.shared.policy.read().clear();
    debug!("cache cleared");
  }

  /// Starts the background worker. A no-op if it is already running.
  ///
  /// The configuration is re-read on every start: zero fields are replaced
  /// by their defaults and queue capacities are re-applied (a queue whose
  /// capacity changes loses the signals it held).
  pub fn start(&self) -> Result<()> {
    let mut worker = self.worker.lock();
    if worker.is_some() {
      return Ok(());
    }

    let config = self.shared.config.read().normalize();
    config.validate()?;

    if fix_capacity(config.promote_buffer_len) != self.shared.promote_queue.capacity() {
      self.shared.promote_queue.reserve(config.promote_buffer_len);
    }
    if fix_capacity(config.delete_buffer_len) != self.shared.delete_queue.capacity() {
      self.shared.delete_queue.reserve(config.delete_buffer_len);
    }
    *self.shared.config.write() = config.clone();

    *worker = Some(Worker::spawn(
      Arc::clone(&self.shared),
      WorkerSettings::from(&config),
    )?);

    info!(
      max_item_num = config.max_item_num,
      prune_batch_size = config.prune_batch_size,
      promote_per_times = config.promote_per_times,
      item_expire_sec = config.item_expire_sec,
      item_gen_time_threshold_ms = config.item_gen_time_threshold_ms,
      delete_buffer_len = config.delete_buffer_len,
      promote_buffer_len = config.promote_buffer_len,
      worker_sleep_ms = config.worker_sleep_ms,
      "cache worker started"
    );
    Ok(())
  }

  /// The number of entries linked into the recency list.
  ///
  /// Lags behind writes by up to one worker pass per queued signal.
  pub fn size(&self) -> usize {
    self.shared.linked.load(Ordering::Acquire).max(0) as usize
  }

  /// The number of entries stored across all shards. May transiently differ
  /// from [`LruCache::size`].
  pub fn item_num_in_shards(&self) -> usize {
    self.shared.store.len()
  }

  /// Aggregated `(hits, misses)` over all shards.
  pub fn keyspace_stats(&self) -> (u64, u64) {
    self.shared.store.keyspace_stats()
  }

  /// Renders the policy description and hit/miss counts as a JSON object.
  pub fn dump(&self) -> String {
    let (hits, misses) = self.keyspace_stats();
    format!(
      "{{\"cache\":{{\"policy\":{},\"statistic\":{{\"cache_stats\":{{\"cache_hit_count\":{},\"cache_miss_count\":{}}}}}}}}}",
      self.shared.policy.read().describe(),
      hits,
      misses
    )
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    let (hits, misses) = self.keyspace_stats();
    self.shared.metrics.snapshot(hits, misses)
  }

  /// The configuration currently in effect.
  pub fn config(&self) -> CacheConfig {
    self.shared.config.read().clone()
  }

  /// Replaces the configuration.
  ///
  /// The cost threshold and default TTL apply to the next write; worker
  /// settings and queue capacities apply on the next `start`.
  pub fn update_config(&self, config: CacheConfig) -> Result<()> {
    config.validate()?;
    *self.shared.config.write() = config;
    Ok(())
  }

  /// Installs a [`RamPolicy`] with the given byte budget and the
  /// shallow-size estimators.
  pub fn use_ram_policy(&self, max_ram_bytes: i64) -> Result<()> {
    self.set_policy(RamPolicy::<K, V>::new(max_ram_bytes)?);
    Ok(())
  }

  /// Installs a [`RamPolicy`] with custom key and value size estimators.
  pub fn use_ram_policy_with<KE, VE>(
    &self,
    max_ram_bytes: i64,
    key_estimator: KE,
    value_estimator: VE,
  ) -> Result<()>
  where
    KE: SizeEstimator<K> + 'static,
    VE: SizeEstimator<V> + 'static,
  {
    self.set_policy(RamPolicy::with_estimators(
      max_ram_bytes,
      key_estimator,
      value_estimator,
    )?);
    Ok(())
  }

  /// Replaces the eviction policy. The new policy starts with empty
  /// accounting.
  pub fn set_policy<P>(&self, policy: P)
  where
    P: EvictionPolicy<K, V> + 'static,
  {
    self.shared.install_policy(Arc::new(policy));
  }

  pub(crate) fn install_policy(&self, policy: Arc<dyn EvictionPolicy<K, V>>) {
    self.shared.install_policy(policy);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;

  fn stopped_cache() -> LruCache<u32, u32> {
    LruCache::with_config(CacheConfig {
      worker_sleep_ms: 0,
      ..Default::default()
    })
  }

  #[test]
  fn serves_entries_without_a_worker() {
    let cache = stopped_cache();
    assert!(!cache.is_running());
    cache.set(1, 10).unwrap();
    assert_eq!(*cache.get(&1).unwrap().value(), 10);
    assert_eq!(cache.size(), 0, "nothing is linked before start");
    assert_eq!(cache.item_num_in_shards(), 1);
  }

  #[test]
  fn full_promote_queue_rolls_back_to_previous() {
    let cache = LruCache::<u32, u32>::with_config(CacheConfig {
      promote_buffer_len: 2,
      ..Default::default()
    });
    cache.set(1, 1).unwrap();
    cache.set(2, 2).unwrap();

    // Queue is full: the overwrite is undone and the old value survives.
    assert!(cache.set(1, 100).is_none());
    assert_eq!(*cache.get(&1).unwrap().value(), 1);

    // A fresh key is dropped entirely.
    assert!(cache.set(3, 3).is_none());
    assert!(cache.get(&3).is_none());
    assert_eq!(cache.item_num_in_shards(), 2);
    assert_eq!(cache.metrics().rejected_by_backpressure, 2);
  }

  #[test]
  fn rollback_keeps_policy_balanced() {
    let cache = LruCache::<u32, u32>::with_config(CacheConfig {
      promote_buffer_len: 2,
      ..Default::default()
    });
    cache.use_ram_policy(1024).unwrap();
    cache.set(1, 1).unwrap();
    cache.set(2, 2).unwrap();
    assert!(cache.set(1, 5).is_none());
    assert!(cache.set(3, 3).is_none());
    assert!(cache.dump().contains("\"ram_bytes_used\":64"));
  }

  #[test]
  fn clear_while_stopped_empties_parked_list() {
    let cache = stopped_cache();
    cache.start().unwrap();
    for key in 0..5 {
      cache.set(key, key);
    }
    thread::sleep(Duration::from_millis(20));
    assert_eq!(cache.size(), 5);
    cache.stop();

    cache.clear();
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.item_num_in_shards(), 0);
    let parked = cache.shared.parked_list.lock();
    assert!(parked.as_ref().is_some_and(|list| list.is_empty()));
  }

  #[test]
  fn restart_keeps_linked_entries() {
    let cache = stopped_cache();
    cache.start().unwrap();
    cache.set(1, 1);
    cache.set(2, 2);
    thread::sleep(Duration::from_millis(20));
    cache.stop();
    cache.stop();
    assert_eq!(cache.size(), 2);

    cache.start().unwrap();
    cache.start().unwrap();
    assert!(cache.del(&1));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(cache.size(), 1);
  }

  #[test]
  fn start_rejects_invalid_config() {
    let cache = LruCache::<u32, u32>::with_config(CacheConfig {
      item_gen_time_threshold_ms: f64::NAN,
      ..Default::default()
    });
    assert!(cache.start().is_err());
    assert!(!cache.is_running());
  }

  #[test]
  fn start_normalizes_config() {
    let cache = LruCache::<u32, u32>::with_config(CacheConfig {
      max_item_num: 0,
      promote_buffer_len: 0,
      delete_buffer_len: 5,
      worker_sleep_ms: 0,
      ..Default::default()
    });
    cache.start().unwrap();
    let config = cache.config();
    assert_eq!(config.max_item_num, 1024);
    assert_eq!(config.promote_buffer_len, 1024);
    assert_eq!(cache.shared.promote_queue.capacity(), 1024);
    assert_eq!(cache.shared.delete_queue.capacity(), 8);
  }

  #[test]
  fn update_config_validates() {
    let cache = stopped_cache();
    let mut config = cache.config();
    config.item_gen_time_threshold_ms = -1.0;
    assert!(cache.update_config(config).is_err());

    let mut config = cache.config();
    config.item_gen_time_threshold_ms = 10.0;
    cache.update_config(config).unwrap();
    assert!(cache.set_with_cost(1, 1, 5.0).is_none());
    assert!(cache.set_with_cost(1, 1, 10.0).is_some());
  }
}
