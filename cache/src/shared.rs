use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::metrics::Metrics;
use crate::policy::null::NullPolicy;
use crate::policy::EvictionPolicy;
use crate::recency::RecencyList;
use crate::ring_queue::RingQueue;
use crate::store::ShardedStore;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

pub(crate) type EntryQueue<K, V> = RingQueue<Arc<CacheEntry<K, V>>>;

/// The internal, thread-safe core of the cache, shared between the
/// user-facing handle and the worker thread.
pub(crate) struct CacheShared<K, V, H> {
  pub(crate) store: ShardedStore<K, V, H>,
  pub(crate) promote_queue: EntryQueue<K, V>,
  pub(crate) delete_queue: EntryQueue<K, V>,
  pub(crate) policy: RwLock<Arc<dyn EvictionPolicy<K, V>>>,
  /// Raised by the policy callback or by the worker itself.
  pub(crate) gc_requested: Arc<AtomicBool>,
  pub(crate) clear_requested: AtomicBool,
  /// Number of entries linked into the recency list. Signed because
  /// `clear` may zero it while the worker is still decrementing.
  pub(crate) linked: AtomicI64,
  pub(crate) config: RwLock<CacheConfig>,
  pub(crate) metrics: Metrics,
  /// The recency list while no worker owns it.
  pub(crate) parked_list: Mutex<Option<RecencyList<K, V>>>,
}

impl<K, V, H> fmt::Debug for CacheShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("store", &self.store)
      .field("promote_queue", &self.promote_queue)
      .field("delete_queue", &self.delete_queue)
      .field("linked", &self.linked.load(Ordering::Relaxed))
      .field("config", &*self.config.read())
      .finish_non_exhaustive()
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(config: CacheConfig, hasher: H, shard_bits: u32) -> Self {
    Self {
      store: ShardedStore::new(shard_bits, hasher),
      promote_queue: RingQueue::new(config.promote_buffer_len),
      delete_queue: RingQueue::new(config.delete_buffer_len),
      policy: RwLock::new(Arc::new(NullPolicy)),
      gc_requested: Arc::new(AtomicBool::new(false)),
      clear_requested: AtomicBool::new(false),
      linked: AtomicI64::new(0),
      config: RwLock::new(config),
      metrics: Metrics::new(),
      parked_list: Mutex::new(Some(RecencyList::new())),
    }
  }

  /// Installs `policy`, wiring its GC signal to this cache's worker.
  pub(crate) fn install_policy(&self, policy: Arc<dyn EvictionPolicy<K, V>>) {
    let gc_requested = Arc::clone(&self.gc_requested);
    policy.register_gc_callback(Arc::new(move || {
      gc_requested.store(true, Ordering::Release);
    }));
    *self.policy.write() = policy;
  }

  #[inline]
  pub(crate) fn notify_insert(&self, entry: &CacheEntry<K, V>) {
    self.policy.read().on_insert(entry.key(), entry.value());
  }

  #[inline]
  pub(crate) fn notify_remove(&self, entry: &CacheEntry<K, V>) {
    self.policy.read().on_remove(entry.key(), entry.value());
  }

  /// Hands `entry` to the worker for unlinking. Overflow is only counted.
  #[inline]
  pub(crate) fn signal_delete(&self, entry: Arc<CacheEntry<K, V>>) {
    if self.delete_queue.push_back(entry).is_err() {
      Metrics::incr(&self.metrics.dropped_deletions);
    }
  }

  /// Hands `entry` to the worker for linking or promotion. Overflow is only
  /// counted.
  #[inline]
  pub(crate) fn signal_promote(&self, entry: Arc<CacheEntry<K, V>>) {
    if self.promote_queue.push_back(entry).is_err() {
      Metrics::incr(&self.metrics.dropped_promotions);
    }
  }
}
