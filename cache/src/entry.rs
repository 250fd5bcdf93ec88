use crate::time;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use generational_arena::Index;
use parking_lot::Mutex;

/// A cached key/value pair together with the lifecycle metadata the
/// background worker needs to order it.
///
/// Entries are shared as `Arc<CacheEntry<K, V>>` between a shard, the
/// recency list and the hand-off queues. Key, value and expiration never
/// change after construction; the lifecycle fields are only written by the
/// worker but may be read from any thread.
pub struct CacheEntry<K, V> {
  key: K,
  value: V,
  /// The expiration timestamp in nanoseconds since the cache epoch.
  expires_at: u64,
  /// Accesses seen since the entry was last moved to the front.
  promotions: AtomicU32,
  deleted: AtomicBool,
  /// Slot in the recency list; `None` until the worker links the entry.
  position: Mutex<Option<Index>>,
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for CacheEntry<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("key", &self.key)
      .field("value", &self.value)
      .field("ttl_remaining", &self.ttl_remaining())
      .field("deleted", &self.is_deleted())
      .finish_non_exhaustive()
  }
}

impl<K, V> CacheEntry<K, V> {
  pub(crate) fn new(key: K, value: V, ttl: Duration) -> Self {
    let expires_at = time::now_nanos().saturating_add(time::duration_to_nanos(ttl));
    Self {
      key,
      value,
      expires_at,
      promotions: AtomicU32::new(0),
      deleted: AtomicBool::new(false),
      position: Mutex::new(None),
    }
  }

  #[inline]
  pub fn key(&self) -> &K {
    &self.key
  }

  #[inline]
  pub fn value(&self) -> &V {
    &self.value
  }

  /// Checks the stored expiration against the monotonic clock.
  #[inline]
  pub fn is_expired(&self) -> bool {
    time::now_nanos() >= self.expires_at
  }

  /// How long until the entry expires; zero once it has.
  pub fn ttl_remaining(&self) -> Duration {
    Duration::from_nanos(self.expires_at.saturating_sub(time::now_nanos()))
  }

  /// Whether the entry has been logically deleted by the worker.
  #[inline]
  pub fn is_deleted(&self) -> bool {
    self.deleted.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn should_promote(&self, threshold: u32) -> bool {
    !self.is_deleted() && self.promotions.load(Ordering::Relaxed) >= threshold
  }

  #[inline]
  pub(crate) fn incr_promote(&self) {
    self.promotions.fetch_add(1, Ordering::Relaxed);
  }

  /// Zeroes the promotion counter and clears the deleted flag.
  pub(crate) fn reset_after_promotion(&self) {
    self.promotions.store(0, Ordering::Relaxed);
    self.deleted.store(false, Ordering::Release);
  }

  #[inline]
  pub(crate) fn mark_deleted(&self) {
    self.deleted.store(true, Ordering::Release);
  }

  #[inline]
  pub(crate) fn position(&self) -> Option<Index> {
    *self.position.lock()
  }

  #[inline]
  pub(crate) fn set_position(&self, index: Index) {
    *self.position.lock() = Some(index);
  }

  #[inline]
  pub(crate) fn take_position(&self) -> Option<Index> {
    self.position.lock().take()
  }
}
