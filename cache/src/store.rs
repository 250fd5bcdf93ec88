use crate::entry::CacheEntry;

use core::fmt;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

/// How long `Shard::clear` waits for the write lock before giving up.
const CLEAR_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<Q: Hash + ?Sized, H: BuildHasher>(hasher: &H, key: &Q) -> u64 {
  hasher.hash_one(key)
}

/// Outcome of [`Shard::restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Restore {
  /// The previous entry is live in the shard again.
  Reinstated,
  /// The key was dropped: there was no previous entry, or it had been evicted.
  Removed,
  /// A newer write replaced ours; the shard was left alone.
  Superseded,
}

/// One independently locked partition of the key space.
pub(crate) struct Shard<K, V, H> {
  map: RwLock<HashMap<K, Arc<CacheEntry<K, V>>, H>>,
  hits: CachePadded<AtomicU64>,
  misses: CachePadded<AtomicU64>,
}

impl<K, V, H> fmt::Debug for Shard<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Shard")
      .field("len", &self.map.read().len())
      .field("hits", &self.hits.load(Ordering::Relaxed))
      .field("misses", &self.misses.load(Ordering::Relaxed))
      .finish()
  }
}

impl<K, V, H> Shard<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher,
{
  pub(crate) fn new(hasher: H) -> Self {
    Self {
      map: RwLock::new(HashMap::with_hasher(hasher)),
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
    }
  }

  /// Inserts a fresh entry for `key`, returning it together with whatever
  /// entry it replaced.
  pub(crate) fn set(
    &self,
    key: K,
    value: V,
    ttl: Duration,
  ) -> (Arc<CacheEntry<K, V>>, Option<Arc<CacheEntry<K, V>>>)
  where
    K: Clone,
  {
    let entry = Arc::new(CacheEntry::new(key.clone(), value, ttl));
    let previous = self.map.write().insert(key, entry.clone());
    (entry, previous)
  }

  /// Looks up `key`, counting the lookup as a hit or a miss.
  pub(crate) fn get<Q>(&self, key: &Q) -> Option<Arc<CacheEntry<K, V>>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let found = self.map.read().get(key).cloned();
    match found {
      Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
      None => self.misses.fetch_add(1, Ordering::Relaxed),
    };
    found
  }

  pub(crate) fn remove<Q>(&self, key: &Q) -> Option<Arc<CacheEntry<K, V>>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.map.write().remove(key)
  }

  /// Removes `entry` only if the shard still maps its key to that exact
  /// instance. Guards against removing a newer entry for the same key.
  pub(crate) fn remove_entry(&self, entry: &Arc<CacheEntry<K, V>>) -> bool {
    let mut guard = self.map.write();
    match guard.get(entry.key()) {
      Some(current) if Arc::ptr_eq(current, entry) => {
        guard.remove(entry.key());
        true
      }
      _ => false,
    }
  }

  /// Undoes a `set`: if `entry` is still the live entry for its key, puts
  /// `previous` back, or drops the key when there was none or the worker
  /// has already evicted it.
  ///
  /// The deleted flag is read under the write lock. The worker marks an
  /// entry deleted before it tries to remove it from the shard, so an
  /// evicted `previous` can never be reinstated.
  pub(crate) fn restore(
    &self,
    entry: &Arc<CacheEntry<K, V>>,
    previous: Option<Arc<CacheEntry<K, V>>>,
  ) -> Restore
  where
    K: Clone,
  {
    let mut guard = self.map.write();
    match guard.get(entry.key()) {
      Some(current) if Arc::ptr_eq(current, entry) => match previous {
        Some(previous) if !previous.is_deleted() => {
          guard.insert(entry.key().clone(), previous);
          Restore::Reinstated
        }
        _ => {
          guard.remove(entry.key());
          Restore::Removed
        }
      },
      _ => Restore::Superseded,
    }
  }

  /// A snapshot of every entry currently stored.
  pub(crate) fn entries(&self) -> Vec<Arc<CacheEntry<K, V>>> {
    self.map.read().values().cloned().collect()
  }

  /// Whether `entry` is the instance the shard currently holds for its key.
  pub(crate) fn contains_entry(&self, entry: &Arc<CacheEntry<K, V>>) -> bool {
    self
      .map
      .read()
      .get(entry.key())
      .is_some_and(|current| Arc::ptr_eq(current, entry))
  }

  /// Drops every entry and resets the hit/miss counters.
  ///
  /// Waits a bounded amount of time for the lock; returns `false` and leaves
  /// the shard untouched if it could not be acquired.
  pub(crate) fn clear(&self) -> bool {
    match self.map.try_write_for(CLEAR_LOCK_TIMEOUT) {
      Some(mut guard) => {
        guard.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        true
      }
      None => false,
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.map.read().len()
  }

  pub(crate) fn keyspace_stats(&self) -> (u64, u64) {
    (
      self.hits.load(Ordering::Relaxed),
      self.misses.load(Ordering::Relaxed),
    )
  }
}

/// A cache store that is partitioned into multiple, independently locked shards.
///
/// The shard count is a power of two and a key's shard is taken from the top
/// bits of its hash. Each shard's map buckets by the low bits, so keys that
/// share a shard still spread over the map.
pub(crate) struct ShardedStore<K, V, H> {
  pub(crate) shards: Box<[CachePadded<Shard<K, V, H>>]>,
  pub(crate) hasher: H,
  // `64 - shard_bits`; shifting by 64 selects shard 0.
  shift: u32,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a new `ShardedStore` with `1 << shard_bits` shards.
  pub(crate) fn new(shard_bits: u32, hasher: H) -> Self {
    let num_shards = 1usize << shard_bits;
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(Shard::new(hasher.clone())))
      .collect();

    Self {
      shards,
      hasher,
      shift: u64::BITS - shard_bits,
    }
  }

  #[inline]
  pub(crate) fn get_shard_index<Q: Hash + ?Sized>(&self, key: &Q) -> usize {
    hash_key(&self.hasher, key).checked_shr(self.shift).unwrap_or(0) as usize
  }

  /// Returns the shard responsible for `key`.
  #[inline]
  pub(crate) fn get_shard<Q: Hash + ?Sized>(&self, key: &Q) -> &Shard<K, V, H> {
    &self.shards[self.get_shard_index(key)]
  }

  /// Returns an iterator over all the shards.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &Shard<K, V, H>> {
    self.shards.iter().map(|padded| &**padded)
  }

  /// Sum of entries over all shards.
  pub(crate) fn len(&self) -> usize {
    self.iter_shards().map(Shard::len).sum()
  }

  /// Aggregated `(hits, misses)` over all shards.
  pub(crate) fn keyspace_stats(&self) -> (u64, u64) {
    self
      .iter_shards()
      .map(Shard::keyspace_stats)
      .fold((0, 0), |(hits, misses), (h, m)| (hits + h, misses + m))
  }
}
