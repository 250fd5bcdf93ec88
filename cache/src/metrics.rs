use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
///
/// Hits and misses are not kept here: each shard counts its own, and
/// [`crate::LruCache::keyspace_stats`] sums them.
#[derive(Debug)]
pub(crate) struct Metrics {
  // --- Writes ---
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) rejected_by_cost: CachePadded<AtomicU64>,
  pub(crate) rejected_by_backpressure: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,

  // --- Removals decided by the cache ---
  pub(crate) expired: CachePadded<AtomicU64>,
  pub(crate) evicted_by_gc: CachePadded<AtomicU64>,
  pub(crate) gc_runs: CachePadded<AtomicU64>,

  // --- Hand-off queue overflow ---
  pub(crate) dropped_promotions: CachePadded<AtomicU64>,
  pub(crate) dropped_deletions: CachePadded<AtomicU64>,

  created_at: Instant,
}

// Manual implementation of Default to handle the non-default `Instant`.
impl Default for Metrics {
  fn default() -> Self {
    Self {
      inserts: CachePadded::new(AtomicU64::new(0)),
      rejected_by_cost: CachePadded::new(AtomicU64::new(0)),
      rejected_by_backpressure: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      expired: CachePadded::new(AtomicU64::new(0)),
      evicted_by_gc: CachePadded::new(AtomicU64::new(0)),
      gc_runs: CachePadded::new(AtomicU64::new(0)),
      dropped_promotions: CachePadded::new(AtomicU64::new(0)),
      dropped_deletions: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot, combined with the shards' hit/miss
  /// totals.
  pub(crate) fn snapshot(&self, hits: u64, misses: u64) -> MetricsSnapshot {
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      inserts: self.inserts.load(Ordering::Relaxed),
      rejected_by_cost: self.rejected_by_cost.load(Ordering::Relaxed),
      rejected_by_backpressure: self.rejected_by_backpressure.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      expired: self.expired.load(Ordering::Relaxed),
      evicted_by_gc: self.evicted_by_gc.load(Ordering::Relaxed),
      gc_runs: self.gc_runs.load(Ordering::Relaxed),
      dropped_promotions: self.dropped_promotions.load(Ordering::Relaxed),
      dropped_deletions: self.dropped_deletions.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// The number of successful lookups.
  pub hits: u64,
  /// The number of failed lookups.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// Writes that reached a shard and were kept.
  pub inserts: u64,
  /// Writes refused because their declared generation cost was too low.
  pub rejected_by_cost: u64,
  /// Writes rolled back because the promote queue was full.
  pub rejected_by_backpressure: u64,
  /// Successful `del` calls made by users.
  pub invalidations: u64,
  /// Entries found expired by `get` and removed.
  pub expired: u64,
  /// Entries evicted from the back of the recency list.
  pub evicted_by_gc: u64,
  /// Garbage-collection passes run by the worker.
  pub gc_runs: u64,
  /// Promotion signals lost to a full promote queue.
  pub dropped_promotions: u64,
  /// Deletion signals lost to a full delete queue.
  pub dropped_deletions: u64,
  /// The number of seconds the cache has existed.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("inserts", &self.inserts)
      .field("rejected_by_cost", &self.rejected_by_cost)
      .field("rejected_by_backpressure", &self.rejected_by_backpressure)
      .field("invalidations", &self.invalidations)
      .field("expired", &self.expired)
      .field("evicted_by_gc", &self.evicted_by_gc)
      .field("gc_runs", &self.gc_runs)
      .field("dropped_promotions", &self.dropped_promotions)
      .field("dropped_deletions", &self.dropped_deletions)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
