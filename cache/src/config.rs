use crate::error::{Error, Result};
use crate::ring_queue;

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ITEM_NUM: usize = 1024;
pub const DEFAULT_PRUNE_BATCH_SIZE: usize = 50;
pub const DEFAULT_PROMOTE_PER_TIMES: u32 = 5;
/// One day.
pub const DEFAULT_ITEM_EXPIRE_SEC: u32 = 24 * 60 * 60;
pub const DEFAULT_ITEM_GEN_TIME_THRESHOLD_MS: f64 = 0.5;
pub const DEFAULT_BUFFER_LEN: usize = ring_queue::DEFAULT_CAPACITY;
pub const DEFAULT_WORKER_SLEEP_MS: u64 = 100;

/// Tunables of an [`LruCache`](crate::LruCache).
///
/// Every field has a default. A zero in any field other than
/// `worker_sleep_ms` and `item_gen_time_threshold_ms` means "use the
/// default"; the worker applies [`CacheConfig::normalize`] each time it
/// starts.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct CacheConfig {
  /// Linked entries above which the worker runs a GC pass.
  pub max_item_num: usize,
  /// Entries evicted from the back of the recency list per GC pass.
  pub prune_batch_size: usize,
  /// Accesses a linked entry needs before it is moved to the front.
  pub promote_per_times: u32,
  /// TTL used when a write does not name one.
  pub item_expire_sec: u32,
  /// Writes declaring a cheaper generation cost than this are refused.
  pub item_gen_time_threshold_ms: f64,
  pub delete_buffer_len: usize,
  pub promote_buffer_len: usize,
  /// Worker poll interval. Zero makes the worker only yield between passes.
  pub worker_sleep_ms: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_item_num: DEFAULT_MAX_ITEM_NUM,
      prune_batch_size: DEFAULT_PRUNE_BATCH_SIZE,
      promote_per_times: DEFAULT_PROMOTE_PER_TIMES,
      item_expire_sec: DEFAULT_ITEM_EXPIRE_SEC,
      item_gen_time_threshold_ms: DEFAULT_ITEM_GEN_TIME_THRESHOLD_MS,
      delete_buffer_len: DEFAULT_BUFFER_LEN,
      promote_buffer_len: DEFAULT_BUFFER_LEN,
      worker_sleep_ms: DEFAULT_WORKER_SLEEP_MS,
    }
  }
}

fn or_default<T: Default + PartialEq>(value: T, default: T) -> T {
  if value == T::default() {
    default
  } else {
    value
  }
}

impl CacheConfig {
  /// Returns a copy with every zero-valued field replaced by its default.
  pub fn normalize(&self) -> Self {
    Self {
      max_item_num: or_default(self.max_item_num, DEFAULT_MAX_ITEM_NUM),
      prune_batch_size: or_default(self.prune_batch_size, DEFAULT_PRUNE_BATCH_SIZE),
      promote_per_times: or_default(self.promote_per_times, DEFAULT_PROMOTE_PER_TIMES),
      item_expire_sec: or_default(self.item_expire_sec, DEFAULT_ITEM_EXPIRE_SEC),
      item_gen_time_threshold_ms: self.item_gen_time_threshold_ms,
      delete_buffer_len: or_default(self.delete_buffer_len, DEFAULT_BUFFER_LEN),
      promote_buffer_len: or_default(self.promote_buffer_len, DEFAULT_BUFFER_LEN),
      worker_sleep_ms: self.worker_sleep_ms,
    }
  }

  /// Checks the values that have no sensible fallback.
  pub fn validate(&self) -> Result<()> {
    let threshold = self.item_gen_time_threshold_ms;
    if threshold.is_nan() || threshold < 0.0 {
      return Err(Error::InvalidConfig {
        field: "item_gen_time_threshold_ms",
        message: format!("must be a non-negative number, got {}", threshold),
      });
    }
    Ok(())
  }

  /// The TTL applied to writes that do not specify one.
  #[inline]
  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(u64::from(or_default(
      self.item_expire_sec,
      DEFAULT_ITEM_EXPIRE_SEC,
    )))
  }

  #[inline]
  pub fn worker_sleep(&self) -> Duration {
    Duration::from_millis(self.worker_sleep_ms)
  }
}
