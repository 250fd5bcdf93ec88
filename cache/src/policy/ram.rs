use crate::error::{Error, Result};
use crate::policy::{format_ratio, EvictionPolicy, GcCallback, ShallowSize, SizeEstimator};

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

/// Fixed bookkeeping cost charged per entry on top of its key and value.
pub const ENTRY_OVERHEAD_BYTES: usize = 24;

/// A 32 MiB budget, suitable for [`crate::LruCache::use_ram_policy`].
pub const DEFAULT_MAX_RAM_BYTES: i64 = 32 * 1024 * 1024;

/// A byte-budget policy.
///
/// Each entry is charged `key estimate + value estimate + ENTRY_OVERHEAD_BYTES`.
/// When an insert moves the running total from below the budget to at or
/// above it, the registered GC callback fires once for that crossing.
pub struct RamPolicy<K, V, KE = ShallowSize, VE = ShallowSize> {
  max_ram_bytes: i64,
  used: CachePadded<AtomicI64>,
  key_estimator: KE,
  value_estimator: VE,
  gc_callback: RwLock<Option<GcCallback>>,
  _marker: PhantomData<fn(&K, &V)>,
}

impl<K, V, KE, VE> fmt::Debug for RamPolicy<K, V, KE, VE> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RamPolicy")
      .field("max_ram_bytes", &self.max_ram_bytes)
      .field("used", &self.used.load(Ordering::Relaxed))
      .field("has_gc_callback", &self.gc_callback.read().is_some())
      .finish()
  }
}

impl<K, V> RamPolicy<K, V> {
  /// Creates a policy with the shallow-size estimators.
  pub fn new(max_ram_bytes: i64) -> Result<Self> {
    Self::with_estimators(max_ram_bytes, ShallowSize, ShallowSize)
  }
}

impl<K, V, KE, VE> RamPolicy<K, V, KE, VE>
where
  KE: SizeEstimator<K>,
  VE: SizeEstimator<V>,
{
  /// Creates a policy with custom key and value size estimators.
  pub fn with_estimators(max_ram_bytes: i64, key_estimator: KE, value_estimator: VE) -> Result<Self> {
    if max_ram_bytes <= 0 {
      return Err(Error::InvalidConfig {
        field: "max_ram_bytes",
        message: format!("budget must be positive, got {}", max_ram_bytes),
      });
    }
    Ok(Self {
      max_ram_bytes,
      used: CachePadded::new(AtomicI64::new(0)),
      key_estimator,
      value_estimator,
      gc_callback: RwLock::new(None),
      _marker: PhantomData,
    })
  }

  pub fn max_ram_bytes(&self) -> i64 {
    self.max_ram_bytes
  }

  /// Current usage estimate, floored at zero.
  pub fn ram_bytes_used(&self) -> i64 {
    self.used.load(Ordering::Acquire).max(0)
  }

  fn entry_cost(&self, key: &K, value: &V) -> i64 {
    let bytes = self
      .key_estimator
      .estimate(key)
      .saturating_add(self.value_estimator.estimate(value))
      .saturating_add(ENTRY_OVERHEAD_BYTES);
    i64::try_from(bytes).unwrap_or(i64::MAX)
  }
}

impl<K, V, KE, VE> EvictionPolicy<K, V> for RamPolicy<K, V, KE, VE>
where
  KE: SizeEstimator<K>,
  VE: SizeEstimator<V>,
{
  fn on_insert(&self, key: &K, value: &V) {
    let cost = self.entry_cost(key, value);
    let before = self.used.fetch_add(cost, Ordering::AcqRel);
    let after = before.saturating_add(cost);
    if before < self.max_ram_bytes && after >= self.max_ram_bytes {
      if let Some(callback) = self.gc_callback.read().as_ref() {
        callback();
      }
    }
  }

  fn on_remove(&self, key: &K, value: &V) {
    let cost = self.entry_cost(key, value);
    self.used.fetch_sub(cost, Ordering::AcqRel);
  }

  fn clear(&self) {
    self.used.store(0, Ordering::Release);
  }

  fn over_budget(&self) -> bool {
    self.used.load(Ordering::Acquire) >= self.max_ram_bytes
  }

  fn describe(&self) -> String {
    let used = self.ram_bytes_used();
    format!(
      "{{\"ram_cache_policy\":{{\"max_ram_bytes_used\":{},\"ram_bytes_used\":{},\"%usage\":{}}}}}",
      self.max_ram_bytes,
      used,
      format_ratio(used as f64 / self.max_ram_bytes as f64)
    )
  }

  fn register_gc_callback(&self, callback: GcCallback) {
    *self.gc_callback.write() = Some(callback);
  }
}
