pub mod null;
pub mod ram;

use std::sync::Arc;

/// A callback a policy invokes to ask the cache worker for a garbage
/// collection pass. It must not block.
pub type GcCallback = Arc<dyn Fn() + Send + Sync>;

/// A trait for implementing cache memory-accounting policies.
///
/// The policy is told about every entry that becomes visible in, or
/// disappears from, a shard. Replacing a key produces one `on_remove` for the
/// old entry and one `on_insert` for the new one, so matched notifications
/// always cancel out.
pub trait EvictionPolicy<K, V>: Send + Sync {
  /// Called when an entry is inserted into a shard.
  fn on_insert(&self, key: &K, value: &V);

  /// Called when an entry is removed from a shard (deleted, replaced,
  /// expired, or evicted).
  fn on_remove(&self, key: &K, value: &V);

  /// Clears all accounting state.
  fn clear(&self);

  /// Renders a JSON-shaped diagnostic summary.
  fn describe(&self) -> String;

  /// Whether the policy is still over its limit. The worker asks after
  /// every newly linked entry, so a GC pass that ran before the entries
  /// were linked is followed by another one.
  fn over_budget(&self) -> bool {
    false
  }

  /// Installs the callback used to request a GC pass. The cache calls this
  /// whenever the policy is installed. Policies that never signal can ignore it.
  fn register_gc_callback(&self, _callback: GcCallback) {}
}

/// Estimates the memory footprint of keys or values of type `T`.
pub trait SizeEstimator<T: ?Sized>: Send + Sync {
  fn estimate(&self, item: &T) -> usize;
}

/// The default estimator: the in-memory size of the value itself, without
/// following any heap pointers it owns.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShallowSize;

impl<T: ?Sized> SizeEstimator<T> for ShallowSize {
  #[inline]
  fn estimate(&self, item: &T) -> usize {
    std::mem::size_of_val(item)
  }
}

impl<T: ?Sized, F> SizeEstimator<T> for F
where
  F: Fn(&T) -> usize + Send + Sync,
{
  #[inline]
  fn estimate(&self, item: &T) -> usize {
    self(item)
  }
}

const RATIO_SIGNIFICANT_DIGITS: i32 = 6;

/// Formats a float like C's `%g`: six significant digits, trailing zeros
/// trimmed, scientific notation for very small or very large magnitudes.
pub(crate) fn format_ratio(value: f64) -> String {
  if value == 0.0 {
    return "0".to_string();
  }
  if !value.is_finite() {
    return value.to_string();
  }

  let scientific = format!("{:.*e}", (RATIO_SIGNIFICANT_DIGITS - 1) as usize, value);
  let (mantissa, exponent) = match scientific.split_once('e') {
    Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
    None => (scientific.as_str(), 0),
  };

  if exponent < -4 || exponent >= RATIO_SIGNIFICANT_DIGITS {
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
  } else {
    let decimals = (RATIO_SIGNIFICANT_DIGITS - 1 - exponent).max(0) as usize;
    trim_fraction(&format!("{:.*}", decimals, value))
  }
}

fn trim_fraction(number: &str) -> String {
  if number.contains('.') {
    number.trim_end_matches('0').trim_end_matches('.').to_string()
  } else {
    number.to_string()
  }
}
