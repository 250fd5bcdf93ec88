use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// The single, static reference point for all expiration timestamps.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// A helper to get the current time as a `Duration` since the epoch.
#[inline]
pub(crate) fn now_duration() -> Duration {
  Instant::now().saturating_duration_since(*CACHE_EPOCH)
}

/// The current time in nanoseconds since the epoch.
#[inline]
pub(crate) fn now_nanos() -> u64 {
  duration_to_nanos(now_duration())
}

/// Saturating conversion, so that absurd TTLs behave as "never expires"
/// instead of wrapping around.
#[inline]
pub(crate) fn duration_to_nanos(duration: Duration) -> u64 {
  u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
