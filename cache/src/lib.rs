//! A concurrent, sharded, TTL-aware LRU cache with a background
//! promotion/eviction pipeline.
//!
//! # Features
//! - **Sharded Storage**: Keys are spread over `1 << SHARD_BITS` independently
//!   locked shards, so readers and writers of different keys rarely meet.
//! - **Non-Blocking Recency**: Reads and writes never touch the recency list.
//!   They leave a signal in a bounded queue and a single worker thread applies
//!   it; a full queue degrades the LRU order instead of blocking the caller.
//! - **Expiration**: Every entry carries its own TTL and is dropped on the
//!   first read after it expires.
//! - **Pluggable Accounting**: A `NullPolicy` by default, or a byte-budget
//!   `RamPolicy` that requests a collection when the budget is reached.
//! - **Observability**: `dump()` for a compact JSON summary and `metrics()`
//!   for detailed counters.
//!
//! ```
//! use fibre_lru::{CacheBuilder, LruCache};
//!
//! let cache: LruCache<String, u64> = CacheBuilder::new()
//!   .max_item_num(10_000)
//!   .build()
//!   .unwrap();
//! cache.start().unwrap();
//!
//! cache.set("answer".to_string(), 42);
//! assert_eq!(cache.get("answer").map(|entry| *entry.value()), Some(42));
//! ```

// Public modules that form the API
pub mod builder;
pub mod config;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod ring_queue;

// Internal, crate-only modules
mod cache;
mod entry;
mod recency;
mod shared;
mod store;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use cache::LruCache;
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use error::{Error, Result};
pub use metrics::MetricsSnapshot;
pub use policy::null::NullPolicy;
pub use policy::ram::{RamPolicy, DEFAULT_MAX_RAM_BYTES, ENTRY_OVERHEAD_BYTES};
pub use policy::{EvictionPolicy, GcCallback, ShallowSize, SizeEstimator};
pub use ring_queue::RingQueue;
