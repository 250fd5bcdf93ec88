use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::metrics::Metrics;
use crate::recency::RecencyList;
use crate::shared::CacheShared;

use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, trace, warn};

const WORKER_THREAD_NAME: &str = "fibre-lru-worker";

/// The worker's view of the configuration, fixed for the lifetime of one
/// worker thread.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerSettings {
  pub(crate) max_item_num: usize,
  pub(crate) prune_batch_size: usize,
  pub(crate) promote_per_times: u32,
  pub(crate) sleep: Duration,
}

impl WorkerSettings {
  #[inline]
  fn max_linked(&self) -> i64 {
    i64::try_from(self.max_item_num).unwrap_or(i64::MAX)
  }
}

impl From<&CacheConfig> for WorkerSettings {
  fn from(config: &CacheConfig) -> Self {
    Self {
      max_item_num: config.max_item_num,
      prune_batch_size: config.prune_batch_size,
      promote_per_times: config.promote_per_times,
      sleep: config.worker_sleep(),
    }
  }
}

/// The background thread that owns the recency list.
///
/// It is the only thread that links, splices or unlinks entries. Foreground
/// operations talk to it through the promote/delete queues and the GC and
/// clear flags.
pub(crate) struct Worker {
  handle: JoinHandle<()>,
  stop_flag: Arc<AtomicBool>,
}

impl Worker {
  /// Spawns a new worker thread.
  ///
  /// The thread takes the parked recency list out of `shared` and puts it
  /// back when it exits, so linked entries survive a stop/start cycle.
  pub(crate) fn spawn<K, V, H>(
    shared: Arc<CacheShared<K, V, H>>,
    settings: WorkerSettings,
  ) -> std::io::Result<Self>
  where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    H: BuildHasher + Clone + Send + Sync + 'static,
  {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_clone = stop_flag.clone();

    let handle = thread::Builder::new()
      .name(WORKER_THREAD_NAME.to_string())
      .spawn(move || {
        let parked = shared.parked_list.lock().take();
        let mut list = match parked {
          Some(list) => list,
          None => Self::relink_all(&shared),
        };

        while !stop_clone.load(Ordering::Acquire) {
          Self::run_once(&shared, &mut list, &settings);

          if settings.sleep.is_zero() {
            thread::yield_now();
          } else {
            thread::park_timeout(settings.sleep);
          }
        }

        *shared.parked_list.lock() = Some(list);
      })?;

    Ok(Self { handle, stop_flag })
  }

  /// Builds a fresh recency list holding every stored entry.
  ///
  /// Used when the previous worker panicked and took its list with it.
  /// Order is lost; every entry starts out equally recent.
  fn relink_all<K, V, H>(shared: &CacheShared<K, V, H>) -> RecencyList<K, V>
  where
    K: Eq + Hash,
    H: BuildHasher + Clone,
  {
    let mut list = RecencyList::new();
    for shard in shared.store.iter_shards() {
      for entry in shard.entries() {
        entry.take_position();
        list.push_front(entry);
      }
    }
    shared.linked.store(list.len() as i64, Ordering::Release);
    warn!(relinked = list.len(), "cache recency list was lost; relinked every stored entry");
    list
  }

  /// One pass of the loop: pending clear, pending GC, then at most one
  /// promote or one delete signal.
  pub(crate) fn run_once<K, V, H>(
    shared: &CacheShared<K, V, H>,
    list: &mut RecencyList<K, V>,
    settings: &WorkerSettings,
  ) where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    H: BuildHasher + Clone,
  {
    if shared.clear_requested.swap(false, Ordering::AcqRel) {
      Self::clear(shared, list);
    }

    if shared.gc_requested.swap(false, Ordering::AcqRel) {
      Self::gc(shared, list, settings.prune_batch_size);
    }

    if let Some(entry) = shared.promote_queue.pop_front() {
      if Self::promote(shared, list, entry, settings.promote_per_times)
        && (shared.linked.load(Ordering::Acquire) > settings.max_linked()
          || shared.policy.read().over_budget())
      {
        shared.gc_requested.store(true, Ordering::Release);
      }
    } else if let Some(entry) = shared.delete_queue.pop_front() {
      Self::delete(shared, list, entry);
    }
  }

  /// Drops every linked entry that is no longer live in its shard.
  ///
  /// Entries written after the shards were cleared stay linked.
  fn clear<K, V, H>(shared: &CacheShared<K, V, H>, list: &mut RecencyList<K, V>)
  where
    K: Eq + Hash,
    H: BuildHasher + Clone,
  {
    let before = list.len();
    let kept = list.retain(|entry| shared.store.get_shard(entry.key()).contains_entry(entry));
    shared.linked.store(kept as i64, Ordering::Release);
    debug!(dropped = before - kept, kept, "cache recency list cleared");
  }

  /// Evicts up to `batch` entries from the back of the recency list.
  fn gc<K, V, H>(shared: &CacheShared<K, V, H>, list: &mut RecencyList<K, V>, batch: usize)
  where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    H: BuildHasher + Clone,
  {
    let list_len = list.len();
    let mut evicted = 0usize;

    for _ in 0..batch {
      let Some(entry) = list.pop_back() else {
        break;
      };
      entry.mark_deleted();
      shared.linked.fetch_sub(1, Ordering::AcqRel);

      if shared.store.get_shard(entry.key()).remove_entry(&entry) {
        shared.notify_remove(&entry);
        evicted += 1;
      }
    }

    Metrics::incr(&shared.metrics.gc_runs);
    shared
      .metrics
      .evicted_by_gc
      .fetch_add(evicted as u64, Ordering::Relaxed);
    debug!(list_len, evicted, "cache gc pass");
  }

  /// Applies one promote signal. Returns true if the entry was newly linked.
  fn promote<K, V, H>(
    shared: &CacheShared<K, V, H>,
    list: &mut RecencyList<K, V>,
    entry: Arc<CacheEntry<K, V>>,
    promote_per_times: u32,
  ) -> bool
  where
    K: Eq + Hash,
    H: BuildHasher + Clone,
  {
    if entry.is_deleted() {
      trace!("dropping promote signal for a deleted entry");
      return false;
    }

    if list.contains(&entry) {
      entry.incr_promote();
      if entry.should_promote(promote_per_times) {
        list.move_to_front(&entry);
        entry.reset_after_promotion();
      }
      return false;
    }

    // A token this list does not know was minted by a list lost with a
    // panicked worker.
    entry.take_position();

    // The write may have been deleted, replaced or cleared since it was
    // queued; only the live instance gets linked.
    if !shared.store.get_shard(entry.key()).contains_entry(&entry) {
      trace!("dropping promote signal for an entry no longer in its shard");
      entry.mark_deleted();
      return false;
    }
    list.push_front(entry);
    shared.linked.fetch_add(1, Ordering::AcqRel);
    true
  }

  /// Applies one delete signal.
  fn delete<K, V, H>(
    shared: &CacheShared<K, V, H>,
    list: &mut RecencyList<K, V>,
    entry: Arc<CacheEntry<K, V>>,
  ) {
    if list.remove(&entry) {
      shared.linked.fetch_sub(1, Ordering::AcqRel);
    }
    entry.mark_deleted();
  }

  /// Signals the worker thread to stop and waits for it to exit.
  pub(crate) fn stop(self) {
    self.stop_flag.store(true, Ordering::Release);
    self.handle.thread().unpark();
    if self.handle.join().is_err() {
      error!("cache worker thread panicked; its recency list is lost");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::policy::ram::RamPolicy;
  use crate::store::Restore;
  use std::time::Duration;

  const TTL: Duration = Duration::from_secs(60);

  type Shared = CacheShared<u32, u32, ahash::RandomState>;

  fn shared() -> Shared {
    CacheShared::new(CacheConfig::default(), ahash::RandomState::new(), 2)
  }

  fn settings(max_item_num: usize, prune_batch_size: usize, promote_per_times: u32) -> WorkerSettings {
    WorkerSettings {
      max_item_num,
      prune_batch_size,
      promote_per_times,
      sleep: Duration::ZERO,
    }
  }

  fn write(shared: &Shared, key: u32) -> Arc<CacheEntry<u32, u32>> {
    let (entry, previous) = shared.store.get_shard(&key).set(key, key, TTL);
    if let Some(previous) = previous {
      shared.signal_delete(previous);
    }
    shared.notify_insert(&entry);
    shared.signal_promote(entry.clone());
    entry
  }

  fn drain(shared: &Shared, list: &mut RecencyList<u32, u32>, settings: &WorkerSettings) {
    for _ in 0..64 {
      Worker::run_once(shared, list, settings);
    }
  }

  #[test]
  fn links_in_write_order() {
    let shared = shared();
    let mut list = RecencyList::new();
    for key in 0..4 {
      write(&shared, key);
    }
    drain(&shared, &mut list, &settings(10, 3, 3));
    assert_eq!(list.keys_as_vec(), vec![3, 2, 1, 0]);
    assert_eq!(shared.linked.load(Ordering::SeqCst), 4);
  }

  #[test]
  fn promotes_after_threshold() {
    let shared = shared();
    let mut list = RecencyList::new();
    let settings = settings(10, 3, 2);
    let first = write(&shared, 0);
    write(&shared, 1);
    drain(&shared, &mut list, &settings);

    shared.signal_promote(first.clone());
    drain(&shared, &mut list, &settings);
    assert_eq!(list.keys_as_vec(), vec![1, 0], "one access is not enough");

    shared.signal_promote(first);
    drain(&shared, &mut list, &settings);
    assert_eq!(list.keys_as_vec(), vec![0, 1]);
  }

  #[test]
  fn overflow_triggers_gc_from_the_back() {
    let shared = shared();
    let mut list = RecencyList::new();
    for key in 0..11 {
      write(&shared, key);
    }
    drain(&shared, &mut list, &settings(10, 3, 3));

    assert_eq!(shared.linked.load(Ordering::SeqCst), 8);
    assert_eq!(shared.store.len(), 8);
    for key in 0..3 {
      assert!(shared.store.get_shard(&key).get(&key).is_none());
    }
    assert_eq!(shared.metrics.evicted_by_gc.load(Ordering::SeqCst), 3);
    assert_eq!(shared.metrics.gc_runs.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn replaced_entry_is_unlinked() {
    let shared = shared();
    let mut list = RecencyList::new();
    let settings = settings(10, 3, 3);
    let old = write(&shared, 7);
    drain(&shared, &mut list, &settings);
    write(&shared, 7);
    drain(&shared, &mut list, &settings);

    assert_eq!(list.len(), 1);
    assert_eq!(shared.linked.load(Ordering::SeqCst), 1);
    assert!(old.is_deleted());
  }

  #[test]
  fn stale_promote_is_not_linked() {
    let shared = shared();
    let mut list = RecencyList::new();
    let entry = write(&shared, 5);
    shared.store.get_shard(&5).remove(&5);
    shared.signal_delete(entry.clone());
    drain(&shared, &mut list, &settings(10, 3, 3));

    assert!(list.is_empty());
    assert!(entry.is_deleted());
    assert_eq!(shared.linked.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn clear_request_keeps_live_entries() {
    let shared = shared();
    let mut list = RecencyList::new();
    let settings = settings(10, 3, 3);
    let gone = write(&shared, 1);
    write(&shared, 2);
    drain(&shared, &mut list, &settings);

    shared.store.get_shard(&1).remove(&1);
    shared.clear_requested.store(true, Ordering::SeqCst);
    Worker::run_once(&shared, &mut list, &settings);

    assert_eq!(list.keys_as_vec(), vec![2]);
    assert!(gone.is_deleted());
    assert_eq!(shared.linked.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn policy_callback_requests_gc() {
    let shared = shared();
    let mut list = RecencyList::new();
    let settings = settings(100, 2, 3);
    shared.install_policy(Arc::new(RamPolicy::<u32, u32>::new(96).unwrap()));

    for key in 0..2 {
      write(&shared, key);
    }
    drain(&shared, &mut list, &settings);
    assert!(!shared.gc_requested.load(Ordering::SeqCst));

    // The third 32-byte entry reaches the budget.
    write(&shared, 2);
    assert!(shared.gc_requested.load(Ordering::SeqCst));
    drain(&shared, &mut list, &settings);

    assert_eq!(shared.store.len(), 1);
    assert!(shared.policy.read().describe().contains("\"ram_bytes_used\":32"));
  }

  #[test]
  fn spawned_worker_parks_list_on_stop() {
    let shared = Arc::new(shared());
    write(&shared, 1);
    let worker = Worker::spawn(shared.clone(), settings(10, 3, 3)).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    worker.stop();

    let parked = shared.parked_list.lock();
    assert_eq!(parked.as_ref().map(RecencyList::len), Some(1));
  }

  #[test]
  fn rollback_after_gc_does_not_orphan_the_evicted_entry() {
    let shared = shared();
    let mut list = RecencyList::new();
    let settings = settings(10, 3, 3);
    let old = write(&shared, 1);
    drain(&shared, &mut list, &settings);
    assert_eq!(shared.linked.load(Ordering::SeqCst), 1);

    // A write swaps in a new entry but has not been rolled back yet.
    let shard = shared.store.get_shard(&1);
    let (new, previous) = shard.set(1, 2, TTL);

    // Meanwhile the worker evicts the old entry from the back.
    shared.gc_requested.store(true, Ordering::SeqCst);
    Worker::run_once(&shared, &mut list, &settings);
    assert!(old.is_deleted());
    assert!(list.is_empty());

    assert_eq!(shard.restore(&new, previous), Restore::Removed);
    assert!(!shard.contains_entry(&old));
    assert_eq!(shared.store.len(), 0);
    assert_eq!(shared.linked.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn over_budget_policy_collects_after_late_links() {
    let shared = shared();
    let mut list = RecencyList::new();
    let settings = settings(100, 1, 3);
    shared.install_policy(Arc::new(RamPolicy::<u32, u32>::new(96).unwrap()));

    // The crossing fires while nothing is linked yet, so that pass evicts
    // nothing; later links keep collecting until usage drops below budget.
    for key in 0..4 {
      write(&shared, key);
    }
    assert!(shared.gc_requested.load(Ordering::SeqCst));
    drain(&shared, &mut list, &settings);

    assert!(!shared.policy.read().over_budget());
    assert_eq!(shared.store.len(), 2);
    assert_eq!(list.keys_as_vec(), vec![3, 2]);
    assert!(shared.policy.read().describe().contains("\"ram_bytes_used\":64"));
  }

  #[test]
  fn entry_with_token_from_a_lost_list_is_relinked() {
    let shared = shared();
    let settings = settings(10, 3, 3);
    let orphan = write(&shared, 1);
    let mut lost = RecencyList::new();
    drain(&shared, &mut lost, &settings);
    drop(lost);
    shared.linked.store(0, Ordering::SeqCst);

    let mut list = RecencyList::new();
    let other = write(&shared, 2);
    drain(&shared, &mut list, &settings);
    assert_eq!(orphan.position(), other.position());

    shared.signal_promote(orphan.clone());
    drain(&shared, &mut list, &settings);
    assert_eq!(list.keys_as_vec(), vec![1, 2]);
    assert_eq!(shared.linked.load(Ordering::SeqCst), 2);

    // Deleting it unlinks its own node, not the one sharing its old token.
    shared.store.get_shard(&1).remove(&1);
    shared.signal_delete(orphan);
    drain(&shared, &mut list, &settings);
    assert_eq!(list.keys_as_vec(), vec![2]);
    assert_eq!(shared.linked.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn lost_list_is_rebuilt_from_the_shards() {
    let shared = Arc::new(shared());
    let settings = settings(10, 3, 3);
    let mut lost = RecencyList::new();
    for key in 0..3 {
      write(&shared, key);
    }
    drain(&shared, &mut lost, &settings);
    drop(lost);
    // What a panicked worker leaves behind.
    *shared.parked_list.lock() = None;

    let worker = Worker::spawn(shared.clone(), settings).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    worker.stop();

    let parked = shared.parked_list.lock();
    let list = parked.as_ref().unwrap();
    assert_eq!(list.len(), 3);
    assert_eq!(shared.linked.load(Ordering::SeqCst), 3);
    for key in 0..3 {
      let entry = shared.store.get_shard(&key).get(&key).unwrap();
      assert!(list.contains(&entry));
    }
  }
}
