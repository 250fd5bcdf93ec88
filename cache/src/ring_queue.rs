//! A bounded, lock-guarded circular buffer used to hand work from many
//! foreground threads to the single cache worker.
//!
//! Producers never block. A push into a full queue hands the item back.

use parking_lot::RwLock;
use std::fmt;

/// Capacity used when a capacity of `0` is requested.
pub const DEFAULT_CAPACITY: usize = 1024;
/// The smallest capacity a queue is ever given.
pub const MIN_CAPACITY: usize = 2;
/// The largest capacity a queue is ever given.
pub const MAX_CAPACITY: usize = 1 << 31;

/// Rounds a requested capacity to the one the queue will actually use.
///
/// `0` falls back to [`DEFAULT_CAPACITY`]; anything else is clamped to
/// `[MIN_CAPACITY, MAX_CAPACITY]` and rounded up to the next power of two.
pub fn fix_capacity(request: usize) -> usize {
  if request == 0 {
    return DEFAULT_CAPACITY;
  }
  request.clamp(MIN_CAPACITY, MAX_CAPACITY).next_power_of_two()
}

struct Ring<T> {
  // Grown lazily up to `capacity`, so a large reservation costs nothing
  // until the queue actually fills.
  slots: Vec<Option<T>>,
  capacity: usize,
  // Free-running cursors; the slot index is `cursor & (capacity - 1)`.
  head: usize,
  tail: usize,
}

impl<T> Ring<T> {
  fn with_capacity(capacity: usize) -> Self {
    Self {
      slots: Vec::new(),
      capacity,
      head: 0,
      tail: 0,
    }
  }

  #[inline]
  fn mask(&self) -> usize {
    self.capacity - 1
  }

  #[inline]
  fn len(&self) -> usize {
    self.tail.wrapping_sub(self.head)
  }
}

/// A fixed-capacity FIFO queue safe to share between threads.
///
/// Every mutating operation takes the internal lock exactly once; read-only
/// queries take it in shared mode.
pub struct RingQueue<T> {
  inner: RwLock<Ring<T>>,
}

impl<T> fmt::Debug for RingQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let ring = self.inner.read();
    f.debug_struct("RingQueue")
      .field("capacity", &ring.capacity)
      .field("size", &ring.len())
      .finish()
  }
}

impl<T> Default for RingQueue<T> {
  fn default() -> Self {
    Self::new(DEFAULT_CAPACITY)
  }
}

impl<T> RingQueue<T> {
  /// Creates a queue; the capacity is normalized by [`fix_capacity`].
  pub fn new(capacity: usize) -> Self {
    Self {
      inner: RwLock::new(Ring::with_capacity(fix_capacity(capacity))),
    }
  }

  /// Re-allocates the queue with a new (normalized) capacity.
  ///
  /// Any items still queued are dropped.
  pub fn reserve(&self, capacity: usize) {
    let mut ring = self.inner.write();
    *ring = Ring::with_capacity(fix_capacity(capacity));
  }

  /// Appends an item at the back.
  ///
  /// Returns the item as `Err` without enqueuing it if the queue is full.
  pub fn push_back(&self, item: T) -> Result<(), T> {
    let mut ring = self.inner.write();
    if ring.len() == ring.capacity {
      return Err(item);
    }

    let index = ring.tail & ring.mask();
    if index == ring.slots.len() {
      ring.slots.push(Some(item));
    } else {
      ring.slots[index] = Some(item);
    }
    ring.tail = ring.tail.wrapping_add(1);
    Ok(())
  }

  /// Removes and returns the oldest item, or `None` if the queue is empty.
  pub fn pop_front(&self) -> Option<T> {
    let mut ring = self.inner.write();
    if ring.len() == 0 {
      return None;
    }

    let index = ring.head & ring.mask();
    let item = ring.slots[index].take();
    ring.head = ring.head.wrapping_add(1);
    item
  }

  /// Returns a copy of the oldest item without removing it.
  pub fn front(&self) -> Option<T>
  where
    T: Clone,
  {
    let ring = self.inner.read();
    if ring.len() == 0 {
      return None;
    }
    ring.slots[ring.head & ring.mask()].clone()
  }

  /// Drops every queued item, keeping the capacity.
  pub fn clear(&self) {
    let mut ring = self.inner.write();
    let capacity = ring.capacity;
    *ring = Ring::with_capacity(capacity);
  }

  pub fn size(&self) -> usize {
    self.inner.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.size() == 0
  }

  pub fn is_full(&self) -> bool {
    let ring = self.inner.read();
    ring.len() == ring.capacity
  }

  pub fn capacity(&self) -> usize {
    self.inner.read().capacity
  }
}
