use crate::entry::CacheEntry;

use std::sync::Arc;

use generational_arena::{Arena, Index};

#[derive(Debug)]
struct Node<K, V> {
  entry: Arc<CacheEntry<K, V>>,
  next: Option<Index>,
  prev: Option<Index>,
}

/// The global recency order of linked entries.
///
/// Nodes live in a generational arena and are linked by `Index`, so an
/// entry's position token stays valid until the node is removed and a stale
/// token can never alias a newer node. The list keeps each entry's position
/// token in sync with its membership.
///
/// Only the cache worker ever owns this structure.
#[derive(Debug)]
pub(crate) struct RecencyList<K, V> {
  nodes: Arena<Node<K, V>>,
  // Head is the most recently promoted entry.
  head: Option<Index>,
  // Tail is the eviction candidate.
  tail: Option<Index>,
}

impl<K, V> Default for RecencyList<K, V> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V> RecencyList<K, V> {
  pub(crate) fn new() -> Self {
    Self {
      nodes: Arena::new(),
      head: None,
      tail: None,
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.nodes.len()
  }

  #[cfg(test)]
  pub(crate) fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  // Detaches a node from its neighbours without freeing it.
  fn unlink(&mut self, index: Index) {
    let (prev, next) = {
      let node = &self.nodes[index];
      (node.prev, node.next)
    };

    match prev {
      Some(prev_idx) => self.nodes[prev_idx].next = next,
      None => self.head = next,
    }
    match next {
      Some(next_idx) => self.nodes[next_idx].prev = prev,
      None => self.tail = prev,
    }
  }

  // Attaches an already-allocated node at the head.
  fn attach_front(&mut self, index: Index) {
    let old_head = self.head;
    {
      let node = &mut self.nodes[index];
      node.next = old_head;
      node.prev = None;
    }
    self.head = Some(index);

    match old_head {
      Some(old_head_idx) => self.nodes[old_head_idx].prev = Some(index),
      None => self.tail = Some(index),
    }
  }

  /// Links `entry` at the front and records its position token.
  pub(crate) fn push_front(&mut self, entry: Arc<CacheEntry<K, V>>) -> Index {
    let index = self.nodes.insert(Node {
      entry: entry.clone(),
      next: None,
      prev: None,
    });
    self.attach_front(index);
    entry.set_position(index);
    index
  }

  /// Whether `entry` is linked into this list.
  ///
  /// Checks identity, not just the token, so a token minted by another list
  /// never matches a node here.
  pub(crate) fn contains(&self, entry: &Arc<CacheEntry<K, V>>) -> bool {
    entry
      .position()
      .and_then(|index| self.nodes.get(index))
      .is_some_and(|node| Arc::ptr_eq(&node.entry, entry))
  }

  /// Splices `entry` to the front in O(1).
  ///
  /// Returns `false` if the entry is not linked into this list.
  pub(crate) fn move_to_front(&mut self, entry: &Arc<CacheEntry<K, V>>) -> bool {
    if !self.contains(entry) {
      return false;
    }
    let Some(index) = entry.position() else {
      return false;
    };
    if self.head != Some(index) {
      self.unlink(index);
      self.attach_front(index);
    }
    true
  }

  /// Unlinks `entry`, clearing its position token. Returns `false` if the
  /// entry is not linked into this list.
  pub(crate) fn remove(&mut self, entry: &Arc<CacheEntry<K, V>>) -> bool {
    if !self.contains(entry) {
      return false;
    }
    entry.position().and_then(|index| self.remove_at(index)).is_some()
  }

  fn remove_at(&mut self, index: Index) -> Option<Arc<CacheEntry<K, V>>> {
    if !self.nodes.contains(index) {
      return None;
    }
    self.unlink(index);
    let node = self.nodes.remove(index)?;
    node.entry.take_position();
    Some(node.entry)
  }

  /// Unlinks and returns the least recently promoted entry.
  pub(crate) fn pop_back(&mut self) -> Option<Arc<CacheEntry<K, V>>> {
    let tail = self.tail?;
    self.remove_at(tail)
  }

  /// Keeps only the entries for which `keep` returns true, preserving their
  /// order. Dropped entries lose their token and are marked deleted.
  ///
  /// Returns the number of entries kept.
  pub(crate) fn retain<F>(&mut self, mut keep: F) -> usize
  where
    F: FnMut(&Arc<CacheEntry<K, V>>) -> bool,
  {
    let mut current = self.head;
    while let Some(index) = current {
      current = self.nodes[index].next;
      if !keep(&self.nodes[index].entry) {
        if let Some(entry) = self.remove_at(index) {
          entry.mark_deleted();
        }
      }
    }
    self.len()
  }

  /// Unlinks every entry, marking each one deleted so that stale promote
  /// signals for it are discarded.
  pub(crate) fn clear(&mut self) {
    for (_, node) in self.nodes.drain() {
      node.entry.take_position();
      node.entry.mark_deleted();
    }
    self.head = None;
    self.tail = None;
  }

  // A helper for tests, to get the order of keys from head to tail.
  #[cfg(test)]
  pub(crate) fn keys_as_vec(&self) -> Vec<K>
  where
    K: Clone,
  {
    let mut keys = Vec::new();
    let mut current = self.head;
    while let Some(index) = current {
      keys.push(self.nodes[index].entry.key().clone());
      current = self.nodes[index].next;
    }
    keys
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::time::Duration;

  fn entry(key: i32) -> Arc<CacheEntry<i32, i32>> {
    Arc::new(CacheEntry::new(key, key * 10, Duration::from_secs(60)))
  }

  #[test]
  fn new_list_is_empty() {
    let list = RecencyList::<i32, i32>::new();
    assert!(list.keys_as_vec().is_empty(), "New list keys should be empty");
    assert!(list.is_empty());
    assert_eq!(list.len(), 0);
  }

  #[test]
  fn push_front_assigns_positions() {
    let mut list = RecencyList::new();
    let first = entry(10);
    let index = list.push_front(first.clone());
    assert_eq!(first.position(), Some(index));

    list.push_front(entry(20));
    assert_eq!(list.len(), 2);
    assert_eq!(
      list.keys_as_vec(),
      vec![20, 10],
      "Newest item should be at the front"
    );
  }

  #[test]
  fn move_to_front_splices() {
    let mut list = RecencyList::new();
    let one = entry(1);
    list.push_front(one.clone());
    list.push_front(entry(2));
    list.push_front(entry(3));
    assert_eq!(list.keys_as_vec(), vec![3, 2, 1]);

    assert!(list.move_to_front(&one));
    assert_eq!(list.keys_as_vec(), vec![1, 3, 2]);
    assert_eq!(list.len(), 3, "Length should not change");

    // Moving the head is a no-op.
    assert!(list.move_to_front(&one));
    assert_eq!(list.keys_as_vec(), vec![1, 3, 2]);
  }

  #[test]
  fn pop_back_returns_oldest() {
    let mut list = RecencyList::new();
    let one = entry(1);
    list.push_front(one.clone());
    list.push_front(entry(2));
    list.push_front(entry(3));

    let popped = list.pop_back().unwrap();
    assert!(Arc::ptr_eq(&popped, &one));
    assert!(one.position().is_none(), "Popped entry loses its token");
    assert_eq!(list.keys_as_vec(), vec![3, 2]);
  }

  #[test]
  fn pop_back_single_and_empty() {
    let mut list = RecencyList::new();
    list.push_front(entry(1));
    assert_eq!(*list.pop_back().unwrap().key(), 1);
    assert!(list.is_empty());
    assert!(list.pop_back().is_none(), "pop_back on empty list returns None");

    // The list is reusable after being emptied.
    list.push_front(entry(2));
    assert_eq!(list.keys_as_vec(), vec![2]);
  }

  #[test]
  fn remove_from_middle() {
    let mut list = RecencyList::new();
    list.push_front(entry(1));
    let two = entry(2);
    list.push_front(two.clone());
    list.push_front(entry(3));

    assert!(list.remove(&two));
    assert_eq!(list.keys_as_vec(), vec![3, 1]);
    assert!(two.position().is_none());

    // An unlinked entry is not found again.
    assert!(!list.remove(&two));
    assert!(!list.move_to_front(&two));
    assert_eq!(list.len(), 2);
  }

  #[test]
  fn stale_token_does_not_alias_reused_slot() {
    let mut list = RecencyList::new();
    let one = entry(1);
    let stale = list.push_front(one.clone());
    assert!(list.remove(&one));

    let two = entry(2);
    list.push_front(two.clone());
    one.set_position(stale);
    assert!(!list.remove(&one));
    assert_eq!(list.keys_as_vec(), vec![2]);
  }

  #[test]
  fn token_from_another_list_is_ignored() {
    let orphan = entry(1);
    let mut lost = RecencyList::new();
    lost.push_front(orphan.clone());
    drop(lost);

    let mut list = RecencyList::new();
    let two = entry(2);
    list.push_front(two.clone());
    assert_eq!(orphan.position(), two.position(), "both arenas hand out the same first slot");

    assert!(!list.contains(&orphan));
    assert!(!list.move_to_front(&orphan));
    assert!(!list.remove(&orphan));
    assert!(list.contains(&two));
    assert_eq!(list.keys_as_vec(), vec![2]);
  }

  #[test]
  fn retain_keeps_order_of_survivors() {
    let mut list = RecencyList::new();
    let entries: Vec<_> = (1..=5).map(entry).collect();
    for e in &entries {
      list.push_front(e.clone());
    }
    assert_eq!(list.keys_as_vec(), vec![5, 4, 3, 2, 1]);

    let kept = list.retain(|e| e.key() % 2 == 1);
    assert_eq!(kept, 3);
    assert_eq!(list.keys_as_vec(), vec![5, 3, 1]);
    assert!(entries[1].is_deleted() && entries[3].is_deleted());
    assert!(entries[1].position().is_none());
    assert!(!entries[0].is_deleted());

    // The tail is still correct after removals.
    assert_eq!(*list.pop_back().unwrap().key(), 1);
  }

  #[test]
  fn clear_marks_entries_deleted() {
    let mut list = RecencyList::new();
    let one = entry(1);
    let two = entry(2);
    list.push_front(one.clone());
    list.push_front(two.clone());

    list.clear();

    assert!(list.keys_as_vec().is_empty());
    assert!(list.is_empty());
    assert!(one.is_deleted() && two.is_deleted());
    assert!(one.position().is_none() && two.position().is_none());
  }
}
