/// Anything schedulable by deadline.
pub trait Deadline {
  fn deadline(&self) -> f64;
}

/// Binary min-heap over a contiguous vector, keyed by `Deadline`.
///
/// Invariant: a parent's deadline is never greater than either child's.
#[derive(Debug)]
pub struct MinHeap<T> {
  entries: Vec<T>,
}

impl<T: Deadline> MinHeap<T> {
  pub fn new() -> MinHeap<T> {
    MinHeap { entries: Vec::new() }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn peek(&self) -> Option<&T> {
    self.entries.first()
  }

  pub fn push(&mut self, entry: T) {
    self.entries.push(entry);
    self.sift_up(self.entries.len() - 1);
  }

  pub fn pop(&mut self) -> Option<T> {
    if self.entries.is_empty() {
      return None;
    }
    let last = self.entries.len() - 1;
    self.entries.swap(0, last);
    let entry = self.entries.pop();
    if !self.entries.is_empty() {
      self.sift_down(0);
    }
    entry
  }

  pub fn iter(&self) -> impl Iterator<Item = &T> {
    self.entries.iter()
  }

  fn sift_up(&mut self, mut index: usize) {
    while index > 0 {
      let parent = (index - 1) / 2;
      if self.entries[index].deadline() >= self.entries[parent].deadline() {
        break;
      }
      self.entries.swap(index, parent);
      index = parent;
    }
  }

  fn sift_down(&mut self, mut index: usize) {
    let len = self.entries.len();
    loop {
      let left = 2 * index + 1;
      let right = 2 * index + 2;
      let mut smallest = index;

      if left < len && self.entries[left].deadline() < self.entries[smallest].deadline() {
        smallest = left;
      }
      if right < len && self.entries[right].deadline() < self.entries[smallest].deadline() {
        smallest = right;
      }
      if smallest == index {
        return;
      }
      self.entries.swap(index, smallest);
      index = smallest;
    }
  }
}

impl<T: Deadline> Default for MinHeap<T> {
  fn default() -> MinHeap<T> {
    MinHeap::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  impl Deadline for f64 {
    fn deadline(&self) -> f64 {
      *self
    }
  }

  #[test]
  pub fn pop_yields_ascending_deadlines() {
    let mut heap = MinHeap::new();
    for deadline in [4.0, 1.5, 3.0, 0.5, 2.0] {
      heap.push(deadline);
    }

    let mut drained = Vec::new();
    while let Some(deadline) = heap.pop() {
      drained.push(deadline);
    }

    assert_eq!(drained, vec![0.5, 1.5, 2.0, 3.0, 4.0]);
  }

  #[test]
  pub fn peek_returns_minimum_without_removing() {
    let mut heap = MinHeap::new();
    heap.push(2.0);
    heap.push(1.0);
    heap.push(3.0);

    assert_eq!(heap.peek(), Some(&1.0));
    assert_eq!(heap.len(), 3);
  }

  #[test]
  pub fn pop_on_empty_heap_returns_none() {
    let mut heap: MinHeap<f64> = MinHeap::new();

    assert!(heap.is_empty());
    assert_eq!(heap.pop(), None);
  }

  #[test]
  pub fn interleaved_push_pop_keeps_heap_order() {
    let mut heap = MinHeap::new();
    heap.push(5.0);
    heap.push(1.0);
    assert_eq!(heap.pop(), Some(1.0));

    heap.push(0.5);
    heap.push(4.0);
    assert_eq!(heap.pop(), Some(0.5));
    assert_eq!(heap.pop(), Some(4.0));
    assert_eq!(heap.pop(), Some(5.0));
    assert_eq!(heap.pop(), None);
  }
}
