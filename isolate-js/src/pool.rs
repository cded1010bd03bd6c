//! Fixed-capacity free lists of recycled wrappers.

use crate::handle::HandleEntry;
use crate::value::PoolKind;

/// Wrappers kept per pool unless configured otherwise.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// A LIFO free list that never grows past its capacity.
#[derive(Debug)]
pub struct ObjectPool<T> {
  items: Vec<T>,
  capacity: usize,
}

impl<T> ObjectPool<T> {
  pub fn new(capacity: usize) -> Self {
    Self {
      items: Vec::with_capacity(capacity),
      capacity,
    }
  }

  #[inline]
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.items.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  #[inline]
  pub fn is_full(&self) -> bool {
    self.items.len() >= self.capacity
  }

  /// Removes the most recently pushed item.
  pub fn pop(&mut self) -> Option<T> {
    self.items.pop()
  }

  /// Pools `item`, or hands it back when the pool is full so the caller can discard it.
  pub fn push(&mut self, item: T) -> Result<(), T> {
    if self.is_full() {
      return Err(item);
    }
    self.items.push(item);
    Ok(())
  }

  pub fn clear(&mut self) {
    self.items.clear();
  }
}

/// One pool per pooled wrapper kind.
#[derive(Debug)]
pub(crate) struct Pools {
  pools: [ObjectPool<Box<HandleEntry>>; PoolKind::ALL.len()],
}

impl Pools {
  pub fn new(capacity: usize) -> Self {
    Self {
      pools: std::array::from_fn(|_| ObjectPool::new(capacity)),
    }
  }

  #[inline]
  pub fn get(&self, kind: PoolKind) -> &ObjectPool<Box<HandleEntry>> {
    &self.pools[kind as usize]
  }

  #[inline]
  pub fn get_mut(&mut self, kind: PoolKind) -> &mut ObjectPool<Box<HandleEntry>> {
    &mut self.pools[kind as usize]
  }

  pub fn clear(&mut self) {
    for pool in &mut self.pools {
      pool.clear();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn push_on_full_hands_the_item_back() {
    let mut pool = ObjectPool::new(2);
    assert!(pool.is_empty());
    pool.push(1).unwrap();
    pool.push(2).unwrap();
    assert!(pool.is_full());
    assert_eq!(pool.push(3), Err(3));
    assert_eq!(pool.len(), 2);
  }

  #[test]
  fn pop_is_lifo_and_empty_pop_is_none() {
    let mut pool = ObjectPool::new(4);
    pool.push("a").unwrap();
    pool.push("b").unwrap();
    assert_eq!(pool.pop(), Some("b"));
    assert_eq!(pool.pop(), Some("a"));
    assert_eq!(pool.pop(), None);
  }

  #[test]
  fn zero_capacity_pool_never_holds_anything() {
    let mut pool = ObjectPool::new(0);
    assert!(pool.is_full());
    assert_eq!(pool.push(()), Err(()));
    assert!(pool.is_empty());
  }
}
