//! Fixed-capacity FIFO with overwrite-oldest semantics.
//!
//! Every [`Module`](crate::Module) keeps its output in one of these. Writing
//! past the capacity never fails: the oldest elements are evicted so the
//! buffer always holds the most recently written `capacity` items, in order.
//!
//! The buffer is not synchronized; owners guard it with their own lock.

use std::collections::VecDeque;

use crate::error::{Error, Result};

/// Circular buffer of at most `capacity` elements.
///
/// Storage grows on demand up to the capacity, so a large nominal capacity
/// costs nothing until data actually arrives.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Create an empty buffer. A capacity of zero discards every write.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Maximum number of stored elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity. Shrinking below the current count drops the
    /// oldest elements.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict_excess();
        if self.items.capacity() > capacity.saturating_mul(2) {
            self.items.shrink_to(capacity);
        }
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Append `data`, evicting the oldest elements when it does not fit.
    pub fn write(&mut self, data: &[T]) {
        if data.len() >= self.capacity {
            self.items.clear();
            self.items
                .extend(data[data.len() - self.capacity..].iter().cloned());
            return;
        }
        self.items.extend(data.iter().cloned());
        self.evict_excess();
    }

    /// Append one element, evicting the oldest when full.
    pub fn write_one(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        self.items.push_back(item);
        self.evict_excess();
    }

    /// Remove and return exactly `count` elements in FIFO order.
    pub fn read(&mut self, count: usize) -> Result<Vec<T>> {
        if self.items.len() < count {
            return Err(Error::InsufficientData {
                requested: count,
                available: self.items.len(),
            });
        }
        Ok(self.items.drain(..count).collect())
    }

    /// Remove and return the oldest element.
    pub fn read_one(&mut self) -> Result<T> {
        self.items.pop_front().ok_or(Error::Empty)
    }

    /// Copy of the contents, oldest first. Does not consume.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Remove and return everything, oldest first.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Drop all contents.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn evict_excess(&mut self) {
        let excess = self.items.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.items.drain(..excess);
        }
    }
}
