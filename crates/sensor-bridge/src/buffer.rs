// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Size-bounded batching buffer.
//!
//! Large writes (the historical backfill) are split into batches of at most
//! `max_size` items so that a single request body stays bounded.

/// A batching buffer that collects items until it is full.
pub struct BatchBuffer<T> {
    items: Vec<T>,
    max_size: usize,
}

impl<T> BatchBuffer<T> {
    /// Create a new batch buffer.
    ///
    /// A `max_size` of zero is treated as one.
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            items: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Add an item to the buffer.
    ///
    /// Returns `Some(batch)` if the buffer is now full and should be flushed,
    /// or `None` if there is still room.
    pub fn add(&mut self, item: T) -> Option<Vec<T>> {
        self.items.push(item);
        if self.items.len() >= self.max_size {
            Some(self.flush())
        } else {
            None
        }
    }

    /// Flush the buffer, returning all accumulated items.
    pub fn flush(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.items, Vec::with_capacity(self.max_size))
    }

    /// Get the current number of buffered items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_buffer_returns_none_until_full() {
        let mut buf = BatchBuffer::new(3);

        assert!(buf.add("line1").is_none());
        assert!(buf.add("line2").is_none());
        assert_eq!(buf.len(), 2);
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_batch_buffer_returns_batch_when_full() {
        let mut buf = BatchBuffer::new(3);

        buf.add(1);
        buf.add(2);
        let batch = buf.add(3).expect("full batch");

        assert_eq!(batch, vec![1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_batch_buffer_manual_flush() {
        let mut buf = BatchBuffer::new(100);

        buf.add('a');
        buf.add('b');

        assert_eq!(buf.flush(), vec!['a', 'b']);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_zero_size_acts_as_one() {
        let mut buf = BatchBuffer::new(0);
        assert_eq!(buf.add(7), Some(vec![7]));
    }
}
