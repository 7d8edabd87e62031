//! Pending queue: operand words of the current batch, consumed in pairs.
//!
//! Words stay in the queue after the pipeline consumes them; the batch is
//! only cleared when the reader has drained every result. Capacity is
//! therefore a per-batch limit of `2 * N` words.

use crate::error::{FpmError, Result};

/// Bounded FIFO of operand words
#[derive(Debug, Clone)]
pub struct PendingQueue {
    words: Vec<u32>,
    capacity: usize,
    consumed: usize,
}

impl PendingQueue {
    /// Queue holding at most `capacity` words
    pub fn new(capacity: usize) -> Self {
        Self {
            words: Vec::with_capacity(capacity),
            capacity,
            consumed: 0,
        }
    }

    /// Append a request's operand words, all or nothing
    ///
    /// Rejected once the batch is one word short of capacity, or if the
    /// request would not fit.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` without touching the queue, or `MalformedRequest`
    /// if `words` is not a whole number of pairs.
    pub fn try_enqueue(&mut self, words: &[u32]) -> Result<()> {
        if words.is_empty() || words.len() % 2 != 0 {
            return Err(FpmError::malformed_request(format!(
                "{} operand word(s) is not a whole number of pairs",
                words.len()
            )));
        }

        let queued = self.words.len();
        if queued + 1 >= self.capacity || queued + words.len() > self.capacity {
            return Err(FpmError::QueueFull {
                queued,
                capacity: self.capacity,
            });
        }

        self.words.extend_from_slice(words);
        Ok(())
    }

    /// Take the next unconsumed pair
    pub fn next_pair(&mut self) -> Option<(u32, u32)> {
        let pair = self.words.get(self.consumed..self.consumed + 2)?;
        let pair = (pair[0], pair[1]);
        self.consumed += 2;
        Some(pair)
    }

    /// Words queued in this batch, consumed or not
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether nothing was queued in this batch
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Pairs still waiting for the pipeline
    pub fn outstanding_pairs(&self) -> usize {
        (self.words.len() - self.consumed) / 2
    }

    /// Whether the next request of any size would be rejected
    pub fn is_full(&self) -> bool {
        self.words.len() + 1 >= self.capacity
    }

    /// Start a fresh batch
    pub fn reset(&mut self) {
        self.words.clear();
        self.consumed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_come_out_in_order() {
        let mut queue = PendingQueue::new(10);
        queue.try_enqueue(&[1, 2]).unwrap();
        queue.try_enqueue(&[3, 4, 5, 6]).unwrap();

        assert_eq!(queue.next_pair(), Some((1, 2)));
        assert_eq!(queue.next_pair(), Some((3, 4)));
        assert_eq!(queue.outstanding_pairs(), 1);
        assert_eq!(queue.next_pair(), Some((5, 6)));
        assert_eq!(queue.next_pair(), None);
        assert_eq!(queue.outstanding_pairs(), 0);
        assert_eq!(queue.len(), 6);
    }

    #[test]
    fn full_batch_rejects_without_change() {
        let mut queue = PendingQueue::new(10);
        for i in 0..5 {
            queue.try_enqueue(&[i, i]).unwrap();
        }
        assert!(queue.is_full());

        let err = queue.try_enqueue(&[9, 9]).unwrap_err();
        assert!(matches!(err, FpmError::QueueFull { queued: 10, capacity: 10 }));
        assert_eq!(queue.len(), 10);
    }

    #[test]
    fn oversized_request_is_rejected_whole() {
        let mut queue = PendingQueue::new(10);
        queue.try_enqueue(&[1, 1, 2, 2, 3, 3, 4, 4]).unwrap();
        assert!(queue.try_enqueue(&[5, 5, 6, 6]).is_err());
        assert_eq!(queue.len(), 8);
        queue.try_enqueue(&[5, 5]).unwrap();
    }

    #[test]
    fn odd_word_count_is_malformed() {
        let mut queue = PendingQueue::new(10);
        assert!(matches!(
            queue.try_enqueue(&[1, 2, 3]),
            Err(FpmError::MalformedRequest { .. })
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn reset_starts_a_new_batch() {
        let mut queue = PendingQueue::new(4);
        queue.try_enqueue(&[1, 2, 3, 4]).unwrap();
        queue.next_pair();
        queue.reset();
        assert!(queue.is_empty());
        assert_eq!(queue.outstanding_pairs(), 0);
        queue.try_enqueue(&[7, 8]).unwrap();
        assert_eq!(queue.outstanding_pairs(), 1);
        assert_eq!(queue.next_pair(), Some((7, 8)));
    }
}
