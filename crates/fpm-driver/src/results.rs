//! Result buffer: products of the current batch, read back in order.

use crate::error::{FpmError, Result};

/// Bounded FIFO of result words with a read cursor
#[derive(Debug, Clone)]
pub struct ResultBuffer {
    entries: Vec<u32>,
    capacity: usize,
    cursor: usize,
}

impl ResultBuffer {
    /// Buffer for at most `capacity` results per batch
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    /// Append a produced result
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the batch already holds `capacity` results.
    pub fn push(&mut self, word: u32) -> Result<()> {
        if self.entries.len() >= self.capacity {
            return Err(FpmError::invalid_state(format!(
                "result buffer already holds {} results",
                self.capacity
            )));
        }
        self.entries.push(word);
        Ok(())
    }

    /// Next unread result and its index within the batch
    pub fn next(&mut self) -> Option<(usize, u32)> {
        let word = *self.entries.get(self.cursor)?;
        let index = self.cursor;
        self.cursor += 1;
        Some((index, word))
    }

    /// Results produced in this batch
    pub fn produced(&self) -> usize {
        self.entries.len()
    }

    /// Results produced but not yet read
    pub fn unread(&self) -> usize {
        self.entries.len() - self.cursor
    }

    /// Whether the batch has reached capacity
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Start a fresh batch
    pub fn reset(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }
}
