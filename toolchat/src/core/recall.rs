//! Bounded ring of previously submitted inputs for keyboard recall.

use std::collections::VecDeque;

/// Result of a recall step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recall<'a> {
    /// Replace the input with this earlier submission.
    Entry(&'a str),
    /// Recall ended; the input should be emptied.
    Cleared,
    /// Nothing to do (empty buffer, or not currently recalling).
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct InputRecall {
    entries: VecDeque<String>,
    capacity: usize,
    /// `None` means "not recalling".
    cursor: Option<usize>,
}

impl InputRecall {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            cursor: None,
        }
    }

    /// Remember a submission and stop recalling. The oldest entry is evicted at capacity.
    pub fn push(&mut self, input: &str) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(input.to_string());
        self.cursor = None;
    }

    /// Step towards older entries, stopping at the oldest.
    pub fn older(&mut self) -> Recall<'_> {
        if self.entries.is_empty() {
            return Recall::Unchanged;
        }
        let index = match self.cursor {
            None => self.entries.len() - 1,
            Some(current) => current.saturating_sub(1),
        };
        self.cursor = Some(index);
        Recall::Entry(&self.entries[index])
    }

    /// Step towards newer entries; stepping past the newest ends recall.
    pub fn newer(&mut self) -> Recall<'_> {
        let Some(current) = self.cursor else {
            return Recall::Unchanged;
        };
        let index = current + 1;
        if index >= self.entries.len() {
            self.cursor = None;
            return Recall::Cleared;
        }
        self.cursor = Some(index);
        Recall::Entry(&self.entries[index])
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
