/// Bounded, timestamped log of supervisor and Tor output

use darkmsg_common::TimestampMillis;
use std::collections::VecDeque;

/// Ring buffer of `[millis] message` entries; the oldest entry is evicted
/// once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<String>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message stamped with the current time and return the stored entry
    pub fn push(&mut self, message: &str) -> &str {
        self.push_at(TimestampMillis::now(), message)
    }

    pub fn push_at(&mut self, at: TimestampMillis, message: &str) -> &str {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(format!("[{}] {}", at, message));
        self.entries.back().map(String::as_str).unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
