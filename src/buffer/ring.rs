//! Thread-safe bounded circular store of log entries.
//!
//! The ring owns a fixed slab of slots and never grows. Once full, each push
//! overwrites the oldest entry and bumps the drop counter, so the buffer is a
//! sliding window over the most recent traffic. One internal mutex makes
//! every public operation linearizable; readers copy and format while holding
//! the lock, then release before returning, so the lock is never held across
//! I/O.

use parking_lot::Mutex;

use crate::buffer::entry::{LogEntry, sanitize};
use crate::query::QueryRequest;
use crate::query::eval::entry_matches;
use crate::utils::error::{Result, ServerError};
use crate::utils::time;

/// Counter snapshot returned by [`LogBuffer::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStats {
    /// Entries currently live in the ring.
    pub size: usize,
    /// Every successful push since startup, including replayed entries.
    pub total_logs: u64,
    /// Pushes that overwrote an older entry.
    pub dropped_logs: u64,
}

struct Ring {
    slots: Box<[Option<LogEntry>]>,
    /// Next write position.
    head: usize,
    size: usize,
    total_logs: u64,
    dropped_logs: u64,
}

impl Ring {
    fn push(&mut self, entry: LogEntry) {
        let capacity = self.slots.len();
        let evicted = self.slots[self.head].replace(entry);
        self.head = (self.head + 1) % capacity;
        if evicted.is_some() {
            self.dropped_logs += 1;
        } else {
            self.size += 1;
        }
        self.total_logs += 1;
    }

    /// Visit live entries oldest first.
    fn for_each(&self, mut visit: impl FnMut(&LogEntry)) {
        let capacity = self.slots.len();
        let start = (self.head + capacity - self.size) % capacity;
        for offset in 0..self.size {
            if let Some(entry) = &self.slots[(start + offset) % capacity] {
                visit(entry);
            }
        }
    }
}

/// Thread-safe bounded FIFO of `(timestamp, message)` entries.
pub struct LogBuffer {
    inner: Mutex<Ring>,
}

impl LogBuffer {
    /// Allocate a buffer holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Zero capacity is rejected with `ServerError::InvalidConfig`.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ServerError::InvalidConfig(
                "buffer capacity must be positive".to_string(),
            ));
        }
        let slots = std::iter::repeat_with(|| None)
            .take(capacity)
            .collect::<Box<[Option<LogEntry>]>>();
        Ok(LogBuffer {
            inner: Mutex::new(Ring {
                slots,
                head: 0,
                size: 0,
                total_logs: 0,
                dropped_logs: 0,
            }),
        })
    }

    /// Normalize and store one line with the given timestamp, overwriting the
    /// oldest entry when the ring is full.
    ///
    /// Returns a copy of the message as stored, which downstream consumers
    /// (persistence, IRC fan-out) use so normalization happens exactly once.
    pub fn push(&self, raw: &[u8], timestamp: i64) -> String {
        let message = sanitize(raw);
        let entry = LogEntry {
            message: message.clone(),
            timestamp,
        };
        self.inner.lock().push(entry);
        message
    }

    /// `push` with the current wall-clock second.
    pub fn push_now(&self, raw: &[u8]) -> (String, i64) {
        let timestamp = time::now();
        (self.push(raw, timestamp), timestamp)
    }

    /// Number of currently live entries.
    pub fn count(&self) -> usize {
        self.inner.lock().size
    }

    /// Fixed capacity chosen at construction.
    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Counter snapshot: `(size, total_logs, dropped_logs)`.
    pub fn stats(&self) -> BufferStats {
        let ring = self.inner.lock();
        BufferStats {
            size: ring.size,
            total_logs: ring.total_logs,
            dropped_logs: ring.dropped_logs,
        }
    }

    /// Owned copies of all live messages, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        let ring = self.inner.lock();
        let mut messages = Vec::with_capacity(ring.size);
        ring.for_each(|entry| messages.push(entry.message.clone()));
        messages
    }

    /// Substring search over live messages, oldest first.
    pub fn search_keyword(&self, keyword: &str) -> Vec<String> {
        let ring = self.inner.lock();
        let mut matches = Vec::new();
        ring.for_each(|entry| {
            if entry.message.contains(keyword) {
                matches.push(entry.message.clone());
            }
        });
        matches
    }

    /// Evaluate a parsed query against every live entry, oldest first.
    ///
    /// Matching entries are returned formatted as
    /// `[YYYY-MM-DD HH:MM:SS] <message>`. Formatting happens under the lock
    /// to pin each entry's timestamp to its message.
    pub fn execute(&self, request: &QueryRequest) -> Vec<String> {
        let ring = self.inner.lock();
        let mut results = Vec::new();
        ring.for_each(|entry| {
            if entry_matches(request, &entry.message, entry.timestamp) {
                results.push(format!(
                    "[{}] {}",
                    time::format_timestamp(entry.timestamp),
                    entry.message
                ));
            }
        });
        results
    }
}
