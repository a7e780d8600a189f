//! Bounded connection log shown on the status page.

use chrono::Local;
use std::collections::VecDeque;

/// Entries retained in memory.
pub const LOG_CAPACITY: usize = 50;

/// Entries exposed through a status snapshot.
pub const SNAPSHOT_LOG_LINES: usize = 10;

/// Severity of a connection log line; also picks the tracing level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Ring buffer of timestamped lines, newest first.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<String>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(LOG_CAPACITY)
    }
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Stamp `message` with the local wall-clock time and store it at the
    /// front, evicting the oldest entry when over capacity.
    pub fn push(&mut self, message: &str) {
        let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), message);
        self.entries.push_front(line);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Up to `n` most recent lines, newest first.
    pub fn recent(&self, n: usize) -> Vec<String> {
        self.entries.iter().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
