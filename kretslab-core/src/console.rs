//! ## kretslab-core::console
//! **Bounded, ordered record of user-visible simulation output**
//!
//! Entries are numbered with a sequence that keeps increasing across runs,
//! so readers can poll with [`ConsoleSink::since`] and never see an entry
//! twice. When the capacity is reached the oldest entry is evicted.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONSOLE_CAPACITY: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleKind {
    Log,
    Warn,
    Error,
}

impl fmt::Display for ConsoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConsoleKind::Log => "log",
            ConsoleKind::Warn => "warn",
            ConsoleKind::Error => "error",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub sequence: u64,
    pub kind: ConsoleKind,
    pub message: String,
}

impl fmt::Display for ConsoleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

#[derive(Debug)]
pub struct ConsoleSink {
    entries: VecDeque<ConsoleEntry>,
    capacity: usize,
    next_sequence: u64,
    evicted: u64,
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CONSOLE_CAPACITY)
    }
}

impl ConsoleSink {
    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_sequence: 0,
            evicted: 0,
        }
    }

    pub fn push(&mut self, kind: ConsoleKind, message: impl Into<String>) -> u64 {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push_back(ConsoleEntry {
            sequence,
            kind,
            message: message.into(),
        });
        sequence
    }

    pub fn log(&mut self, message: impl Into<String>) -> u64 {
        self.push(ConsoleKind::Log, message)
    }

    pub fn warn(&mut self, message: impl Into<String>) -> u64 {
        self.push(ConsoleKind::Warn, message)
    }

    pub fn error(&mut self, message: impl Into<String>) -> u64 {
        self.push(ConsoleKind::Error, message)
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &ConsoleEntry> {
        self.entries.iter()
    }

    /// Retained entries with `sequence >= from`.
    pub fn since(&self, from: u64) -> impl Iterator<Item = &ConsoleEntry> {
        self.entries.iter().filter(move |e| e.sequence >= from)
    }

    pub fn last(&self) -> Option<&ConsoleEntry> {
        self.entries.back()
    }

    /// Sequence number the next entry will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops retained entries. Sequence numbering continues.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
