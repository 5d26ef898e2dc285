// src/terminal_log.rs
//
// Bounded, ordered history of terminal lines.
// Insertion order is arrival order is display order; the oldest line is
// evicted once the capacity is reached. Readers always receive a copy.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::checksums::verify_sentence;
use crate::io::{lock_recover, now_us};

/// Maximum number of lines kept in the history.
pub const TERMINAL_LOG_CAPACITY: usize = 1000;

// ============================================================================
// Types
// ============================================================================

/// Which way a line travelled, used only for display framing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Received from the device
    Incoming,
    /// Operator command echo
    Outgoing,
    /// Bridge notice (link lost, etc.)
    Info,
}

/// One unit of displayed text
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalLine {
    /// Position in arrival order, assigned when the line is appended
    pub seq: u64,
    /// Host UNIX timestamp in microseconds
    pub timestamp_us: u64,
    pub direction: Direction,
    /// Raw line content, terminator stripped
    pub text: String,
    /// Checksum verdict for `$...*XX` sentences, `None` for anything else
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checksum_valid: Option<bool>,
}

impl TerminalLine {
    pub fn new(direction: Direction, text: impl Into<String>) -> Self {
        let text = text.into();
        let checksum_valid = match direction {
            Direction::Incoming => verify_sentence(&text),
            _ => None,
        };
        Self {
            seq: 0,
            timestamp_us: now_us(),
            direction,
            text,
            checksum_valid,
        }
    }

    pub fn incoming(text: impl Into<String>) -> Self {
        Self::new(Direction::Incoming, text)
    }

    pub fn outgoing(text: impl Into<String>) -> Self {
        Self::new(Direction::Outgoing, text)
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(Direction::Info, text)
    }

    /// `HH:MM:SS.mmm <marker> text` in local time, as shown in the terminal.
    pub fn display(&self) -> String {
        let marker = match self.direction {
            Direction::Incoming => "<",
            Direction::Outgoing => ">",
            Direction::Info => "#",
        };
        let time = chrono::DateTime::from_timestamp_micros(self.timestamp_us as i64)
            .map(|t| {
                t.with_timezone(&chrono::Local)
                    .format("%H:%M:%S%.3f")
                    .to_string()
            })
            .unwrap_or_else(|| "--:--:--.---".to_string());
        format!("{} {} {}", time, marker, self.text)
    }
}

// ============================================================================
// Terminal Log
// ============================================================================

struct LogState {
    lines: VecDeque<TerminalLine>,
    next_seq: u64,
}

pub struct TerminalLog {
    state: Mutex<LogState>,
    capacity: usize,
}

impl Default for TerminalLog {
    fn default() -> Self {
        Self::new(TERMINAL_LOG_CAPACITY)
    }
}

impl TerminalLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(LogState {
                lines: VecDeque::with_capacity(capacity),
                next_seq: 1,
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        lock_recover(&self.state)
    }

    /// Append a line, evicting from the front first so the size never
    /// exceeds the capacity. Returns the stored line with its sequence number.
    pub fn append(&self, mut line: TerminalLine) -> TerminalLine {
        let mut state = self.lock();
        line.seq = state.next_seq;
        state.next_seq += 1;
        while state.lines.len() >= self.capacity {
            state.lines.pop_front();
        }
        state.lines.push_back(line.clone());
        line
    }

    /// Copy of the current history, oldest first.
    pub fn snapshot(&self) -> Vec<TerminalLine> {
        self.lock().lines.iter().cloned().collect()
    }

    /// Copy of the current history as plain text, oldest first.
    pub fn snapshot_text(&self) -> Vec<String> {
        self.lock().lines.iter().map(|l| l.text.clone()).collect()
    }

    /// Drop all lines. Sequence numbers keep increasing.
    pub fn clear(&self) {
        self.lock().lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============================================================================
// Tests
// ============================================================================
