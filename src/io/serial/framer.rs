// src/io/serial/framer.rs
//
// Line framing for the serial byte stream.
// Splits on LF, strips a trailing CR, and force-splits runaway lines.

use std::collections::VecDeque;

/// Line delimiter used by the device.
pub const LINE_DELIMITER: u8 = b'\n';

/// Lines longer than this are split even without a delimiter.
/// NMEA caps sentences at 82 characters; this leaves room for chatty firmware.
pub const MAX_LINE_LENGTH: usize = 1024;

pub struct LineFramer {
    buffer: Vec<u8>,
    ready: VecDeque<String>,
    max_length: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

impl LineFramer {
    pub fn new(max_length: usize) -> Self {
        LineFramer {
            buffer: Vec::new(),
            ready: VecDeque::new(),
            max_length: max_length.max(1),
        }
    }

    fn push_line(&mut self, mut bytes: Vec<u8>) {
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        if bytes.is_empty() {
            return;
        }
        self.ready
            .push_back(String::from_utf8_lossy(&bytes).into_owned());
    }

    /// Feed bytes read from the port. Completed lines queue up for `next_line`.
    pub fn feed(&mut self, data: &[u8]) {
        for &byte in data {
            if byte == LINE_DELIMITER {
                let line = std::mem::take(&mut self.buffer);
                self.push_line(line);
                continue;
            }

            self.buffer.push(byte);

            if self.buffer.len() >= self.max_length {
                let line = std::mem::take(&mut self.buffer);
                self.push_line(line);
            }
        }
    }

    /// Oldest completed line, if any.
    pub fn next_line(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    /// Return whatever partial line is buffered (end of stream).
    pub fn flush(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        self.push_line(line);
        self.ready.pop_front()
    }

    /// Discard buffered bytes and pending lines (baud change garbles both).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.ready.clear();
    }
}
