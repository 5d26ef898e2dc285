// src/io/serial/mock.rs
//
// In-memory device for tests. Reads behave like a serial port with a short
// timeout: queued bytes when present, otherwise a brief wait and TimedOut.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::connection::{LinkOpener, SerialLink};
use crate::io::{lock_recover, IoError};

#[derive(Default)]
struct MockState {
    rx: VecDeque<u8>,
    written: Vec<u8>,
    opens: Vec<(String, u32)>,
    closes: usize,
    open_links: usize,
    max_open_links: usize,
    eof: bool,
    fail_reads: bool,
    replies: Vec<(String, String)>,
}

impl MockState {
    fn queue_line(&mut self, line: &str) {
        self.rx.extend(line.as_bytes());
        self.rx.extend(b"\r\n");
    }
}

/// Shared handle to the simulated station.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock_recover(&self.state)
    }

    /// Queue one CRLF-terminated line for the host to read.
    pub fn emit(&self, line: &str) {
        self.lock().queue_line(line);
    }

    /// Answer with `reply` whenever the host writes something containing
    /// `trigger`.
    pub fn reply_to(&self, trigger: &str, reply: &str) {
        self.lock()
            .replies
            .push((trigger.to_string(), reply.to_string()));
    }

    /// Everything the host has written, lossily decoded.
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.lock().written).into_owned()
    }

    /// Host-written bytes split into lines.
    pub fn written_lines(&self) -> Vec<String> {
        self.written_text()
            .split("\r\n")
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn clear_written(&self) {
        self.lock().written.clear();
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens.len()
    }

    pub fn max_open_links(&self) -> usize {
        self.lock().max_open_links
    }

    pub fn last_open(&self) -> Option<(String, u32)> {
        self.lock().opens.last().cloned()
    }

    /// Simulate the cable being pulled: further reads report end of stream.
    pub fn unplug(&self) {
        self.lock().eof = true;
    }

    /// Make further reads fail with a hard I/O error.
    pub fn fail_reads(&self) {
        self.lock().fail_reads = true;
    }

    /// Undo `unplug` and `fail_reads` (device comes back).
    pub fn replug(&self) {
        let mut state = self.lock();
        state.eof = false;
        state.fail_reads = false;
    }
}

pub struct MockLink {
    device: MockDevice,
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.device.lock();
            if state.fail_reads {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device went away"));
            }
            if state.eof && state.rx.is_empty() {
                return Ok(0);
            }
            if !state.rx.is_empty() {
                let n = buf.len().min(state.rx.len());
                for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        std::thread::sleep(Duration::from_millis(5));
        Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"))
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.device.lock();
        state.written.extend_from_slice(buf);
        let text = String::from_utf8_lossy(buf).into_owned();
        let answers: Vec<String> = state
            .replies
            .iter()
            .filter(|(trigger, _)| text.contains(trigger.as_str()))
            .map(|(_, reply)| reply.clone())
            .collect();
        for answer in answers {
            state.queue_line(&answer);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        let mut state = self.device.lock();
        state.closes += 1;
        state.open_links = state.open_links.saturating_sub(1);
    }
}

/// Opener handing out `MockLink`s to one device.
pub struct MockOpener {
    device: MockDevice,
    missing: Vec<String>,
    busy: Vec<String>,
    refused_bauds: Vec<u32>,
}

impl MockOpener {
    pub fn new(device: MockDevice) -> Self {
        Self {
            device,
            missing: Vec::new(),
            busy: Vec::new(),
            refused_bauds: Vec::new(),
        }
    }

    pub fn with_missing(mut self, port: &str) -> Self {
        self.missing.push(port.to_string());
        self
    }

    pub fn with_busy(mut self, port: &str) -> Self {
        self.busy.push(port.to_string());
        self
    }

    /// Opens at this rate fail with an I/O error.
    pub fn with_refused_baud(mut self, baud_rate: u32) -> Self {
        self.refused_bauds.push(baud_rate);
        self
    }
}

impl LinkOpener for MockOpener {
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>, IoError> {
        if self.missing.iter().any(|p| p == port) {
            return Err(IoError::NotFound(port.to_string()));
        }
        if self.busy.iter().any(|p| p == port) {
            return Err(IoError::AlreadyInUse(port.to_string()));
        }
        if self.refused_bauds.contains(&baud_rate) {
            return Err(IoError::Io(format!("{} refused {} baud", port, baud_rate)));
        }

        let mut state = self.device.lock();
        state.opens.push((port.to_string(), baud_rate));
        state.open_links += 1;
        state.max_open_links = state.max_open_links.max(state.open_links);
        drop(state);

        Ok(Box::new(MockLink {
            device: self.device.clone(),
        }))
    }
}
