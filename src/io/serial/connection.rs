// src/io/serial/connection.rs
//
// One open serial device: blocking writes and a cancelable line reader.
// The link sits behind a mutex shared by the reader thread and writers;
// the short port read timeout keeps each critical section bounded.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::framer::LineFramer;
use super::utils::{line_summary, port_builder};
use crate::io::{lock_recover, IoError};
use crate::settings::SerialLineSettings;

// ============================================================================
// Transport Seams
// ============================================================================

/// Byte stream to the device. Real ports are `Box<dyn serialport::SerialPort>`.
pub trait SerialLink: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> SerialLink for T {}

/// Opens links to devices by identifier and baud rate.
pub trait LinkOpener: Send + Sync {
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>, IoError>;
}

/// Opener backed by the operating system's serial ports.
pub struct SystemOpener {
    line: SerialLineSettings,
}

impl SystemOpener {
    pub fn new(line: SerialLineSettings) -> Self {
        Self { line }
    }
}

impl LinkOpener for SystemOpener {
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>, IoError> {
        #[cfg(unix)]
        {
            if port.starts_with('/') && !std::path::Path::new(port).exists() {
                return Err(IoError::NotFound(port.to_string()));
            }
        }

        let handle = port_builder(port, baud_rate, &self.line)
            .open()
            .map_err(IoError::from)?;

        tlog!(
            "[serial] Opened {} at {} baud ({})",
            port,
            baud_rate,
            line_summary(&self.line)
        );
        Ok(Box::new(handle))
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Result of one `read_line` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    Line(String),
    /// Device closed the stream or the connection was closed locally
    EndOfStream,
    /// The cancel flag was raised
    Cancelled,
}

pub struct SerialConnection {
    port: String,
    baud_rate: AtomicU32,
    link: Mutex<Option<Box<dyn SerialLink>>>,
    framer: Mutex<LineFramer>,
    closed: AtomicBool,
}

impl SerialConnection {
    /// Open `port` at `baud_rate`.
    pub fn open(opener: &dyn LinkOpener, port: &str, baud_rate: u32) -> Result<Self, IoError> {
        let link = opener.open(port, baud_rate)?;
        Ok(Self {
            port: port.to_string(),
            baud_rate: AtomicU32::new(baud_rate),
            link: Mutex::new(Some(link)),
            framer: Mutex::new(LineFramer::default()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write all bytes and flush. Returns once the bytes are handed to the port.
    pub fn write(&self, bytes: &[u8]) -> Result<(), IoError> {
        let mut guard = lock_recover(&self.link);
        let link = guard
            .as_mut()
            .ok_or_else(|| IoError::Io(format!("{} is closed", self.port)))?;
        link.write_all(bytes)
            .and_then(|_| link.flush())
            .map_err(|e| IoError::Io(format!("Serial write error on {}: {}", self.port, e)))
    }

    /// Block until a full line arrives, the stream ends, or `cancel` is raised.
    ///
    /// The cancel flag is checked between port reads, so the latency is one
    /// port read timeout at most.
    pub fn read_line(&self, cancel: &AtomicBool) -> Result<LineRead, IoError> {
        let mut buf = [0u8; 256];

        loop {
            if let Some(line) = lock_recover(&self.framer).next_line() {
                return Ok(LineRead::Line(line));
            }

            if cancel.load(Ordering::SeqCst) {
                return Ok(LineRead::Cancelled);
            }

            let read_result = {
                let mut guard = lock_recover(&self.link);
                match guard.as_mut() {
                    Some(link) => link.read(&mut buf),
                    None => return Ok(LineRead::EndOfStream),
                }
            };

            match read_result {
                Ok(0) => {
                    // EOF - port closed/disconnected. Hand back any partial line first.
                    return Ok(match lock_recover(&self.framer).flush() {
                        Some(line) => LineRead::Line(line),
                        None => LineRead::EndOfStream,
                    });
                }
                Ok(n) => lock_recover(&self.framer).feed(&buf[..n]),
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    // Timeout is expected for serial reads
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => {
                    return Err(IoError::Io(format!("Read error on {}: {}", self.port, e)));
                }
            }
        }
    }

    /// Close the current link and open a new one at `baud_rate` on the same port.
    /// On failure the connection stays closed.
    pub fn reopen(&self, opener: &dyn LinkOpener, baud_rate: u32) -> Result<(), IoError> {
        let mut guard = lock_recover(&self.link);
        if let Some(mut old) = guard.take() {
            let _ = old.flush();
        }
        lock_recover(&self.framer).reset();

        match opener.open(&self.port, baud_rate) {
            Ok(link) => {
                *guard = Some(link);
                self.baud_rate.store(baud_rate, Ordering::SeqCst);
                self.closed.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Close the link. Idempotent; returns true only for the call that closed it.
    pub fn close(&self) -> bool {
        let link = lock_recover(&self.link).take();
        self.closed.store(true, Ordering::SeqCst);
        match link {
            Some(link) => {
                drop(link);
                tlog!("[serial] Closed {}", self.port);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::serial::mock::{MockDevice, MockOpener};
    use std::sync::Arc;
    use std::time::Instant;

    fn open(device: &MockDevice) -> SerialConnection {
        let opener = MockOpener::new(device.clone());
        SerialConnection::open(&opener, "/dev/mock0", 4800).unwrap()
    }

    #[test]
    fn test_read_lines_in_order() {
        let device = MockDevice::new();
        let conn = open(&device);
        device.emit("$WIMWV,1*00");
        device.emit("$WIMDA,2*00");
        let cancel = AtomicBool::new(false);
        assert_eq!(conn.read_line(&cancel).unwrap(), LineRead::Line("$WIMWV,1*00".into()));
        assert_eq!(conn.read_line(&cancel).unwrap(), LineRead::Line("$WIMDA,2*00".into()));
    }

    #[test]
    fn test_write_reaches_device() {
        let device = MockDevice::new();
        let conn = open(&device);
        conn.write(b"$PAMTX,1*4D\r\n").unwrap();
        assert_eq!(device.written_text(), "$PAMTX,1*4D\r\n");
    }

    #[test]
    fn test_cancel_returns_promptly() {
        let device = MockDevice::new();
        let conn = Arc::new(open(&device));
        let cancel = Arc::new(AtomicBool::new(false));

        let reader = {
            let conn = conn.clone();
            let cancel = cancel.clone();
            std::thread::spawn(move || conn.read_line(&cancel))
        };
        std::thread::sleep(Duration::from_millis(30));
        let started = Instant::now();
        cancel.store(true, Ordering::SeqCst);
        let result = reader.join().unwrap().unwrap();
        assert_eq!(result, LineRead::Cancelled);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_unplug_is_end_of_stream() {
        let device = MockDevice::new();
        let conn = open(&device);
        device.unplug();
        let cancel = AtomicBool::new(false);
        assert_eq!(conn.read_line(&cancel).unwrap(), LineRead::EndOfStream);
    }

    #[test]
    fn test_read_failure_is_io_error() {
        let device = MockDevice::new();
        let conn = open(&device);
        device.fail_reads();
        let cancel = AtomicBool::new(false);
        assert!(matches!(conn.read_line(&cancel), Err(IoError::Io(_))));
    }

    #[test]
    fn test_close_is_idempotent_and_closes_once() {
        let device = MockDevice::new();
        let conn = open(&device);
        assert!(conn.close());
        assert!(!conn.close());
        assert!(conn.is_closed());
        assert_eq!(device.close_count(), 1);
        drop(conn);
        assert_eq!(device.close_count(), 1);

        let cancel = AtomicBool::new(false);
        let conn = open(&device);
        conn.close();
        assert_eq!(conn.read_line(&cancel).unwrap(), LineRead::EndOfStream);
        assert!(matches!(conn.write(b"x"), Err(IoError::Io(_))));
    }

    #[test]
    fn test_reopen_switches_baud_on_same_port() {
        let device = MockDevice::new();
        let conn = open(&device);
        let opener = MockOpener::new(device.clone());
        conn.reopen(&opener, 38400).unwrap();
        assert_eq!(conn.baud_rate(), 38400);
        assert_eq!(conn.port(), "/dev/mock0");
        assert_eq!(device.close_count(), 1);
        assert_eq!(device.max_open_links(), 1);
        assert_eq!(device.last_open(), Some(("/dev/mock0".to_string(), 38400)));
    }

    #[test]
    fn test_open_errors_are_classified() {
        let device = MockDevice::new();
        let opener = MockOpener::new(device.clone())
            .with_missing("/dev/gone")
            .with_busy("/dev/held");
        assert!(matches!(
            SerialConnection::open(&opener, "/dev/gone", 4800),
            Err(IoError::NotFound(_))
        ));
        assert!(matches!(
            SerialConnection::open(&opener, "/dev/held", 4800),
            Err(IoError::AlreadyInUse(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_opener_missing_path() {
        let opener = SystemOpener::new(SerialLineSettings::default());
        let result = SerialConnection::open(&opener, "/dev/does-not-exist-wx200", 4800);
        assert!(matches!(result, Err(IoError::NotFound(_))));
    }
}
