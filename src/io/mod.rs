// src/io/mod.rs
//
// Transport layer for the weather station link.
// The session manager only sees `SerialConnection` and the opener seam, so
// tests run against an in-memory device.

mod error;
pub mod serial;

pub use error::IoError;

use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Lock a std mutex, taking the data back from a panicked holder.
pub fn lock_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
