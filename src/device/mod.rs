// src/device/mod.rs
//
// Weather station protocol: command encoding and the typed command set.
// Incoming sentences are treated as opaque display text.

pub mod codec;
pub mod commands;

pub use commands::{validate_baud_rate, DeviceCommand, SentenceType, SUPPORTED_BAUD_RATES};
