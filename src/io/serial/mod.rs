// src/io/serial/mod.rs
//
// Serial transport: opening ports, line framing, and enumeration.

pub mod connection;
pub mod framer;
#[cfg(test)]
pub(crate) mod mock;
pub mod ports;
pub(crate) mod utils;

pub use connection::{LineRead, LinkOpener, SerialConnection, SerialLink, SystemOpener};
pub use framer::LineFramer;
pub use ports::{PortDescriptor, PortEnumerator, SystemEnumerator};
pub use utils::Parity;
