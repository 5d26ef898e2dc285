// src/io/serial/utils.rs
//
// Mapping from line settings to the serialport crate's builder.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, SerialPortBuilder, StopBits};
use std::time::Duration;

use crate::settings::SerialLineSettings;

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    /// Single-letter form used in `8N1` style summaries
    pub fn letter(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

pub fn to_serialport_parity(p: Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Unknown counts fall back to 8 data bits.
pub fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

pub fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

/// Builder for `port` at `baud_rate` with the configured framing and read timeout.
/// The read timeout bounds how long a reader can go without checking its cancel flag.
pub fn port_builder(port: &str, baud_rate: u32, line: &SerialLineSettings) -> SerialPortBuilder {
    serialport::new(port, baud_rate)
        .data_bits(to_serialport_data_bits(line.data_bits))
        .stop_bits(to_serialport_stop_bits(line.stop_bits))
        .parity(to_serialport_parity(line.parity))
        .timeout(Duration::from_millis(line.read_timeout_ms.max(1)))
}

/// `8N1` style summary for log lines.
pub fn line_summary(line: &SerialLineSettings) -> String {
    format!("{}{}{}", line.data_bits, line.parity.letter(), line.stop_bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_default() {
        assert_eq!(Parity::default(), Parity::None);
    }

    #[test]
    fn test_to_serialport_parity() {
        assert!(matches!(to_serialport_parity(Parity::None), SpParity::None));
        assert!(matches!(to_serialport_parity(Parity::Odd), SpParity::Odd));
        assert!(matches!(to_serialport_parity(Parity::Even), SpParity::Even));
    }

    #[test]
    fn test_data_and_stop_bits_fallbacks() {
        assert!(matches!(to_serialport_data_bits(7), DataBits::Seven));
        assert!(matches!(to_serialport_data_bits(9), DataBits::Eight));
        assert!(matches!(to_serialport_stop_bits(2), StopBits::Two));
        assert!(matches!(to_serialport_stop_bits(0), StopBits::One));
    }

    #[test]
    fn test_line_summary() {
        let line = SerialLineSettings::default();
        assert_eq!(line_summary(&line), "8N1");
        let odd = SerialLineSettings {
            data_bits: 7,
            parity: Parity::Odd,
            stop_bits: 2,
            ..SerialLineSettings::default()
        };
        assert_eq!(line_summary(&odd), "7O2");
    }
}
