// src/device/commands.rs
//
// Typed command set understood by the weather station.
// Each variant maps to exactly one `PAMTC`/`PAMTX` sentence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::codec;
use crate::io::IoError;

/// Baud rates the device can be switched to.
pub const SUPPORTED_BAUD_RATES: [u32; 6] = [4800, 9600, 19200, 38400, 57600, 115200];

/// Largest sentence interval the device accepts (tenths of a second).
pub const MAX_SENTENCE_INTERVAL: u32 = 9999;

pub fn validate_baud_rate(rate: u32) -> Result<u32, IoError> {
    if SUPPORTED_BAUD_RATES.contains(&rate) {
        Ok(rate)
    } else {
        Err(IoError::Validation(format!(
            "Unsupported baud rate {} (supported: {:?})",
            rate, SUPPORTED_BAUD_RATES
        )))
    }
}

// ============================================================================
// Sentence Types
// ============================================================================

/// Sentence types whose transmission can be enabled and rate-controlled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SentenceType {
    Gga,
    Gll,
    Gsa,
    Gsv,
    Hdg,
    Hdt,
    Mda,
    Mwd,
    MwvRelative,
    MwvTrue,
    Rmc,
    Rot,
    Ths,
    Vtg,
    Vwr,
    Vwt,
    XdrA,
    XdrB,
    XdrC,
    XdrE,
    XdrT,
    Zda,
}

impl SentenceType {
    pub const ALL: [SentenceType; 22] = [
        SentenceType::Gga,
        SentenceType::Gll,
        SentenceType::Gsa,
        SentenceType::Gsv,
        SentenceType::Hdg,
        SentenceType::Hdt,
        SentenceType::Mda,
        SentenceType::Mwd,
        SentenceType::MwvRelative,
        SentenceType::MwvTrue,
        SentenceType::Rmc,
        SentenceType::Rot,
        SentenceType::Ths,
        SentenceType::Vtg,
        SentenceType::Vwr,
        SentenceType::Vwt,
        SentenceType::XdrA,
        SentenceType::XdrB,
        SentenceType::XdrC,
        SentenceType::XdrE,
        SentenceType::XdrT,
        SentenceType::Zda,
    ];

    /// Field value used in `PAMTC,EN,<type>,...`.
    pub fn code(&self) -> &'static str {
        match self {
            SentenceType::Gga => "GGA",
            SentenceType::Gll => "GLL",
            SentenceType::Gsa => "GSA",
            SentenceType::Gsv => "GSV",
            SentenceType::Hdg => "HDG",
            SentenceType::Hdt => "HDT",
            SentenceType::Mda => "MDA",
            SentenceType::Mwd => "MWD",
            SentenceType::MwvRelative => "MWVR",
            SentenceType::MwvTrue => "MWVT",
            SentenceType::Rmc => "RMC",
            SentenceType::Rot => "ROT",
            SentenceType::Ths => "THS",
            SentenceType::Vtg => "VTG",
            SentenceType::Vwr => "VWR",
            SentenceType::Vwt => "VWT",
            SentenceType::XdrA => "XDRA",
            SentenceType::XdrB => "XDRB",
            SentenceType::XdrC => "XDRC",
            SentenceType::XdrE => "XDRE",
            SentenceType::XdrT => "XDRT",
            SentenceType::Zda => "ZDA",
        }
    }
}

impl fmt::Display for SentenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for SentenceType {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        SentenceType::ALL
            .iter()
            .copied()
            .find(|t| t.code().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| IoError::Validation(format!("Unrecognised sentence type: {}", s)))
    }
}

impl TryFrom<String> for SentenceType {
    type Error = IoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SentenceType> for String {
    fn from(value: SentenceType) -> Self {
        value.code().to_string()
    }
}

// ============================================================================
// Commands
// ============================================================================

/// One outgoing instruction. Constructed, encoded, written, discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// `PAMTX,1` - resume periodic transmissions
    StartTransmissions,
    /// `PAMTX,0` - suspend periodic transmissions
    StopTransmissions,
    /// `PAMTC,BAUD,<rate>`
    SetBaud(u32),
    /// `PAMTC,EN,<type>,<0|1>,<interval>`
    /// `rate: None` leaves the interval unchanged, `Some(0)` disables the sentence.
    SetSentence {
        sentence: SentenceType,
        rate: Option<u32>,
    },
    /// `PAMTC,EN,ALL,<0|1>`
    EnableAllSentences(bool),
    /// `PAMTC,OPTION,HEATERCTRL,<0|1>`
    HeaterControl(bool),
}

fn flag(on: bool) -> Option<String> {
    Some(if on { "1" } else { "0" }.to_string())
}

impl DeviceCommand {
    /// Build a sentence-rate command, checking the interval bound.
    pub fn set_sentence(sentence: SentenceType, rate: Option<u32>) -> Result<Self, IoError> {
        if let Some(r) = rate {
            if r > MAX_SENTENCE_INTERVAL {
                return Err(IoError::Validation(format!(
                    "Sentence interval {} exceeds {}",
                    r, MAX_SENTENCE_INTERVAL
                )));
            }
        }
        Ok(DeviceCommand::SetSentence { sentence, rate })
    }

    pub fn verb(&self) -> &'static str {
        match self {
            DeviceCommand::StartTransmissions | DeviceCommand::StopTransmissions => "PAMTX",
            _ => "PAMTC",
        }
    }

    pub fn args(&self) -> Vec<Option<String>> {
        match self {
            DeviceCommand::StartTransmissions => vec![flag(true)],
            DeviceCommand::StopTransmissions => vec![flag(false)],
            DeviceCommand::SetBaud(rate) => vec![Some("BAUD".to_string()), Some(rate.to_string())],
            DeviceCommand::SetSentence { sentence, rate } => {
                let enabled = *rate != Some(0);
                let interval = match rate {
                    Some(r) if *r > 0 => Some(r.to_string()),
                    _ => None,
                };
                vec![
                    Some("EN".to_string()),
                    Some(sentence.code().to_string()),
                    flag(enabled),
                    interval,
                ]
            }
            DeviceCommand::EnableAllSentences(on) => {
                vec![Some("EN".to_string()), Some("ALL".to_string()), flag(*on)]
            }
            DeviceCommand::HeaterControl(on) => vec![
                Some("OPTION".to_string()),
                Some("HEATERCTRL".to_string()),
                flag(*on),
            ],
        }
    }

    /// Encode to wire bytes, checksum and terminator included.
    pub fn encode(&self) -> Result<Vec<u8>, IoError> {
        codec::encode(self.verb(), &self.args())
    }
}
