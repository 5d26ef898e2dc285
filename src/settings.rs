// src/settings.rs
//
// Persistent bridge settings, stored as TOML in the user config directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::broadcast::DEFAULT_SUBSCRIBER_QUEUE;
use crate::io::serial::Parity;
use crate::terminal_log::TERMINAL_LOG_CAPACITY;

const SETTINGS_DIR_NAME: &str = "wx200-bridge";
const SETTINGS_FILE_NAME: &str = "settings.toml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BridgeSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_port")]
    pub default_port: String,
    #[serde(default = "default_baud")]
    pub default_baud: u32,
    /// Directory for log files (file logging disabled when unset)
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default)]
    pub connect_on_startup: bool,
    #[serde(default)]
    pub serial: SerialLineSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

/// Line framing for the local serial port
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SerialLineSettings {
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    /// Port timeout. Bounds how quickly a blocked reader notices cancellation.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Wait after a baud command before and after switching the local port
    #[serde(default = "default_baud_settle_ms")]
    pub baud_settle_ms: u64,
    /// Gap between consecutive commands in multi-command sequences
    #[serde(default = "default_command_spacing_ms")]
    pub command_spacing_ms: u64,
    #[serde(default = "default_true")]
    pub quiesce_on_baud_change: bool,
    #[serde(default = "default_true")]
    pub restore_default_baud_on_disconnect: bool,
    #[serde(default = "default_true")]
    pub clear_history_on_connect: bool,
    #[serde(default)]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,
    /// Tries at hearing the station after a baud change; 0 skips the check
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,
    #[serde(default = "default_verify_interval_ms")]
    pub verify_interval_ms: u64,
    /// Also require a sentence from the station before a connect succeeds
    #[serde(default)]
    pub verify_on_connect: bool,
}

fn default_listen_addr() -> String {
    "0.0.0.0:6567".to_string()
}
fn default_port() -> String {
    if cfg!(windows) {
        "COM1".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}
fn default_baud() -> u32 {
    4800 // station factory setting
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_read_timeout_ms() -> u64 {
    50
}
fn default_history_capacity() -> usize {
    TERMINAL_LOG_CAPACITY
}
fn default_subscriber_queue() -> usize {
    DEFAULT_SUBSCRIBER_QUEUE
}
fn default_heartbeat_interval_secs() -> u64 {
    15
}
fn default_baud_settle_ms() -> u64 {
    2000
}
fn default_command_spacing_ms() -> u64 {
    100
}
fn default_reconnect_interval_secs() -> u64 {
    5
}
fn default_verify_attempts() -> u32 {
    3
}
fn default_verify_interval_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            default_port: default_port(),
            default_baud: default_baud(),
            log_dir: None,
            connect_on_startup: false,
            serial: SerialLineSettings::default(),
            session: SessionSettings::default(),
        }
    }
}

impl Default for SerialLineSettings {
    fn default() -> Self {
        Self {
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            subscriber_queue: default_subscriber_queue(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            baud_settle_ms: default_baud_settle_ms(),
            command_spacing_ms: default_command_spacing_ms(),
            quiesce_on_baud_change: true,
            restore_default_baud_on_disconnect: true,
            clear_history_on_connect: true,
            auto_reconnect: false,
            reconnect_interval_secs: default_reconnect_interval_secs(),
            verify_attempts: default_verify_attempts(),
            verify_interval_ms: default_verify_interval_ms(),
            verify_on_connect: false,
        }
    }
}

impl SessionSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn baud_settle(&self) -> Duration {
        Duration::from_millis(self.baud_settle_ms)
    }

    pub fn command_spacing(&self) -> Duration {
        Duration::from_millis(self.command_spacing_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs.max(1))
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_millis(self.verify_interval_ms.max(1))
    }
}

/// `<config_dir>/wx200-bridge/settings.toml`
pub fn default_settings_path() -> Result<PathBuf, String> {
    let config_dir =
        dirs::config_dir().ok_or_else(|| "Failed to get config dir".to_string())?;
    Ok(config_dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Load settings from `path` (or the default location). The first load
/// writes the defaults so there is a file to edit.
pub fn load_settings(path: Option<&Path>) -> Result<BridgeSettings, String> {
    let settings_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_settings_path()?,
    };

    if settings_path.exists() {
        let content = std::fs::read_to_string(&settings_path)
            .map_err(|e| format!("Failed to read settings: {}", e))?;

        toml::from_str(&content).map_err(|e| format!("Failed to parse settings: {}", e))
    } else {
        // First run: create default settings
        let settings = BridgeSettings::default();
        save_settings(&settings_path, &settings)?;
        tlog!("[settings] Wrote defaults to {}", settings_path.display());
        Ok(settings)
    }
}

pub fn save_settings(path: &Path, settings: &BridgeSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config dir: {}", e))?;
    }

    let content = toml::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    std::fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings, BridgeSettings::default());
        assert!(path.exists());

        let again = load_settings(Some(&path)).unwrap();
        assert_eq!(again, settings);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "default_port = \"/dev/ttyS3\"\n\n[session]\nauto_reconnect = true\nbaud_settle_ms = 0\n",
        )
        .unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.default_port, "/dev/ttyS3");
        assert_eq!(settings.default_baud, 4800);
        assert!(settings.session.auto_reconnect);
        assert_eq!(settings.session.baud_settle_ms, 0);
        assert_eq!(settings.session.history_capacity, 1000);
        assert_eq!(settings.session.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(settings.session.verify_attempts, 3);
        assert!(!settings.session.verify_on_connect);
        assert_eq!(settings.serial, SerialLineSettings::default());
    }

    #[test]
    fn test_save_round_trip_with_parity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut settings = BridgeSettings::default();
        settings.serial.parity = Parity::Even;
        settings.log_dir = Some("/tmp/wx200-logs".to_string());
        save_settings(&path, &settings).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("parity = \"even\""));
        assert_eq!(load_settings(Some(&path)).unwrap(), settings);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "default_baud = \"fast\"").unwrap();
        let err = load_settings(Some(&path)).unwrap_err();
        assert!(err.starts_with("Failed to parse settings"));
    }
}
