// src/logging.rs
//
// Timestamped stderr logging with an optional mirror to a log file.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Mirror target for `tlog!`. `None` until `init_file_logging` succeeds.
static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);

const LOG_LINK_NAME: &str = "wx200-bridge.log";

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::logging::emit(format_args!($($arg)*))
    };
}

fn log_file() -> MutexGuard<'static, Option<File>> {
    crate::io::lock_recover(&LOG_FILE)
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Write one message to stderr and the log file. Used by `tlog!`.
pub(crate) fn emit(args: std::fmt::Arguments<'_>) {
    let line = format!("{} {}", timestamp(), args);
    eprintln!("{}", line);
    if let Some(file) = log_file().as_mut() {
        let _ = writeln!(file, "{}", line);
    }
}

/// Point `wx200-bridge.log` at the newest log (Unix only).
#[cfg(unix)]
fn update_log_link(log_dir: &Path, filename: &str) {
    let link = log_dir.join(LOG_LINK_NAME);
    let _ = std::fs::remove_file(&link);
    if let Err(e) = std::os::unix::fs::symlink(filename, &link) {
        eprintln!("{} [logging] Failed to link {}: {}", timestamp(), LOG_LINK_NAME, e);
    }
}

#[cfg(not(unix))]
fn update_log_link(_log_dir: &Path, _filename: &str) {}

/// Start mirroring `tlog!` output to `<log_dir>/YYYYMMDD-HHMMSS-wx200-bridge.log`.
/// Returns the path of the new file.
pub fn init_file_logging(log_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log dir: {}", e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-wx200-bridge.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    update_log_link(log_dir, &filename);
    *log_file() = Some(file);

    tlog!("[logging] File logging started: {}", log_path.display());
    Ok(log_path)
}

/// Stop mirroring to the log file and close it.
pub fn stop_file_logging() {
    if log_file().take().is_some() {
        eprintln!("{} [logging] File logging stopped", timestamp());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_writes_and_links() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_file_logging(dir.path()).unwrap();
        tlog!("[test] hello from the logger");
        stop_file_logging();

        assert!(path.starts_with(dir.path()));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[logging] File logging started"));
        assert!(content.contains("[test] hello from the logger"));

        #[cfg(unix)]
        assert_eq!(
            std::fs::read_link(dir.path().join(LOG_LINK_NAME)).unwrap(),
            PathBuf::from(path.file_name().unwrap())
        );
    }
}
