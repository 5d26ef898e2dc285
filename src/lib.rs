// src/lib.rs
//
// Serial session and terminal streaming bridge for WX-series weather stations.
// The binary only calls `run()`; everything else lives in the library.

#[macro_use]
mod logging;

pub mod api;
pub mod broadcast;
pub mod checksums;
pub mod device;
pub mod io;
pub mod server;
pub mod sessions;
pub mod settings;
pub mod terminal_log;

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use io::serial::{SystemEnumerator, SystemOpener};
use sessions::SessionManager;

// ============================================================================
// Command Line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "wx200-bridge", version, about)]
pub struct Args {
    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// WebSocket listen address, e.g. 127.0.0.1:6567
    #[arg(long)]
    pub listen: Option<String>,
    /// Serial port for startup and for connect requests that name no port
    #[arg(long)]
    pub port: Option<String>,
    /// Default baud rate
    #[arg(long)]
    pub baud: Option<u32>,
    /// Write a log file to this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    fn apply(&self, settings: &mut settings::BridgeSettings) {
        if let Some(listen) = &self.listen {
            settings.listen_addr = listen.clone();
        }
        if let Some(port) = &self.port {
            settings.default_port = port.clone();
        }
        if let Some(baud) = self.baud {
            settings.default_baud = baud;
        }
        if let Some(dir) = &self.log_dir {
            settings.log_dir = Some(dir.to_string_lossy().to_string());
        }
    }
}

// ============================================================================
// Bootstrap
// ============================================================================

/// Parse the command line, start the bridge, and serve until Ctrl-C.
pub async fn run() -> Result<(), String> {
    let args = Args::parse();

    let mut settings = settings::load_settings(args.config.as_deref())?;
    args.apply(&mut settings);
    device::validate_baud_rate(settings.default_baud).map_err(|e| e.to_string())?;

    if let Some(dir) = &settings.log_dir {
        logging::init_file_logging(Path::new(dir))?;
    }

    tlog!(
        "[setup] wx200-bridge {} (default {} at {} baud)",
        env!("CARGO_PKG_VERSION"),
        settings.default_port,
        settings.default_baud
    );

    let opener = Arc::new(SystemOpener::new(settings.serial.clone()));
    let manager = SessionManager::new(&settings, opener);

    if settings.connect_on_startup {
        if let Err(e) = manager
            .connect(&settings.default_port, settings.default_baud)
            .await
        {
            tlog!("[setup] Startup connect to {} failed: {}", settings.default_port, e);
        }
    }

    let listener = server::bind(&settings.listen_addr).await?;
    let serving = server::serve(listener, manager.clone(), Arc::new(SystemEnumerator));

    tokio::select! {
        _ = serving => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tlog!("[setup] Failed to wait for Ctrl-C: {}", e);
            }
            tlog!("[setup] Shutting down");
        }
    }

    manager.shutdown().await;
    logging::stop_file_logging();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_settings() {
        let args = Args::parse_from([
            "wx200-bridge",
            "--listen",
            "127.0.0.1:9000",
            "--port",
            "/dev/ttyS1",
            "--baud",
            "9600",
        ]);
        let mut settings = settings::BridgeSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.listen_addr, "127.0.0.1:9000");
        assert_eq!(settings.default_port, "/dev/ttyS1");
        assert_eq!(settings.default_baud, 9600);
        assert!(settings.log_dir.is_none());
    }
}
