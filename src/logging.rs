//! Console and log-file output.
//!
//! Every run writes a log file `tomoscan_<timestamp>.log` under
//! `general.logs_home` in addition to the console. `RUST_LOG` overrides the
//! default filter (`tomoscan=info`, or `tomoscan=debug` with `--verbose`).

use crate::error::{AppResult, ScanError};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter directive.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "tomoscan=debug"
    } else {
        "tomoscan=info"
    }
}

/// Path of the log file for a run started now.
pub fn log_file_path(logs_home: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H_%M_%S");
    logs_home.join(format!("tomoscan_{stamp}.log"))
}

/// Install the global subscriber. Returns the log file path.
pub fn init(logs_home: &Path, verbose: bool) -> AppResult<PathBuf> {
    std::fs::create_dir_all(logs_home)?;
    let path = log_file_path(logs_home);
    let file = File::create(&path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(|err| ScanError::Configuration(format!("logging already initialised: {err}")))?;

    tracing::info!(path = %path.display(), "saving log");
    Ok(path)
}

/// Console-only logging for commands that run before a configuration exists.
pub fn init_console(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
