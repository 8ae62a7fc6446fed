//! Custom error types for the scan sequencer.
//!
//! This module defines the primary error type, `ScanError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur while a tomography scan runs, from
//! configuration problems to process-variable access failures.
//!
//! ## Error Hierarchy
//!
//! `ScanError` consolidates the following sources:
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches in the configuration file, environment or command line.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine but is
//!   logically invalid (e.g., a zero projection count). Raised by validation.
//! - **`Io`**: Wraps `std::io::Error` for file output and spawned tools.
//! - **`PvAccess`** / **`PvTimeout`** / **`PvType`**: Failures talking to a control
//!   point through the PV layer.
//! - **`PvTool`**: `caget`/`caput` missing or not executable.
//! - **`DetectorOffline`**: The camera IOC does not answer.
//! - **`Interrupted`**: The operator aborted the scan.
//! - **`FeatureNotEnabled`**: Functionality compiled out via feature flags.
//!
//! Callers that only poll (see `pv::wait_pv`) never see timeouts as errors: a wait
//! that runs out is logged and reported as `false`.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

/// Every failure the scan sequencer reports.
#[derive(Error, Debug)]
pub enum ScanError {
    /// A configuration layer could not be parsed or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration parsed but holds an invalid value.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem or process I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be serialized.
    #[error("Failed to serialize configuration: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// Scan record could not be serialized.
    #[error("Failed to serialize scan record: {0}")]
    Json(#[from] serde_json::Error),

    /// The control point did not connect or rejected the request.
    #[error("PV '{pv}' access failed: {message}")]
    PvAccess {
        /// PV name.
        pv: String,
        /// Tool or client message.
        message: String,
    },

    /// A write with completion did not finish in time.
    #[error("PV '{pv}' did not complete within {timeout:?}")]
    PvTimeout {
        /// PV name.
        pv: String,
        /// Time allowed.
        timeout: Duration,
    },

    /// The value read has the wrong type for the caller.
    #[error("PV '{pv}' returned {found}, expected {expected}")]
    PvType {
        /// PV name.
        pv: String,
        /// Type the caller asked for.
        expected: &'static str,
        /// Value actually read.
        found: String,
    },

    /// A Channel Access tool could not be started.
    #[error("Cannot run {program}: {source}")]
    PvTool {
        /// Tool name.
        program: String,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The camera IOC does not answer.
    #[error("Detector with IOC prefix {prefix} is down")]
    DetectorOffline {
        /// Camera IOC prefix.
        prefix: String,
    },

    /// The scan positions cannot be generated.
    #[error("Invalid scan plan: {0}")]
    Plan(String),

    /// The operator stopped the scan.
    #[error("Scan interrupted by operator")]
    Interrupted,

    /// HDF5 library error.
    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// The binary was built without a required feature.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for ScanError {
    fn from(err: figment::Error) -> Self {
        ScanError::Config(Box::new(err))
    }
}

impl ScanError {
    /// Builds a `PvAccess` error for the given PV name.
    pub fn pv_access(pv: impl Into<String>, message: impl Into<String>) -> Self {
        ScanError::PvAccess {
            pv: pv.into(),
            message: message.into(),
        }
    }
}
