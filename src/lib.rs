//! Automated tomography data collection for the 2-BM beamline.
//!
//! The crate drives the detector, HDF5 file writer, shutters, sample stages and
//! the fly-scan controller through named process variables (PVs). It provides:
//!
//! - [`pv`]: the PV seam with a Channel Access backend and a simulated IOC
//! - [`devices`]: typed wrappers around groups of PVs
//! - [`scan`]: the acquisition recipe and multi-position campaigns
//! - [`config`]: layered configuration (defaults, TOML file, environment, CLI)
//! - [`storage`]: scan records, DataExchange metadata and remote transfer
//!
//! The `tomoscan` binary wires these together behind a small CLI.

pub mod cli;
pub mod completion;
pub mod config;
pub mod devices;
pub mod error;
pub mod logging;
pub mod pv;
pub mod scan;
pub mod storage;

pub use config::ScanConfig;
pub use error::{AppResult, ScanError};
