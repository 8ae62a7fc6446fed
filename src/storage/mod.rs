//! Scan metadata persistence
//!
//! Every data set leaves three artefacts next to the detector's HDF5 file:
//!
//! - a JSON sidecar (`<file_name>.json`) with the [`ScanRecord`]
//! - the configuration copy written by `ScanConfig::update_after_scan`
//! - optionally, with the `storage_hdf5` feature, the scan parameters inside
//!   the data file itself (`/process/acquisition/...`) plus the measured
//!   rotation angles in `/exchange/theta`
//!
//! The data file is written by the camera IOC; this module only appends to it
//! once capture has finished.

pub mod transfer;

pub use transfer::transfer;

use crate::config::ConfigEntry;
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[cfg(feature = "storage_hdf5")]
use hdf5::{types::VarLenUnicode, File};

/// Name of the acquisition group written into the data file.
pub fn acquisition_group() -> String {
    format!("/process/acquisition/tomoscan-{}", env!("CARGO_PKG_VERSION"))
}

/// Summary of one collected data set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Unique identifier of the data set.
    pub scan_id: Uuid,
    /// File name template given to the writer.
    pub file_name: String,
    /// Directory given to the writer.
    pub file_path: String,
    /// Full path reported by the HDF writer.
    pub data_file: String,
    /// Start of collection.
    pub started: DateTime<Utc>,
    /// End of collection.
    pub finished: DateTime<Utc>,
    /// Collection time in seconds.
    pub duration_s: f64,
    /// Camera model.
    pub detector_model: String,
    /// Projections requested from the controller.
    pub num_projections: u32,
    /// Flat fields per white block.
    pub num_white_images: u32,
    /// Dark fields.
    pub num_dark_images: u32,
    /// Exposure in seconds.
    pub exposure_time: f64,
    /// First angle in degrees.
    pub rotation_start: f64,
    /// Last angle in degrees.
    pub rotation_end: f64,
    /// Rotation speed in deg/s.
    pub slew_speed: f64,
    /// Motion blur at the image edge, in pixels.
    pub blur_pixels: f64,
    /// Rotation angle at each projection trigger.
    pub theta: Vec<f64>,
    /// Sample X at collection.
    pub sample_x: f64,
    /// Sample Y at collection.
    pub sample_y: f64,
    /// Machine that ran the scan.
    pub host: String,
    /// Version of this program.
    pub software_version: String,
}

impl ScanRecord {
    /// Fresh scan identifier.
    pub fn new_id() -> Uuid {
        Uuid::new_v4()
    }

    /// Name of this machine, or `unknown`.
    pub fn host() -> String {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

/// Write `record` as `<dir>/<file_name>.json`.
pub fn write_sidecar(record: &ScanRecord, dir: &Path) -> AppResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", record.file_name));
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(&path, json)?;
    tracing::debug!(path = %path.display(), "scan record written");
    Ok(path)
}

/// Read a sidecar written by [`write_sidecar`].
pub fn read_sidecar(path: &Path) -> AppResult<ScanRecord> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Store the scan parameters and theta array inside the data file.
///
/// An existing acquisition group is replaced, so re-running the update on the
/// same file leaves one copy of each value.
#[cfg(feature = "storage_hdf5")]
pub fn write_dx_metadata(
    data_file: &Path,
    record: &ScanRecord,
    entries: &[ConfigEntry],
) -> AppResult<()> {
    let file = File::open_rw(data_file)?;

    let exchange = ensure_group(&file, "/exchange")?;
    if exchange.link_exists("theta") {
        exchange.unlink("theta")?;
    }
    let theta = exchange
        .new_dataset::<f64>()
        .shape([record.theta.len()])
        .create("theta")?;
    theta.write(record.theta.as_slice())?;
    theta
        .new_attr::<VarLenUnicode>()
        .create("units")?
        .write_scalar(&to_vlu("deg")?)?;

    let root = acquisition_group();
    if file.link_exists(&root) {
        file.unlink(&root)?;
    }
    for entry in entries {
        let group = ensure_group(&file, &format!("{root}/{}", entry.section))?;
        group
            .new_dataset::<VarLenUnicode>()
            .create(entry.key.as_str())?
            .write_scalar(&to_vlu(&entry.value)?)?;
    }
    let scan = ensure_group(&file, &format!("{root}/record"))?;
    scan.new_attr::<VarLenUnicode>()
        .create("scan_id")?
        .write_scalar(&to_vlu(&record.scan_id.to_string())?)?;
    scan.new_attr::<VarLenUnicode>()
        .create("started")?
        .write_scalar(&to_vlu(&record.started.to_rfc3339())?)?;
    scan.new_attr::<f64>()
        .create("duration_s")?
        .write_scalar(&record.duration_s)?;

    tracing::info!(
        file = %data_file.display(),
        entries = entries.len(),
        "scan parameters stored in data file"
    );
    Ok(())
}

/// Without HDF5 support the data file is left untouched.
#[cfg(not(feature = "storage_hdf5"))]
pub fn write_dx_metadata(
    data_file: &Path,
    _record: &ScanRecord,
    _entries: &[ConfigEntry],
) -> AppResult<()> {
    tracing::warn!(
        file = %data_file.display(),
        "HDF5 storage feature not enabled; data file metadata not updated"
    );
    Ok(())
}

#[cfg(feature = "storage_hdf5")]
fn ensure_group(file: &File, path: &str) -> AppResult<hdf5::Group> {
    let mut current = file.group("/")?;
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current = if current.link_exists(part) {
            current.group(part)?
        } else {
            current.create_group(part)?
        };
    }
    Ok(current)
}

#[cfg(feature = "storage_hdf5")]
fn to_vlu(text: &str) -> AppResult<VarLenUnicode> {
    text.parse::<VarLenUnicode>()
        .map_err(|err| hdf5::Error::Internal(format!("invalid string '{text}': {err}")).into())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_record(file_name: &str) -> ScanRecord {
        let started = Utc::now();
        ScanRecord {
            scan_id: ScanRecord::new_id(),
            file_name: file_name.to_string(),
            file_path: "/local/data".to_string(),
            data_file: format!("/local/data/{file_name}.h5"),
            started,
            finished: started,
            duration_s: 200.0,
            detector_model: "Oryx ORX-10G-51S5M".to_string(),
            num_projections: 1500,
            num_white_images: 20,
            num_dark_images: 20,
            exposure_time: 0.1,
            rotation_start: 0.0,
            rotation_end: 180.0,
            slew_speed: 1.09,
            blur_pixels: 0.02,
            theta: vec![0.0, 0.12, 0.24],
            sample_x: 0.0,
            sample_y: 1.5,
            host: ScanRecord::host(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    #[test]
    fn test_sidecar_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let record = sample_record("coral_002");
        let path = write_sidecar(&record, &dir.path().join("nested")).unwrap();

        assert_eq!(path.file_name().unwrap(), "coral_002.json");
        assert_eq!(read_sidecar(&path).unwrap(), record);
    }

    #[test]
    fn test_acquisition_group_carries_version() {
        assert!(acquisition_group().starts_with("/process/acquisition/tomoscan-"));
        assert!(acquisition_group().ends_with(env!("CARGO_PKG_VERSION")));
    }

    #[cfg(not(feature = "storage_hdf5"))]
    #[tracing_test::traced_test]
    #[test]
    fn test_dx_metadata_without_feature_warns() {
        let record = sample_record("coral_002");
        write_dx_metadata(Path::new("/nonexistent/coral_002.h5"), &record, &[]).unwrap();
        assert!(logs_contain("HDF5 storage feature not enabled"));
    }

    #[cfg(feature = "storage_hdf5")]
    #[test]
    fn test_dx_metadata_written_twice_keeps_one_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coral_002.h5");
        File::create(&path).unwrap();

        let record = sample_record("coral_002");
        let entries = vec![ConfigEntry {
            section: "scan",
            key: "num_projections".to_string(),
            value: "1500".to_string(),
        }];
        write_dx_metadata(&path, &record, &entries).unwrap();
        write_dx_metadata(&path, &record, &entries).unwrap();

        let file = File::open(&path).unwrap();
        let theta: Vec<f64> = file.dataset("exchange/theta").unwrap().read_raw().unwrap();
        assert_eq!(theta, record.theta);
        let value: VarLenUnicode = file
            .dataset(&format!("{}/scan/num_projections", acquisition_group()))
            .unwrap()
            .read_scalar()
            .unwrap();
        assert_eq!(value.as_str(), "1500");
    }
}
