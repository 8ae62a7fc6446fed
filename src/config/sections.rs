//! Configuration sections and their beamline defaults.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Experimental station the scan runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Station {
    /// 2-BM-A.
    #[serde(rename = "2-BM-A")]
    #[value(name = "2-BM-A")]
    TwoBmA,
    /// 2-BM-B.
    #[serde(rename = "2-BM-B")]
    #[value(name = "2-BM-B")]
    TwoBmB,
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Station::TwoBmA => f.write_str("2-BM-A"),
            Station::TwoBmB => f.write_str("2-BM-B"),
        }
    }
}

/// Stage used to take the sample out of the beam for white fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InOutAxis {
    /// Sample X moves out.
    Horizontal,
    /// Sample Y moves out.
    Vertical,
}

/// Sample positions visited by a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    /// One data set at the current sample position.
    Standard,
    /// One data set per vertical sample position.
    Vertical,
    /// Vertical positions outer, horizontal positions inner.
    Mosaic,
}

/// When white fields are taken relative to the projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WhiteFieldMode {
    /// White fields before the projections.
    Pre,
    /// White fields after the projections.
    Post,
    /// White fields before and after the projections.
    Both,
}

impl WhiteFieldMode {
    /// White fields are taken before the projections.
    pub fn before(self) -> bool {
        matches!(self, WhiteFieldMode::Pre | WhiteFieldMode::Both)
    }

    /// White fields are taken after the projections.
    pub fn after(self) -> bool {
        matches!(self, WhiteFieldMode::Post | WhiteFieldMode::Both)
    }

    /// Number of white-field blocks per data set.
    pub fn blocks(self) -> u32 {
        match self {
            WhiteFieldMode::Both => 2,
            _ => 1,
        }
    }
}

/// HDF writer plugin file write mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum FileWriteMode {
    /// One file per frame.
    Single,
    /// Frames buffered in the IOC, written at the end.
    Capture,
    /// Frames streamed to one file as they arrive.
    Stream,
}

impl fmt::Display for FileWriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileWriteMode::Single => "Single",
            FileWriteMode::Capture => "Capture",
            FileWriteMode::Stream => "Stream",
        };
        f.write_str(name)
    }
}

/// Which PV client drives the beamline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PvBackend {
    /// EPICS base `caget`/`caput`.
    CaTools,
    /// In-memory simulated IOC.
    Simulated,
}

/// `[general]`: logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log file directory
    pub logs_home: PathBuf,
    /// Debug-level console output
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            logs_home: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("logs"),
            verbose: false,
        }
    }
}

/// `[experiment_info]`: proposal and user details, stored with the data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentInfo {
    /// Run cycle, e.g. `2020-02`.
    pub experiment_year_month: Option<String>,
    /// Principal investigator.
    pub user_last_name: Option<String>,
    /// Contact e-mail.
    pub user_email: Option<String>,
    /// APS badge number.
    pub user_badge: Option<String>,
    /// Proposal number.
    pub proposal_number: Option<String>,
    /// Proposal title.
    pub proposal_title: Option<String>,
    /// Home institution.
    pub user_institution: Option<String>,
}

/// `[detector]`: camera IOC and exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Camera IOC prefix, e.g. `2bmbSP1:` (FLIR) or `2bmbPG3:` (PointGrey)
    pub camera_ioc_prefix: String,
    /// Exposure time in seconds
    pub exposure_time: f64,
    /// Pixel size in microns
    pub ccd_pixel_size: f64,
    /// Readout time in seconds (8-bit: 0.006, 16-bit: 0.01)
    pub ccd_readout: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            camera_ioc_prefix: "2bmbSP1:".to_string(),
            exposure_time: 0.1,
            ccd_pixel_size: 3.45,
            ccd_readout: 0.01,
        }
    }
}

/// `[scintillator]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScintillatorConfig {
    /// Scintillator material, e.g. `LuAG_Ce`.
    pub scintillator_type: Option<String>,
    /// Thickness in microns
    pub scintillator_thickness: f64,
}

/// `[hdf_plugin]`: recursive filter ahead of the file writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdfPluginConfig {
    /// Average frames before writing.
    pub recursive_filter: bool,
    /// Frames averaged by the recursive filter (1, 2 or 4)
    pub recursive_filter_n_images: u32,
}

impl Default for HdfPluginConfig {
    fn default() -> Self {
        Self {
            recursive_filter: false,
            recursive_filter_n_images: 1,
        }
    }
}

/// `[file]`: data file naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Data file name; read from the HDF writer plugin when unset
    pub file_name: Option<String>,
    /// Data directory; read from the HDF writer plugin when unset
    pub file_path: Option<PathBuf>,
    /// HDF writer plugin mode.
    pub file_write_mode: FileWriteMode,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            file_name: None,
            file_path: None,
            file_write_mode: FileWriteMode::Stream,
        }
    }
}

/// `[beamline]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamlineConfig {
    /// Experimental station; selects the PV names.
    pub station: Station,
    /// Filters in the beam, recorded with the data.
    pub filters: Option<String>,
    /// Settle time after opening the shutters, in seconds
    pub shutter_open_delay: f64,
}

impl Default for BeamlineConfig {
    fn default() -> Self {
        Self {
            station: Station::TwoBmA,
            filters: None,
            shutter_open_delay: 0.0,
        }
    }
}

/// `[sample]`: sample description, stored with the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    /// Sample name.
    pub sample_name: Option<String>,
    /// Free-form description.
    pub sample_description: Option<String>,
    /// Distance in mm
    pub sample_detector_distance: f64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            sample_name: None,
            sample_description: None,
            sample_detector_distance: 1.0,
        }
    }
}

/// `[sample_motion]`: rotation range and in/out positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleMotionConfig {
    /// Rotation start (deg).
    pub sample_rotation_start: f64,
    /// Rotation end (deg).
    pub sample_rotation_end: f64,
    /// Sample position during data collection
    pub sample_in_position: f64,
    /// Sample position for white field images
    pub sample_out_position: f64,
    /// Stage used to take the sample out.
    pub sample_in_out: InOutAxis,
    /// Keep the sample still during white field collection
    pub sample_move_freeze: bool,
}

impl Default for SampleMotionConfig {
    fn default() -> Self {
        Self {
            sample_rotation_start: 0.0,
            sample_rotation_end: 180.0,
            sample_in_position: 0.0,
            sample_out_position: 1.0,
            sample_in_out: InOutAxis::Horizontal,
            sample_move_freeze: false,
        }
    }
}

/// `[scan]`: projection counts, scan type and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Data sets collected so far; appended to file names
    pub scan_counter: u32,
    /// Rotate from end to start
    pub reverse: bool,
    /// Positions visited by the campaign.
    pub scan_type: ScanType,
    /// Projections per data set.
    pub num_projections: u32,
    /// White field frames per block.
    pub num_white_images: u32,
    /// Dark field frames.
    pub num_dark_images: u32,
    /// When white fields are taken.
    pub white_field: WhiteFieldMode,
    /// First vertical position (mm).
    pub vertical_scan_start: f64,
    /// Vertical end position (mm), exclusive.
    pub vertical_scan_end: f64,
    /// Vertical step (mm).
    pub vertical_scan_step_size: f64,
    /// First horizontal position (mm).
    pub horizontal_scan_start: f64,
    /// Horizontal end position (mm), exclusive.
    pub horizontal_scan_end: f64,
    /// Horizontal step (mm).
    pub horizontal_scan_step_size: f64,
    /// Wait time (s) between repeated data sets
    pub sleep_time: f64,
    /// Data sets collected at each position
    pub sleep_steps: u32,
    /// Wait time (s) before the first data set, to stabilize the sample environment
    pub start_sleep: f64,
    /// Wait time (s) between closing the shutters and the dark field
    pub dark_settle_time: f64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            scan_counter: 0,
            reverse: false,
            scan_type: ScanType::Standard,
            num_projections: 1500,
            num_white_images: 20,
            num_dark_images: 20,
            white_field: WhiteFieldMode::Pre,
            vertical_scan_start: 0.0,
            vertical_scan_end: 1.0,
            vertical_scan_step_size: 1.0,
            horizontal_scan_start: 0.0,
            horizontal_scan_end: 1.0,
            horizontal_scan_step_size: 1.0,
            sleep_time: 0.0,
            sleep_steps: 1,
            start_sleep: 0.0,
            dark_settle_time: 2.0,
        }
    }
}

/// The furnace moves out with the sample only when the sample is not frozen
/// and white fields are taken with the horizontal stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FurnaceConfig {
    /// Move the furnace with the sample.
    pub use_furnace: bool,
    /// Furnace Y around the sample (mm).
    pub furnace_in_position: f64,
    /// Furnace Y clear of the beam (mm).
    pub furnace_out_position: f64,
}

impl Default for FurnaceConfig {
    fn default() -> Self {
        Self {
            use_furnace: false,
            furnace_in_position: 0.0,
            furnace_out_position: 48.0,
        }
    }
}

/// `[file_transfer]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileTransferConfig {
    /// rsync destination, `user@host:/path/`.
    pub remote_analysis_dir: String,
    /// Copy each data file after collection.
    pub remote_data_transfer: bool,
}

impl Default for FileTransferConfig {
    fn default() -> Self {
        Self {
            remote_analysis_dir: "tomo@mona3:/local/data/".to_string(),
            remote_data_transfer: false,
        }
    }
}

/// `[stage_settings]`: rotation stage motion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    /// Rotation stage acceleration time (s)
    pub accl_rot: f64,
    /// Fixed rotation speed (deg/s); computed from exposure and readout when unset
    pub slew_speed: Option<f64>,
    /// Fraction (0, 1] of the computed rotation speed, to reduce blurring
    pub rotation_slow_factor: f64,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            accl_rot: 1.0,
            slew_speed: None,
            rotation_slow_factor: 1.0,
        }
    }
}

/// `[dx_options]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DxOptions {
    /// Write the scan parameters into the data file's acquisition group
    pub dx_update: bool,
}

/// `[pv]`: PV client backend and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PvConfig {
    /// Client used to reach the IOCs.
    pub backend: PvBackend,
    /// `caget` executable.
    pub caget: PathBuf,
    /// `caput` executable.
    pub caput: PathBuf,
    /// Channel connect timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Interval between reads while waiting for a value.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Completion timeout for stage moves
    #[serde(with = "humantime_serde")]
    pub move_timeout: Duration,
    /// Replacement PV names keyed by logical name (e.g. `Motor_FurnaceY`)
    pub overrides: BTreeMap<String, String>,
}

impl Default for PvConfig {
    fn default() -> Self {
        Self {
            backend: PvBackend::CaTools,
            caget: PathBuf::from("caget"),
            caput: PathBuf::from("caput"),
            connect_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
            move_timeout: Duration::from_secs(1000),
            overrides: BTreeMap::new(),
        }
    }
}
