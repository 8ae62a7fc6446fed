//! Command-line interface.
//!
//! Options given on the command line form the highest-precedence
//! configuration layer. Each `*Overrides` struct mirrors one configuration
//! section; unset options are skipped when serialized so they never mask the
//! file or environment.

use crate::config::{InOutAxis, PvBackend, ScanType, Station, WhiteFieldMode};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "tomoscan", version, about = "Tomography fly scans with sample, furnace and detector control")]
pub struct Cli {
    /// Configuration file [default: ~/tomoscan.toml]
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug output on the console and in the log file
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Directory for log files
    #[arg(long, global = true, value_name = "DIR")]
    pub logs_home: Option<PathBuf>,

    /// Action to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show the effective configuration
    Status(ScanOverrides),
    /// Run the configured scan
    Scan(ScanOverrides),
    /// Check the detector: initialise it and take one frame
    Test(ScanOverrides),
    /// Write a bash completion script
    Completion {
        /// Output file [default: ~/complete_tomoscan.sh]
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

impl Cli {
    /// Command-line configuration layer for `overrides` plus the global options.
    pub fn layer<'a>(&self, overrides: &'a ScanOverrides) -> CliLayer<'a> {
        CliLayer {
            general: GeneralOverrides {
                verbose: self.verbose.then_some(true),
                logs_home: self.logs_home.clone(),
            },
            sections: overrides,
        }
    }

    /// Overrides of the selected subcommand, if it takes any.
    pub fn overrides(&self) -> Option<&ScanOverrides> {
        match &self.command {
            Commands::Status(o) | Commands::Scan(o) | Commands::Test(o) => Some(o),
            Commands::Init { .. } | Commands::Completion { .. } => None,
        }
    }
}

/// Serializable command-line layer.
#[derive(Serialize, Debug)]
pub struct CliLayer<'a> {
    general: GeneralOverrides,
    #[serde(flatten)]
    sections: &'a ScanOverrides,
}

#[derive(Serialize, Debug, Default)]
struct GeneralOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logs_home: Option<PathBuf>,
}

/// Options shared by the commands that load a configuration.
#[derive(Args, Serialize, Debug, Default, Clone)]
pub struct ScanOverrides {
    /// `[detector]` options.
    #[command(flatten)]
    pub detector: DetectorOverrides,
    /// `[hdf_plugin]` options.
    #[command(flatten)]
    pub hdf_plugin: HdfPluginOverrides,
    /// `[file]` options.
    #[command(flatten)]
    pub file: FileOverrides,
    /// `[beamline]` options.
    #[command(flatten)]
    pub beamline: BeamlineOverrides,
    /// `[sample]` options.
    #[command(flatten)]
    pub sample: SampleOverrides,
    /// `[sample_motion]` options.
    #[command(flatten)]
    pub sample_motion: SampleMotionOverrides,
    /// `[scan]` options.
    #[command(flatten)]
    pub scan: ScanSectionOverrides,
    /// `[furnace]` options.
    #[command(flatten)]
    pub furnace: FurnaceOverrides,
    /// `[file_transfer]` options.
    #[command(flatten)]
    pub file_transfer: FileTransferOverrides,
    /// `[stage_settings]` options.
    #[command(flatten)]
    pub stage_settings: StageSettingsOverrides,
    /// `[dx_options]` options.
    #[command(flatten)]
    pub dx_options: DxOptionsOverrides,
    /// `[pv]` options.
    #[command(flatten)]
    pub pv: PvOverrides,
}

/// Command-line `[detector]` layer.
#[derive(Args, Serialize, Debug, Default, Clone)]
#[command(next_help_heading = "Detector")]
pub struct DetectorOverrides {
    /// Camera IOC prefix, e.g. 2bmbSP1: or 2bmbPG3:
    #[arg(long, value_name = "PREFIX")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_ioc_prefix: Option<String>,
    /// Exposure time (s)
    #[arg(long, value_name = "SECONDS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<f64>,
    /// Readout time (s): 0.006 for 8-bit, 0.01 for 16-bit
    #[arg(long, value_name = "SECONDS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ccd_readout: Option<f64>,
}

/// Command-line `[hdf_plugin]` layer.
#[derive(Args, Serialize, Debug, Default, Clone)]
#[command(next_help_heading = "HDF plugin")]
pub struct HdfPluginOverrides {
    /// Enable the recursive filter
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursive_filter: Option<bool>,
    /// Frames averaged by the recursive filter (1, 2 or 4)
    #[arg(long, value_name = "N")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursive_filter_n_images: Option<u32>,
}

/// Command-line `[file]` layer.
#[derive(Args, Serialize, Debug, Default, Clone)]
#[command(next_help_heading = "File")]
pub struct FileOverrides {
    /// Base data file name; read from the HDF plugin when unset
    #[arg(long, value_name = "NAME")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Data directory; read from the HDF plugin when unset
    #[arg(long, value_name = "DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

/// Command-line `[beamline]` layer.
#[derive(Args, Serialize, Debug, Default, Clone)]
#[command(next_help_heading = "Beamline")]
pub struct BeamlineOverrides {
    /// Experimental station
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station: Option<Station>,
}

/// Command-line `[sample]` layer.
#[derive(Args, Serialize, Debug, Default, Clone)]
#[command(next_help_heading = "Sample")]
pub struct SampleOverrides {
    /// Sample name recorded with the data
    #[arg(long, value_name = "NAME")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_name: Option<String>,
}

/// Command-line `[sample_motion]` layer.
#[derive(Args, Serialize, Debug, Default, Clone)]
#[command(next_help_heading = "Sample motion")]
pub struct SampleMotionOverrides {
    /// Rotation start (deg)
    #[arg(long, allow_negative_numbers = true, value_name = "DEG")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rotation_start: Option<f64>,
    /// Rotation end (deg)
    #[arg(long, allow_negative_numbers = true, value_name = "DEG")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rotation_end: Option<f64>,
    /// Sample position during data collection (mm)
    #[arg(long, allow_negative_numbers = true, value_name = "MM")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_in_position: Option<f64>,
    /// Sample position for white fields (mm)
    #[arg(long, allow_negative_numbers = true, value_name = "MM")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_out_position: Option<f64>,
    /// Stage that takes the sample out for white fields
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_in_out: Option<InOutAxis>,
    /// Keep the sample still during white fields
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_move_freeze: Option<bool>,
}

/// Command-line `[scan]` layer.
#[derive(Args, Serialize, Debug, Default, Clone)]
#[command(next_help_heading = "Scan")]
pub struct ScanSectionOverrides {
    /// Positions visited by the campaign
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_type: Option<ScanType>,
    /// Projections per data set
    #[arg(long, value_name = "N")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_projections: Option<u32>,
    /// White field frames per block
    #[arg(long, value_name = "N")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_white_images: Option<u32>,
    /// Dark field frames
    #[arg(long, value_name = "N")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_dark_images: Option<u32>,
    /// When to take white fields
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_field: Option<WhiteFieldMode>,
    /// Rotate from end to start
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverse: Option<bool>,
    /// First vertical position (mm)
    #[arg(long, allow_negative_numbers = true, value_name = "MM")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_scan_start: Option<f64>,
    /// Vertical end position (mm), exclusive
    #[arg(long, allow_negative_numbers = true, value_name = "MM")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_scan_end: Option<f64>,
    /// Vertical step (mm)
    #[arg(long, allow_negative_numbers = true, value_name = "MM")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_scan_step_size: Option<f64>,
    /// First horizontal position (mm)
    #[arg(long, allow_negative_numbers = true, value_name = "MM")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_scan_start: Option<f64>,
    /// Horizontal end position (mm), exclusive
    #[arg(long, allow_negative_numbers = true, value_name = "MM")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_scan_end: Option<f64>,
    /// Horizontal step (mm)
    #[arg(long, allow_negative_numbers = true, value_name = "MM")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_scan_step_size: Option<f64>,
    /// Wait between repeated data sets (s)
    #[arg(long, value_name = "SECONDS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep_time: Option<f64>,
    /// Data sets per position
    #[arg(long, value_name = "N")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep_steps: Option<u32>,
    /// Wait before the first data set (s)
    #[arg(long, value_name = "SECONDS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_sleep: Option<f64>,
}

/// Command-line `[furnace]` layer.
#[derive(Args, Serialize, Debug, Default, Clone)]
#[command(next_help_heading = "Furnace")]
pub struct FurnaceOverrides {
    /// Move the furnace out with the sample
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_furnace: Option<bool>,
    /// Furnace Y around the sample (mm)
    #[arg(long, allow_negative_numbers = true, value_name = "MM")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub furnace_in_position: Option<f64>,
    /// Furnace Y clear of the beam (mm)
    #[arg(long, allow_negative_numbers = true, value_name = "MM")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub furnace_out_position: Option<f64>,
}

/// Command-line `[file_transfer]` layer.
#[derive(Args, Serialize, Debug, Default, Clone)]
#[command(next_help_heading = "File transfer")]
pub struct FileTransferOverrides {
    /// Copy each data file to the analysis machine
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_data_transfer: Option<bool>,
}

/// Command-line `[stage_settings]` layer.
#[derive(Args, Serialize, Debug, Default, Clone)]
#[command(next_help_heading = "Stage settings")]
pub struct StageSettingsOverrides {
    /// Fraction (0, 1] of the computed rotation speed
    #[arg(long, value_name = "FACTOR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_slow_factor: Option<f64>,
    /// Fixed rotation speed (deg/s)
    #[arg(long, value_name = "DEG_PER_S")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slew_speed: Option<f64>,
}

/// Command-line `[dx_options]` layer.
#[derive(Args, Serialize, Debug, Default, Clone)]
#[command(next_help_heading = "Data exchange")]
pub struct DxOptionsOverrides {
    /// Store scan parameters in the data file
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dx_update: Option<bool>,
}

/// Command-line `[pv]` layer.
#[derive(Args, Serialize, Debug, Default, Clone)]
#[command(next_help_heading = "PV access")]
pub struct PvOverrides {
    /// PV client backend
    #[arg(long = "pv-backend", value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<PvBackend>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use clap::CommandFactory;
    use figment::Jail;
    use std::path::Path;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_scan_overrides() {
        let cli = Cli::try_parse_from([
            "tomoscan",
            "--verbose",
            "scan",
            "--num-projections",
            "3000",
            "--sample-rotation-start",
            "-90",
            "--station",
            "2-BM-B",
            "--use-furnace",
            "--reverse",
            "false",
            "--pv-backend",
            "simulated",
        ])
        .unwrap();

        let o = cli.overrides().unwrap();
        assert_eq!(o.scan.num_projections, Some(3000));
        assert_eq!(o.sample_motion.sample_rotation_start, Some(-90.0));
        assert_eq!(o.beamline.station, Some(Station::TwoBmB));
        assert_eq!(o.furnace.use_furnace, Some(true));
        assert_eq!(o.scan.reverse, Some(false));
        assert_eq!(o.pv.backend, Some(PvBackend::Simulated));
        assert!(cli.verbose);
    }

    #[test]
    fn test_layer_only_overrides_given_options() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "tomoscan.toml",
                "[scan]\nnum_projections = 900\nnum_dark_images = 7\n",
            )?;
            let cli = Cli::try_parse_from([
                "tomoscan",
                "--logs-home",
                "/tmp/tomolog",
                "status",
                "--num-projections",
                "1200",
            ])
            .map_err(|e| e.to_string())?;

            let o = cli.overrides().ok_or("no overrides")?;
            let config = ScanConfig::load(Path::new("tomoscan.toml"), &cli.layer(o))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.scan.num_projections, 1200);
            assert_eq!(config.scan.num_dark_images, 7);
            assert_eq!(config.general.logs_home, PathBuf::from("/tmp/tomolog"));
            assert!(!config.general.verbose);
            Ok(())
        });
    }

    #[test]
    fn test_init_and_completion_take_no_overrides() {
        let cli = Cli::try_parse_from(["tomoscan", "init", "--force"]).unwrap();
        assert!(cli.overrides().is_none());
        assert!(matches!(cli.command, Commands::Init { force: true }));

        let cli = Cli::try_parse_from(["tomoscan", "completion", "--output", "/tmp/c.sh"]).unwrap();
        assert!(cli.overrides().is_none());
    }
}
