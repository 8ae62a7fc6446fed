//! Scan configuration using Figment
//!
//! The effective configuration is layered, lowest precedence first:
//! 1. built-in beamline defaults
//! 2. the TOML configuration file (`~/tomoscan.toml` unless `--config` is given;
//!    a missing file is not an error)
//! 3. environment variables prefixed with `TOMOSCAN_`, sections separated by `__`
//! 4. command-line overrides
//!
//! # Environment Variable Overrides
//!
//! ```text
//! TOMOSCAN_SCAN__NUM_PROJECTIONS=3000
//! TOMOSCAN_DETECTOR__EXPOSURE_TIME=0.05
//! TOMOSCAN_BEAMLINE__STATION=2-BM-B
//! ```
//!
//! After every data set the configuration is written back with the incremented
//! scan counter and copied next to the data file, so a scan can always be
//! repeated from the copy.

mod sections;

pub use sections::*;

use crate::error::{AppResult, ScanError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Section names in file order.
pub const SECTIONS: [&str; 15] = [
    "general",
    "experiment_info",
    "detector",
    "scintillator",
    "hdf_plugin",
    "file",
    "beamline",
    "sample",
    "sample_motion",
    "scan",
    "furnace",
    "file_transfer",
    "stage_settings",
    "dx_options",
    "pv",
];

const ENV_PREFIX: &str = "TOMOSCAN_";

/// Top-level scan configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Logging.
    pub general: GeneralConfig,
    /// Proposal and user details.
    pub experiment_info: ExperimentInfo,
    /// Camera IOC and exposure.
    pub detector: DetectorConfig,
    /// Scintillator description.
    pub scintillator: ScintillatorConfig,
    /// Recursive filter.
    pub hdf_plugin: HdfPluginConfig,
    /// Data file naming.
    pub file: FileConfig,
    /// Station and filters.
    pub beamline: BeamlineConfig,
    /// Sample description.
    pub sample: SampleConfig,
    /// Rotation range and in/out positions.
    pub sample_motion: SampleMotionConfig,
    /// Projection counts, scan type and timing.
    pub scan: ScanSettings,
    /// Furnace positions.
    pub furnace: FurnaceConfig,
    /// Remote copy of the data.
    pub file_transfer: FileTransferConfig,
    /// Rotation stage motion.
    pub stage_settings: StageSettings,
    /// Data file annotation.
    pub dx_options: DxOptions,
    /// PV client backend and timing.
    pub pv: PvConfig,
}

/// One flattened configuration value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEntry {
    /// Section name, e.g. `scan`.
    pub section: &'static str,
    /// Option name.
    pub key: String,
    /// Value as shown to operators.
    pub value: String,
}

/// Default configuration file location (`~/tomoscan.toml`).
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tomoscan.toml")
}

impl ScanConfig {
    /// Load configuration from `path`, the environment and `overrides`.
    ///
    /// `overrides` must serialize to a map of sections; unset options have to be
    /// skipped during serialization so they do not mask lower layers.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if a layer cannot be parsed or a value has the
    /// wrong type. The result is not validated; call [`ScanConfig::validate`].
    pub fn load<T: Serialize>(path: &Path, overrides: &T) -> AppResult<Self> {
        let config: Self = Self::figment(path)
            .merge(Serialized::defaults(overrides))
            .extract()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Defaults, file and environment layers.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(ScanConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error describing the first invalid value.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(ScanError::Configuration(msg));

        let prefix = &self.detector.camera_ioc_prefix;
        if prefix.is_empty() || !prefix.ends_with(':') || prefix.contains(char::is_whitespace) {
            return invalid(format!(
                "Invalid camera_ioc_prefix '{prefix}'. Must be a non-empty IOC prefix ending in ':'"
            ));
        }
        if self.detector.exposure_time <= 0.0 {
            return invalid(format!(
                "Invalid exposure_time {}. Must be > 0",
                self.detector.exposure_time
            ));
        }
        if self.detector.ccd_readout <= 0.0 {
            return invalid(format!(
                "Invalid ccd_readout {}. Must be > 0",
                self.detector.ccd_readout
            ));
        }

        let valid_filter = [1, 2, 4];
        if !valid_filter.contains(&self.hdf_plugin.recursive_filter_n_images) {
            return invalid(format!(
                "Invalid recursive_filter_n_images {}. Must be one of: 1, 2, 4",
                self.hdf_plugin.recursive_filter_n_images
            ));
        }

        let motion = &self.sample_motion;
        if (motion.sample_rotation_end - motion.sample_rotation_start).abs() < f64::EPSILON {
            return invalid(format!(
                "Invalid rotation range {}..{}. Start and end must differ",
                motion.sample_rotation_start, motion.sample_rotation_end
            ));
        }

        let scan = &self.scan;
        if scan.num_projections == 0 {
            return invalid("num_projections must be > 0".to_string());
        }
        if scan.num_white_images == 0 || scan.num_dark_images == 0 {
            return invalid(format!(
                "num_white_images ({}) and num_dark_images ({}) must be > 0",
                scan.num_white_images, scan.num_dark_images
            ));
        }
        if scan.sleep_steps == 0 {
            return invalid("sleep_steps must be >= 1".to_string());
        }
        for (name, secs) in [
            ("sleep_time", scan.sleep_time),
            ("start_sleep", scan.start_sleep),
            ("dark_settle_time", scan.dark_settle_time),
            ("shutter_open_delay", self.beamline.shutter_open_delay),
        ] {
            if secs < 0.0 || !secs.is_finite() {
                return invalid(format!("Invalid {name} {secs}. Must be >= 0 seconds"));
            }
        }
        if matches!(scan.scan_type, ScanType::Vertical | ScanType::Mosaic)
            && scan.vertical_scan_step_size == 0.0
        {
            return invalid("vertical_scan_step_size must be non-zero".to_string());
        }
        if scan.scan_type == ScanType::Mosaic && scan.horizontal_scan_step_size == 0.0 {
            return invalid("horizontal_scan_step_size must be non-zero".to_string());
        }

        let factor = self.stage_settings.rotation_slow_factor;
        if factor <= 0.0 || factor > 1.0 || factor.is_nan() {
            return invalid(format!(
                "Invalid rotation_slow_factor {factor}. Must be in (0, 1]"
            ));
        }
        if let Some(speed) = self.stage_settings.slew_speed {
            if speed <= 0.0 {
                return invalid(format!("Invalid slew_speed {speed}. Must be > 0"));
            }
        }

        if self.pv.poll_interval.is_zero() {
            return invalid("pv.poll_interval must be > 0".to_string());
        }

        Ok(())
    }

    /// Serialize the configuration as TOML to `path`, creating parent directories.
    pub fn write(&self, path: &Path) -> AppResult<()> {
        let text = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Flatten to `(section, key, value)` entries in file order.
    ///
    /// Unset options are rendered as `None`; tables (PV overrides) as JSON.
    pub fn entries(&self) -> AppResult<Vec<ConfigEntry>> {
        let root = serde_json::to_value(self)?;
        let mut entries = Vec::new();
        for section in SECTIONS {
            let Some(serde_json::Value::Object(fields)) = root.get(section) else {
                continue;
            };
            for (key, value) in fields {
                let value = match value {
                    serde_json::Value::Null => "None".to_string(),
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                entries.push(ConfigEntry {
                    section,
                    key: key.clone(),
                    value,
                });
            }
        }
        Ok(entries)
    }

    /// Log every section's values.
    pub fn log_values(&self) -> AppResult<()> {
        let mut current = "";
        for entry in self.entries()? {
            if entry.section != current {
                current = entry.section;
                tracing::info!("[{}]", current);
            }
            tracing::info!("  {:<28} {}", entry.key, entry.value);
        }
        Ok(())
    }

    /// Persist the configuration after a data set.
    ///
    /// Writes the configuration (including the incremented scan counter) to
    /// `config_path` and copies it to `<data_dir>/<file_name>.toml`. A failed copy
    /// is logged; the returned path is `None` in that case.
    pub fn update_after_scan(
        &self,
        config_path: &Path,
        data_dir: &Path,
        file_name: &str,
    ) -> AppResult<Option<PathBuf>> {
        self.write(config_path)?;

        let copy = data_dir.join(format!("{file_name}.toml"));
        let copied = match std::fs::create_dir_all(data_dir)
            .and_then(|_| std::fs::copy(config_path, &copy))
        {
            Ok(_) => {
                tracing::info!(path = %copy.display(), "configuration copied next to data");
                Some(copy)
            }
            Err(err) => {
                tracing::error!(
                    path = %copy.display(),
                    error = %err,
                    "failed to copy configuration to the data directory"
                );
                None
            }
        };

        tracing::info!(
            "to repeat this scan run: tomoscan --config {} scan",
            copied.as_deref().unwrap_or(config_path).display()
        );
        Ok(copied)
    }
}
