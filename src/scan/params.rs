//! Parameters of one data set, resolved from configuration and the detector.

use super::timing::RotationTiming;
use crate::config::{FileWriteMode, ScanConfig, WhiteFieldMode};
use std::time::Duration;

/// Time allowed for the HDF writer to flush after the last frame.
pub const HDF_WRITE_TIMEOUT: Duration = Duration::from_secs(600);

/// Parameters of one data set.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanParams {
    /// First angle in degrees.
    pub rotation_start: f64,
    /// Last angle in degrees.
    pub rotation_end: f64,
    /// Projection count.
    pub num_projections: u32,
    /// Flat fields per white block.
    pub num_white_images: u32,
    /// Dark fields.
    pub num_dark_images: u32,
    /// Where white blocks go.
    pub white_field: WhiteFieldMode,
    /// Exposure in seconds.
    pub exposure_time: f64,
    /// Readout time in seconds.
    pub ccd_readout: f64,
    /// Image size (x, y).
    pub roi: (u32, u32),
    /// Fraction of the maximum speed to rotate at.
    pub slow_factor: f64,
    /// Rotation speed used for the fly scan (deg/s).
    pub slew_speed: f64,
    /// Rotation acceleration time (s).
    pub accl_rot: f64,
    /// Derived rotation timing.
    pub timing: RotationTiming,
    /// Wait before collection starts.
    pub start_sleep: Duration,
    /// Wait after closing the shutter.
    pub dark_settle: Duration,
    /// Average frames in the filter plugin.
    pub recursive_filter: bool,
    /// Frames per filtered image.
    pub recursive_filter_n_images: u32,
    /// HDF writer file mode.
    pub write_mode: FileWriteMode,
}

impl ScanParams {
    /// Resolve parameters for a detector with image size `roi`.
    ///
    /// A reverse scan swaps the rotation start and end. The slew speed comes
    /// from `stage_settings.slew_speed` when set, otherwise from the timing.
    pub fn resolve(config: &ScanConfig, roi: (u32, u32)) -> Self {
        let motion = &config.sample_motion;
        let (rotation_start, rotation_end) = if config.scan.reverse {
            (motion.sample_rotation_end, motion.sample_rotation_start)
        } else {
            (motion.sample_rotation_start, motion.sample_rotation_end)
        };

        let mut params = Self {
            rotation_start,
            rotation_end,
            num_projections: config.scan.num_projections,
            num_white_images: config.scan.num_white_images,
            num_dark_images: config.scan.num_dark_images,
            white_field: config.scan.white_field,
            exposure_time: config.detector.exposure_time,
            ccd_readout: config.detector.ccd_readout,
            roi,
            slow_factor: config.stage_settings.rotation_slow_factor,
            slew_speed: 0.0,
            accl_rot: config.stage_settings.accl_rot,
            timing: RotationTiming::compute(0.0, 0.0, 1, 0.0, 0.0, 0, 1.0),
            start_sleep: secs(config.scan.start_sleep),
            dark_settle: secs(config.scan.dark_settle_time),
            recursive_filter: config.hdf_plugin.recursive_filter,
            recursive_filter_n_images: config.hdf_plugin.recursive_filter_n_images,
            write_mode: config.file.file_write_mode,
        };
        params.retime(config.stage_settings.slew_speed);
        params
    }

    /// Adopt the projection count calculated by the fly controller.
    ///
    /// The controller keeps the slew speed it was programmed with.
    pub fn set_projections(&mut self, count: u32) {
        self.num_projections = count;
        self.retime(Some(self.slew_speed));
    }

    fn retime(&mut self, fixed_slew: Option<f64>) {
        self.timing = RotationTiming::compute(
            self.rotation_start,
            self.rotation_end,
            self.num_projections,
            self.exposure_time,
            self.ccd_readout,
            self.roi.0,
            self.slow_factor,
        );
        self.slew_speed = fixed_slew.unwrap_or(self.timing.rotation_speed);
    }

    /// Frames the HDF writer must capture for the whole data set.
    pub fn num_capture(&self) -> u32 {
        self.num_projections
            + self.num_white_images * self.white_field.blocks()
            + self.num_dark_images
    }

    /// Exposure plus readout for internally triggered frames.
    pub fn frame_time(&self) -> f64 {
        self.exposure_time + self.ccd_readout
    }

    /// Wait limit for the fly scan and the projection acquisition.
    pub fn flyscan_timeout(&self) -> Duration {
        let range = (self.rotation_end - self.rotation_start).abs();
        if self.slew_speed > 0.0 {
            Duration::from_secs_f64(range / self.slew_speed) + super::timing::FLYSCAN_MARGIN
        } else {
            self.timing.flyscan_time_estimate()
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve() {
        let params = ScanParams::resolve(&ScanConfig::default(), (2448, 2048));
        assert_eq!(params.num_capture(), 1500 + 20 + 20);
        assert!((params.slew_speed - 180.0 / 165.0).abs() < 1e-9);
        assert!((params.frame_time() - 0.11).abs() < 1e-12);
        assert_eq!(params.dark_settle, Duration::from_secs(2));
    }

    #[test]
    fn test_reverse_and_both_white_fields() {
        let mut config = ScanConfig::default();
        config.scan.reverse = true;
        config.scan.white_field = WhiteFieldMode::Both;
        let params = ScanParams::resolve(&config, (2048, 2048));
        assert_eq!(params.rotation_start, 180.0);
        assert_eq!(params.rotation_end, 0.0);
        assert_eq!(params.num_capture(), 1500 + 40 + 20);
    }

    #[test]
    fn test_fixed_slew_speed_wins() {
        let mut config = ScanConfig::default();
        config.stage_settings.slew_speed = Some(2.0);
        let mut params = ScanParams::resolve(&config, (2048, 2048));
        assert_eq!(params.slew_speed, 2.0);
        assert!((params.flyscan_timeout().as_secs_f64() - 120.0).abs() < 1e-6);

        params.set_projections(1501);
        assert_eq!(params.num_projections, 1501);
        assert_eq!(params.slew_speed, 2.0);
    }
}
