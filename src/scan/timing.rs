//! Rotation speed, scan duration and motion blur for a fly scan.

use std::time::Duration;

/// Fixed allowance added to the fly scan time estimate (acceleration, taxi,
/// trigger latency).
pub const FLYSCAN_MARGIN: Duration = Duration::from_secs(30);

/// Rotation speed and timing of one fly scan.
#[derive(Clone, Debug, PartialEq)]
pub struct RotationTiming {
    /// Degrees between projections (negative for reverse scans).
    pub angular_step: f64,
    /// Exposure plus readout, in seconds.
    pub frame_time: f64,
    /// Frames per second.
    pub frame_rate: f64,
    /// Rotation speed in deg/s.
    pub rotation_speed: f64,
    /// Time spent rotating through the range, in seconds.
    pub scan_time: f64,
    /// Angle swept during one exposure, in degrees.
    pub blur_angle: f64,
    /// Motion blur at the edge of the field of view, in pixels.
    pub blur_pixels: f64,
}

impl RotationTiming {
    /// Compute timing for `projections` frames over `start..end`.
    ///
    /// The continuous-rotation speed makes one frame period cover one angular
    /// step; `slow_factor` in (0, 1] slows the rotation below that.
    pub fn compute(
        start: f64,
        end: f64,
        projections: u32,
        exposure: f64,
        readout: f64,
        roi_x: u32,
        slow_factor: f64,
    ) -> Self {
        let range = end - start;
        let n = f64::from(projections.max(1));
        let frame_time = exposure + readout;
        let rotation_speed = range.abs() / (n * frame_time) * slow_factor;
        let scan_time = if rotation_speed > 0.0 {
            range.abs() / rotation_speed
        } else {
            0.0
        };
        let blur_angle = exposure * rotation_speed;
        let mid = f64::from(roi_x) / 2.0;
        let blur_pixels = mid * (1.0 - blur_angle.to_radians().cos());

        Self {
            angular_step: range / n,
            frame_time,
            frame_rate: if frame_time > 0.0 { 1.0 / frame_time } else { 0.0 },
            rotation_speed,
            scan_time,
            blur_angle,
            blur_pixels,
        }
    }

    /// Upper bound on the fly scan duration, used as its wait timeout.
    pub fn flyscan_time_estimate(&self) -> Duration {
        Duration::from_secs_f64(self.scan_time.max(0.0)) + FLYSCAN_MARGIN
    }
}
