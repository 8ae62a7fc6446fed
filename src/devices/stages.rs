//! Sample rotation and translation stages, and the furnace stage.
//!
//! White fields need the sample out of the beam. Which stage moves is chosen by
//! `sample_in_out`; with a furnace mounted the furnace drops out together with
//! the sample. A frozen sample never moves.

use crate::config::{InOutAxis, ScanConfig};
use crate::error::AppResult;
use crate::pv::{Channels, Pv};
use std::time::Duration;

/// Stage positions and motion rules resolved from configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct StagePositions {
    /// Stage that moves the sample out of the beam.
    pub axis: InOutAxis,
    /// Keep the sample in place for white fields.
    pub freeze: bool,
    /// In-beam position.
    pub sample_in: f64,
    /// Out-of-beam position.
    pub sample_out: f64,
    /// Move the furnace out with the sample.
    pub use_furnace: bool,
    /// Furnace in-beam position.
    pub furnace_in: f64,
    /// Furnace out-of-beam position.
    pub furnace_out: f64,
}

impl StagePositions {
    /// Read positions from the `sample_motion` and `furnace` sections.
    pub fn from_config(config: &ScanConfig) -> Self {
        let motion = &config.sample_motion;
        Self {
            axis: motion.sample_in_out,
            freeze: motion.sample_move_freeze,
            sample_in: motion.sample_in_position,
            sample_out: motion.sample_out_position,
            use_furnace: config.furnace.use_furnace,
            furnace_in: config.furnace.furnace_in_position,
            furnace_out: config.furnace.furnace_out_position,
        }
    }

    /// The furnace follows the sample only for unfrozen horizontal moves.
    pub fn furnace_active(&self) -> bool {
        self.use_furnace && !self.freeze && self.axis == InOutAxis::Horizontal
    }
}

/// Rotation, sample X/Y and furnace motors.
#[derive(Clone)]
pub struct SampleStages {
    ch: Channels,
    positions: StagePositions,
    move_timeout: Duration,
}

impl SampleStages {
    /// Stages on `ch`; every move waits at most `move_timeout`.
    pub fn new(ch: Channels, positions: StagePositions, move_timeout: Duration) -> Self {
        Self {
            ch,
            positions,
            move_timeout,
        }
    }

    /// Configured positions.
    pub fn positions(&self) -> &StagePositions {
        &self.positions
    }

    /// Take the sample out of the beam for white fields.
    pub async fn move_sample_out(&self) -> AppResult<()> {
        let p = &self.positions;
        if p.freeze {
            tracing::info!("sample motion frozen, sample stays in the beam");
            return Ok(());
        }
        match p.axis {
            InOutAxis::Vertical => {
                tracing::info!(position = p.sample_out, "moving sample Y out");
                self.move_to(Pv::MotorSampleY, p.sample_out).await
            }
            InOutAxis::Horizontal => {
                if p.furnace_active() {
                    tracing::info!(position = p.furnace_out, "moving furnace out");
                    self.move_to(Pv::MotorFurnaceY, p.furnace_out).await?;
                }
                tracing::info!(position = p.sample_out, "moving sample X out");
                self.move_to(Pv::MotorSampleX, p.sample_out).await
            }
        }
    }

    /// Bring the sample back into the beam.
    pub async fn move_sample_in(&self) -> AppResult<()> {
        let p = &self.positions;
        if p.freeze {
            return Ok(());
        }
        match p.axis {
            InOutAxis::Vertical => {
                tracing::info!(position = p.sample_in, "moving sample Y in");
                self.move_to(Pv::MotorSampleY, p.sample_in).await
            }
            InOutAxis::Horizontal => {
                tracing::info!(position = p.sample_in, "moving sample X in");
                self.move_to(Pv::MotorSampleX, p.sample_in).await?;
                if p.furnace_active() {
                    tracing::info!(position = p.furnace_in, "moving furnace in");
                    self.move_to(Pv::MotorFurnaceY, p.furnace_in).await?;
                }
                Ok(())
            }
        }
    }

    /// Move the rotation stage and wait.
    pub async fn move_rotation(&self, angle: f64) -> AppResult<()> {
        self.move_to(Pv::MotorSampleRot, angle).await
    }

    /// Move sample X and wait.
    pub async fn move_sample_x(&self, position: f64) -> AppResult<()> {
        self.move_to(Pv::MotorSampleX, position).await
    }

    /// Move sample Y and wait.
    pub async fn move_sample_y(&self, position: f64) -> AppResult<()> {
        self.move_to(Pv::MotorSampleY, position).await
    }

    /// Move the furnace to its out position, regardless of the motion rules.
    pub async fn park_furnace(&self) -> AppResult<()> {
        tracing::info!(position = self.positions.furnace_out, "parking furnace");
        self.move_to(Pv::MotorFurnaceY, self.positions.furnace_out)
            .await
    }

    /// Rotation speed (deg/s) and acceleration time (s).
    pub async fn configure_rotation(&self, speed: f64, acceleration: f64) -> AppResult<()> {
        self.ch.put(Pv::MotorSampleRotSpeed, speed).await?;
        self.ch.put(Pv::MotorSampleRotAccl, acceleration).await?;
        Ok(())
    }

    /// Stop the rotation stage.
    pub async fn stop_rotation(&self) -> AppResult<()> {
        self.ch.put(Pv::MotorSampleRotStop, 1).await
    }

    /// Current `(rotation, x, y)` readbacks.
    pub async fn readback(&self) -> AppResult<(f64, f64, f64)> {
        Ok((
            self.ch.get_f64(Pv::MotorSampleRot).await?,
            self.ch.get_f64(Pv::MotorSampleX).await?,
            self.ch.get_f64(Pv::MotorSampleY).await?,
        ))
    }

    async fn move_to(&self, pv: Pv, position: f64) -> AppResult<()> {
        self.ch.put_wait(pv, position, self.move_timeout).await
    }
}
