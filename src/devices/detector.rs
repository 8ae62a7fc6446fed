//! Area detector camera driver (`cam1:` records).

use crate::error::{AppResult, ScanError};
use crate::pv::{Channels, Pv};
use std::time::Duration;

const IDLE: i64 = 0;
const ACQUIRE: i64 = 1;

/// How long to wait for the camera to report that acquisition started.
const START_TIMEOUT: Duration = Duration::from_secs(2);
/// Slack on top of the frame time before an acquisition is forced idle.
const FINISH_MARGIN: Duration = Duration::from_secs(30);

/// Frame type tag stored with every image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    /// Projection image.
    Data,
    /// Dark field, beam off.
    Dark,
    /// Flat field, sample out.
    White,
}

impl FrameType {
    /// Value written to the camera's frame type record.
    pub fn code(self) -> i64 {
        match self {
            FrameType::Data => 0,
            FrameType::Dark => 1,
            FrameType::White => 2,
        }
    }
}

/// Camera trigger source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerMode {
    /// Free running, timed by the camera.
    Internal,
    /// One frame per PSO pulse, exposure overlapping readout.
    Overlapped,
}

impl TriggerMode {
    fn as_str(self) -> &'static str {
        match self {
            TriggerMode::Internal => "Internal",
            TriggerMode::Overlapped => "Overlapped",
        }
    }
}

/// Area detector camera.
#[derive(Clone)]
pub struct Detector {
    ch: Channels,
    prefix: String,
}

impl Detector {
    /// Camera at `prefix`, reached through `ch`.
    pub fn new(ch: Channels, prefix: &str) -> Self {
        Self {
            ch,
            prefix: prefix.to_string(),
        }
    }

    /// Camera IOC prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Camera model string.
    ///
    /// Fails with `DetectorOffline` when the IOC does not answer. Other
    /// failures, such as a missing `caget`, are returned unchanged.
    pub async fn model(&self) -> AppResult<String> {
        match self.ch.get_string(Pv::CamModel).await {
            Ok(model) if !model.trim().is_empty() => Ok(model),
            Ok(_) | Err(ScanError::PvAccess { .. } | ScanError::PvTimeout { .. }) => {
                Err(ScanError::DetectorOffline {
                    prefix: self.prefix.clone(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Check the camera answers and log its identity.
    pub async fn ensure_online(&self) -> AppResult<String> {
        let model = self.model().await?;
        let serial = self
            .ch
            .get_string(Pv::CamSerialNumber)
            .await
            .unwrap_or_default();
        tracing::info!(
            prefix = %self.prefix,
            model = %model,
            serial = %serial,
            "detector is on"
        );
        Ok(model)
    }

    /// Image size `(x, y)` in pixels.
    pub async fn roi(&self) -> AppResult<(u32, u32)> {
        let x = self.ch.get_i64(Pv::CamSizeX).await?;
        let y = self.ch.get_i64(Pv::CamSizeY).await?;
        let to_u32 = |v: i64| u32::try_from(v.max(0)).unwrap_or(u32::MAX);
        Ok((to_u32(x), to_u32(y)))
    }

    /// Exposure time and frame period in seconds.
    pub async fn set_exposure(&self, exposure: f64, readout: f64) -> AppResult<()> {
        self.ch.put(Pv::CamAcquireTime, exposure).await?;
        self.ch.put(Pv::CamAcquirePeriod, exposure + readout).await?;
        tracing::debug!(exposure, readout, "exposure set");
        Ok(())
    }

    /// Switch trigger mode and image count.
    pub async fn set_trigger_mode(&self, mode: TriggerMode) -> AppResult<()> {
        self.ch.put(Pv::CamTriggerMode, mode.as_str()).await
    }

    /// Stop any acquisition and select internal trigger, multiple-image mode.
    pub async fn init(&self) -> AppResult<()> {
        self.stop().await?;
        self.set_trigger_mode(TriggerMode::Internal).await?;
        self.ch.put(Pv::CamImageMode, "Multiple").await?;
        self.ch.put(Pv::CamFrameType, FrameType::Data.code()).await?;
        tracing::debug!(prefix = %self.prefix, "detector initialised");
        Ok(())
    }

    /// Acquire `count` internally triggered frames tagged `frame_type`.
    ///
    /// Waits for the acquisition to start and to finish. An acquisition that
    /// does not finish within `count * frame_time + 30 s` is forced idle.
    pub async fn acquire_frames(
        &self,
        count: u32,
        frame_type: FrameType,
        frame_time: f64,
    ) -> AppResult<()> {
        self.ch.put(Pv::CamFrameType, frame_type.code()).await?;
        self.set_trigger_mode(TriggerMode::Internal).await?;
        self.ch.put(Pv::CamNumImages, count).await?;

        tracing::info!(count, frame_type = ?frame_type, "acquiring frames");
        self.ch.put(Pv::CamAcquire, ACQUIRE).await?;
        self.ch
            .wait_for(Pv::CamAcquire, ACQUIRE, Some(START_TIMEOUT))
            .await;

        let limit = Duration::from_secs_f64(f64::from(count) * frame_time.max(0.0)) + FINISH_MARGIN;
        self.wait_idle(limit).await
    }

    /// Arm the camera for `count` externally triggered projections.
    pub async fn arm_projections(&self, count: u32) -> AppResult<()> {
        self.ch.put(Pv::CamFrameType, FrameType::Data.code()).await?;
        self.ch.put(Pv::CamNumImages, count).await?;
        self.set_trigger_mode(TriggerMode::Overlapped).await?;
        self.ch.put(Pv::CamAcquire, ACQUIRE).await?;
        if !self.ch.wait_for(Pv::CamAcquire, ACQUIRE, Some(START_TIMEOUT)).await {
            tracing::warn!(prefix = %self.prefix, "detector did not report acquiring");
        }
        tracing::debug!(count, "detector armed for projections");
        Ok(())
    }

    /// Wait for the projection acquisition to end, then return to internal trigger.
    pub async fn finish_projections(&self, timeout: Duration) -> AppResult<()> {
        self.wait_idle(timeout).await?;
        self.set_trigger_mode(TriggerMode::Internal).await
    }

    /// Return the camera to free-running live view.
    pub async fn reset(&self) -> AppResult<()> {
        self.stop().await?;
        self.set_trigger_mode(TriggerMode::Internal).await?;
        self.ch.put(Pv::CamFrameType, FrameType::Data.code()).await?;
        self.ch.put(Pv::CamImageMode, "Continuous").await?;
        self.ch.put(Pv::CamAcquire, ACQUIRE).await?;
        tracing::debug!(prefix = %self.prefix, "detector back in live view");
        Ok(())
    }

    /// Stop acquisition and wait for the camera to go idle.
    pub async fn stop(&self) -> AppResult<()> {
        self.ch.put(Pv::CamAcquire, IDLE).await
    }

    /// Frames counted by the driver since the last reset.
    pub async fn frame_counter(&self) -> AppResult<i64> {
        self.ch.get_i64(Pv::CamNumImagesCounter).await
    }

    async fn wait_idle(&self, timeout: Duration) -> AppResult<()> {
        if !self.ch.wait_for(Pv::CamAcquire, IDLE, Some(timeout)).await {
            tracing::warn!(
                prefix = %self.prefix,
                timeout_s = timeout.as_secs_f64(),
                "acquisition did not finish, forcing detector idle"
            );
            self.stop().await?;
        }
        Ok(())
    }
}
