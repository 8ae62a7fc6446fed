//! HDF5 file writer and recursive filter plugins.

use crate::config::FileWriteMode;
use crate::error::{AppResult, ScanError};
use crate::pv::{Channels, Pv};
use std::path::Path;
use std::time::Duration;

const CAPTURE_START_TIMEOUT: Duration = Duration::from_secs(10);
const CAPTURE_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// HDF5 file writer plugin.
#[derive(Clone)]
pub struct HdfWriter {
    ch: Channels,
}

impl HdfWriter {
    /// Plugin reached through `ch`.
    pub fn new(ch: Channels) -> Self {
        Self { ch }
    }

    /// Point the writer at `path/name` and size the capture.
    ///
    /// `path` is left untouched when `None`, so the directory an operator set in
    /// the IOC screens is kept.
    pub async fn setup(
        &self,
        path: Option<&Path>,
        name: &str,
        num_capture: u32,
        mode: FileWriteMode,
    ) -> AppResult<()> {
        self.ch.put(Pv::HdfEnableCallbacks, 1).await?;
        if let Some(path) = path {
            self.ch
                .put(Pv::HdfFilePath, path.display().to_string())
                .await?;
        }
        self.ch.put(Pv::HdfFileName, name).await?;
        self.ch.put(Pv::HdfFileWriteMode, mode.to_string()).await?;
        self.ch.put(Pv::HdfNumCapture, num_capture).await?;
        tracing::debug!(file_name = name, num_capture, mode = %mode, "HDF writer configured");
        Ok(())
    }

    /// Start capturing and wait for the plugin to confirm.
    pub async fn start_capture(&self) -> AppResult<()> {
        self.ch.put(Pv::HdfCapture, 1).await?;
        if !self
            .ch
            .wait_for(Pv::HdfCaptureRbv, 1, Some(CAPTURE_START_TIMEOUT))
            .await
        {
            return Err(ScanError::PvTimeout {
                pv: self.ch.name(Pv::HdfCaptureRbv).to_string(),
                timeout: CAPTURE_START_TIMEOUT,
            });
        }
        Ok(())
    }

    /// Wait for the capture to finish writing. Returns false and forces capture
    /// off when `timeout` runs out.
    pub async fn wait_done(&self, timeout: Duration) -> AppResult<bool> {
        let done = self.ch.wait_for(Pv::HdfCaptureRbv, 0, Some(timeout)).await;
        if !done {
            tracing::warn!(
                timeout_s = timeout.as_secs_f64(),
                "HDF writer still capturing, stopping capture"
            );
        }
        if !self
            .ch
            .wait_for(Pv::HdfCapture, 0, Some(CAPTURE_STOP_TIMEOUT))
            .await
        {
            self.stop().await?;
        }
        Ok(done)
    }

    /// File name template.
    pub async fn file_name(&self) -> AppResult<String> {
        self.ch.get_string(Pv::HdfFileName).await
    }

    /// Directory the plugin writes to.
    pub async fn file_path(&self) -> AppResult<String> {
        self.ch.get_string(Pv::HdfFilePath).await
    }

    /// Full path of the file being (or last) written.
    pub async fn full_file_name(&self) -> AppResult<String> {
        self.ch.get_string(Pv::HdfFullFileName).await
    }

    /// Frames captured so far.
    pub async fn num_captured(&self) -> AppResult<i64> {
        self.ch.get_i64(Pv::HdfNumCaptured).await
    }

    /// Stop capture.
    pub async fn stop(&self) -> AppResult<()> {
        self.ch.put(Pv::HdfCapture, 0).await
    }
}

/// Averages consecutive frames before they reach the file writer.
#[derive(Clone)]
pub struct RecursiveFilter {
    ch: Channels,
}

impl RecursiveFilter {
    /// Plugin reached through `ch`.
    pub fn new(ch: Channels) -> Self {
        Self { ch }
    }

    /// Enable or disable filtering over `n_images` frames.
    pub async fn configure(&self, enabled: bool, images: u32) -> AppResult<()> {
        self.ch.put(Pv::ProcEnableFilter, enabled).await?;
        self.ch.put(Pv::ProcNumFilter, images.max(1)).await?;
        Ok(())
    }
}
