//! Acquisition recipe and campaigns.
//!
//! A campaign visits every planned sample position and collects
//! `sleep_steps` data sets at each one, waiting `sleep_time` between them
//! (furnace time series). After each data set the record and configuration are
//! persisted and the scan counter advances, so an interrupted campaign can be
//! resumed from the configuration file.
//!
//! # Campaign Flow
//!
//! ```text
//! positions() ──► for each (y, x) ──► for each repeat ──► TomoScan::run
//!                                                        └► sidecar, dx metadata,
//!                                                           transfer, config copy
//! ```

pub mod params;
pub mod plan;
pub mod recipe;
pub mod timing;

pub use params::ScanParams;
pub use plan::{arange, positions, ScanPosition};
pub use recipe::{cleanup, TomoScan};
pub use timing::RotationTiming;

use crate::config::{ConfigEntry, InOutAxis, ScanConfig};
use crate::devices::{Beamline, FrameType};
use crate::error::{AppResult, ScanError};
use crate::pv::Channels;
use crate::storage::{self, ScanRecord};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Collect every data set the configuration describes.
///
/// Returns the records of all completed data sets. `stop` resolving aborts the
/// campaign: the beamline is made safe and `Interrupted` is returned.
pub async fn run_campaign<F>(
    channels: &Channels,
    config: &mut ScanConfig,
    config_path: &Path,
    stop: F,
) -> AppResult<Vec<ScanRecord>>
where
    F: Future<Output = ()>,
{
    let safety = Beamline::new(channels, config);
    let outcome = {
        let work = collect(channels, config, config_path);
        tokio::select! {
            result = work => Some(result),
            () = stop => None,
        }
    };

    match outcome {
        Some(result) => result,
        None => {
            tracing::warn!("scan interrupted by operator");
            cleanup(&safety).await;
            Err(ScanError::Interrupted)
        }
    }
}

/// Resolves when the operator presses ctrl-c.
///
/// If the signal handler cannot be installed this never resolves.
pub async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

async fn collect(
    channels: &Channels,
    config: &mut ScanConfig,
    config_path: &Path,
) -> AppResult<Vec<ScanRecord>> {
    let plan = positions(&config.scan)?;
    let base = Beamline::new(channels, config);
    base.detector.ensure_online().await?;

    let base_name = match &config.file.file_name {
        Some(name) => base_file_name(name),
        None => base_file_name(&base.hdf.file_name().await?),
    };
    let data_dir = match &config.file.file_path {
        Some(path) => path.clone(),
        None => PathBuf::from(base.hdf.file_path().await?),
    };
    let repeats = config.scan.sleep_steps.max(1);
    tracing::info!(
        scan_type = ?config.scan.scan_type,
        positions = plan.len(),
        repeats,
        base_name = %base_name,
        data_dir = %data_dir.display(),
        "starting campaign"
    );

    let mut records = Vec::new();
    for position in &plan {
        let at = positioned(config, position);
        let devices = Beamline::new(channels, &at);
        if let Some(y) = position.y {
            tracing::info!(y, "moving sample Y");
            devices.stages.move_sample_y(y).await?;
        }
        if let Some(x) = position.x {
            tracing::info!(x, "moving sample X");
            devices.stages.move_sample_x(x).await?;
        }

        for repeat in 0..repeats {
            if repeat > 0 && config.scan.sleep_time > 0.0 {
                tracing::info!(seconds = config.scan.sleep_time, "waiting before next data set");
                tokio::time::sleep(Duration::from_secs_f64(config.scan.sleep_time)).await;
            }

            let file_name = format!("{base_name}_{:03}", config.scan.scan_counter);
            tracing::info!(
                file_name = %file_name,
                repeat = repeat + 1,
                of = repeats,
                "collecting data set"
            );
            let record = TomoScan::new(&devices, &at)
                .run(&file_name, config.file.file_path.as_deref())
                .await?;

            persist(
                config,
                config_path,
                &data_dir,
                &record,
                storage::write_dx_metadata,
            )?;
            if config.file_transfer.remote_data_transfer {
                storage::transfer(
                    Path::new(&record.data_file),
                    &config.file_transfer.remote_analysis_dir,
                )
                .await;
            }
            records.push(record);
        }
    }

    if config.furnace.use_furnace {
        base.stages.park_furnace().await?;
        base.stages
            .move_sample_x(config.sample_motion.sample_in_position)
            .await?;
    }

    tracing::info!(data_sets = records.len(), "campaign complete");
    Ok(records)
}

/// Configuration for one position: the sample's "in" position follows the
/// stage the campaign moved.
fn positioned(config: &ScanConfig, position: &ScanPosition) -> ScanConfig {
    let mut at = config.clone();
    match at.sample_motion.sample_in_out {
        InOutAxis::Horizontal => {
            if let Some(x) = position.x {
                at.sample_motion.sample_in_position = x;
            }
        }
        InOutAxis::Vertical => {
            if let Some(y) = position.y {
                at.sample_motion.sample_in_position = y;
            }
        }
    }
    at
}

/// Record a finished data set.
///
/// The advanced scan counter reaches the configuration file first, so a
/// failure to annotate the data file cannot cause the next data set to reuse
/// this file name. Sidecar and data file failures are logged.
fn persist<W>(
    config: &mut ScanConfig,
    config_path: &Path,
    data_dir: &Path,
    record: &ScanRecord,
    write_metadata: W,
) -> AppResult<()>
where
    W: FnOnce(&Path, &ScanRecord, &[ConfigEntry]) -> AppResult<()>,
{
    if let Err(err) = storage::write_sidecar(record, data_dir) {
        tracing::error!(error = %err, "failed to write scan record");
    }

    config.scan.scan_counter += 1;
    config.update_after_scan(config_path, data_dir, &record.file_name)?;

    if config.dx_options.dx_update {
        let data_file = Path::new(&record.data_file);
        if let Err(err) = write_metadata(data_file, record, &config.entries()?) {
            tracing::error!(
                file = %data_file.display(),
                error = %err,
                "failed to store scan parameters in the data file"
            );
        }
    }
    Ok(())
}

/// Strip a trailing `_NNN` counter so repeated campaigns do not nest suffixes.
fn base_file_name(name: &str) -> String {
    match name.rsplit_once('_') {
        Some((stem, counter))
            if !stem.is_empty()
                && counter.len() == 3
                && counter.chars().all(|c| c.is_ascii_digit()) =>
        {
            stem.to_string()
        }
        _ => name.to_string(),
    }
}

/// Check the detector answers and can take a frame.
///
/// Returns the camera model.
pub async fn check_detector(channels: &Channels, config: &ScanConfig) -> AppResult<String> {
    let devices = Beamline::new(channels, config);
    let model = devices.detector.ensure_online().await?;
    devices.detector.init().await?;
    devices
        .detector
        .set_exposure(config.detector.exposure_time, config.detector.ccd_readout)
        .await?;

    let before = devices.detector.frame_counter().await?;
    devices
        .detector
        .acquire_frames(
            1,
            FrameType::Data,
            config.detector.exposure_time + config.detector.ccd_readout,
        )
        .await?;
    let after = devices.detector.frame_counter().await?;
    if after <= before {
        tracing::warn!(prefix = %devices.detector.prefix(), "test frame not counted");
    }

    let (x, y) = devices.detector.roi().await?;
    tracing::info!(model = %model, size_x = x, size_y = y, "detector test passed");
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_file_name() {
        assert_eq!(base_file_name("coral"), "coral");
        assert_eq!(base_file_name("coral_004"), "coral");
        assert_eq!(base_file_name("coral_4"), "coral_4");
        assert_eq!(base_file_name("_004"), "_004");
        assert_eq!(base_file_name("sample_2019_12"), "sample_2019_12");
    }

    #[test]
    fn test_counter_saved_when_data_file_update_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tomoscan.toml");
        let mut config = ScanConfig::default();
        config.scan.scan_counter = 4;
        config.dx_options.dx_update = true;
        let record = crate::storage::tests::sample_record("coral_004");

        persist(&mut config, &config_path, dir.path(), &record, |_, _, _| {
            Err(ScanError::pv_access("/local/data/coral_004.h5", "not mounted"))
        })
        .unwrap();

        assert_eq!(config.scan.scan_counter, 5);
        let saved: ScanConfig = toml::from_str(&std::fs::read_to_string(&config_path).unwrap()).unwrap();
        assert_eq!(saved.scan.scan_counter, 5);
        assert!(dir.path().join("coral_004.json").exists());
        assert!(dir.path().join("coral_004.toml").exists());
    }

    #[test]
    fn test_data_file_updated_after_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tomoscan.toml");
        let mut config = ScanConfig::default();
        config.dx_options.dx_update = true;
        let record = crate::storage::tests::sample_record("coral_000");

        let mut seen = None;
        persist(&mut config, &config_path, dir.path(), &record, |_, _, entries| {
            seen = entries
                .iter()
                .find(|e| e.key == "scan_counter")
                .map(|e| e.value.clone());
            Ok(())
        })
        .unwrap();
        assert!(config_path.exists());
        assert_eq!(seen.as_deref(), Some("1"));
    }

    #[test]
    fn test_positioned_follows_moved_stage() {
        let config = ScanConfig::default();
        let at = positioned(
            &config,
            &ScanPosition {
                y: Some(1.0),
                x: Some(3.5),
            },
        );
        assert_eq!(at.sample_motion.sample_in_position, 3.5);

        let mut config = ScanConfig::default();
        config.sample_motion.sample_in_out = InOutAxis::Vertical;
        let at = positioned(&config, &ScanPosition { y: Some(1.0), x: None });
        assert_eq!(at.sample_motion.sample_in_position, 1.0);
    }
}
