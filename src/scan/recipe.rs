//! One tomography data set: white field, fly scan, dark field.

use super::params::{ScanParams, HDF_WRITE_TIMEOUT};
use crate::config::ScanConfig;
use crate::devices::{Beamline, FrameType, ScanControl, TriggerMode};
use crate::error::AppResult;
use crate::storage::ScanRecord;
use chrono::Utc;
use std::path::Path;
use tokio::time::{sleep, Instant};

/// Runs the acquisition recipe against one station's devices.
pub struct TomoScan<'a> {
    devices: &'a Beamline,
    config: &'a ScanConfig,
}

impl<'a> TomoScan<'a> {
    /// Recipe driving `devices` with settings from `config`.
    pub fn new(devices: &'a Beamline, config: &'a ScanConfig) -> Self {
        Self { devices, config }
    }

    /// Collect one data set into `file_name`.
    ///
    /// `data_dir` overrides the HDF writer's directory. On any error the
    /// beamline is made safe before the error is returned.
    pub async fn run(&self, file_name: &str, data_dir: Option<&Path>) -> AppResult<ScanRecord> {
        match self.execute(file_name, data_dir).await {
            Ok(record) => Ok(record),
            Err(err) => {
                tracing::error!(error = %err, file_name, "scan failed, cleaning up");
                cleanup(self.devices).await;
                Err(err)
            }
        }
    }

    async fn execute(&self, file_name: &str, data_dir: Option<&Path>) -> AppResult<ScanRecord> {
        let d = self.devices;
        let started = Utc::now();
        let clock = Instant::now();

        // Detector and timing
        let model = d.detector.ensure_online().await?;
        d.detector
            .set_exposure(self.config.detector.exposure_time, self.config.detector.ccd_readout)
            .await?;
        let roi = d.detector.roi().await?;
        let mut params = ScanParams::resolve(self.config, roi);

        // Fly scan setup; the controller's trigger count is authoritative
        d.stages.move_rotation(params.rotation_start).await?;
        d.stages
            .configure_rotation(params.slew_speed, params.accl_rot)
            .await?;
        let triggers = d
            .fly
            .configure(
                params.rotation_start,
                params.rotation_end,
                params.timing.angular_step,
                params.slew_speed,
            )
            .await?;
        if triggers != params.num_projections {
            tracing::info!(
                from = params.num_projections,
                to = triggers,
                "updating number of projections to the fly controller's trigger count"
            );
            params.set_projections(triggers);
        }
        d.fly.set_scan_control(ScanControl::Custom).await?;
        tracing::info!(
            projections = params.num_projections,
            rotation_speed = params.slew_speed,
            scan_time_min = params.timing.scan_time / 60.0,
            blur_pixels = params.timing.blur_pixels,
            "fly scan timing"
        );

        // Detector, filter and file writer
        d.detector.init().await?;
        d.filter
            .configure(params.recursive_filter, params.recursive_filter_n_images)
            .await?;
        d.hdf
            .setup(data_dir, file_name, params.num_capture(), params.write_mode)
            .await?;
        d.hdf.start_capture().await?;

        if !params.start_sleep.is_zero() {
            tracing::info!(seconds = params.start_sleep.as_secs_f64(), "start sleep");
            sleep(params.start_sleep).await;
        }
        d.shutters.open().await?;

        if params.white_field.before() {
            self.white_field(&params).await?;
        }

        let theta = self.projections(&params).await?;

        if params.white_field.after() {
            self.white_field(&params).await?;
        }

        // Dark field
        d.shutters.close().await?;
        sleep(params.dark_settle).await;
        tracing::info!(count = params.num_dark_images, "capturing dark field");
        d.detector
            .acquire_frames(params.num_dark_images, FrameType::Dark, params.frame_time())
            .await?;

        // Finish the file and hand the detector back
        d.hdf.wait_done(HDF_WRITE_TIMEOUT).await?;
        d.fly.set_scan_control(ScanControl::Standard).await?;
        d.detector.reset().await?;

        let data_file = d.hdf.full_file_name().await?;
        let file_path = match data_dir {
            Some(dir) => dir.display().to_string(),
            None => d.hdf.file_path().await?,
        };
        let (_, sample_x, sample_y) = d.stages.readback().await?;
        let duration = clock.elapsed();
        tracing::info!(
            file = %data_file,
            minutes = duration.as_secs_f64() / 60.0,
            "data set complete"
        );

        Ok(ScanRecord {
            scan_id: ScanRecord::new_id(),
            file_name: file_name.to_string(),
            file_path,
            data_file,
            started,
            finished: Utc::now(),
            duration_s: duration.as_secs_f64(),
            detector_model: model,
            num_projections: params.num_projections,
            num_white_images: params.num_white_images,
            num_dark_images: params.num_dark_images,
            exposure_time: params.exposure_time,
            rotation_start: params.rotation_start,
            rotation_end: params.rotation_end,
            slew_speed: params.slew_speed,
            blur_pixels: params.timing.blur_pixels,
            theta,
            sample_x,
            sample_y,
            host: ScanRecord::host(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    async fn white_field(&self, params: &ScanParams) -> AppResult<()> {
        let d = self.devices;
        tracing::info!(count = params.num_white_images, "capturing white field");
        d.stages.move_sample_out().await?;
        d.detector
            .acquire_frames(params.num_white_images, FrameType::White, params.frame_time())
            .await?;
        d.stages.move_sample_in().await
    }

    async fn projections(&self, params: &ScanParams) -> AppResult<Vec<f64>> {
        let d = self.devices;
        let timeout = params.flyscan_timeout();
        tracing::info!(
            estimate_min = timeout.as_secs_f64() / 60.0,
            "fly scan time estimate"
        );

        d.fly.taxi(self.config.pv.move_timeout).await?;
        d.detector.arm_projections(params.num_projections).await?;
        d.fly.run(timeout).await?;
        d.detector.finish_projections(timeout).await?;
        d.fly.theta(params.num_projections as usize).await
    }
}

/// Leave the beamline safe after an error or abort.
///
/// Every step is attempted; failures are logged.
pub async fn cleanup(devices: &Beamline) {
    tracing::warn!("stopping scan: closing shutters, stopping detector and file writer");
    if let Err(err) = devices.shutters.close().await {
        tracing::error!(error = %err, "cleanup: closing shutters failed");
    }
    if let Err(err) = devices.detector.stop().await {
        tracing::error!(error = %err, "cleanup: stopping detector failed");
    }
    if let Err(err) = devices.detector.set_trigger_mode(TriggerMode::Internal).await {
        tracing::error!(error = %err, "cleanup: resetting trigger mode failed");
    }
    if let Err(err) = devices.hdf.stop().await {
        tracing::error!(error = %err, "cleanup: stopping capture failed");
    }
    if let Err(err) = devices.fly.set_scan_control(ScanControl::Standard).await {
        tracing::error!(error = %err, "cleanup: resetting scan control failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InOutAxis, Station, WhiteFieldMode};
    use crate::error::ScanError;
    use crate::pv::sim::SimOptions;
    use crate::pv::{Channels, Pv, PvTable, PvValue, SimulatedIoc};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn small_config() -> ScanConfig {
        let mut config = ScanConfig::default();
        config.scan.num_projections = 90;
        config.scan.num_white_images = 4;
        config.scan.num_dark_images = 3;
        config.detector.exposure_time = 0.01;
        config.detector.ccd_readout = 0.01;
        config.sample_motion.sample_out_position = 5.0;
        config
    }

    fn setup(config: &ScanConfig, options: SimOptions) -> (SimulatedIoc, Beamline) {
        let table = PvTable::new(Station::TwoBmA, "2bmbSP1:", &BTreeMap::new()).unwrap();
        let ioc = SimulatedIoc::with_options(table.clone(), options);
        let ch = Channels::new(Arc::new(ioc.clone()), table, Duration::from_millis(10));
        (ioc, Beamline::new(&ch, config))
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_data_set() {
        let config = small_config();
        let (ioc, beamline) = setup(&config, SimOptions::default());

        let record = TomoScan::new(&beamline, &config)
            .run("sample_000", Some(Path::new("/local/data/test")))
            .await
            .unwrap();

        assert_eq!(record.num_projections, 90);
        assert_eq!(record.data_file, "/local/data/test/sample_000.h5");
        assert_eq!(record.theta.len(), 90);
        assert!((record.theta[1] - 2.0).abs() < 1e-9);
        assert_eq!(record.detector_model, "Oryx ORX-10G-51S5M");

        // every frame reached the file and capture finished on its own
        assert_eq!(ioc.value(Pv::HdfNumCaptured).await, PvValue::Int(90 + 4 + 3));
        assert_eq!(ioc.value(Pv::HdfCaptureRbv).await, PvValue::Int(0));
        assert_eq!(ioc.value(Pv::ShutterStatus).await, PvValue::Int(0));
        assert_eq!(ioc.value(Pv::FlyScanControl).await, PvValue::from("Standard"));

        // white (sample out, then back in) before dark
        let frame_types = ioc.puts_to(Pv::CamFrameType).await;
        let white = frame_types.iter().position(|v| *v == PvValue::Int(2)).unwrap();
        let dark = frame_types.iter().position(|v| *v == PvValue::Int(1)).unwrap();
        assert!(white < dark);
        assert_eq!(
            ioc.puts_to(Pv::MotorSampleX).await,
            vec![PvValue::Float(5.0), PvValue::Float(0.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_white_field_moves_vertical_stage() {
        let mut config = small_config();
        config.scan.white_field = WhiteFieldMode::Post;
        config.sample_motion.sample_in_out = InOutAxis::Vertical;
        let (ioc, beamline) = setup(&config, SimOptions::default());

        TomoScan::new(&beamline, &config).run("sample_001", None).await.unwrap();

        assert_eq!(ioc.puts_to(Pv::MotorSampleY).await.len(), 2);
        assert!(ioc.puts_to(Pv::MotorSampleX).await.is_empty());
        // projections were acquired before the white field
        let frame_types = ioc.puts_to(Pv::CamFrameType).await;
        let white = frame_types.iter().position(|v| *v == PvValue::Int(2)).unwrap();
        assert!(frame_types[..white].contains(&PvValue::Int(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_count_replaces_projections() {
        let mut config = small_config();
        config.scan.num_projections = 700;
        let (ioc, beamline) = setup(
            &config,
            SimOptions {
                // 180 / 700 = 0.2571 rounds to 0.26, giving 692 triggers
                encoder_resolution: 0.01,
                ..SimOptions::default()
            },
        );

        let record = TomoScan::new(&beamline, &config).run("s", None).await.unwrap();
        assert_eq!(record.num_projections, 692);
        assert_eq!(record.theta.len(), 692);
        // the camera was armed for the controller's count, not the configured one
        let armed = ioc.puts_to(Pv::CamNumImages).await;
        assert!(armed.contains(&PvValue::Int(692)));
        assert!(!armed.contains(&PvValue::Int(700)));
        assert_eq!(
            ioc.value(Pv::HdfNumCapture).await,
            PvValue::Int(692 + 4 + 3)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_detector_cleans_up() {
        let config = small_config();
        let (ioc, beamline) = setup(
            &config,
            SimOptions {
                detector_online: false,
                ..SimOptions::default()
            },
        );

        let err = TomoScan::new(&beamline, &config)
            .run("sample_000", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::DetectorOffline { .. }));
        assert_eq!(ioc.puts_to(Pv::ShutterClose).await, vec![PvValue::Int(1)]);
        assert_eq!(ioc.value(Pv::FlyScanControl).await, PvValue::from("Standard"));
    }
}
