//! Campaign tests against the simulated IOC.
//!
//! Time is paused, so stage moves, settle sleeps and the fly scan complete
//! instantly while keeping their ordering.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tomoscan::cli::ScanOverrides;
use tomoscan::config::{ScanConfig, ScanType, Station};
use tomoscan::pv::sim::SimOptions;
use tomoscan::pv::{Channels, Pv, PvTable, PvValue, SimulatedIoc};
use tomoscan::scan::{check_detector, run_campaign};
use tomoscan::storage::read_sidecar;
use tomoscan::ScanError;

fn small_config(data_dir: &Path) -> ScanConfig {
    let mut config = ScanConfig::default();
    config.file.file_name = Some("coral".into());
    config.file.file_path = Some(data_dir.to_path_buf());
    config.scan.num_projections = 60;
    config.scan.num_white_images = 2;
    config.scan.num_dark_images = 2;
    config.detector.exposure_time = 0.01;
    config.detector.ccd_readout = 0.01;
    config.sample_motion.sample_out_position = 4.0;
    config
}

fn simulated(options: SimOptions) -> (SimulatedIoc, Channels) {
    let table = PvTable::new(Station::TwoBmA, "2bmbSP1:", &BTreeMap::new()).unwrap();
    let ioc = SimulatedIoc::with_options(table.clone(), options);
    let channels = Channels::new(Arc::new(ioc.clone()), table, Duration::from_millis(10));
    (ioc, channels)
}

fn never() -> std::future::Pending<()> {
    std::future::pending()
}

#[tokio::test(start_paused = true)]
async fn standard_scan_persists_record_and_config() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("tomoscan.toml");
    let data_dir = dir.path().join("data");
    let mut config = small_config(&data_dir);
    config.scan.scan_counter = 7;
    let (ioc, channels) = simulated(SimOptions::default());

    let records = run_campaign(&channels, &mut config, &config_path, never())
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].file_name, "coral_007");
    assert_eq!(config.scan.scan_counter, 8);

    let sidecar = read_sidecar(&data_dir.join("coral_007.json")).unwrap();
    assert_eq!(sidecar.scan_id, records[0].scan_id);
    assert_eq!(sidecar.theta.len(), 60);

    // the saved file carries the next counter, the copy sits next to the data
    let saved = ScanConfig::load(&config_path, &ScanOverrides::default()).unwrap();
    assert_eq!(saved.scan.scan_counter, 8);
    assert!(data_dir.join("coral_007.toml").exists());

    assert_eq!(ioc.value(Pv::ShutterStatus).await, PvValue::Int(0));
}

#[tokio::test(start_paused = true)]
async fn mosaic_visits_every_tile() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("tomoscan.toml");
    let mut config = small_config(dir.path());
    config.scan.scan_type = ScanType::Mosaic;
    config.scan.vertical_scan_start = 0.0;
    config.scan.vertical_scan_end = 2.0;
    config.scan.vertical_scan_step_size = 1.0;
    config.scan.horizontal_scan_start = 0.0;
    config.scan.horizontal_scan_end = 3.0;
    config.scan.horizontal_scan_step_size = 1.5;
    let (ioc, channels) = simulated(SimOptions::default());

    let records = run_campaign(&channels, &mut config, &config_path, never())
        .await
        .unwrap();

    let names: Vec<&str> = records.iter().map(|r| r.file_name.as_str()).collect();
    assert_eq!(names, ["coral_000", "coral_001", "coral_002", "coral_003"]);
    let tiles: Vec<(f64, f64)> = records.iter().map(|r| (r.sample_y, r.sample_x)).collect();
    assert_eq!(tiles, [(0.0, 0.0), (0.0, 1.5), (1.0, 0.0), (1.0, 1.5)]);
    assert_eq!(config.scan.scan_counter, 4);

    // X follows each tile; the white field takes it out to 4.0 and back
    let x_moves = ioc.puts_to(Pv::MotorSampleX).await;
    assert_eq!(x_moves.len(), 4 * 3);
    assert_eq!(ioc.puts_to(Pv::MotorSampleY).await.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn vertical_scan_uses_one_file_per_height() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("tomoscan.toml");
    let mut config = small_config(dir.path());
    config.scan.scan_type = ScanType::Vertical;
    config.scan.vertical_scan_start = 1.0;
    config.scan.vertical_scan_end = 1.6;
    config.scan.vertical_scan_step_size = 0.2;
    let (_ioc, channels) = simulated(SimOptions::default());

    let records = run_campaign(&channels, &mut config, &config_path, never())
        .await
        .unwrap();

    assert_eq!(records.len(), 3);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.file_name, format!("coral_{i:03}"));
        assert!(Path::new(&dir.path().join(format!("coral_{i:03}.json"))).exists());
    }
    assert!((records[2].sample_y - 1.4).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn repeats_wait_between_data_sets() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("tomoscan.toml");
    let mut config = small_config(dir.path());
    config.scan.sleep_steps = 3;
    config.scan.sleep_time = 120.0;
    let (_ioc, channels) = simulated(SimOptions::default());

    let clock = tokio::time::Instant::now();
    let records = run_campaign(&channels, &mut config, &config_path, never())
        .await
        .unwrap();

    assert_eq!(records.len(), 3);
    assert!(clock.elapsed() >= Duration::from_secs(240));
    assert_eq!(config.scan.scan_counter, 3);
}

#[tokio::test(start_paused = true)]
async fn furnace_is_parked_after_campaign() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("tomoscan.toml");
    let mut config = small_config(dir.path());
    config.furnace.use_furnace = true;
    config.furnace.furnace_in_position = 2.0;
    config.furnace.furnace_out_position = 48.0;
    let (ioc, channels) = simulated(SimOptions {
        stage_speed: 100.0,
        ..SimOptions::default()
    });

    run_campaign(&channels, &mut config, &config_path, never())
        .await
        .unwrap();

    // out and back in for the white field, then parked
    assert_eq!(
        ioc.puts_to(Pv::MotorFurnaceY).await,
        vec![
            PvValue::Float(48.0),
            PvValue::Float(2.0),
            PvValue::Float(48.0)
        ]
    );
    assert_eq!(ioc.value(Pv::MotorSampleX).await, PvValue::Float(0.0));
}

#[tokio::test(start_paused = true)]
async fn stop_request_leaves_beamline_safe() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("tomoscan.toml");
    let mut config = small_config(dir.path());
    config.scan.sleep_steps = 2;
    config.scan.sleep_time = 600.0;
    let (ioc, channels) = simulated(SimOptions::default());

    // the first data set finishes well inside this, the second never starts
    let stop = tokio::time::sleep(Duration::from_secs(300));
    let err = run_campaign(&channels, &mut config, &config_path, stop)
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Interrupted));
    assert_eq!(config.scan.scan_counter, 1);
    assert_eq!(ioc.value(Pv::ShutterStatus).await, PvValue::Int(0));
    assert_eq!(ioc.value(Pv::FlyScanControl).await, PvValue::from("Standard"));
    assert_eq!(ioc.value(Pv::HdfCapture).await, PvValue::Int(0));
}

#[tokio::test(start_paused = true)]
async fn offline_detector_aborts_before_moving() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("tomoscan.toml");
    let mut config = small_config(dir.path());
    let (ioc, channels) = simulated(SimOptions {
        detector_online: false,
        ..SimOptions::default()
    });

    let err = run_campaign(&channels, &mut config, &config_path, never())
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::DetectorOffline { .. }));
    assert!(ioc.puts_to(Pv::MotorSampleX).await.is_empty());
    assert!(!config_path.exists());
}

#[tokio::test(start_paused = true)]
async fn detector_check_takes_one_frame() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let (ioc, channels) = simulated(SimOptions::default());

    let model = check_detector(&channels, &config).await.unwrap();

    assert_eq!(model, "Oryx ORX-10G-51S5M");
    assert_eq!(ioc.value(Pv::CamNumImages).await, PvValue::Int(1));
    assert_eq!(
        ioc.puts_to(Pv::CamFrameType).await,
        vec![PvValue::Int(0), PvValue::Int(0)]
    );
    assert_eq!(ioc.value(Pv::CamAcquire).await, PvValue::Int(0));
}
