//! Simulated IOC
//!
//! Serves every control point of a [`PvTable`] from memory and imitates the
//! device behaviour the scan recipe depends on, so whole scans can run without
//! a beamline. All timing uses `tokio::time::sleep`, which lets tests run with
//! a paused clock.
//!
//! # Simulated Behaviour
//!
//! - Motors: move at a fixed speed (rotation uses its `.VELO` field)
//! - Camera: internal-trigger acquisitions finish after `NumImages * AcquirePeriod`;
//!   external-trigger acquisitions finish when a fly scan delivers the triggers
//! - HDF writer: counts frames while capturing and stops at `NumCapture`
//! - Shutters: status readback follows open/close after a short delay
//! - PSO controller: trigger count from start/end/delta, taxi, fly run with theta array

use super::names::{Pv, PvTable};
use super::{PvClient, PvValue};
use crate::error::{AppResult, ScanError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

/// Tunables for the simulated devices.
#[derive(Clone, Debug)]
pub struct SimOptions {
    /// Translation stage speed in mm/sec.
    pub stage_speed: f64,
    /// When false, every camera IOC channel fails to connect.
    pub detector_online: bool,
    /// Time for the shutter status to follow a command.
    pub shutter_delay: Duration,
    /// Time the PSO taxi move takes.
    pub taxi_time: Duration,
    /// Rotation encoder step (deg) the PSO controller rounds `scanDelta` to;
    /// zero keeps the requested step.
    pub encoder_resolution: f64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            stage_speed: 10.0,
            detector_online: true,
            shutter_delay: Duration::from_millis(200),
            taxi_time: Duration::from_millis(500),
            encoder_resolution: 0.0,
        }
    }
}

struct SimInner {
    table: PvTable,
    options: SimOptions,
    values: RwLock<HashMap<Pv, PvValue>>,
    history: RwLock<Vec<(Pv, PvValue)>>,
}

/// In-memory IOC serving one station's control points.
#[derive(Clone)]
pub struct SimulatedIoc {
    inner: Arc<SimInner>,
}

fn initial_value(pv: Pv) -> PvValue {
    match pv {
        Pv::CamModel => PvValue::from("Oryx ORX-10G-51S5M"),
        Pv::CamSerialNumber => PvValue::from("18431580"),
        Pv::CamAcquireTime | Pv::CamAcquirePeriod => PvValue::Float(0.1),
        Pv::CamNumImages => PvValue::Int(1),
        Pv::CamImageMode => PvValue::from("Multiple"),
        Pv::CamTriggerMode => PvValue::from("Internal"),
        Pv::CamSizeX => PvValue::Int(2448),
        Pv::CamSizeY => PvValue::Int(2048),
        Pv::HdfFileName => PvValue::from("sample"),
        Pv::HdfFilePath => PvValue::from("/local/data/"),
        Pv::HdfFileWriteMode => PvValue::from("Stream"),
        Pv::HdfFullFileName => PvValue::from(""),
        Pv::HdfEnableCallbacks => PvValue::Int(1),
        Pv::ProcNumFilter => PvValue::Int(1),
        Pv::MotorSampleRot | Pv::MotorSampleX | Pv::MotorSampleY | Pv::MotorFurnaceY => {
            PvValue::Float(0.0)
        }
        Pv::MotorSampleRotSpeed => PvValue::Float(50.0),
        Pv::MotorSampleRotAccl => PvValue::Float(1.0),
        Pv::FlyStartPos => PvValue::Float(0.0),
        Pv::FlyEndPos => PvValue::Float(180.0),
        Pv::FlyScanDelta => PvValue::Float(0.12),
        Pv::FlySlewSpeed => PvValue::Float(1.0),
        Pv::FlyScanControl => PvValue::from("Standard"),
        Pv::FlyCalcProjections => PvValue::Int(1500),
        Pv::ThetaArray => PvValue::FloatArray(Vec::new()),
        _ => PvValue::Int(0),
    }
}

fn is_motor(pv: Pv) -> bool {
    matches!(
        pv,
        Pv::MotorSampleRot | Pv::MotorSampleX | Pv::MotorSampleY | Pv::MotorFurnaceY
    )
}

impl SimulatedIoc {
    /// Create a simulated IOC with default device behaviour.
    pub fn new(table: PvTable) -> Self {
        Self::with_options(table, SimOptions::default())
    }

    /// IOC with non-default behaviour.
    pub fn with_options(table: PvTable, options: SimOptions) -> Self {
        let values = Pv::ALL.iter().map(|pv| (*pv, initial_value(*pv))).collect();
        Self {
            inner: Arc::new(SimInner {
                table,
                options,
                values: RwLock::new(values),
                history: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Current value of a control point.
    pub async fn value(&self, pv: Pv) -> PvValue {
        self.read(pv).await
    }

    /// Preload a value without triggering any device behaviour.
    pub async fn set(&self, pv: Pv, value: impl Into<PvValue>) {
        self.write(pv, value.into()).await;
    }

    /// Every write received through the client interface, in order.
    pub async fn puts(&self) -> Vec<(Pv, PvValue)> {
        self.inner.history.read().await.clone()
    }

    /// Values written to one control point, in order.
    pub async fn puts_to(&self, pv: Pv) -> Vec<PvValue> {
        self.inner
            .history
            .read()
            .await
            .iter()
            .filter(|(target, _)| *target == pv)
            .map(|(_, value)| value.clone())
            .collect()
    }

    async fn read(&self, pv: Pv) -> PvValue {
        self.inner
            .values
            .read()
            .await
            .get(&pv)
            .cloned()
            .unwrap_or(PvValue::Int(0))
    }

    async fn read_f64(&self, pv: Pv) -> f64 {
        self.read(pv).await.as_f64().unwrap_or(0.0)
    }

    async fn read_i64(&self, pv: Pv) -> i64 {
        self.read(pv).await.as_i64().unwrap_or(0)
    }

    async fn write(&self, pv: Pv, value: PvValue) {
        self.inner.values.write().await.insert(pv, value);
    }

    fn resolve(&self, name: &str) -> AppResult<Pv> {
        let pv = self
            .inner
            .table
            .lookup(name)
            .ok_or_else(|| ScanError::pv_access(name, "channel not found"))?;
        if pv.is_detector() && !self.inner.options.detector_online {
            return Err(ScanError::pv_access(name, "channel connect timed out"));
        }
        Ok(pv)
    }

    async fn external_trigger(&self) -> bool {
        match self.read(Pv::CamTriggerMode).await {
            PvValue::Str(mode) => mode != "Internal",
            other => other.as_i64().unwrap_or(0) != 0,
        }
    }

    async fn recompute_triggers(&self) {
        let start = self.read_f64(Pv::FlyStartPos).await;
        let end = self.read_f64(Pv::FlyEndPos).await;
        let mut delta = self.read_f64(Pv::FlyScanDelta).await;
        let resolution = self.inner.options.encoder_resolution;
        if resolution > 0.0 {
            delta = (delta / resolution).round() * resolution;
            self.write(Pv::FlyScanDelta, PvValue::Float(delta)).await;
        }
        if delta.abs() > f64::EPSILON {
            let triggers = ((end - start) / delta).abs().round() as i64;
            self.write(Pv::FlyCalcProjections, PvValue::Int(triggers)).await;
        }
    }

    /// Frames reaching the plugin chain.
    async fn deliver_frames(&self, count: i64) {
        let counter = self.read_i64(Pv::CamNumImagesCounter).await;
        self.write(Pv::CamNumImagesCounter, PvValue::Int(counter + count))
            .await;

        if self.read_i64(Pv::HdfCaptureRbv).await == 1 {
            let captured = self.read_i64(Pv::HdfNumCaptured).await + count;
            self.write(Pv::HdfNumCaptured, PvValue::Int(captured)).await;
            if captured >= self.read_i64(Pv::HdfNumCapture).await {
                self.write(Pv::HdfCapture, PvValue::Int(0)).await;
                self.write(Pv::HdfCaptureRbv, PvValue::Int(0)).await;
            }
        }
    }

    /// Immediate effect of a write. Returns true when the record keeps processing.
    async fn begin(&self, pv: Pv, value: &PvValue) -> bool {
        match pv {
            _ if is_motor(pv) => true,
            Pv::CamAcquire => {
                let start = value.as_i64().unwrap_or(0) != 0;
                self.write(pv, PvValue::Int(i64::from(start))).await;
                start && !self.external_trigger().await
            }
            Pv::HdfCapture => {
                if value.as_i64().unwrap_or(0) != 0 {
                    let path = self.read(Pv::HdfFilePath).await.as_string();
                    let name = self.read(Pv::HdfFileName).await.as_string();
                    let full = format!("{}/{}.h5", path.trim_end_matches('/'), name);
                    self.write(Pv::HdfFullFileName, PvValue::Str(full)).await;
                    self.write(Pv::HdfNumCaptured, PvValue::Int(0)).await;
                    self.write(Pv::HdfCapture, PvValue::Int(1)).await;
                    self.write(Pv::HdfCaptureRbv, PvValue::Int(1)).await;
                } else {
                    self.write(Pv::HdfCapture, PvValue::Int(0)).await;
                    self.write(Pv::HdfCaptureRbv, PvValue::Int(0)).await;
                }
                false
            }
            Pv::FlyStartPos | Pv::FlyEndPos | Pv::FlyScanDelta => {
                self.write(pv, value.clone()).await;
                self.recompute_triggers().await;
                false
            }
            Pv::FlyTaxi | Pv::FlyRun => {
                let start = value.as_i64().unwrap_or(0) != 0;
                self.write(pv, PvValue::Int(i64::from(start))).await;
                start
            }
            Pv::ShutterOpen | Pv::ShutterClose => {
                self.write(pv, value.clone()).await;
                true
            }
            _ => {
                self.write(pv, value.clone()).await;
                false
            }
        }
    }

    /// Completion of a processing record: motion, acquisition, fly scan.
    async fn complete(&self, pv: Pv, value: PvValue) {
        match pv {
            _ if is_motor(pv) => {
                let target = value.as_f64().unwrap_or(0.0);
                let current = self.read_f64(pv).await;
                let speed = if pv == Pv::MotorSampleRot {
                    self.read_f64(Pv::MotorSampleRotSpeed).await
                } else {
                    self.inner.options.stage_speed
                };
                if speed > 0.0 {
                    sleep(Duration::from_secs_f64((target - current).abs() / speed)).await;
                }
                self.write(pv, PvValue::Float(target)).await;
                tracing::trace!(pv = ?pv, position = target, "simulated move done");
            }
            Pv::CamAcquire => {
                let images = self.read_i64(Pv::CamNumImages).await.max(0);
                let exposure = self.read_f64(Pv::CamAcquireTime).await;
                let period = self.read_f64(Pv::CamAcquirePeriod).await.max(exposure);
                sleep(Duration::from_secs_f64(images as f64 * period.max(0.0))).await;
                // A stop request during exposure discards the frames.
                if self.read_i64(Pv::CamAcquire).await == 1 {
                    self.deliver_frames(images).await;
                    self.write(Pv::CamAcquire, PvValue::Int(0)).await;
                }
            }
            Pv::FlyTaxi => {
                sleep(self.inner.options.taxi_time).await;
                let start = self.read_f64(Pv::FlyStartPos).await;
                self.write(Pv::MotorSampleRot, PvValue::Float(start)).await;
                self.write(Pv::FlyTaxi, PvValue::Int(0)).await;
            }
            Pv::FlyRun => {
                let start = self.read_f64(Pv::FlyStartPos).await;
                let end = self.read_f64(Pv::FlyEndPos).await;
                let delta = self.read_f64(Pv::FlyScanDelta).await;
                let slew = self.read_f64(Pv::FlySlewSpeed).await;
                if slew > 0.0 {
                    sleep(Duration::from_secs_f64((end - start).abs() / slew)).await;
                }
                let triggers = self.read_i64(Pv::FlyCalcProjections).await.max(0);
                let theta = (0..triggers).map(|i| start + i as f64 * delta).collect();
                self.write(Pv::ThetaArray, PvValue::FloatArray(theta)).await;
                self.write(Pv::MotorSampleRot, PvValue::Float(end)).await;

                if self.read_i64(Pv::CamAcquire).await == 1 && self.external_trigger().await {
                    let wanted = self.read_i64(Pv::CamNumImages).await;
                    self.deliver_frames(triggers.min(wanted)).await;
                    self.write(Pv::CamAcquire, PvValue::Int(0)).await;
                }
                self.write(Pv::FlyRun, PvValue::Int(0)).await;
            }
            Pv::ShutterOpen | Pv::ShutterClose => {
                sleep(self.inner.options.shutter_delay).await;
                if value.as_i64().unwrap_or(0) != 0 {
                    let open = i64::from(pv == Pv::ShutterOpen);
                    self.write(Pv::ShutterStatus, PvValue::Int(open)).await;
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl PvClient for SimulatedIoc {
    async fn get(&self, name: &str) -> AppResult<PvValue> {
        let pv = self.resolve(name)?;
        Ok(self.read(pv).await)
    }

    async fn put(&self, name: &str, value: PvValue) -> AppResult<()> {
        let pv = self.resolve(name)?;
        self.inner.history.write().await.push((pv, value.clone()));
        if self.begin(pv, &value).await {
            let ioc = self.clone();
            tokio::spawn(async move { ioc.complete(pv, value).await });
        }
        Ok(())
    }

    async fn put_wait(&self, name: &str, value: PvValue, timeout: Duration) -> AppResult<()> {
        let pv = self.resolve(name)?;
        self.inner.history.write().await.push((pv, value.clone()));
        if self.begin(pv, &value).await {
            tokio::time::timeout(timeout, self.complete(pv, value))
                .await
                .map_err(|_| ScanError::PvTimeout {
                    pv: name.to_string(),
                    timeout,
                })?;
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Station;
    use crate::pv::wait_pv;
    use std::collections::BTreeMap;

    fn table() -> PvTable {
        PvTable::new(Station::TwoBmA, "2bmbSP1:", &BTreeMap::new()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_motor_put_wait_reaches_target() {
        let ioc = SimulatedIoc::new(table());
        let name = ioc.inner.table.name(Pv::MotorSampleX).to_string();

        ioc.put_wait(&name, PvValue::Float(10.0), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ioc.value(Pv::MotorSampleX).await, PvValue::Float(10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_motor_put_wait_times_out() {
        let ioc = SimulatedIoc::new(table());
        let name = ioc.inner.table.name(Pv::MotorSampleY).to_string();

        // 100 mm at 10 mm/s cannot finish in 1 s
        let err = ioc
            .put_wait(&name, PvValue::Float(100.0), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::PvTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_internal_acquisition_feeds_hdf_writer() {
        let ioc = SimulatedIoc::new(table());
        let t = table();
        ioc.put(t.name(Pv::HdfNumCapture), PvValue::Int(5)).await.unwrap();
        ioc.put(t.name(Pv::HdfCapture), PvValue::Int(1)).await.unwrap();
        ioc.put(t.name(Pv::CamNumImages), PvValue::Int(5)).await.unwrap();
        ioc.put(t.name(Pv::CamAcquire), PvValue::Int(1)).await.unwrap();

        assert_eq!(ioc.value(Pv::CamAcquire).await, PvValue::Int(1));
        let done = wait_pv(
            &ioc,
            t.name(Pv::CamAcquire),
            &PvValue::Int(0),
            Some(Duration::from_secs(5)),
            Duration::from_millis(10),
        )
        .await;
        assert!(done);
        assert_eq!(ioc.value(Pv::HdfNumCaptured).await, PvValue::Int(5));
        assert_eq!(ioc.value(Pv::HdfCaptureRbv).await, PvValue::Int(0));
        assert_eq!(
            ioc.value(Pv::HdfFullFileName).await,
            PvValue::from("/local/data/sample.h5")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fly_run_triggers_external_acquisition() {
        let ioc = SimulatedIoc::new(table());
        let t = table();
        ioc.put(t.name(Pv::FlyStartPos), PvValue::Float(0.0)).await.unwrap();
        ioc.put(t.name(Pv::FlyEndPos), PvValue::Float(180.0)).await.unwrap();
        ioc.put(t.name(Pv::FlyScanDelta), PvValue::Float(0.5)).await.unwrap();
        assert_eq!(ioc.value(Pv::FlyCalcProjections).await, PvValue::Int(360));

        ioc.put(t.name(Pv::FlySlewSpeed), PvValue::Float(90.0)).await.unwrap();
        ioc.put(t.name(Pv::CamNumImages), PvValue::Int(360)).await.unwrap();
        ioc.put(t.name(Pv::CamTriggerMode), PvValue::from("Overlapped"))
            .await
            .unwrap();
        ioc.put(t.name(Pv::CamAcquire), PvValue::Int(1)).await.unwrap();
        ioc.put_wait(t.name(Pv::FlyRun), PvValue::Int(1), Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(ioc.value(Pv::CamAcquire).await, PvValue::Int(0));
        assert_eq!(ioc.value(Pv::CamNumImagesCounter).await, PvValue::Int(360));
        let theta = ioc.value(Pv::ThetaArray).await.as_array().unwrap();
        assert_eq!(theta.len(), 360);
        assert_eq!(theta[2], 1.0);
        assert_eq!(ioc.value(Pv::MotorSampleRot).await, PvValue::Float(180.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutter_status_follows_command() {
        let ioc = SimulatedIoc::new(table());
        let t = table();
        ioc.put_wait(t.name(Pv::ShutterOpen), PvValue::Int(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ioc.value(Pv::ShutterStatus).await, PvValue::Int(1));
        ioc.put_wait(t.name(Pv::ShutterClose), PvValue::Int(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ioc.value(Pv::ShutterStatus).await, PvValue::Int(0));
    }

    #[tokio::test]
    async fn test_offline_detector_rejects_camera_channels() {
        let options = SimOptions {
            detector_online: false,
            ..Default::default()
        };
        let ioc = SimulatedIoc::with_options(table(), options);
        let t = table();
        assert!(ioc.get(t.name(Pv::CamModel)).await.is_err());
        assert!(ioc.get(t.name(Pv::MotorSampleX)).await.is_ok());
        assert!(ioc.get("not:a:pv").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_pv_times_out_without_error() {
        let ioc = SimulatedIoc::new(table());
        let t = table();
        let reached = wait_pv(
            &ioc,
            t.name(Pv::FlyTaxi),
            &PvValue::Int(1),
            Some(Duration::from_secs(2)),
            Duration::from_millis(10),
        )
        .await;
        assert!(!reached);
    }

    #[tokio::test]
    async fn test_history_records_puts() {
        let ioc = SimulatedIoc::new(table());
        let t = table();
        ioc.put(t.name(Pv::CamFrameType), PvValue::Int(2)).await.unwrap();
        ioc.put(t.name(Pv::CamFrameType), PvValue::Int(1)).await.unwrap();
        assert_eq!(
            ioc.puts_to(Pv::CamFrameType).await,
            vec![PvValue::Int(2), PvValue::Int(1)]
        );
        assert_eq!(ioc.puts().await.len(), 2);
    }
}
