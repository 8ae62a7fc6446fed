//! PSO fly-scan controller.
//!
//! The controller owns the rotation during a fly scan and emits one detector
//! trigger per `scanDelta` degrees. Its trigger count is authoritative: the
//! camera must be armed for exactly that many frames.

use crate::error::{AppResult, ScanError};
use crate::pv::{Channels, Pv};
use std::time::Duration;

/// Time the controller needs to recompute its trigger count.
const CALC_SETTLE: Duration = Duration::from_secs(3);

/// Trigger list source of the fly controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanControl {
    /// Evenly spaced triggers from start, end and delta.
    Standard,
    /// Triggers from a loaded angle list.
    Custom,
}

impl ScanControl {
    fn as_str(self) -> &'static str {
        match self {
            ScanControl::Standard => "Standard",
            ScanControl::Custom => "Custom",
        }
    }
}

/// PSO fly-scan controller.
#[derive(Clone)]
pub struct FlyController {
    ch: Channels,
}

impl FlyController {
    /// Controller reached through `ch`.
    pub fn new(ch: Channels) -> Self {
        Self { ch }
    }

    /// Program the scan range and return the controller's trigger count.
    pub async fn configure(&self, start: f64, end: f64, delta: f64, slew: f64) -> AppResult<u32> {
        tracing::debug!(start, end, delta, slew, "configuring fly scan");
        self.ch.put(Pv::FlyStartPos, start).await?;
        self.ch.put(Pv::FlyEndPos, end).await?;
        self.ch.put(Pv::FlySlewSpeed, slew).await?;
        self.ch.put(Pv::FlyScanDelta, delta).await?;
        tokio::time::sleep(CALC_SETTLE).await;

        let triggers = match self.calculated_projections().await {
            Some(n) => n,
            None => {
                tracing::warn!("error getting fly calculated number of projections, retrying");
                self.calculated_projections()
                    .await
                    .ok_or_else(|| ScanError::PvAccess {
                        pv: self.ch.name(Pv::FlyCalcProjections).to_string(),
                        message: "no calculated projection count".to_string(),
                    })?
            }
        };
        Ok(triggers)
    }

    async fn calculated_projections(&self) -> Option<u32> {
        match self.ch.get_i64(Pv::FlyCalcProjections).await {
            Ok(n) if n > 0 => u32::try_from(n).ok(),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!(error = %err, "trigger count read failed");
                None
            }
        }
    }

    /// Select the trigger list source.
    pub async fn set_scan_control(&self, mode: ScanControl) -> AppResult<()> {
        self.ch.put(Pv::FlyScanControl, mode.as_str()).await
    }

    /// Move the rotation to the acceleration start point.
    pub async fn taxi(&self, timeout: Duration) -> AppResult<()> {
        tracing::info!("taxi to fly scan start");
        self.ch.put_wait(Pv::FlyTaxi, 1, timeout).await?;
        if !self.ch.wait_for(Pv::FlyTaxi, 0, Some(timeout)).await {
            tracing::warn!("taxi did not report done");
        }
        Ok(())
    }

    /// Run the fly scan and wait for the controller to finish.
    pub async fn run(&self, timeout: Duration) -> AppResult<()> {
        tracing::info!(estimate_s = timeout.as_secs_f64(), "fly scan start");
        self.ch.put_wait(Pv::FlyRun, 1, timeout).await?;
        if !self.ch.wait_for(Pv::FlyRun, 0, Some(timeout)).await {
            tracing::warn!("fly scan did not report done");
        }
        tracing::info!("fly scan done");
        Ok(())
    }

    /// Rotation angle recorded at each of the first `count` triggers.
    pub async fn theta(&self, count: usize) -> AppResult<Vec<f64>> {
        let value = self.ch.get(Pv::ThetaArray).await?;
        let mut theta = value.as_array().ok_or_else(|| ScanError::PvType {
            pv: self.ch.name(Pv::ThetaArray).to_string(),
            expected: "array",
            found: value.kind().to_string(),
        })?;
        theta.truncate(count);
        Ok(theta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Station;
    use crate::pv::{PvTable, PvValue, SimulatedIoc};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn setup() -> (SimulatedIoc, FlyController) {
        let table = PvTable::new(Station::TwoBmA, "2bmbSP1:", &BTreeMap::new()).unwrap();
        let ioc = SimulatedIoc::new(table.clone());
        let ch = Channels::new(Arc::new(ioc.clone()), table, Duration::from_millis(10));
        (ioc, FlyController::new(ch))
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_returns_controller_count() {
        let (_ioc, fly) = setup();
        // 180 / 0.25 = 720 triggers
        let n = fly.configure(0.0, 180.0, 0.25, 10.0).await.unwrap();
        assert_eq!(n, 720);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_count_is_an_error() {
        let (ioc, fly) = setup();
        // with a zero step the controller never produces a count
        ioc.set(Pv::FlyScanDelta, 0.0).await;
        ioc.set(Pv::FlyCalcProjections, 0).await;
        let err = fly.configure(0.0, 180.0, 0.0, 10.0).await.unwrap_err();
        assert!(err.to_string().contains("numTriggers"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_taxi_run_and_theta() {
        let (ioc, fly) = setup();
        fly.configure(10.0, 20.0, 1.0, 5.0).await.unwrap();
        fly.set_scan_control(ScanControl::Custom).await.unwrap();
        fly.taxi(Duration::from_secs(10)).await.unwrap();
        assert_eq!(ioc.value(Pv::MotorSampleRot).await, PvValue::Float(10.0));

        fly.run(Duration::from_secs(10)).await.unwrap();
        let theta = fly.theta(4).await.unwrap();
        assert_eq!(theta, vec![10.0, 11.0, 12.0, 13.0]);
        assert_eq!(ioc.value(Pv::FlyScanControl).await, PvValue::from("Custom"));
    }
}
