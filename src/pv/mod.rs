//! Process-variable control layer.
//!
//! Every device the scan touches is driven through named control points (PVs).
//! This module provides the value type, the [`PvClient`] seam implemented by the
//! Channel Access backend and by the simulated IOC, and the poll-until-value
//! primitive the acquisition recipe is built from.
//!
//! # Data Flow
//!
//! ```text
//! scan recipe --> devices (Detector, Shutters, ...) --> Channels --[PV name]--> PvClient
//! ```
//!
//! [`Channels`] resolves logical [`Pv`] keys through a [`PvTable`] so device code
//! never deals with station-specific PV names.

pub mod ca;
pub mod names;
pub mod sim;

pub use ca::CaToolsClient;
pub use names::{Pv, PvFormat, PvTable};
pub use sim::SimulatedIoc;

use crate::config::{PvBackend, ScanConfig};
use crate::error::{AppResult, ScanError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Tolerance used when comparing floating point readbacks against a target.
pub const EPSILON: f64 = 0.1;

/// A value read from or written to a process variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PvValue {
    /// Integer and enum records (enums are read as their index).
    Int(i64),
    /// Analog records.
    Float(f64),
    /// String and char-array records.
    Str(String),
    /// Waveform records.
    FloatArray(Vec<f64>),
}

impl PvValue {
    /// Numeric view of the value. Strings are parsed when they hold a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PvValue::Int(v) => Some(*v as f64),
            PvValue::Float(v) => Some(*v),
            PvValue::Str(s) => s.trim().parse().ok(),
            PvValue::FloatArray(_) => None,
        }
    }

    /// Integer view of the value. Floats are rounded.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PvValue::Int(v) => Some(*v),
            PvValue::Float(v) => Some(v.round() as i64),
            PvValue::Str(s) => s.trim().parse().ok(),
            PvValue::FloatArray(_) => None,
        }
    }

    /// String view of the value, as `caget` would print it.
    pub fn as_string(&self) -> String {
        self.to_string()
    }

    /// Array view of the value. Scalars become a one element array.
    pub fn as_array(&self) -> Option<Vec<f64>> {
        match self {
            PvValue::FloatArray(values) => Some(values.clone()),
            other => other.as_f64().map(|v| vec![v]),
        }
    }

    /// True when this readback satisfies `target`.
    ///
    /// Floats match within [`EPSILON`], integers match exactly, strings match
    /// verbatim.
    pub fn matches(&self, target: &PvValue) -> bool {
        match (self, target) {
            (PvValue::Int(a), PvValue::Int(b)) => a == b,
            (PvValue::Str(a), PvValue::Str(b)) => a == b,
            (PvValue::FloatArray(a), PvValue::FloatArray(b)) => a == b,
            _ => match (self.as_f64(), target.as_f64()) {
                (Some(a), Some(b)) => (a - b).abs() < EPSILON,
                _ => false,
            },
        }
    }

    /// Short type name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            PvValue::Int(_) => "int",
            PvValue::Float(_) => "float",
            PvValue::Str(_) => "string",
            PvValue::FloatArray(_) => "array",
        }
    }
}

impl fmt::Display for PvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PvValue::Int(v) => write!(f, "{v}"),
            PvValue::Float(v) => write!(f, "{v}"),
            PvValue::Str(s) => f.write_str(s),
            PvValue::FloatArray(values) => {
                let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

impl From<f64> for PvValue {
    fn from(v: f64) -> Self {
        PvValue::Float(v)
    }
}

impl From<i64> for PvValue {
    fn from(v: i64) -> Self {
        PvValue::Int(v)
    }
}

impl From<i32> for PvValue {
    fn from(v: i32) -> Self {
        PvValue::Int(i64::from(v))
    }
}

impl From<u32> for PvValue {
    fn from(v: u32) -> Self {
        PvValue::Int(i64::from(v))
    }
}

impl From<bool> for PvValue {
    fn from(v: bool) -> Self {
        PvValue::Int(i64::from(v))
    }
}

impl From<&str> for PvValue {
    fn from(v: &str) -> Self {
        PvValue::Str(v.to_string())
    }
}

impl From<String> for PvValue {
    fn from(v: String) -> Self {
        PvValue::Str(v)
    }
}

/// Access to named process variables.
///
/// Implementations must be safe to share between the scan task and the
/// ctrl-c cleanup path.
#[async_trait]
pub trait PvClient: Send + Sync {
    /// Read the current value of `name`.
    async fn get(&self, name: &str) -> AppResult<PvValue>;

    /// Write `value` to `name` without waiting for processing to complete.
    async fn put(&self, name: &str, value: PvValue) -> AppResult<()>;

    /// Write `value` to `name` and wait for processing to complete
    /// (motor moves, acquisitions). Fails with `PvTimeout` after `timeout`.
    async fn put_wait(&self, name: &str, value: PvValue, timeout: Duration) -> AppResult<()>;
}

/// Poll `name` until it equals `target`.
///
/// Sleeps one poll interval before the first read so a preceding `put` has a
/// chance to land. Returns `false` once `timeout` elapses; `None` waits forever.
/// Read errors are logged and polling continues.
pub async fn wait_pv(
    client: &dyn PvClient,
    name: &str,
    target: &PvValue,
    timeout: Option<Duration>,
    poll_interval: Duration,
) -> bool {
    sleep(poll_interval).await;
    let start = Instant::now();
    loop {
        match client.get(name).await {
            Ok(value) if value.matches(target) => return true,
            Ok(_) => {}
            Err(err) => tracing::debug!(pv = name, error = %err, "read failed while waiting"),
        }
        if let Some(limit) = timeout {
            if start.elapsed() >= limit {
                tracing::warn!(
                    pv = name,
                    target = %target,
                    timeout_s = limit.as_secs_f64(),
                    "wait_pv reached max timeout"
                );
                return false;
            }
        }
        sleep(poll_interval).await;
    }
}

/// A PV client paired with the table that names every control point.
#[derive(Clone)]
pub struct Channels {
    client: Arc<dyn PvClient>,
    table: Arc<PvTable>,
    poll_interval: Duration,
}

impl Channels {
    /// Channels over `client`, named by `table`, polled every `poll_interval`.
    pub fn new(client: Arc<dyn PvClient>, table: PvTable, poll_interval: Duration) -> Self {
        Self {
            client,
            table: Arc::new(table),
            poll_interval,
        }
    }

    /// Concrete PV name for a logical control point.
    pub fn name(&self, pv: Pv) -> &str {
        self.table.name(pv)
    }

    /// Name table in use.
    pub fn table(&self) -> &PvTable {
        &self.table
    }

    /// Interval used by waits.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Read `pv`.
    pub async fn get(&self, pv: Pv) -> AppResult<PvValue> {
        self.client.get(self.name(pv)).await
    }

    /// Read `pv` as a float.
    pub async fn get_f64(&self, pv: Pv) -> AppResult<f64> {
        let value = self.get(pv).await?;
        value.as_f64().ok_or_else(|| ScanError::PvType {
            pv: self.name(pv).to_string(),
            expected: "number",
            found: value.kind().to_string(),
        })
    }

    /// Read `pv` as an integer.
    pub async fn get_i64(&self, pv: Pv) -> AppResult<i64> {
        let value = self.get(pv).await?;
        value.as_i64().ok_or_else(|| ScanError::PvType {
            pv: self.name(pv).to_string(),
            expected: "integer",
            found: value.kind().to_string(),
        })
    }

    /// Read `pv` as text.
    pub async fn get_string(&self, pv: Pv) -> AppResult<String> {
        Ok(self.get(pv).await?.as_string())
    }

    /// Write `pv` without waiting for completion.
    pub async fn put(&self, pv: Pv, value: impl Into<PvValue>) -> AppResult<()> {
        let value = value.into();
        tracing::trace!(pv = self.name(pv), value = %value, "put");
        self.client.put(self.name(pv), value).await
    }

    /// Write `pv` and wait for the record to finish processing.
    pub async fn put_wait(
        &self,
        pv: Pv,
        value: impl Into<PvValue>,
        timeout: Duration,
    ) -> AppResult<()> {
        let value = value.into();
        tracing::trace!(pv = self.name(pv), value = %value, "put (wait)");
        self.client.put_wait(self.name(pv), value, timeout).await
    }

    /// See [`wait_pv`].
    pub async fn wait_for(
        &self,
        pv: Pv,
        target: impl Into<PvValue>,
        timeout: Option<Duration>,
    ) -> bool {
        wait_pv(
            self.client.as_ref(),
            self.name(pv),
            &target.into(),
            timeout,
            self.poll_interval,
        )
        .await
    }
}

/// Build the channel handle for the configured station, camera and backend.
pub fn connect(config: &ScanConfig) -> AppResult<Channels> {
    let table = PvTable::new(
        config.beamline.station,
        &config.detector.camera_ioc_prefix,
        &config.pv.overrides,
    )?;
    let client: Arc<dyn PvClient> = match config.pv.backend {
        PvBackend::CaTools => Arc::new(CaToolsClient::new(
            config.pv.caget.clone(),
            config.pv.caput.clone(),
            config.pv.connect_timeout,
        )
        .with_formats(&table)),
        PvBackend::Simulated => {
            tracing::warn!("using the simulated IOC, no hardware will move");
            Arc::new(SimulatedIoc::new(table.clone()))
        }
    };
    tracing::debug!(
        station = %config.beamline.station,
        prefix = %config.detector.camera_ioc_prefix,
        backend = ?config.pv.backend,
        "PV channels ready"
    );
    Ok(Channels::new(client, table, config.pv.poll_interval))
}
