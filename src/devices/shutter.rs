//! Front-end / station shutters.

use crate::error::AppResult;
use crate::pv::{Channels, Pv};
use std::time::Duration;

const OPEN: i64 = 1;
const CLOSED: i64 = 0;
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Beam shutter.
#[derive(Clone)]
pub struct Shutters {
    ch: Channels,
    /// Settle time after the shutter reports open.
    open_delay: Duration,
}

impl Shutters {
    /// Shutter on `ch` that settles for `open_delay_s` after opening.
    pub fn new(ch: Channels, open_delay_s: f64) -> Self {
        Self {
            ch,
            open_delay: Duration::from_secs_f64(open_delay_s.max(0.0)),
        }
    }

    /// Open and wait for the beam.
    pub async fn open(&self) -> AppResult<()> {
        tracing::info!("opening shutters");
        self.ch.put(Pv::ShutterOpen, 1).await?;
        if !self
            .ch
            .wait_for(Pv::ShutterStatus, OPEN, Some(STATUS_TIMEOUT))
            .await
        {
            tracing::warn!("shutter status did not report open");
        }
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        Ok(())
    }

    /// Close and wait for the status to follow.
    pub async fn close(&self) -> AppResult<()> {
        tracing::info!("closing shutters");
        self.ch.put(Pv::ShutterClose, 1).await?;
        if !self
            .ch
            .wait_for(Pv::ShutterStatus, CLOSED, Some(STATUS_TIMEOUT))
            .await
        {
            tracing::warn!("shutter status did not report closed");
        }
        Ok(())
    }

    /// Current shutter state.
    pub async fn is_open(&self) -> AppResult<bool> {
        Ok(self.ch.get_i64(Pv::ShutterStatus).await? == OPEN)
    }
}
