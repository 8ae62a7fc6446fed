//! Typed device wrappers over the PV layer.
//!
//! Each wrapper owns a [`Channels`](crate::pv::Channels) clone and turns the
//! recipe's intent ("take 20 dark frames", "move the sample out") into the
//! sequence of writes and waits the beamline IOCs expect. Waits that run out are
//! logged and followed by a corrective write instead of failing the scan.

pub mod detector;
pub mod fly;
pub mod hdf_writer;
pub mod shutter;
pub mod stages;

pub use detector::{Detector, FrameType, TriggerMode};
pub use fly::{FlyController, ScanControl};
pub use hdf_writer::{HdfWriter, RecursiveFilter};
pub use shutter::Shutters;
pub use stages::{SampleStages, StagePositions};

use crate::config::ScanConfig;
use crate::pv::Channels;

/// All devices of one station, built from a shared channel handle.
#[derive(Clone)]
pub struct Beamline {
    /// Camera.
    pub detector: Detector,
    /// HDF5 writer plugin.
    pub hdf: HdfWriter,
    /// Recursive filter plugin.
    pub filter: RecursiveFilter,
    /// Rotation and sample stages.
    pub stages: SampleStages,
    /// Front-end shutter.
    pub shutters: Shutters,
    /// PSO fly controller.
    pub fly: FlyController,
}

impl Beamline {
    /// Build every device on `channels` from `config`.
    pub fn new(channels: &Channels, config: &ScanConfig) -> Self {
        Self {
            detector: Detector::new(channels.clone(), &config.detector.camera_ioc_prefix),
            hdf: HdfWriter::new(channels.clone()),
            filter: RecursiveFilter::new(channels.clone()),
            stages: SampleStages::new(channels.clone(), StagePositions::from_config(config), config.pv.move_timeout),
            shutters: Shutters::new(channels.clone(), config.beamline.shutter_open_delay),
            fly: FlyController::new(channels.clone()),
        }
    }
}
