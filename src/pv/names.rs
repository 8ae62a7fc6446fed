//! Logical control points and their station-specific PV names.

use crate::config::Station;
use crate::error::{AppResult, ScanError};
use std::collections::{BTreeMap, HashMap};

/// Every control point the scan recipe reads or writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pv {
    /// Camera model string.
    CamModel,
    /// Camera serial number.
    CamSerialNumber,
    /// Start or stop acquisition.
    CamAcquire,
    /// Exposure time.
    CamAcquireTime,
    /// Frame period.
    CamAcquirePeriod,
    /// Images per acquisition.
    CamNumImages,
    /// Images acquired so far.
    CamNumImagesCounter,
    /// Single, multiple or continuous.
    CamImageMode,
    /// Trigger source.
    CamTriggerMode,
    /// Data, dark or white tag.
    CamFrameType,
    /// Image width.
    CamSizeX,
    /// Image height.
    CamSizeY,
    /// File name template.
    HdfFileName,
    /// Output directory.
    HdfFilePath,
    /// Single, capture or stream.
    HdfFileWriteMode,
    /// Frames to capture.
    HdfNumCapture,
    /// Frames captured.
    HdfNumCaptured,
    /// Start or stop capture.
    HdfCapture,
    /// Capture readback.
    HdfCaptureRbv,
    /// Path of the file being written.
    HdfFullFileName,
    /// Plugin callbacks.
    HdfEnableCallbacks,
    /// Recursive filter on or off.
    ProcEnableFilter,
    /// Frames averaged per output image.
    ProcNumFilter,
    /// Rotation stage.
    MotorSampleRot,
    /// Rotation speed.
    MotorSampleRotSpeed,
    /// Rotation acceleration time.
    MotorSampleRotAccl,
    /// Rotation stop.
    MotorSampleRotStop,
    /// Sample X stage.
    MotorSampleX,
    /// Sample Y stage.
    MotorSampleY,
    /// Furnace stage.
    MotorFurnaceY,
    /// Open command.
    ShutterOpen,
    /// Close command.
    ShutterClose,
    /// Open or closed state.
    ShutterStatus,
    /// Fly scan start angle.
    FlyStartPos,
    /// Fly scan end angle.
    FlyEndPos,
    /// Angle between triggers.
    FlyScanDelta,
    /// Rotation speed during the fly scan.
    FlySlewSpeed,
    /// Move to the taxi start position.
    FlyTaxi,
    /// Run the fly scan.
    FlyRun,
    /// Standard or custom trigger list.
    FlyScanControl,
    /// Trigger count computed by the controller.
    FlyCalcProjections,
    /// Angle of every trigger.
    ThetaArray,
}

impl Pv {
    /// All control points, in table order.
    pub const ALL: [Pv; 42] = [
        Pv::CamModel,
        Pv::CamSerialNumber,
        Pv::CamAcquire,
        Pv::CamAcquireTime,
        Pv::CamAcquirePeriod,
        Pv::CamNumImages,
        Pv::CamNumImagesCounter,
        Pv::CamImageMode,
        Pv::CamTriggerMode,
        Pv::CamFrameType,
        Pv::CamSizeX,
        Pv::CamSizeY,
        Pv::HdfFileName,
        Pv::HdfFilePath,
        Pv::HdfFileWriteMode,
        Pv::HdfNumCapture,
        Pv::HdfNumCaptured,
        Pv::HdfCapture,
        Pv::HdfCaptureRbv,
        Pv::HdfFullFileName,
        Pv::HdfEnableCallbacks,
        Pv::ProcEnableFilter,
        Pv::ProcNumFilter,
        Pv::MotorSampleRot,
        Pv::MotorSampleRotSpeed,
        Pv::MotorSampleRotAccl,
        Pv::MotorSampleRotStop,
        Pv::MotorSampleX,
        Pv::MotorSampleY,
        Pv::MotorFurnaceY,
        Pv::ShutterOpen,
        Pv::ShutterClose,
        Pv::ShutterStatus,
        Pv::FlyStartPos,
        Pv::FlyEndPos,
        Pv::FlyScanDelta,
        Pv::FlySlewSpeed,
        Pv::FlyTaxi,
        Pv::FlyRun,
        Pv::FlyScanControl,
        Pv::FlyCalcProjections,
        Pv::ThetaArray,
    ];

    /// Stable key used in the `[pv.overrides]` configuration table.
    pub fn key(self) -> &'static str {
        match self {
            Pv::CamModel => "Cam1_Model",
            Pv::CamSerialNumber => "Cam1_SerialNumber",
            Pv::CamAcquire => "Cam1_Acquire",
            Pv::CamAcquireTime => "Cam1_AcquireTime",
            Pv::CamAcquirePeriod => "Cam1_AcquirePeriod",
            Pv::CamNumImages => "Cam1_NumImages",
            Pv::CamNumImagesCounter => "Cam1_NumImagesCounter",
            Pv::CamImageMode => "Cam1_ImageMode",
            Pv::CamTriggerMode => "Cam1_TriggerMode",
            Pv::CamFrameType => "Cam1_FrameType",
            Pv::CamSizeX => "Cam1_SizeX_RBV",
            Pv::CamSizeY => "Cam1_SizeY_RBV",
            Pv::HdfFileName => "HDF1_FileName",
            Pv::HdfFilePath => "HDF1_FilePath",
            Pv::HdfFileWriteMode => "HDF1_FileWriteMode",
            Pv::HdfNumCapture => "HDF1_NumCapture",
            Pv::HdfNumCaptured => "HDF1_NumCaptured_RBV",
            Pv::HdfCapture => "HDF1_Capture",
            Pv::HdfCaptureRbv => "HDF1_Capture_RBV",
            Pv::HdfFullFileName => "HDF1_FullFileName_RBV",
            Pv::HdfEnableCallbacks => "HDF1_EnableCallbacks",
            Pv::ProcEnableFilter => "Proc1_Enable_Filter",
            Pv::ProcNumFilter => "Proc1_Num_Filter",
            Pv::MotorSampleRot => "Motor_SampleRot",
            Pv::MotorSampleRotSpeed => "Motor_SampleRot_Speed",
            Pv::MotorSampleRotAccl => "Motor_SampleRot_Accl",
            Pv::MotorSampleRotStop => "Motor_SampleRot_Stop",
            Pv::MotorSampleX => "Motor_SampleX",
            Pv::MotorSampleY => "Motor_SampleY",
            Pv::MotorFurnaceY => "Motor_FurnaceY",
            Pv::ShutterOpen => "ShutterA_Open",
            Pv::ShutterClose => "ShutterA_Close",
            Pv::ShutterStatus => "ShutterA_Move_Status",
            Pv::FlyStartPos => "Fly_StartPos",
            Pv::FlyEndPos => "Fly_EndPos",
            Pv::FlyScanDelta => "Fly_ScanDelta",
            Pv::FlySlewSpeed => "Fly_SlewSpeed",
            Pv::FlyTaxi => "Fly_Taxi",
            Pv::FlyRun => "Fly_Run",
            Pv::FlyScanControl => "Fly_ScanControl",
            Pv::FlyCalcProjections => "Fly_Calc_Projections",
            Pv::ThetaArray => "Theta_Array",
        }
    }

    /// Parse an override key back into a control point.
    pub fn from_key(key: &str) -> Option<Pv> {
        Pv::ALL.iter().copied().find(|pv| pv.key() == key)
    }

    /// True for control points served by the camera IOC.
    pub fn is_detector(self) -> bool {
        self.key().starts_with("Cam1_")
            || self.key().starts_with("HDF1_")
            || self.key().starts_with("Proc1_")
    }

    /// How the record's value travels over Channel Access.
    pub fn format(self) -> PvFormat {
        match self {
            Pv::HdfFileName | Pv::HdfFilePath | Pv::HdfFullFileName => PvFormat::CharArray,
            Pv::CamModel | Pv::CamSerialNumber => PvFormat::Text,
            _ => PvFormat::Native,
        }
    }
}

/// Wire format of a control point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PvFormat {
    /// Numbers, enums (read as their index, written by choice name) and waveforms.
    Native,
    /// String record whose text is kept verbatim.
    Text,
    /// Long string stored in a char waveform (`caget -S` / `caput -S`).
    CharArray,
}

impl PvFormat {
    /// Reads are returned as the raw text instead of being parsed.
    pub fn is_text(self) -> bool {
        !matches!(self, PvFormat::Native)
    }
}

/// Station-wide PV names that do not depend on the camera.
struct StationNames {
    rotation: &'static str,
    sample_x: &'static str,
    sample_y: &'static str,
    furnace_y: &'static str,
    shutter_open: &'static str,
    shutter_close: &'static str,
    shutter_status: &'static str,
    pso: &'static str,
}

fn station_names(station: Station) -> StationNames {
    match station {
        Station::TwoBmA => StationNames {
            rotation: "2bma:m82",
            sample_x: "2bma:m49",
            sample_y: "2bma:m20",
            furnace_y: "2bma:m55",
            shutter_open: "2bma:A_shutter:open.VAL",
            shutter_close: "2bma:A_shutter:close.VAL",
            shutter_status: "PA:02BM:STA_A_FES_OPEN_PL",
            pso: "2bma:PSOFly2:",
        },
        Station::TwoBmB => StationNames {
            rotation: "2bmb:m100",
            sample_x: "2bmb:m63",
            sample_y: "2bmb:m57",
            furnace_y: "2bmb:m58",
            shutter_open: "2bma:B_shutter:open.VAL",
            shutter_close: "2bma:B_shutter:close.VAL",
            shutter_status: "PA:02BM:STA_B_SBS_OPEN_PL",
            pso: "2bmb:PSOFly3:",
        },
    }
}

/// Resolved PV names for one station and camera.
#[derive(Clone, Debug)]
pub struct PvTable {
    names: HashMap<Pv, String>,
}

impl PvTable {
    /// Build the table for `station` with the camera at `camera_prefix`.
    ///
    /// `overrides` maps [`Pv::key`] strings to replacement PV names. Unknown
    /// keys are rejected.
    pub fn new(
        station: Station,
        camera_prefix: &str,
        overrides: &BTreeMap<String, String>,
    ) -> AppResult<Self> {
        let s = station_names(station);
        let cam = |suffix: &str| format!("{camera_prefix}cam1:{suffix}");
        let hdf = |suffix: &str| format!("{camera_prefix}HDF1:{suffix}");
        let proc1 = |suffix: &str| format!("{camera_prefix}Proc1:{suffix}");
        let pso = |suffix: &str| format!("{}{suffix}", s.pso);

        let mut names = HashMap::with_capacity(Pv::ALL.len());
        for pv in Pv::ALL {
            let name = match pv {
                Pv::CamModel => cam("Model_RBV"),
                Pv::CamSerialNumber => cam("SerialNumber_RBV"),
                Pv::CamAcquire => cam("Acquire"),
                Pv::CamAcquireTime => cam("AcquireTime"),
                Pv::CamAcquirePeriod => cam("AcquirePeriod"),
                Pv::CamNumImages => cam("NumImages"),
                Pv::CamNumImagesCounter => cam("NumImagesCounter_RBV"),
                Pv::CamImageMode => cam("ImageMode"),
                Pv::CamTriggerMode => cam("TriggerMode"),
                Pv::CamFrameType => cam("FrameType"),
                Pv::CamSizeX => cam("SizeX_RBV"),
                Pv::CamSizeY => cam("SizeY_RBV"),
                Pv::HdfFileName => hdf("FileName"),
                Pv::HdfFilePath => hdf("FilePath"),
                Pv::HdfFileWriteMode => hdf("FileWriteMode"),
                Pv::HdfNumCapture => hdf("NumCapture"),
                Pv::HdfNumCaptured => hdf("NumCaptured_RBV"),
                Pv::HdfCapture => hdf("Capture"),
                Pv::HdfCaptureRbv => hdf("Capture_RBV"),
                Pv::HdfFullFileName => hdf("FullFileName_RBV"),
                Pv::HdfEnableCallbacks => hdf("EnableCallbacks"),
                Pv::ProcEnableFilter => proc1("EnableFilter"),
                Pv::ProcNumFilter => proc1("NumFilter"),
                Pv::MotorSampleRot => s.rotation.to_string(),
                Pv::MotorSampleRotSpeed => format!("{}.VELO", s.rotation),
                Pv::MotorSampleRotAccl => format!("{}.ACCL", s.rotation),
                Pv::MotorSampleRotStop => format!("{}.STOP", s.rotation),
                Pv::MotorSampleX => s.sample_x.to_string(),
                Pv::MotorSampleY => s.sample_y.to_string(),
                Pv::MotorFurnaceY => s.furnace_y.to_string(),
                Pv::ShutterOpen => s.shutter_open.to_string(),
                Pv::ShutterClose => s.shutter_close.to_string(),
                Pv::ShutterStatus => s.shutter_status.to_string(),
                Pv::FlyStartPos => pso("startPos"),
                Pv::FlyEndPos => pso("endPos"),
                Pv::FlyScanDelta => pso("scanDelta"),
                Pv::FlySlewSpeed => pso("slewSpeed"),
                Pv::FlyTaxi => pso("taxi"),
                Pv::FlyRun => pso("fly"),
                Pv::FlyScanControl => pso("scanControl"),
                Pv::FlyCalcProjections => pso("numTriggers"),
                Pv::ThetaArray => pso("motorPos.AVAL"),
            };
            names.insert(pv, name);
        }

        for (key, name) in overrides {
            let pv = Pv::from_key(key).ok_or_else(|| {
                ScanError::Configuration(format!("Unknown PV override key '{key}'"))
            })?;
            tracing::debug!(key = %key, pv = %name, "PV name overridden");
            names.insert(pv, name.clone());
        }

        Ok(Self { names })
    }

    /// PV name for `pv`.
    pub fn name(&self, pv: Pv) -> &str {
        // Every variant is inserted by `new`.
        self.names.get(&pv).map(String::as_str).unwrap_or_default()
    }

    /// Reverse lookup from a concrete PV name.
    pub fn lookup(&self, name: &str) -> Option<Pv> {
        self.names
            .iter()
            .find_map(|(pv, candidate)| (candidate == name).then_some(*pv))
    }

    /// Every entry, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (Pv, &str)> {
        Pv::ALL.iter().map(move |pv| (*pv, self.name(*pv)))
    }
}
