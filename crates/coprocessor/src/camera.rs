//! Seam to the camera pipeline that owns exposure, focus, overlay and still
//! capture. Detections and frames do not go through here; the camera
//! publishes those on the [`framebus::FrameBus`].

use crate::protocol::{Control, Opcode};
use std::io;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use thiserror::Error;

/// Manual exposure time range in microseconds accepted by the sensor.
pub const EXPOSURE_TIME_RANGE_US: RangeInclusive<u16> = 1..=33_000;

/// Manual sensitivity range accepted by the sensor.
pub const ISO_RANGE: RangeInclusive<u16> = 100..=1600;

/// Lens position range for manual focus.
pub const LENS_POSITION_RANGE: RangeInclusive<u16> = 0..=255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exposure {
    pub time_us: u16,
    pub iso: u16,
}

impl Exposure {
    pub fn validate(&self) -> Result<(), CameraError> {
        if !EXPOSURE_TIME_RANGE_US.contains(&self.time_us) {
            return Err(CameraError::InvalidValue(format!(
                "exposure time {}us outside {:?}",
                self.time_us, EXPOSURE_TIME_RANGE_US
            )));
        }
        if !ISO_RANGE.contains(&self.iso) {
            return Err(CameraError::InvalidValue(format!(
                "ISO {} outside {:?}",
                self.iso, ISO_RANGE
            )));
        }
        Ok(())
    }
}

pub fn validate_lens_position(position: u16) -> Result<(), CameraError> {
    if LENS_POSITION_RANGE.contains(&position) {
        Ok(())
    } else {
        Err(CameraError::InvalidValue(format!(
            "lens position {} outside {:?}",
            position, LENS_POSITION_RANGE
        )))
    }
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Capture failed: {0}")]
    Capture(#[from] io::Error),

    #[error("{0} is not supported by this camera")]
    Unsupported(&'static str),

    #[error("Invalid control value: {0}")]
    InvalidValue(String),

    #[error("No frame has been published yet")]
    NoFrame,
}

/// Which control commands the camera actually implements. Commands outside
/// this set are answered with a failure status without reaching the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub still_capture: bool,
    pub overlay: bool,
    pub exposure: bool,
    pub focus: bool,
}

impl Capabilities {
    pub const ALL: Self = Self {
        still_capture: true,
        overlay: true,
        exposure: true,
        focus: true,
    };

    pub const NONE: Self = Self {
        still_capture: false,
        overlay: false,
        exposure: false,
        focus: false,
    };

    pub fn supports(&self, control: &Control) -> bool {
        match control.opcode() {
            Opcode::TakePicture => self.still_capture,
            Opcode::Overlay => self.overlay,
            Opcode::ManualExposure | Opcode::AutoExposure => self.exposure,
            Opcode::ManualFocus | Opcode::AutoFocus => self.focus,
            Opcode::Coords | Opcode::Image | Opcode::NoOp => false,
        }
    }
}

/// Current manual settings of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraSettings {
    pub overlay: bool,
    pub exposure: Option<Exposure>,
    pub focus: Option<u16>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            overlay: true,
            exposure: None,
            focus: None,
        }
    }
}

/// Control surface of the camera pipeline.
///
/// Calls are synchronous and may block on hardware or disk; sessions run them
/// off the async workers.
pub trait CameraControl: Send + Sync {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    /// Persist the current frame; returns where it was written.
    fn save_still(&self) -> Result<PathBuf, CameraError>;

    fn set_overlay(&self, enabled: bool) -> Result<(), CameraError>;

    fn set_exposure(&self, exposure: Option<Exposure>) -> Result<(), CameraError>;

    fn set_focus(&self, lens_position: Option<u16>) -> Result<(), CameraError>;
}

/// Route a decoded control command to the camera.
///
/// Returns the still path for `TakePicture`, `None` for the setters.
pub fn apply(camera: &dyn CameraControl, control: Control) -> Result<Option<PathBuf>, CameraError> {
    match control {
        Control::TakePicture => camera.save_still().map(Some),
        Control::Overlay(enabled) => camera.set_overlay(enabled).map(|_| None),
        Control::Exposure(exposure) => camera.set_exposure(exposure).map(|_| None),
        Control::Focus(position) => camera.set_focus(position).map(|_| None),
    }
}
