//! Wire format: big-endian 16-bit fields over a raw TCP stream.
//!
//! A request is a 2-byte opcode followed by a fixed-size payload that depends
//! on the opcode. Replies are either a 2-byte status, or an opcode echo plus a
//! 16-bit count/length and the data it announces.

use crate::camera::Exposure;
use crate::errors::SessionError;
use framebus::DetectionBox;

/// Reply to a control command that was applied.
pub const STATUS_SUCCESS: u16 = 0x00F0;

/// Reply to a control command that failed or is unsupported.
pub const STATUS_FAILURE: u16 = 0x000F;

/// Largest request payload following an opcode (`m_exposure`).
pub const MAX_PAYLOAD_LEN: usize = 6;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Coords = 0x0010,
    Image = 0x0020,
    TakePicture = 0x0030,
    Overlay = 0x0040,
    ManualExposure = 0x0050,
    AutoExposure = 0x0051,
    ManualFocus = 0x0060,
    AutoFocus = 0x0061,
    NoOp = 0xFFFF,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0010 => Some(Opcode::Coords),
            0x0020 => Some(Opcode::Image),
            0x0030 => Some(Opcode::TakePicture),
            0x0040 => Some(Opcode::Overlay),
            0x0050 => Some(Opcode::ManualExposure),
            0x0051 => Some(Opcode::AutoExposure),
            0x0060 => Some(Opcode::ManualFocus),
            0x0061 => Some(Opcode::AutoFocus),
            0xFFFF => Some(Opcode::NoOp),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Coords => "coords",
            Opcode::Image => "image",
            Opcode::TakePicture => "take-picture",
            Opcode::Overlay => "overlay",
            Opcode::ManualExposure => "m_exposure",
            Opcode::AutoExposure => "a_exposure",
            Opcode::ManualFocus => "m_focus",
            Opcode::AutoFocus => "a_focus",
            Opcode::NoOp => "no-op",
        }
    }

    /// Bytes the client sends after this opcode. The leading reserved field of
    /// `overlay`, `m_exposure` and `m_focus` is included.
    pub fn payload_len(self) -> usize {
        match self {
            Opcode::Overlay | Opcode::ManualFocus => 4,
            Opcode::ManualExposure => MAX_PAYLOAD_LEN,
            _ => 0,
        }
    }
}

/// Collaborator-side operations, replied to with a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    TakePicture,
    Overlay(bool),
    /// `None` returns the camera to auto exposure.
    Exposure(Option<Exposure>),
    /// `None` returns the camera to continuous auto focus.
    Focus(Option<u16>),
}

impl Control {
    pub fn opcode(&self) -> Opcode {
        match self {
            Control::TakePicture => Opcode::TakePicture,
            Control::Overlay(_) => Opcode::Overlay,
            Control::Exposure(Some(_)) => Opcode::ManualExposure,
            Control::Exposure(None) => Opcode::AutoExposure,
            Control::Focus(Some(_)) => Opcode::ManualFocus,
            Control::Focus(None) => Opcode::AutoFocus,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NoOp,
    Coords,
    Image,
    Control(Control),
}

impl Command {
    /// Build a command from its opcode and exactly `opcode.payload_len()` bytes.
    pub fn decode(opcode: Opcode, payload: &[u8]) -> Result<Self, SessionError> {
        if payload.len() != opcode.payload_len() {
            return Err(SessionError::PayloadLength {
                opcode: opcode.name(),
                expected: opcode.payload_len(),
                len: payload.len(),
            });
        }
        // payload[0..2] is the reserved field where present
        let field = |i: usize| u16::from_be_bytes([payload[2 * i], payload[2 * i + 1]]);

        let command = match opcode {
            Opcode::NoOp => Command::NoOp,
            Opcode::Coords => Command::Coords,
            Opcode::Image => Command::Image,
            Opcode::TakePicture => Command::Control(Control::TakePicture),
            Opcode::Overlay => Command::Control(Control::Overlay(field(1) != 0)),
            Opcode::ManualExposure => Command::Control(Control::Exposure(Some(Exposure {
                time_us: field(1),
                iso: field(2),
            }))),
            Opcode::AutoExposure => Command::Control(Control::Exposure(None)),
            Opcode::ManualFocus => Command::Control(Control::Focus(Some(field(1)))),
            Opcode::AutoFocus => Command::Control(Control::Focus(None)),
        };
        Ok(command)
    }

    /// Client-side request bytes. The reserved field carries the byte count of
    /// the fields after it; servers ignore it.
    pub fn encode(&self) -> Vec<u8> {
        let fields: Vec<u16> = match self {
            Command::Control(Control::Overlay(enabled)) => vec![u16::from(*enabled)],
            Command::Control(Control::Exposure(Some(exposure))) => {
                vec![exposure.time_us, exposure.iso]
            }
            Command::Control(Control::Focus(Some(position))) => vec![*position],
            _ => Vec::new(),
        };

        let mut request = Vec::with_capacity(2 + self.opcode().payload_len());
        request.extend_from_slice(&self.opcode().as_u16().to_be_bytes());
        if !fields.is_empty() {
            let reserved = (fields.len() * 2) as u16;
            request.extend_from_slice(&reserved.to_be_bytes());
            for field in fields {
                request.extend_from_slice(&field.to_be_bytes());
            }
        }
        request
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Command::NoOp => Opcode::NoOp,
            Command::Coords => Opcode::Coords,
            Command::Image => Opcode::Image,
            Command::Control(control) => control.opcode(),
        }
    }
}

fn wire_len(field: &'static str, len: usize) -> Result<u16, SessionError> {
    u16::try_from(len).map_err(|_| SessionError::Oversized { field, len })
}

/// `coords` reply: opcode echo, box count, then x_min, y_min, x_max, y_max per box.
pub fn encode_coords(detections: &[DetectionBox]) -> Result<Vec<u8>, SessionError> {
    let count = wire_len("detection count", detections.len())?;

    let mut reply = Vec::with_capacity(4 + detections.len() * 8);
    reply.extend_from_slice(&Opcode::Coords.as_u16().to_be_bytes());
    reply.extend_from_slice(&count.to_be_bytes());
    for detection in detections {
        for value in detection.to_array() {
            reply.extend_from_slice(&value.to_be_bytes());
        }
    }
    Ok(reply)
}

/// `image` reply: opcode echo, payload length, raw JPEG bytes.
pub fn encode_image(jpeg: &[u8]) -> Result<Vec<u8>, SessionError> {
    let len = wire_len("frame length", jpeg.len())?;

    let mut reply = Vec::with_capacity(4 + jpeg.len());
    reply.extend_from_slice(&Opcode::Image.as_u16().to_be_bytes());
    reply.extend_from_slice(&len.to_be_bytes());
    reply.extend_from_slice(jpeg);
    Ok(reply)
}

pub fn encode_status(success: bool) -> [u8; 2] {
    if success {
        STATUS_SUCCESS.to_be_bytes()
    } else {
        STATUS_FAILURE.to_be_bytes()
    }
}
