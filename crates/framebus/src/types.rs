use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;

/// Largest detection count a frame may carry (the wire count is a u16).
pub const MAX_DETECTIONS: usize = u16::MAX as usize;

/// Largest encoded frame in bytes (the wire length is a u16).
pub const MAX_FRAME_BYTES: usize = u16::MAX as usize;

/// Bounding box in pixel coordinates of the model input resolution.
///
/// Serializes as `[x_min, y_min, x_max, y_max]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u16; 4]", into = "[u16; 4]")]
pub struct DetectionBox {
    pub x_min: u16,
    pub y_min: u16,
    pub x_max: u16,
    pub y_max: u16,
}

impl DetectionBox {
    pub const fn new(x_min: u16, y_min: u16, x_max: u16, y_max: u16) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Fields in wire order.
    pub fn to_array(self) -> [u16; 4] {
        [self.x_min, self.y_min, self.x_max, self.y_max]
    }
}

impl From<[u16; 4]> for DetectionBox {
    fn from(v: [u16; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<DetectionBox> for [u16; 4] {
    fn from(b: DetectionBox) -> Self {
        b.to_array()
    }
}

/// Immutable JPEG payload. Clones share the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame(Arc<[u8]>);

impl EncodedFrame {
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for EncodedFrame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for EncodedFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<&[u8]> for EncodedFrame {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}

/// Detections and the frame they were computed on, published together.
///
/// `sequence` counts publishes; 0 means nothing has been published yet.
#[derive(Debug, Clone)]
pub struct FrameState {
    sequence: u64,
    detections: Arc<[DetectionBox]>,
    frame: EncodedFrame,
}

impl FrameState {
    pub(crate) fn empty() -> Self {
        Self {
            sequence: 0,
            detections: Arc::from(Vec::new()),
            frame: EncodedFrame::empty(),
        }
    }

    pub(crate) fn new(sequence: u64, detections: Arc<[DetectionBox]>, frame: EncodedFrame) -> Self {
        Self {
            sequence,
            detections,
            frame,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn detections(&self) -> &[DetectionBox] {
        &self.detections
    }

    pub fn frame(&self) -> &EncodedFrame {
        &self.frame
    }

    pub fn is_empty(&self) -> bool {
        self.sequence == 0
    }
}
