//! Single-producer, many-reader hand-off of the latest detections and frame.
//!
//! The producer calls [`FrameBus::publish`] once per processed frame. Each
//! reader owns a [`ReadyCursor`] and waits on it for a state newer than the one
//! it last consumed.

pub mod bus;
pub mod cursor;
pub mod errors;
pub mod types;

pub use bus::FrameBus;
pub use cursor::ReadyCursor;
pub use errors::FrameBusError;
pub use types::{DetectionBox, EncodedFrame, FrameState, MAX_DETECTIONS, MAX_FRAME_BYTES};
