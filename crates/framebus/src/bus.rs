use crate::cursor::ReadyCursor;
use crate::errors::FrameBusError;
use crate::types::{DetectionBox, EncodedFrame, FrameState, MAX_DETECTIONS, MAX_FRAME_BYTES};
use std::sync::Arc;
use tokio::sync::watch;

/// Latest published [`FrameState`] plus the ready signal for every reader.
///
/// Publish protocol:
/// 1. Validate the state against the wire limits (abort on violation)
/// 2. Swap the whole state and bump the sequence under one write lock
/// 3. Wake every cursor waiting for a newer sequence
///
/// Readers clone the state under the read side of the same lock, so the
/// detections and the frame they see always come from one publish. The
/// producer never waits on a reader: holding the read lock is an `Arc` clone.
pub struct FrameBus {
    tx: watch::Sender<FrameState>,
}

impl FrameBus {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(FrameState::empty());
        Self { tx }
    }

    /// Replace the live state and signal readers. Returns the new sequence.
    pub fn publish(
        &self,
        detections: Vec<DetectionBox>,
        frame: impl Into<EncodedFrame>,
    ) -> Result<u64, FrameBusError> {
        let frame = frame.into();

        if detections.len() > MAX_DETECTIONS {
            tracing::error!(
                detections = detections.len(),
                "Refusing publish: detection count exceeds wire limit"
            );
            return Err(FrameBusError::TooManyDetections(detections.len()));
        }
        if frame.len() > MAX_FRAME_BYTES {
            tracing::error!(
                bytes = frame.len(),
                "Refusing publish: encoded frame exceeds wire limit"
            );
            return Err(FrameBusError::FrameTooLarge(frame.len()));
        }

        let detections: Arc<[DetectionBox]> = detections.into();
        let mut sequence = 0;
        self.tx.send_modify(|state| {
            sequence = state.sequence() + 1;
            *state = FrameState::new(sequence, detections, frame);
        });

        tracing::trace!(sequence, readers = self.tx.receiver_count(), "Frame published");
        Ok(sequence)
    }

    /// Current state, whatever has or has not been consumed.
    pub fn read(&self) -> FrameState {
        self.tx.borrow().clone()
    }

    pub fn sequence(&self) -> u64 {
        self.tx.borrow().sequence()
    }

    /// Register a reader. It has no pending event until the next publish.
    pub fn subscribe(&self) -> ReadyCursor {
        ReadyCursor::new(self.tx.subscribe())
    }

    /// Number of live cursors.
    pub fn reader_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_replaces_state() {
        let bus = FrameBus::new();
        assert_eq!(bus.sequence(), 0);
        assert!(bus.read().is_empty());

        let seq = bus
            .publish(vec![DetectionBox::new(1, 2, 3, 4)], vec![0xFFu8, 0xD8])
            .unwrap();
        assert_eq!(seq, 1);

        let state = bus.read();
        assert_eq!(state.sequence(), 1);
        assert_eq!(state.detections(), &[DetectionBox::new(1, 2, 3, 4)]);
        assert_eq!(state.frame().as_bytes(), &[0xFF, 0xD8]);

        bus.publish(Vec::new(), vec![0x01u8]).unwrap();
        let state = bus.read();
        assert_eq!(state.sequence(), 2);
        assert!(state.detections().is_empty());
        assert_eq!(state.frame().as_bytes(), &[0x01]);
    }

    #[test]
    fn test_publish_rejects_too_many_detections() {
        let bus = FrameBus::new();
        bus.publish(vec![DetectionBox::default()], vec![1u8]).unwrap();

        let err = bus
            .publish(vec![DetectionBox::default(); MAX_DETECTIONS + 1], vec![2u8])
            .unwrap_err();
        assert_eq!(err, FrameBusError::TooManyDetections(65_536));

        // The previous state stays live.
        assert_eq!(bus.sequence(), 1);
        assert_eq!(bus.read().frame().as_bytes(), &[1]);
    }

    #[test]
    fn test_publish_rejects_oversized_frame() {
        let bus = FrameBus::new();
        let err = bus
            .publish(Vec::new(), vec![0u8; MAX_FRAME_BYTES + 1])
            .unwrap_err();
        assert_eq!(err, FrameBusError::FrameTooLarge(65_536));
        assert_eq!(bus.sequence(), 0);
    }

    #[test]
    fn test_publish_accepts_boundary_sizes() {
        let bus = FrameBus::new();
        bus.publish(
            vec![DetectionBox::default(); MAX_DETECTIONS],
            vec![0u8; MAX_FRAME_BYTES],
        )
        .unwrap();
        let state = bus.read();
        assert_eq!(state.detections().len(), 65_535);
        assert_eq!(state.frame().len(), 65_535);
    }

    #[test]
    fn test_reader_count_tracks_cursors() {
        let bus = FrameBus::new();
        assert_eq!(bus.reader_count(), 0);

        let a = bus.subscribe();
        let b = bus.subscribe();
        assert_eq!(bus.reader_count(), 2);

        drop(a);
        assert_eq!(bus.reader_count(), 1);
        drop(b);
        assert_eq!(bus.reader_count(), 0);
    }

    #[test]
    fn test_publish_without_readers_succeeds() {
        let bus = FrameBus::new();
        assert_eq!(bus.publish(Vec::new(), vec![1u8]).unwrap(), 1);
        assert_eq!(bus.publish(Vec::new(), vec![2u8]).unwrap(), 2);
    }
}
