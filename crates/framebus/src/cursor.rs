use crate::errors::FrameBusError;
use crate::types::FrameState;
use tokio::sync::watch;

/// One reader's position in the publish sequence.
///
/// A cursor is "ready" when the bus sequence has moved past the last state it
/// consumed. Any number of publishes between two waits collapse into one
/// ready event, and the wait always hands back the newest state.
///
/// Dropping the cursor unregisters the reader, including while a `wait` on it
/// is pending in a task that is being cancelled.
pub struct ReadyCursor {
    rx: watch::Receiver<FrameState>,
    last_sequence: u64,
}

impl ReadyCursor {
    pub(crate) fn new(rx: watch::Receiver<FrameState>) -> Self {
        let last_sequence = rx.borrow().sequence();
        Self { rx, last_sequence }
    }

    /// Wait for a publish newer than the last consumed one, consume it, and
    /// return the latest state.
    pub async fn wait(&mut self) -> Result<FrameState, FrameBusError> {
        self.rx.changed().await.map_err(|_| FrameBusError::Closed)?;
        let state = self.rx.borrow_and_update().clone();
        self.last_sequence = state.sequence();
        Ok(state)
    }

    /// Whether a publish is waiting to be consumed.
    pub fn has_pending(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Sequence of the last consumed state (or the bus sequence at subscribe time).
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

#[cfg(test)]
mod tests {
    use crate::{DetectionBox, FrameBus, FrameBusError};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_new_cursor_has_nothing_pending() {
        let bus = FrameBus::new();
        bus.publish(Vec::new(), vec![1u8]).unwrap();

        let mut cursor = bus.subscribe();
        assert!(!cursor.has_pending());
        assert_eq!(cursor.last_sequence(), 1);

        let waited = timeout(Duration::from_millis(50), cursor.wait()).await;
        assert!(waited.is_err(), "Fresh cursor must wait for the next publish");
    }

    #[tokio::test]
    async fn test_publishes_coalesce_into_one_event() {
        let bus = FrameBus::new();
        let mut cursor = bus.subscribe();

        bus.publish(vec![DetectionBox::new(1, 1, 1, 1)], vec![1u8]).unwrap();
        bus.publish(vec![DetectionBox::new(2, 2, 2, 2)], vec![2u8]).unwrap();
        assert!(cursor.has_pending());

        let state = cursor.wait().await.unwrap();
        assert_eq!(state.sequence(), 2);
        assert_eq!(state.detections(), &[DetectionBox::new(2, 2, 2, 2)]);
        assert_eq!(state.frame().as_bytes(), &[2]);
        assert_eq!(cursor.last_sequence(), 2);
        assert!(!cursor.has_pending());

        let second = timeout(Duration::from_millis(50), cursor.wait()).await;
        assert!(second.is_err(), "Second wait must block until a new publish");
    }

    #[tokio::test]
    async fn test_wait_wakes_on_publish() {
        let bus = std::sync::Arc::new(FrameBus::new());
        let mut cursor = bus.subscribe();

        let producer = {
            let bus = bus.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                bus.publish(vec![DetectionBox::new(10, 20, 50, 80)], vec![0xFFu8, 0xD8])
                    .unwrap();
            })
        };

        let state = timeout(Duration::from_secs(2), cursor.wait())
            .await
            .expect("wait should be woken by publish")
            .unwrap();
        assert_eq!(state.sequence(), 1);
        assert_eq!(state.detections(), &[DetectionBox::new(10, 20, 50, 80)]);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_cursors_are_independent() {
        let bus = FrameBus::new();
        let mut fast = bus.subscribe();
        let slow = bus.subscribe();

        bus.publish(Vec::new(), vec![1u8]).unwrap();
        fast.wait().await.unwrap();

        assert!(!fast.has_pending());
        assert!(slow.has_pending(), "Consuming on one cursor leaves the other pending");
    }

    #[tokio::test]
    async fn test_wait_errors_when_bus_dropped() {
        let bus = FrameBus::new();
        let mut cursor = bus.subscribe();
        drop(bus);

        assert_eq!(cursor.wait().await.unwrap_err(), FrameBusError::Closed);
    }
}
