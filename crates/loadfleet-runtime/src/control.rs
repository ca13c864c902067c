//! External control of a running fleet
//!
//! The dispatcher owns all fleet state, so other tasks (a signal watcher, a UI) steer it only
//! by enqueueing messages. Enqueueing never blocks and never touches fleet state.

use tokio::sync::mpsc;
use tracing::debug;

/// Requests serviced by the dispatch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Ask every agent to quit; the loop keeps running until they leave
    Terminate,
    /// Leave the dispatch loop at the next iteration
    Stop,
}

/// Cloneable sender for control messages
#[derive(Debug, Clone)]
pub struct FleetHandle {
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl FleetHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ControlMessage>) -> Self {
        Self { tx }
    }

    /// Send QUIT to every agent; returns false once the fleet is gone
    pub fn terminate(&self) -> bool {
        self.send(ControlMessage::Terminate)
    }

    /// End the dispatch loop; returns false once the fleet is gone
    pub fn stop(&self) -> bool {
        self.send(ControlMessage::Stop)
    }

    fn send(&self, message: ControlMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(_) => {
                debug!(?message, "fleet no longer running");
                false
            }
        }
    }
}

/// Result of a dispatch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOutcome {
    /// A peer disconnected unexpectedly, timed out, or reported an error
    pub failed: bool,
    /// The loop ended on a stop request rather than an empty fleet
    pub stopped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_enqueues_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = FleetHandle::new(tx);
        let clone = handle.clone();

        assert!(handle.terminate());
        assert!(clone.stop());
        assert_eq!(rx.try_recv().unwrap(), ControlMessage::Terminate);
        assert_eq!(rx.try_recv().unwrap(), ControlMessage::Stop);
    }

    #[test]
    fn test_handle_wakes_waiting_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = FleetHandle::new(tx);

        let mut recv = tokio_test::task::spawn(rx.recv());
        tokio_test::assert_pending!(recv.poll());

        assert!(handle.stop());
        assert!(recv.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(recv.poll()),
            Some(ControlMessage::Stop)
        );
    }

    #[test]
    fn test_handle_after_fleet_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = FleetHandle::new(tx);
        drop(rx);
        assert!(!handle.terminate());
    }
}
