//! Cross-thread message plane.
//!
//! Two queues connect the engine thread and the I/O thread:
//!
//! ```text
//!                   InspectorAction (engine-bound)
//!   I/O thread ──► MessagePlane { mutex + condvar } ──► engine thread
//!
//!                   TransportAction (I/O-bound)
//! engine thread ──► tokio unbounded mpsc ──► I/O thread event loop
//! ```
//!
//! The engine-bound side is an explicit mutex + condvar queue because the
//! engine thread must be able to block on it outside any async runtime
//! (the nested pause loop). The I/O-bound side is a tokio channel: a locked
//! FIFO whose wake handle is fused into the queue, which is what the event
//! loop selects on.
//!
//! # Ordering
//!
//! Per-session FIFO: envelopes for one session are observed in enqueue
//! order. `EndSession(s)` is the last envelope a receiver sees for `s`.
//! Cross-session ordering is unspecified.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::mem;

use parking_lot::{Condvar, Mutex};

use crate::identifiers::SessionId;
use crate::strings::Utf16String;

// ============================================================================
// Envelopes
// ============================================================================

/// Engine-bound envelope: the only path by which the engine thread learns
/// about session transitions and inbound frames.
#[derive(Debug)]
pub(crate) enum InspectorAction {
    /// A frontend completed the WebSocket upgrade.
    StartSession {
        /// Newly allocated session id.
        session_id: SessionId,
    },
    /// The session's socket closed (cleanly or abruptly). Always the last
    /// envelope for this id.
    EndSession {
        /// The terminated session.
        session_id: SessionId,
    },
    /// One decoded text frame.
    InboundMessage {
        /// Originating session.
        session_id: SessionId,
        /// Protocol payload, already converted to UTF-16.
        message: Utf16String,
    },
}

/// I/O-bound envelope, drained by the socket server's event loop.
#[derive(Debug)]
pub(crate) enum TransportAction {
    /// Frame `message` as text and send it on the session's socket.
    SendMessage {
        /// Destination session.
        session_id: SessionId,
        /// Protocol payload; converted to UTF-8 on the I/O thread.
        message: Utf16String,
    },
    /// Stop accepting new connections; existing sessions stay alive.
    Stop,
    /// Close every live session and stop the listener.
    Kill,
}

// ============================================================================
// MessagePlane
// ============================================================================

/// The engine-bound queue with its wake condvar.
///
/// Readers use swap-and-drain: take the lock, swap the queue with an empty
/// local, release, then process locally, bounding the critical section to a
/// pointer swap.
pub(crate) struct MessagePlane {
    inbound: Mutex<VecDeque<InspectorAction>>,
    message_received: Condvar,
}

impl MessagePlane {
    pub(crate) fn new() -> Self {
        Self {
            inbound: Mutex::new(VecDeque::new()),
            message_received: Condvar::new(),
        }
    }

    /// Appends an envelope and wakes any paused engine thread.
    ///
    /// Returns `true` if the queue was empty before the append: wake
    /// signals to the engine platform coalesce on that edge, so a burst of
    /// frames triggers a single interrupt request.
    pub(crate) fn post(&self, action: InspectorAction) -> bool {
        let was_empty = {
            let mut queue = self.inbound.lock();
            let was_empty = queue.is_empty();
            queue.push_back(action);
            was_empty
        };
        self.message_received.notify_all();
        was_empty
    }

    /// Swaps the pending queue into `local` under the lock.
    ///
    /// `local` must be empty; handing back unprocessed envelopes would
    /// reorder them behind newer arrivals.
    pub(crate) fn swap_pending(&self, local: &mut VecDeque<InspectorAction>) {
        debug_assert!(local.is_empty());
        mem::swap(&mut *self.inbound.lock(), local);
    }

    /// Blocks until the queue is non-empty.
    ///
    /// Returns immediately when envelopes are already pending, so a message
    /// arriving between a drain and this wait is never lost.
    pub(crate) fn wait_for_message(&self) {
        let mut queue = self.inbound.lock();
        if queue.is_empty() {
            self.message_received.wait(&mut queue);
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.inbound.lock().len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn inbound(id: u64, text: &str) -> InspectorAction {
        InspectorAction::InboundMessage {
            session_id: SessionId::from_raw(id),
            message: Utf16String::from(text),
        }
    }

    #[test]
    fn test_post_reports_append_from_empty_only() {
        let plane = MessagePlane::new();
        assert!(plane.post(inbound(1, "a")));
        assert!(!plane.post(inbound(1, "b")));
        assert!(!plane.post(inbound(1, "c")));

        let mut local = VecDeque::new();
        plane.swap_pending(&mut local);
        assert_eq!(local.len(), 3);

        // Queue is empty again: the edge re-arms.
        assert!(plane.post(inbound(1, "d")));
    }

    #[test]
    fn test_swap_drain_preserves_fifo_order() {
        let plane = MessagePlane::new();
        for i in 0..5 {
            plane.post(inbound(7, &format!("m{i}")));
        }

        let mut local = VecDeque::new();
        plane.swap_pending(&mut local);
        let texts: Vec<String> = local
            .iter()
            .map(|a| match a {
                InspectorAction::InboundMessage { message, .. } => message.to_utf8(),
                other => panic!("unexpected action {other:?}"),
            })
            .collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert_eq!(plane.pending_len(), 0);
    }

    #[test]
    fn test_wait_returns_immediately_when_pending() {
        let plane = MessagePlane::new();
        plane.post(inbound(1, "x"));
        // Must not block.
        plane.wait_for_message();
        assert_eq!(plane.pending_len(), 1);
    }

    #[test]
    fn test_wait_wakes_on_cross_thread_post() {
        let plane = Arc::new(MessagePlane::new());
        let poster = Arc::clone(&plane);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            poster.post(inbound(3, "wake"));
        });
        plane.wait_for_message();
        assert_eq!(plane.pending_len(), 1);
        handle.join().unwrap();
    }
}
