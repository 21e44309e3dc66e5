//! Engine-thread inspector client.
//!
//! Owns everything the engine thread is allowed to touch: the backend
//! session, the agent state machine, and the drain side of the message
//! plane. Sockets never appear here; the compiler enforces the thread
//! boundary because this type is `Rc`-held and `!Send`.
//!
//! # Drain discipline
//!
//! `dispatch_messages` is the single entry point for engine-bound
//! envelopes. It swaps the plane's queue into a member buffer and works
//! through it; the member buffer (rather than a local) is what makes
//! nesting correct: when a dispatched message pauses the engine, the
//! nested drain inside the pause loop picks up exactly where the outer
//! one stopped.

// ============================================================================
// Imports
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace, warn};

use crate::agent::{AgentState, ProgressLog};
use crate::engine::{
    EngineInspector, EnginePlatform, EngineSession, ExceptionDetails, FrontendChannel,
    InspectorClientHooks,
};
use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::plane::{InspectorAction, MessagePlane, TransportAction};
use crate::strings::Utf16String;

// ============================================================================
// TransportChannel
// ============================================================================

/// The [`FrontendChannel`] handed to the backend for one session: every
/// response and notification becomes a `SendMessage` envelope.
struct TransportChannel {
    session_id: SessionId,
    transport: UnboundedSender<TransportAction>,
}

impl TransportChannel {
    fn forward(&self, message: Utf16String) {
        let action = TransportAction::SendMessage {
            session_id: self.session_id,
            message,
        };
        if self.transport.send(action).is_err() {
            trace!(session_id = %self.session_id, "transport gone, dropping outbound message");
        }
    }
}

impl FrontendChannel for TransportChannel {
    fn send_response(&self, _call_id: i64, message: Utf16String) {
        self.forward(message);
    }

    fn send_notification(&self, message: Utf16String) {
        self.forward(message);
    }
}

// ============================================================================
// InspectorClient
// ============================================================================

struct ActiveSession {
    id: SessionId,
    session: Rc<dyn EngineSession>,
}

/// The engine-thread half of the agent.
pub(crate) struct InspectorClient {
    backend: Rc<dyn EngineInspector>,
    platform: Arc<dyn EnginePlatform>,
    plane: Arc<MessagePlane>,
    transport: UnboundedSender<TransportAction>,
    session: RefCell<Option<ActiveSession>>,
    state: Cell<AgentState>,
    /// Partially drained envelopes; shared across nesting levels.
    dispatch_queue: RefCell<VecDeque<InspectorAction>>,
    dispatching: Cell<bool>,
    running_nested_loop: Cell<bool>,
    terminated: Cell<bool>,
    /// Pause requested before any frontend attached; fires on attach.
    pending_pause: RefCell<Option<String>>,
    log: ProgressLog,
    owner: ThreadId,
}

impl InspectorClient {
    /// Builds the client, attaches its pause hooks to the backend, and
    /// registers the engine context.
    pub(crate) fn create(
        backend: Rc<dyn EngineInspector>,
        platform: Arc<dyn EnginePlatform>,
        plane: Arc<MessagePlane>,
        transport: UnboundedSender<TransportAction>,
        log: ProgressLog,
        context_name: &str,
    ) -> Rc<Self> {
        let client = Rc::new(Self {
            backend,
            platform,
            plane,
            transport,
            session: RefCell::new(None),
            state: Cell::new(AgentState::New),
            dispatch_queue: RefCell::new(VecDeque::new()),
            dispatching: Cell::new(false),
            running_nested_loop: Cell::new(false),
            terminated: Cell::new(false),
            pending_pause: RefCell::new(None),
            log,
            owner: thread::current().id(),
        });
        let hooks: Weak<dyn InspectorClientHooks> =
            Rc::downgrade(&(Rc::clone(&client) as Rc<dyn InspectorClientHooks>));
        client.backend.attach_client(hooks);
        client.backend.context_created(context_name);
        client
    }

    pub(crate) fn state(&self) -> AgentState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: AgentState) {
        self.state.set(state);
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.get() == AgentState::Connected
    }

    /// Sends an I/O-bound envelope. `Kill` always goes through: it is the
    /// one action a `Done` agent still needs to deliver, because
    /// `wait_for_disconnect` can reach `Done` while the I/O thread is
    /// still draining its listener.
    pub(crate) fn write(&self, action: TransportAction) {
        if self.state.get() == AgentState::Done && !matches!(action, TransportAction::Kill) {
            return;
        }
        let _ = self.transport.send(action);
    }

    // ========================================================================
    // Drain
    // ========================================================================

    /// Drains the engine-bound queue and dispatches every envelope.
    ///
    /// Re-entrant calls return immediately; the pause loop re-enables
    /// dispatching before each wait so a nested drain can take over the
    /// member queue.
    pub(crate) fn dispatch_messages(&self) {
        self.assert_engine_thread();
        if self.dispatching.get() {
            return;
        }
        self.dispatching.set(true);
        loop {
            if self.dispatch_queue.borrow().is_empty() {
                self.plane.swap_pending(&mut self.dispatch_queue.borrow_mut());
            }
            let mut had_messages = false;
            loop {
                // The borrow must end before dispatching: a handled action
                // can re-enter this queue through a nested pause.
                let action = self.dispatch_queue.borrow_mut().pop_front();
                let Some(action) = action else { break };
                had_messages = true;
                self.handle_action(action);
            }
            if !had_messages {
                break;
            }
        }
        self.dispatching.set(false);
    }

    fn handle_action(&self, action: InspectorAction) {
        match action {
            InspectorAction::StartSession { session_id } => {
                debug_assert!(
                    self.session.borrow().is_none(),
                    "StartSession with a session already connected"
                );
                self.state.set(AgentState::Connected);
                info!(%session_id, "frontend attached");
                self.log.line("Debugger attached.");

                let channel = Rc::new(TransportChannel {
                    session_id,
                    transport: self.transport.clone(),
                });
                let session = self.backend.connect(channel);
                *self.session.borrow_mut() = Some(ActiveSession {
                    id: session_id,
                    session: Rc::clone(&session),
                });
                if let Some(reason) = self.pending_pause.borrow_mut().take() {
                    debug!(%reason, "arming deferred pause");
                    let reason = Utf16String::from_utf8(&reason);
                    session.schedule_pause_on_next_statement(&reason, &reason);
                }
            }
            InspectorAction::EndSession { session_id } => {
                debug_assert!(
                    self.session
                        .borrow()
                        .as_ref()
                        .is_some_and(|active| active.id == session_id),
                    "EndSession for a session that is not connected"
                );
                let next = if self.state.get() == AgentState::ShuttingDown {
                    AgentState::Done
                } else {
                    AgentState::Accepting
                };
                self.state.set(next);
                self.disconnect_frontend();
                info!(%session_id, "frontend detached");
                self.log.line("Debugger disconnected.");
            }
            InspectorAction::InboundMessage {
                session_id,
                message,
            } => {
                let session = self
                    .session
                    .borrow()
                    .as_ref()
                    .filter(|active| active.id == session_id)
                    .map(|active| Rc::clone(&active.session));
                match session {
                    Some(session) => {
                        trace!(%session_id, len = message.len(), "dispatching protocol message");
                        session.dispatch_protocol_message(&message);
                    }
                    None => warn!(%session_id, "dropping message for defunct session"),
                }
            }
        }
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Connects a host-provided frontend delegate directly, bypassing the
    /// transport.
    pub(crate) fn connect_frontend(&self, channel: Rc<dyn FrontendChannel>) {
        debug_assert!(
            self.session.borrow().is_none(),
            "connect with a session already connected"
        );
        let session = self.backend.connect(channel);
        *self.session.borrow_mut() = Some(ActiveSession {
            id: SessionId::HOST,
            session,
        });
    }

    /// Drops the current session and releases any pause loop blocked on it.
    pub(crate) fn disconnect_frontend(&self) {
        self.quit_message_loop_on_pause();
        *self.session.borrow_mut() = None;
    }

    /// Feeds a message straight into the session, engine thread only.
    pub(crate) fn dispatch_direct(&self, message: &Utf16String) -> Result<()> {
        self.assert_engine_thread();
        let session = self
            .session
            .borrow()
            .as_ref()
            .map(|active| Rc::clone(&active.session))
            .ok_or(Error::NoSession)?;
        session.dispatch_protocol_message(message);
        Ok(())
    }

    /// Arms a pause before the next statement, deferring it when no
    /// frontend is attached yet.
    pub(crate) fn schedule_pause(&self, reason: &str) {
        let session = self
            .session
            .borrow()
            .as_ref()
            .map(|active| Rc::clone(&active.session));
        match session {
            Some(session) => {
                let reason = Utf16String::from_utf8(reason);
                session.schedule_pause_on_next_statement(&reason, &reason);
            }
            None => {
                debug!(%reason, "no session, pause armed for next attach");
                *self.pending_pause.borrow_mut() = Some(reason.to_string());
            }
        }
    }

    // ========================================================================
    // Shutdown & Exceptions
    // ========================================================================

    /// Forwards an uncaught exception to the inspector backend.
    pub(crate) fn fatal_exception(&self, exception: &ExceptionDetails) {
        self.assert_engine_thread();
        self.backend.exception_thrown(exception);
    }

    /// Unregisters the engine context and, when a frontend is attached,
    /// blocks until it detaches.
    pub(crate) fn wait_for_disconnect(&self) {
        self.assert_engine_thread();
        self.backend.context_destroyed();
        match self.state.get() {
            AgentState::Accepting => self.state.set(AgentState::Done),
            AgentState::Connected => {
                // Stop goes out before the state flips; outbound messages
                // must keep flowing while the frontend finishes.
                self.write(TransportAction::Stop);
                self.state.set(AgentState::ShuttingDown);
                self.log.line("Waiting for the debugger to disconnect...");
                self.run_message_loop_on_pause();
            }
            _ => {}
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Re-arms dispatching and blocks until an envelope is pending.
    ///
    /// Clearing the `dispatching` guard here is what lets the drain that
    /// paused us continue through the nested loop's own calls.
    fn wait_for_frontend_message(&self) {
        self.dispatching.set(false);
        self.plane.wait_for_message();
    }

    #[inline]
    fn assert_engine_thread(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "inspector client used off the engine thread"
        );
    }
}

// ============================================================================
// Pause Loop
// ============================================================================

impl InspectorClientHooks for InspectorClient {
    /// The nested message loop of a debugger pause: alternate between
    /// waiting for frontend input, draining it, and pumping the engine's
    /// foreground tasks, until resumed.
    fn run_message_loop_on_pause(&self) {
        self.assert_engine_thread();
        if self.running_nested_loop.get() {
            return;
        }
        self.terminated.set(false);
        self.running_nested_loop.set(true);
        while !self.terminated.get() {
            self.wait_for_frontend_message();
            self.dispatch_messages();
            while self.platform.pump_message_loop() {}
        }
        self.terminated.set(false);
        self.running_nested_loop.set(false);
    }

    fn quit_message_loop_on_pause(&self) {
        self.terminated.set(true);
    }
}
