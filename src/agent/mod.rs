//! Agent facade and lifecycle.
//!
//! [`Agent`] is the host-visible surface of the inspector:
//!
//! ```text
//! New ──prepare──► (client built) ──run──► Accepting ◄────────┐
//!                                              │              │
//!                                        frontend attach   detach
//!                                              ▼              │
//!                                          Connected ─────────┘
//!                                              │
//!                                   stop / wait_for_disconnect
//!                                              ▼
//!                                    ShuttingDown ──► Done
//! ```
//!
//! plus the `Error` terminal when the listener cannot bind. The agent and
//! every method on it belong to the engine thread; the I/O thread is an
//! implementation detail behind the message plane.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::rc::Rc;
//! use std::sync::Arc;
//! use devtools_agent::{Agent, Result};
//! # fn host_backend() -> Rc<dyn devtools_agent::EngineInspector> { unimplemented!() }
//! # fn host_platform() -> Arc<dyn devtools_agent::EnginePlatform> { unimplemented!() }
//!
//! fn main() -> Result<()> {
//!     let mut agent = Agent::builder()
//!         .host("127.0.0.1")
//!         .port(9229)
//!         .wait_for_connect(true)
//!         .build()?;
//!     agent.prepare(host_backend(), host_platform(), Some(Path::new("app.js")))?;
//!     agent.run()?; // blocks until a frontend attaches
//!     println!("{}", agent.frontend_url()?);
//!     Ok(())
//! }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Engine-thread inspector client.
pub(crate) mod client;


// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::debug;

use crate::engine::{EngineInspector, EnginePlatform, ExceptionDetails, FrontendChannel};
use crate::error::{Error, Result};
use crate::identifiers::TargetId;
use crate::plane::{MessagePlane, TransportAction};
use crate::server::discovery::{self, Target};
use crate::server::io_thread::{IoThread, PlaneDelegate};
use crate::server::socket_server::ServerConfig;
use crate::strings::Utf16String;

use client::InspectorClient;

// ============================================================================
// Constants
// ============================================================================

/// Default bind host.
const DEFAULT_HOST: &str = "127.0.0.1";

/// Default inspector port, the one frontends probe first.
const DEFAULT_PORT: u16 = 9229;

// ============================================================================
// AgentState
// ============================================================================

/// Lifecycle state of the agent, driven only by the engine thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Built, not yet listening.
    New,
    /// Listening, no frontend attached.
    Accepting,
    /// One frontend session is attached.
    Connected,
    /// Teardown requested; waiting for the session to end.
    ShuttingDown,
    /// Fully stopped.
    Done,
    /// The listener could not be established.
    Error,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "New",
            Self::Accepting => "Accepting",
            Self::Connected => "Connected",
            Self::ShuttingDown => "ShuttingDown",
            Self::Done => "Done",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ProgressLog
// ============================================================================

/// Sink for the human-readable progress lines hosts traditionally print
/// ("Debugger attached.", "Waiting for the debugger to disconnect...").
///
/// Structured diagnostics go through `tracing` instead; this sink exists
/// for the console UX of the host process and defaults to stderr.
#[derive(Clone)]
pub struct ProgressLog {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ProgressLog {
    /// Wraps an arbitrary writer. Lines are flushed as they are written.
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    /// Writes one line, swallowing sink errors: progress output must never
    /// take down debugging.
    pub(crate) fn line(&self, text: &str) {
        let mut sink = self.sink.lock();
        let _ = writeln!(sink, "{text}");
        let _ = sink.flush();
    }
}

impl Default for ProgressLog {
    fn default() -> Self {
        Self::new(std::io::stderr())
    }
}

impl fmt::Debug for ProgressLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressLog")
    }
}

// ============================================================================
// AgentBuilder
// ============================================================================

/// Builder for configuring an [`Agent`].
///
/// Use [`Agent::builder()`] to create one.
#[derive(Debug, Default)]
pub struct AgentBuilder {
    host: Option<String>,
    port: Option<u16>,
    wait_for_connect: bool,
    frontend_url_file: Option<PathBuf>,
    target_id: Option<String>,
    log: Option<ProgressLog>,
}

impl AgentBuilder {
    /// Creates a builder with defaults (`127.0.0.1:9229`, no blocking).
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bind host (name or literal address).
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the bind port. Port 0 selects an ephemeral port, reported via
    /// [`Agent::frontend_url`] and the discovery endpoints.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Makes [`Agent::run`] block until the first frontend has attached.
    #[inline]
    #[must_use]
    pub fn wait_for_connect(mut self, wait: bool) -> Self {
        self.wait_for_connect = wait;
        self
    }

    /// File to which the frontend URL is written (one LF-terminated line)
    /// once the listener is bound.
    #[inline]
    #[must_use]
    pub fn frontend_url_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.frontend_url_file = Some(path.into());
        self
    }

    /// Fixes the target id instead of generating a random one. An empty
    /// string means "generate".
    #[inline]
    #[must_use]
    pub fn target_id(mut self, id: impl Into<String>) -> Self {
        self.target_id = Some(id.into());
        self
    }

    /// Redirects progress lines away from stderr.
    #[inline]
    #[must_use]
    pub fn progress_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.log = Some(ProgressLog::new(sink));
        self
    }

    /// Builds the agent.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the host is empty.
    pub fn build(self) -> Result<Agent> {
        let host = self.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        if host.is_empty() {
            return Err(Error::config("bind host must not be empty"));
        }
        let target_id = match self.target_id {
            Some(id) if !id.is_empty() => TargetId::from_string(id),
            _ => TargetId::generate(),
        };
        Ok(Agent {
            host,
            port: self.port.unwrap_or(DEFAULT_PORT),
            wait_for_connect: self.wait_for_connect,
            frontend_url_file: self.frontend_url_file,
            target_id,
            log: self.log.unwrap_or_default(),
            client: None,
            platform: None,
            plane: None,
            transport_rx: None,
            target: None,
            io: None,
        })
    }
}

// ============================================================================
// Agent
// ============================================================================

/// An embeddable inspector agent: one debuggable target, one optional
/// frontend session, a dedicated I/O thread.
///
/// The agent is an engine-thread object (`!Send`); a process may run
/// several agents for several engines without collision, since all state
/// is agent-scoped.
pub struct Agent {
    host: String,
    port: u16,
    wait_for_connect: bool,
    frontend_url_file: Option<PathBuf>,
    target_id: TargetId,
    log: ProgressLog,
    client: Option<Rc<InspectorClient>>,
    platform: Option<Arc<dyn EnginePlatform>>,
    plane: Option<Arc<MessagePlane>>,
    transport_rx: Option<UnboundedReceiver<TransportAction>>,
    target: Option<Target>,
    io: Option<IoThread>,
}

impl Agent {
    /// Creates a builder with default configuration.
    #[inline]
    #[must_use]
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// Builds the engine-thread client and registers the engine context
    /// with the inspector backend. Does not start listening.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] when already prepared.
    pub fn prepare(
        &mut self,
        backend: Rc<dyn EngineInspector>,
        platform: Arc<dyn EnginePlatform>,
        script_path: Option<&Path>,
    ) -> Result<()> {
        if self.client.is_some() {
            return Err(Error::invalid_state("prepare", "already prepared"));
        }
        let target = Target::new(self.target_id.clone(), script_path);
        let plane = Arc::new(MessagePlane::new());
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let client = InspectorClient::create(
            backend,
            Arc::clone(&platform),
            Arc::clone(&plane),
            transport_tx,
            self.log.clone(),
            &target.title,
        );
        debug!(target_id = %target.id, title = %target.title, "agent prepared");
        self.client = Some(client);
        self.platform = Some(platform);
        self.plane = Some(plane);
        self.transport_rx = Some(transport_rx);
        self.target = Some(target);
        Ok(())
    }

    /// Starts the I/O thread and blocks until the listener is bound.
    ///
    /// With `wait_for_connect`, additionally blocks until the first
    /// frontend session has been drained onto the engine thread.
    ///
    /// # Errors
    ///
    /// [`Error::BindFailed`] when no listener could be bound (the agent is
    /// then in the [`AgentState::Error`] state); [`Error::InvalidState`]
    /// when called before `prepare` or twice.
    pub fn run(&mut self) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::invalid_state("run", "unprepared"))?;
        if self.io.is_some() {
            return Err(Error::invalid_state("run", "already running"));
        }
        let platform = self.platform.clone().expect("prepared agents have a platform");
        let plane = self.plane.clone().expect("prepared agents have a plane");
        let transport_rx = self
            .transport_rx
            .take()
            .ok_or_else(|| Error::invalid_state("run", client.state().to_string()))?;

        let delegate = Arc::new(PlaneDelegate::new(Arc::clone(&plane), platform));
        let config = ServerConfig {
            host: self.host.clone(),
            port: self.port,
            target: self.target.clone().expect("prepared agents have a target"),
            frontend_url_file: self.frontend_url_file.clone(),
            log: self.log.clone(),
        };

        match IoThread::start(config, delegate, transport_rx) {
            Ok(io) => {
                self.io = Some(io);
                client.set_state(AgentState::Accepting);
            }
            Err(err) => {
                client.set_state(AgentState::Error);
                return Err(err);
            }
        }

        if self.wait_for_connect {
            while !client.is_connected() {
                plane.wait_for_message();
                client.dispatch_messages();
            }
        }
        Ok(())
    }

    /// Posts `Kill`, joins the I/O thread, and transitions to `Done`.
    /// Idempotent.
    pub fn stop(&mut self) {
        let Some(client) = &self.client else {
            return;
        };
        if let Some(mut io) = self.io.take() {
            client.write(TransportAction::Kill);
            if client.state() != AgentState::Done {
                client.set_state(AgentState::ShuttingDown);
            }
            io.join();
            // Drain the trailing EndSession of any force-closed session.
            client.dispatch_messages();
        }
        client.set_state(AgentState::Done);
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AgentState {
        self.client
            .as_ref()
            .map_or(AgentState::New, |client| client.state())
    }

    /// Whether a frontend session is currently attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client
            .as_ref()
            .is_some_and(|client| client.is_connected())
    }

    /// The `devtools://` URL a user can paste into a frontend.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] before `prepare`.
    pub fn frontend_url(&self) -> Result<String> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| Error::invalid_state("format frontend URL", "unprepared"))?;
        Ok(discovery::frontend_url(&self.host, self.bound_port(), &target.id))
    }

    /// The `ws://` session URL of the target.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] before `prepare`.
    pub fn websocket_url(&self) -> Result<String> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| Error::invalid_state("format WebSocket URL", "unprepared"))?;
        Ok(discovery::ws_url(&self.host, self.bound_port(), &target.id))
    }

    /// The target id of this agent.
    #[must_use]
    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    fn bound_port(&self) -> u16 {
        self.io.as_ref().map_or(self.port, IoThread::port)
    }

    // ========================================================================
    // Engine-Thread Operations
    // ========================================================================

    /// Drains pending protocol envelopes. Hosts call this from their
    /// engine-thread checkpoints in response to
    /// [`EnginePlatform::post_dispatch_task`] /
    /// [`EnginePlatform::request_interrupt`].
    pub fn dispatch_messages(&self) {
        if let Some(client) = &self.client {
            client.dispatch_messages();
        }
    }

    /// Arms a pause before the next JavaScript statement. Without an
    /// attached session the pause is deferred and fires on attach.
    pub fn pause_on_next_javascript_statement(&self, reason: &str) {
        if let Some(client) = &self.client {
            client.schedule_pause(reason);
        }
    }

    /// Feeds a host-synthesized protocol message directly to the session,
    /// bypassing the queues. Engine thread only.
    ///
    /// # Errors
    ///
    /// [`Error::NoSession`] when nothing is attached,
    /// [`Error::InvalidState`] before `prepare`.
    pub fn dispatch(&self, message: &str) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::invalid_state("dispatch", "unprepared"))?;
        client.dispatch_direct(&Utf16String::from_utf8(message))
    }

    /// Attaches a host-provided in-process frontend delegate.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] before `prepare`.
    pub fn connect(&self, channel: Rc<dyn FrontendChannel>) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::invalid_state("connect", "unprepared"))?;
        client.connect_frontend(channel);
        Ok(())
    }

    /// Detaches the current frontend delegate, releasing any pause loop.
    pub fn disconnect(&self) {
        if let Some(client) = &self.client {
            client.disconnect_frontend();
        }
    }

    /// Forwards an uncaught exception to the inspector and then waits for
    /// the frontend to disconnect (when one is attached).
    pub fn fatal_exception(&self, exception: &ExceptionDetails) {
        let Some(client) = &self.client else {
            return;
        };
        client.fatal_exception(exception);
        client.wait_for_disconnect();
    }

    /// Blocks until an attached frontend detaches; returns immediately
    /// otherwise. Unregisters the engine context either way.
    pub fn wait_for_disconnect(&self) {
        if let Some(client) = &self.client {
            client.wait_for_disconnect();
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        // The I/O thread must not outlive the agent's queues.
        self.stop();
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("target_id", &self.target_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
