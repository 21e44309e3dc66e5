//! Socket server event loop.
//!
//! Owns every listener and session socket. Work arrives from two sides:
//! accepted TCP connections (handed to per-connection tasks) and
//! [`TransportAction`] envelopes from the engine thread (routed to session
//! write queues, or Stop/Kill teardown).
//!
//! ```text
//!  accept tasks ──┐
//!                 ├──► select loop ──► per-session tasks ──► delegate ──► engine
//!  engine thread ─┘        (routes writes, fans out signals)
//! ```
//!
//! No engine handle is ever touched here; the only way out of this module
//! is the [`ServerDelegate`].

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{Notify, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace, warn};

use crate::agent::ProgressLog;
use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::plane::TransportAction;
use crate::server::discovery::Target;
use crate::server::session;
use crate::strings::Utf16String;

// ============================================================================
// Constants
// ============================================================================

/// Listen backlog for each bound address.
const ACCEPT_BACKLOG: u32 = 16;

/// Cap on sockets that are accepted but not yet upgraded.
const MAX_PENDING_UPGRADES: usize = 8;

/// Per-session bound on bytes queued for write before the session is
/// dropped with close code 1009.
pub(crate) const WRITE_HIGH_WATERMARK: usize = 16 * 1024 * 1024;

// ============================================================================
// Configuration
// ============================================================================

/// Immutable server parameters, fixed at agent preparation.
pub(crate) struct ServerConfig {
    /// Bind host (name or literal address).
    pub host: String,
    /// Requested port; 0 selects an ephemeral port.
    pub port: u16,
    /// The single target this server exposes.
    pub target: Target,
    /// File to which the frontend URL is written once bound.
    pub frontend_url_file: Option<PathBuf>,
    /// Human-readable progress sink.
    pub log: ProgressLog,
}

// ============================================================================
// ServerDelegate
// ============================================================================

/// Engine-bound event sink of the socket server.
///
/// Implementations post envelopes onto the message plane; they must not
/// block, and they run on the I/O thread.
pub(crate) trait ServerDelegate: Send + Sync + 'static {
    /// A frontend completed its upgrade.
    fn start_session(&self, session_id: SessionId);

    /// A text frame arrived, still UTF-8.
    fn message_received(&self, session_id: SessionId, message: &str);

    /// The session ended; called exactly once per started session.
    fn end_session(&self, session_id: SessionId);
}

// ============================================================================
// Internal Types
// ============================================================================

/// Teardown phase, fanned out to accept and session tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// Accepting connections and serving sessions.
    Running,
    /// Listener draining: no new connections, sessions live on.
    StopAccepting,
    /// Close every session and shut down.
    Kill,
}

/// Commands routed to one session task.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Send a text frame (already UTF-8).
    Send(String),
    /// Initiate the close handshake with the given code.
    Close(CloseCode),
}

/// Write-side handle of a live session, kept in the session table.
pub(crate) struct SessionHandle {
    /// Channel into the session task.
    pub tx: mpsc::UnboundedSender<SessionCommand>,
    /// Bytes enqueued but not yet written, for the high-watermark check.
    pub queued_bytes: Arc<AtomicUsize>,
}

// ============================================================================
// ServerShared
// ============================================================================

/// State shared between the event loop and per-connection tasks.
pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) delegate: Arc<dyn ServerDelegate>,
    /// Actual bound port, available once `bind` returns.
    port: AtomicU16,
    /// Live sessions by id.
    pub(crate) sessions: Mutex<FxHashMap<SessionId, SessionHandle>>,
    /// Single-session-per-target slot; claimed before the 101 is written.
    pub(crate) session_active: AtomicBool,
    /// Server-wide monotonic session id counter.
    next_session_id: AtomicU64,
    /// Sockets accepted but not yet past the handshake.
    pub(crate) pending_upgrades: AtomicUsize,
    /// Signalled when a session or a pending handshake ends, so the Kill
    /// drain can re-check for quiescence.
    pub(crate) connection_closed: Notify,
}

impl ServerShared {
    /// Port the listener actually bound.
    pub(crate) fn port(&self) -> u16 {
        self.port.load(Ordering::Acquire)
    }

    /// Allocates the next session id. Ids start at 1; 0 is reserved for
    /// in-process sessions.
    pub(crate) fn allocate_session_id(&self) -> SessionId {
        SessionId::from_raw(self.next_session_id.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// SocketServer
// ============================================================================

/// A bound (not yet running) inspector socket server.
pub(crate) struct SocketServer {
    shared: Arc<ServerShared>,
    listeners: Vec<TcpListener>,
}

impl SocketServer {
    /// Resolves the configured host and binds a listener per address.
    ///
    /// IPv4 and IPv6 are both attempted when the host resolves to multiple
    /// addresses; binding fails only if no address binds. With port 0, the
    /// first successful bind fixes the port for the remaining addresses.
    pub(crate) async fn bind(
        config: ServerConfig,
        delegate: Arc<dyn ServerDelegate>,
    ) -> Result<Self> {
        let addrs = resolve_host(&config.host, config.port).await?;

        let mut listeners = Vec::new();
        let mut bound_port = config.port;
        let mut last_error: Option<IoError> = None;
        for addr in addrs {
            let addr = SocketAddr::new(addr.ip(), bound_port);
            match bind_listener(addr) {
                Ok(listener) => {
                    if bound_port == 0 {
                        bound_port = listener.local_addr()?.port();
                    }
                    debug!(%addr, port = bound_port, "inspector listener bound");
                    listeners.push(listener);
                }
                Err(err) => {
                    warn!(%addr, error = %err, "failed to bind inspector listener");
                    last_error = Some(err);
                }
            }
        }

        if listeners.is_empty() {
            return Err(Error::BindFailed {
                host: config.host.clone(),
                port: config.port,
                source: last_error
                    .unwrap_or_else(|| IoError::from(ErrorKind::AddrNotAvailable)),
            });
        }

        let shared = Arc::new(ServerShared {
            config,
            delegate,
            port: AtomicU16::new(bound_port),
            sessions: Mutex::new(FxHashMap::default()),
            session_active: AtomicBool::new(false),
            next_session_id: AtomicU64::new(1),
            pending_upgrades: AtomicUsize::new(0),
            connection_closed: Notify::new(),
        });
        Ok(Self { shared, listeners })
    }

    /// The bound port.
    pub(crate) fn port(&self) -> u16 {
        self.shared.port()
    }

    /// The configuration this server was bound with.
    pub(crate) fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Runs the event loop until `Kill` has been processed and every
    /// connection, upgraded or still mid-handshake, has torn down.
    pub(crate) async fn run(mut self, mut action_rx: mpsc::UnboundedReceiver<TransportAction>) {
        let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<TcpStream>();
        let (signal_tx, _keepalive) = watch::channel(Signal::Running);

        for listener in self.listeners.drain(..) {
            tokio::spawn(accept_loop(
                listener,
                conn_tx.clone(),
                signal_tx.subscribe(),
            ));
        }
        drop(conn_tx);

        let mut killed = false;
        let mut accepts_done = false;
        let mut transport_done = false;
        loop {
            if killed
                && self.shared.sessions.lock().is_empty()
                && self.shared.pending_upgrades.load(Ordering::Acquire) == 0
            {
                break;
            }
            tokio::select! {
                conn = conn_rx.recv(), if !accepts_done => match conn {
                    Some(stream) => self.spawn_connection(stream, signal_tx.subscribe()),
                    None => accepts_done = true,
                },
                action = action_rx.recv(), if !transport_done => match action {
                    Some(TransportAction::SendMessage { session_id, message }) => {
                        self.route_send(session_id, &message);
                    }
                    Some(TransportAction::Stop) => {
                        debug!("inspector listener draining");
                        let _ = signal_tx.send(Signal::StopAccepting);
                    }
                    Some(TransportAction::Kill) => {
                        debug!("terminating inspector sessions");
                        killed = true;
                        let _ = signal_tx.send(Signal::Kill);
                    }
                    // The agent dropped its sender without a Kill; same thing.
                    None => {
                        transport_done = true;
                        killed = true;
                        let _ = signal_tx.send(Signal::Kill);
                    }
                },
                _ = self.shared.connection_closed.notified() => {}
            }
        }
        debug!("inspector socket server done");
    }

    /// Hands an accepted socket to its own handshake task, enforcing the
    /// pending-upgrade cap.
    fn spawn_connection(&self, stream: TcpStream, signal_rx: watch::Receiver<Signal>) {
        if *signal_rx.borrow() != Signal::Running {
            return;
        }
        let pending = self.shared.pending_upgrades.fetch_add(1, Ordering::AcqRel);
        if pending >= MAX_PENDING_UPGRADES {
            self.shared.pending_upgrades.fetch_sub(1, Ordering::AcqRel);
            warn!(pending, "dropping connection: too many pending upgrades");
            return;
        }
        let shared = Arc::clone(&self.shared);
        tokio::spawn(session::handle_connection(shared, stream, signal_rx));
    }

    /// Routes one outgoing message to its session's write queue, closing
    /// the session instead when the queue exceeds the high-watermark.
    fn route_send(&self, session_id: SessionId, message: &Utf16String) {
        let text = message.to_utf8();
        let mut sessions = self.shared.sessions.lock();
        let Some(handle) = sessions.get(&session_id) else {
            trace!(%session_id, "dropping write to defunct session");
            return;
        };
        let queued = handle.queued_bytes.fetch_add(text.len(), Ordering::AcqRel) + text.len();
        if queued > WRITE_HIGH_WATERMARK {
            let err = Error::WriteBackpressure {
                queued,
                limit: WRITE_HIGH_WATERMARK,
            };
            warn!(%session_id, %err, "closing session");
            if let Some(handle) = sessions.remove(&session_id) {
                let _ = handle.tx.send(SessionCommand::Close(CloseCode::Size));
            }
        } else if handle.tx.send(SessionCommand::Send(text)).is_err() {
            trace!(%session_id, "session task gone, dropping write");
        }
    }
}

// ============================================================================
// Listener Helpers
// ============================================================================

/// Resolves `host:port` into one socket address per family.
async fn resolve_host(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| Error::BindFailed {
            host: host.to_string(),
            port,
            source,
        })?
        .collect();

    // Keep one address per family, in resolver order.
    let mut deduped: Vec<SocketAddr> = Vec::new();
    for addr in addrs {
        if !deduped.iter().any(|a| a.is_ipv4() == addr.is_ipv4()) {
            deduped.push(addr);
        }
    }
    if deduped.is_empty() {
        return Err(Error::BindFailed {
            host: host.to_string(),
            port,
            source: IoError::from(ErrorKind::AddrNotAvailable),
        });
    }
    Ok(deduped)
}

fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(ACCEPT_BACKLOG)
}

/// Accepts connections until the teardown signal, forwarding each socket
/// to the event loop.
async fn accept_loop(
    listener: TcpListener,
    conn_tx: mpsc::UnboundedSender<TcpStream>,
    mut signal_rx: watch::Receiver<Signal>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!(%peer, "connection accepted");
                    if conn_tx.send(stream).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    // Transient accept failures (EMFILE etc.) must not kill
                    // the listener.
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            },
            changed = signal_rx.changed() => {
                if changed.is_err() || *signal_rx.borrow() != Signal::Running {
                    break;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
