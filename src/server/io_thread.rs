//! The dedicated I/O thread.
//!
//! All sockets live on one OS thread running a current-thread tokio
//! runtime. The engine thread starts it, blocks on a start barrier until
//! the listener outcome is known, and later joins it after posting `Kill`.
//!
//! Inbound traffic leaves this thread only as message-plane envelopes; the
//! wake signals toward the engine (foreground task + interrupt request)
//! coalesce on the queue's append-from-empty edge.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::mpsc::{RecvError, SyncSender, sync_channel};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::engine::EnginePlatform;
use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::plane::{InspectorAction, MessagePlane, TransportAction};
use crate::server::discovery;
use crate::server::socket_server::{ServerConfig, ServerDelegate, SocketServer};
use crate::strings::Utf16String;

// ============================================================================
// PlaneDelegate
// ============================================================================

/// Bridges socket-server events onto the message plane.
///
/// Converts wire UTF-8 to UTF-16 here, on the I/O thread, and fires the
/// engine wake signals when an envelope lands on an empty queue.
pub(crate) struct PlaneDelegate {
    plane: Arc<MessagePlane>,
    platform: Arc<dyn EnginePlatform>,
}

impl PlaneDelegate {
    pub(crate) fn new(plane: Arc<MessagePlane>, platform: Arc<dyn EnginePlatform>) -> Self {
        Self { plane, platform }
    }

    fn post(&self, action: InspectorAction) {
        if self.plane.post(action) {
            // Append-from-empty: one foreground task and one interrupt
            // request cover the whole burst.
            self.platform.post_dispatch_task();
            self.platform.request_interrupt();
        }
    }
}

impl ServerDelegate for PlaneDelegate {
    fn start_session(&self, session_id: SessionId) {
        self.post(InspectorAction::StartSession { session_id });
    }

    fn message_received(&self, session_id: SessionId, message: &str) {
        self.post(InspectorAction::InboundMessage {
            session_id,
            message: Utf16String::from_utf8(message),
        });
    }

    fn end_session(&self, session_id: SessionId) {
        self.post(InspectorAction::EndSession { session_id });
    }
}

// ============================================================================
// IoThread
// ============================================================================

/// Handle of the running I/O thread, owned by the agent.
pub(crate) struct IoThread {
    handle: Option<JoinHandle<()>>,
    port: u16,
}

impl IoThread {
    /// Spawns the I/O thread and blocks until its listener is bound.
    ///
    /// Returns the bind error when no listener could be established; the
    /// thread has already exited in that case.
    pub(crate) fn start(
        config: ServerConfig,
        delegate: Arc<dyn ServerDelegate>,
        action_rx: UnboundedReceiver<TransportAction>,
    ) -> Result<Self> {
        let (ready_tx, ready_rx) = sync_channel::<Result<u16>>(1);

        let handle = thread::Builder::new()
            .name("inspector-io".to_string())
            .spawn(move || thread_main(config, delegate, action_rx, ready_tx))
            .map_err(|err| Error::io_thread(err.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(port)) => Ok(Self {
                handle: Some(handle),
                port,
            }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(RecvError) => {
                let _ = handle.join();
                Err(Error::io_thread("thread exited before binding"))
            }
        }
    }

    /// The port the listener bound.
    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Joins the thread. The caller must already have posted `Kill`, or
    /// dropped the transport sender, so the event loop is winding down.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("inspector I/O thread panicked during shutdown");
        }
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        self.join();
    }
}

// ============================================================================
// Thread Main
// ============================================================================

fn thread_main(
    config: ServerConfig,
    delegate: Arc<dyn ServerDelegate>,
    action_rx: UnboundedReceiver<TransportAction>,
    ready_tx: SyncSender<Result<u16>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready_tx.send(Err(Error::io_thread(err.to_string())));
            return;
        }
    };

    runtime.block_on(async move {
        let server = match SocketServer::bind(config, delegate).await {
            Ok(server) => server,
            Err(err) => {
                let _ = ready_tx.send(Err(err));
                return;
            }
        };

        announce(server.config(), server.port());
        let _ = ready_tx.send(Ok(server.port()));
        server.run(action_rx).await;
    });
    debug!("inspector I/O thread exiting");
}

/// Writes the frontend URL file (when configured) and emits the listening
/// banner. Runs before the start barrier is released so the URL is on disk
/// by the time `run()` returns to the host.
fn announce(config: &ServerConfig, port: u16) {
    let url = discovery::frontend_url(&config.host, port, &config.target.id);
    if let Some(path) = &config.frontend_url_file {
        if let Err(source) = std::fs::write(path, format!("{url}\n")) {
            let err = Error::UrlFileWrite {
                path: path.clone(),
                source,
            };
            warn!(%err, "continuing without frontend URL file");
        }
    }
    config.log.line(&format!(
        "Debugger listening on {}",
        discovery::ws_url(&config.host, port, &config.target.id)
    ));
    debug!(%url, "inspector ready");
}
