//! Per-connection handshake and framed session tasks.
//!
//! Each accepted socket gets one task that walks the connection through
//! `AwaitingRequest → Upgrading → Framed → Closing`:
//!
//! 1. read the HTTP request head (bounded, 5 s)
//! 2. answer discovery paths and reject everything that is not this
//!    target's upgrade
//! 3. claim the single-session slot, write the `101`, switch the socket
//!    into the RFC 6455 state machine
//! 4. pump frames in and queued writes out until either side closes
//!
//! Both phases watch the teardown signal: the pre-upgrade phase races it
//! so a socket stuck in the handshake cannot outlive the event loop, and
//! the framed loop initiates an orderly close on `Kill`. The task posts
//! `StartSession` before its first frame and `EndSession` exactly once on
//! exit, which is what keeps the engine-side session lifecycle invariant
//! structural rather than checked.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role, WebSocketConfig};
use tracing::{debug, trace};

use crate::error::Error;
use crate::identifiers::SessionId;
use crate::server::discovery;
use crate::server::http::{self, PrefixedStream};
use crate::server::socket_server::{ServerShared, SessionCommand, SessionHandle, Signal};

// ============================================================================
// Constants
// ============================================================================

/// Frames above this payload size are a protocol error.
const MAX_PAYLOAD_BYTES: usize = (1 << 31) - 1;

/// How long a close handshake may wait for the peer's echo before the
/// socket is dropped anyway.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Body sent with the 500 when a second frontend tries to attach.
const SESSION_BUSY_BODY: &str =
    "A session is already attached to this target; close the existing debugger client first.\n";

// ============================================================================
// Connection Entry Point
// ============================================================================

/// Drives one accepted socket from raw TCP to session teardown.
pub(crate) async fn handle_connection(
    shared: Arc<ServerShared>,
    stream: TcpStream,
    mut signal_rx: watch::Receiver<Signal>,
) {
    // The handshake races the kill signal; once upgraded, the framed loop
    // below has its own signal handling. The session is registered inside
    // `negotiate`, while this connection is still counted as pending, so
    // the event loop's drained-state check never loses sight of it.
    let negotiated = {
        let _pending = PendingGuard(&shared);
        tokio::select! {
            negotiated = negotiate(&shared, stream) => negotiated,
            _ = kill_signal(&mut signal_rx) => {
                debug!("abandoning handshake: inspector shutting down");
                None
            }
        }
    };

    if let Some(session) = negotiated {
        run_session(&shared, session, signal_rx).await;
    }
}

/// Decrements the pending-upgrade counter when the handshake phase ends,
/// whichever way it ends, and wakes the event loop so a Kill drain can
/// re-check for quiescence.
struct PendingGuard<'a>(&'a ServerShared);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.pending_upgrades.fetch_sub(1, Ordering::AcqRel);
        self.0.connection_closed.notify_one();
    }
}

/// Resolves once the teardown signal reaches `Kill` (or its sender is
/// gone). Checks the current value first, so a signal that fired before
/// this task subscribed is not missed.
async fn kill_signal(signal_rx: &mut watch::Receiver<Signal>) {
    while *signal_rx.borrow_and_update() != Signal::Kill {
        if signal_rx.changed().await.is_err() {
            return;
        }
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// A completed upgrade, registered in the session table and ready to serve.
struct NegotiatedSession {
    ws: SessionStream,
    session_id: SessionId,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    queued_bytes: Arc<AtomicUsize>,
}

/// Walks one socket through discovery routing or the WebSocket upgrade.
async fn negotiate(shared: &ServerShared, mut stream: TcpStream) -> Option<NegotiatedSession> {
    let (head, leftover) = match http::read_request_head(&mut stream).await {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(%err, "dropping connection before handshake");
            return None;
        }
    };
    trace!(method = %head.method, target = %head.target, "request head");

    if head.method != "GET" {
        respond(&mut stream, &http::plain_response(405, "Method Not Allowed", "")).await;
        return None;
    }

    match head.path() {
        "/json" | "/json/list" => {
            let body = discovery::list_response_body(
                &shared.config.target,
                &shared.config.host,
                shared.port(),
            );
            respond(&mut stream, &http::json_response(&body)).await;
            None
        }
        "/json/version" => {
            respond(
                &mut stream,
                &http::json_response(&discovery::version_response_body()),
            )
            .await;
            None
        }
        path => {
            let is_target = path
                .strip_prefix('/')
                .is_some_and(|id| id == shared.config.target.id.as_str());
            if !is_target {
                respond(
                    &mut stream,
                    &http::plain_response(404, "Not Found", "No such inspector target\n"),
                )
                .await;
                return None;
            }

            let Some(key) = head.websocket_key() else {
                let err = Error::handshake("missing WebSocket upgrade headers");
                debug!(%err, "rejecting target request");
                respond(
                    &mut stream,
                    &http::plain_response(400, "Bad Request", "WebSocket upgrade required\n"),
                )
                .await;
                return None;
            };

            // Claim the target before committing to the upgrade, so a
            // concurrent frontend loses here and no session ever starts.
            if shared
                .session_active
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!("{}", Error::SessionBusy);
                respond(
                    &mut stream,
                    &http::plain_response(500, "Internal Server Error", SESSION_BUSY_BODY),
                )
                .await;
                return None;
            }

            let key = key.to_string();
            if stream
                .write_all(http::upgrade_response(&key).as_bytes())
                .await
                .is_err()
            {
                shared.session_active.store(false, Ordering::Release);
                return None;
            }

            let ws = WebSocketStream::from_raw_socket(
                PrefixedStream::new(leftover, stream),
                Role::Server,
                Some(ws_config()),
            )
            .await;

            let session_id = shared.allocate_session_id();
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
            let queued_bytes = Arc::new(AtomicUsize::new(0));
            shared.sessions.lock().insert(
                session_id,
                SessionHandle {
                    tx: cmd_tx,
                    queued_bytes: Arc::clone(&queued_bytes),
                },
            );
            Some(NegotiatedSession {
                ws,
                session_id,
                cmd_rx,
                queued_bytes,
            })
        }
    }
}

async fn respond(stream: &mut TcpStream, response: &str) {
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn ws_config() -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(MAX_PAYLOAD_BYTES))
        .max_frame_size(Some(MAX_PAYLOAD_BYTES))
}

// ============================================================================
// Framed Session Loop
// ============================================================================

type SessionStream = WebSocketStream<PrefixedStream<TcpStream>>;

async fn run_session(
    shared: &ServerShared,
    session: NegotiatedSession,
    mut signal_rx: watch::Receiver<Signal>,
) {
    let NegotiatedSession {
        mut ws,
        session_id,
        mut cmd_rx,
        queued_bytes,
    } = session;

    debug!(%session_id, "inspector session established");
    shared.delegate.start_session(session_id);

    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(SessionCommand::Send(text)) => {
                    let bytes = text.len();
                    if let Err(err) = ws.send(Message::text(text)).await {
                        debug!(%session_id, error = %err, "write failed");
                        break;
                    }
                    queued_bytes.fetch_sub(bytes, Ordering::AcqRel);
                }
                Some(SessionCommand::Close(code)) => {
                    initiate_close(&mut ws, code, close_reason(code)).await;
                    break;
                }
                None => {
                    initiate_close(&mut ws, CloseCode::Away, close_reason(CloseCode::Away)).await;
                    break;
                }
            },
            _ = kill_signal(&mut signal_rx) => {
                initiate_close(&mut ws, CloseCode::Away, close_reason(CloseCode::Away)).await;
                break;
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    trace!(%session_id, len = text.len(), "frame received");
                    shared.delegate.message_received(session_id, text.as_str());
                }
                Some(Ok(Message::Binary(_))) => {
                    let err = Error::frame_protocol("binary frames are not supported");
                    debug!(%session_id, %err, "closing session");
                    initiate_close(&mut ws, CloseCode::Unsupported, close_reason(CloseCode::Unsupported)).await;
                    break;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(%session_id, ?frame, "close received");
                    // close() flushes our echo and completes the handshake.
                    let _ = timeout(CLOSE_GRACE, ws.close(None)).await;
                    break;
                }
                // Pings are answered by the framing layer; pongs carry no work.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(%session_id, error = %err, "framing error");
                    initiate_close(&mut ws, CloseCode::Protocol, close_reason(CloseCode::Protocol)).await;
                    break;
                }
                None => break,
            },
        }
    }

    shared.sessions.lock().remove(&session_id);
    // EndSession must be on the plane before the slot reopens, or a fast
    // reconnect could enqueue its StartSession ahead of this teardown.
    shared.delegate.end_session(session_id);
    shared.session_active.store(false, Ordering::Release);
    shared.connection_closed.notify_one();
    debug!(%session_id, "inspector session ended");
}

/// Sends a close frame and waits (bounded) for the peer's echo so the
/// handshake completes cleanly whenever the peer cooperates.
///
/// If the framing layer already queued its own close (protocol errors do
/// that), this just flushes it; the peer sees the original code.
async fn initiate_close(ws: &mut SessionStream, code: CloseCode, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    };
    let _ = timeout(CLOSE_GRACE, async {
        let _ = ws.close(Some(frame)).await;
        while let Some(message) = ws.next().await {
            if message.is_err() || matches!(message, Ok(Message::Close(_))) {
                break;
            }
        }
    })
    .await;
}

fn close_reason(code: CloseCode) -> &'static str {
    match code {
        CloseCode::Size => "outgoing message queue exceeded its limit",
        CloseCode::Unsupported => "binary frames are not supported",
        CloseCode::Protocol => "websocket protocol error",
        _ => "inspector is shutting down",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reasons_are_specific() {
        assert!(close_reason(CloseCode::Size).contains("queue"));
        assert!(close_reason(CloseCode::Unsupported).contains("binary"));
        assert!(close_reason(CloseCode::Protocol).contains("protocol"));
        assert!(close_reason(CloseCode::Away).contains("shutting down"));
    }

    #[test]
    fn test_frame_size_cap_is_wire_limit() {
        // RFC 6455 payloads are 63-bit; the inspector caps at 2^31 - 1.
        assert_eq!(MAX_PAYLOAD_BYTES, 2_147_483_647);
        let config = ws_config();
        assert_eq!(config.max_message_size, Some(MAX_PAYLOAD_BYTES));
        assert_eq!(config.max_frame_size, Some(MAX_PAYLOAD_BYTES));
    }
}
