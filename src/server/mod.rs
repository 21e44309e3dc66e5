//! WebSocket transport layer (internal).
//!
//! Everything that owns a socket lives here, on the dedicated I/O thread:
//!
//! | Module | Description |
//! |--------|-------------|
//! | `io_thread` | Thread lifecycle, start barrier, plane delegate |
//! | `socket_server` | Event loop: accept, route writes, teardown |
//! | `session` | Per-connection handshake and framed session tasks |
//! | `http` | Pre-upgrade request parsing and raw responses |
//! | `discovery` | `/json*` payloads and target metadata |
//!
//! The engine thread interacts with this layer exclusively through the
//! message plane and the [`io_thread::IoThread`] handle.

// ============================================================================
// Submodules
// ============================================================================

/// Discovery endpoint payloads and target metadata.
pub(crate) mod discovery;

/// Pre-upgrade HTTP handling.
pub(crate) mod http;

/// I/O thread lifecycle and the plane delegate.
pub(crate) mod io_thread;

/// Per-connection handshake and session tasks.
pub(crate) mod session;

/// Socket server event loop.
pub(crate) mod socket_server;
