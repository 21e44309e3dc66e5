//! Embeddable DevTools inspector agent for JavaScript engine hosts.
//!
//! This library puts a Chrome-DevTools-compatible debugging endpoint into
//! a process that embeds a JavaScript engine. A frontend (browser devtools,
//! an IDE) discovers the target over HTTP, attaches over WebSocket, and the
//! agent shuttles protocol messages between that socket and the engine's
//! inspector library, without ever touching engine state off the engine
//! thread.
//!
//! # Architecture
//!
//! Exactly two threads interact with the core:
//!
//! ```text
//!  engine thread (host)                      I/O thread (this crate)
//! ┌──────────────────────┐                 ┌───────────────────────────┐
//! │ Agent / client       │  TransportAction│ socket server event loop  │
//! │  · state machine     │ ───────────────►│  · listeners + sessions   │
//! │  · session dispatch  │                 │  · HTTP discovery         │
//! │  · nested pause loop │◄─────────────── │  · RFC 6455 framing       │
//! │                      │ InspectorAction │                           │
//! └──────────────────────┘  message plane  └───────────────────────────┘
//! ```
//!
//! The engine thread owns all engine handles and the agent state machine;
//! the I/O thread owns all sockets. The message plane between them carries
//! typed envelopes (UTF-16 payloads), and wake signals (condvar,
//! foreground task, script interrupt) are pure signals, never data.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | [`Agent`] facade, builder, lifecycle states |
//! | [`engine`] | Traits the host implements over its engine bindings |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`strings`] | UTF-16 protocol string buffers |
//! | `plane` | Cross-thread envelope queues (internal) |
//! | `server` | WebSocket transport layer (internal) |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use devtools_agent::Agent;
//! # fn backend() -> std::rc::Rc<dyn devtools_agent::EngineInspector> { unimplemented!() }
//! # fn platform() -> std::sync::Arc<dyn devtools_agent::EnginePlatform> { unimplemented!() }
//!
//! # fn main() -> devtools_agent::Result<()> {
//! let mut agent = Agent::builder().port(0).build()?;
//! agent.prepare(backend(), platform(), Some(Path::new("app.js")))?;
//! agent.run()?;
//! eprintln!("attach a frontend at {}", agent.frontend_url()?);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

/// Agent facade and lifecycle.
pub mod agent;

/// Seam between the agent and the host's JavaScript engine.
pub mod engine;

/// Error types and result aliases.
pub mod error;

/// Type-safe identifiers for inspector entities.
pub mod identifiers;

/// UTF-16 protocol string buffers.
pub mod strings;

/// Cross-thread message plane (internal).
pub(crate) mod plane;

/// WebSocket transport layer (internal).
pub(crate) mod server;

// ============================================================================
// Re-exports
// ============================================================================

// Agent types
pub use agent::{Agent, AgentBuilder, AgentState, ProgressLog};

// Engine seam
pub use engine::{
    CONTEXT_GROUP_ID, EngineInspector, EnginePlatform, EngineSession, ExceptionDetails,
    FrontendChannel, InspectorClientHooks,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{SessionId, TargetId};

// String types
pub use strings::Utf16String;
