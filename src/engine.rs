//! Seam between the agent and the host's JavaScript engine.
//!
//! The engine and its inspector library are external collaborators: the
//! host owns the bindings, this crate owns the transport and threading.
//! The traits here cut that boundary the same way the engine's own C API
//! does, reshaped as object-safe Rust traits.
//!
//! # Who implements what
//!
//! | Trait | Implemented by | Called by |
//! |-------|----------------|-----------|
//! | [`EngineInspector`] | host (over the engine's inspector library) | agent, engine thread only |
//! | [`EngineSession`] | host | agent, engine thread only |
//! | [`FrontendChannel`] | this crate | host's inspector library |
//! | [`InspectorClientHooks`] | this crate | host's inspector library |
//! | [`EnginePlatform`] | host | agent and I/O thread |
//!
//! Engine-side traits take `&self` and use interior mutability internally,
//! because a `dispatch_protocol_message` can re-enter the agent (a
//! `Runtime.evaluate` hitting a breakpoint pauses inside the dispatch) and
//! exclusive borrows would make that nesting impossible.

// ============================================================================
// Imports
// ============================================================================

use std::rc::{Rc, Weak};

use crate::strings::Utf16String;

// ============================================================================
// Constants
// ============================================================================

/// The context group every agent context registers under. One agent serves
/// one engine, so the group id is fixed; hosts pass it to their inspector
/// library when creating contexts and sessions.
pub const CONTEXT_GROUP_ID: i32 = 1;

// ============================================================================
// EngineInspector
// ============================================================================

/// The engine's inspector library, bound to one engine context group.
///
/// All methods run on the engine thread; implementations are free to use
/// `Rc`/`RefCell` internally and are never sent across threads.
pub trait EngineInspector {
    /// Hands the library the embedder hooks it calls back into when the
    /// engine pauses. Invoked once, during agent preparation.
    ///
    /// The reference is weak: the library may outlive one agent and must
    /// not keep it alive.
    fn attach_client(&self, hooks: Weak<dyn InspectorClientHooks>);

    /// Creates a fresh inspector session whose outbound messages flow
    /// through `channel`.
    fn connect(&self, channel: Rc<dyn FrontendChannel>) -> Rc<dyn EngineSession>;

    /// Registers the engine context under the agent's context group
    /// ([`CONTEXT_GROUP_ID`]).
    fn context_created(&self, name: &str);

    /// Unregisters the engine context (shutdown path).
    fn context_destroyed(&self);

    /// Reports an uncaught exception to the inspector, which emits the
    /// corresponding `Runtime.exceptionThrown` notification to any
    /// attached session.
    fn exception_thrown(&self, exception: &ExceptionDetails);
}

// ============================================================================
// EngineSession
// ============================================================================

/// One live inspector session inside the engine.
///
/// Dropping the last strong reference disconnects the session.
pub trait EngineSession {
    /// Feeds one frontend protocol message to the session, verbatim.
    fn dispatch_protocol_message(&self, message: &Utf16String);

    /// Arms a pause that fires before the next JavaScript statement.
    fn schedule_pause_on_next_statement(&self, reason: &Utf16String, detail: &Utf16String);
}

// ============================================================================
// FrontendChannel
// ============================================================================

/// Outbound half of a session: the inspector library pushes its responses
/// and notifications here, and the agent forwards them to the frontend.
pub trait FrontendChannel {
    /// Delivers the response to protocol call `call_id`.
    fn send_response(&self, call_id: i64, message: Utf16String);

    /// Delivers an unsolicited protocol notification.
    fn send_notification(&self, message: Utf16String);

    /// Flush hint from the library; the transport sends eagerly, so the
    /// default is a no-op.
    fn flush_protocol_notifications(&self) {}
}

// ============================================================================
// InspectorClientHooks
// ============================================================================

/// Embedder hooks the inspector library drives during debugger pauses.
///
/// `run_message_loop_on_pause` blocks the engine thread in a nested loop
/// that keeps servicing protocol messages and the engine's foreground task
/// queue; `quit_message_loop_on_pause` (called when the frontend resumes or
/// the session ends) releases it.
pub trait InspectorClientHooks {
    /// Enters the nested pause loop. Engine thread only; re-entrant calls
    /// return immediately.
    fn run_message_loop_on_pause(&self);

    /// Requests the innermost pause loop to exit after the current drain.
    fn quit_message_loop_on_pause(&self);
}

// ============================================================================
// EnginePlatform
// ============================================================================

/// The host's scheduling surface for the engine thread.
///
/// Wake methods are pure signals, never data carriers: actual protocol
/// payloads only ever travel through the message plane. A host typically
/// maps them onto its event loop (post a task, request a script interrupt)
/// and reacts by calling [`Agent::dispatch_messages`] at the next
/// checkpoint.
///
/// [`Agent::dispatch_messages`]: crate::Agent::dispatch_messages
pub trait EnginePlatform: Send + Sync {
    /// Runs one queued foreground task, returning `true` if one ran.
    /// Engine thread only; the nested pause loop pumps this until empty.
    fn pump_message_loop(&self) -> bool;

    /// Signals, from any thread, that inbound protocol work is pending and
    /// the engine thread should drain at its next idle point.
    fn post_dispatch_task(&self);

    /// Signals, from any thread, that a long-running script should hit a
    /// checkpoint and drain promptly.
    fn request_interrupt(&self);
}

// ============================================================================
// ExceptionDetails
// ============================================================================

/// An uncaught engine exception, flattened to the fields the inspector
/// protocol carries.
///
/// The host extracts these from its engine's message object (which this
/// crate cannot name) before calling [`Agent::fatal_exception`].
///
/// [`Agent::fatal_exception`]: crate::Agent::fatal_exception
#[derive(Debug, Clone)]
pub struct ExceptionDetails {
    /// Short classification shown by frontends, typically `"Uncaught"`.
    pub text: Utf16String,
    /// The exception message.
    pub detail: Utf16String,
    /// Resource name of the script that threw.
    pub url: Utf16String,
    /// 1-based line of the throw site.
    pub line_number: u32,
    /// 1-based column of the throw site.
    pub column_number: u32,
    /// Engine script id, or 0 when the top stack frame already carries it.
    pub script_id: u32,
}

impl ExceptionDetails {
    /// Builds details for an uncaught exception with the conventional
    /// `"Uncaught"` classification.
    #[must_use]
    pub fn uncaught(detail: &str, url: &str, line_number: u32, column_number: u32) -> Self {
        Self {
            text: Utf16String::from("Uncaught"),
            detail: Utf16String::from(detail),
            url: Utf16String::from(url),
            line_number,
            column_number,
            script_id: 0,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncaught_constructor() {
        let exc = ExceptionDetails::uncaught("boom", "file:///tmp/a.js", 3, 7);
        assert_eq!(exc.text.to_utf8(), "Uncaught");
        assert_eq!(exc.detail.to_utf8(), "boom");
        assert_eq!(exc.line_number, 3);
        assert_eq!(exc.column_number, 7);
        assert_eq!(exc.script_id, 0);
    }
}
