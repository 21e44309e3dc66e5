//! Type-safe identifiers for inspector entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Backing | Allocation |
//! |------|---------|------------|
//! | [`SessionId`] | `u64` | server-wide monotonic counter on the I/O thread |
//! | [`TargetId`] | UUIDv4 string | generated once at agent construction |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// SessionId
// ============================================================================

/// Identifier of one WebSocket inspector session.
///
/// Allocated by the socket server when an upgrade succeeds; uniquely
/// identifies a live session and is reused only after its `EndSession`
/// has been acknowledged on both threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Session id of an in-process (host-connected) frontend delegate.
    ///
    /// The socket server allocates ids starting at 1, so 0 never collides
    /// with a network session.
    pub(crate) const HOST: SessionId = SessionId(0);

    /// Wraps a raw counter value.
    #[inline]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// TargetId
// ============================================================================

/// Identifier of the debuggable target exposed by an agent.
///
/// Rendered as an RFC 4122 v4 UUID in 8-4-4-4-12 hex layout. The id doubles
/// as the WebSocket path of the target, so it must be unguessable: generation
/// uses the operating system CSPRNG.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TargetId(String);

impl TargetId {
    /// Generates a fresh random target id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps a caller-supplied id (e.g. one fixed for test reproducibility).
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_ordering_and_display() {
        let a = SessionId::from_raw(1);
        let b = SessionId::from_raw(2);
        assert!(a < b);
        assert_eq!(a.to_string(), "1");
        assert_eq!(b.as_u64(), 2);
    }

    #[test]
    fn test_host_session_id_never_collides_with_server_ids() {
        // Server allocation starts at 1.
        assert_eq!(SessionId::HOST.as_u64(), 0);
    }

    #[test]
    fn test_target_id_layout() {
        let id = TargetId::generate();
        let parts: Vec<&str> = id.as_str().split('-').collect();
        let lens: Vec<usize> = parts.iter().map(|p| p.len()).collect();
        assert_eq!(lens, vec![8, 4, 4, 4, 12]);
        assert!(
            id.as_str()
                .chars()
                .all(|c| c == '-' || c.is_ascii_hexdigit())
        );
    }

    #[test]
    fn test_target_id_version_and_variant_nibbles() {
        let id = TargetId::generate();
        let parts: Vec<&str> = id.as_str().split('-').collect();
        // Version nibble is 4, variant high bits are 10 (hex 8..b).
        assert!(parts[2].starts_with('4'));
        assert!(matches!(
            parts[3].chars().next(),
            Some('8' | '9' | 'a' | 'b')
        ));
    }

    #[test]
    fn test_target_ids_are_unique() {
        assert_ne!(TargetId::generate(), TargetId::generate());
    }

    #[test]
    fn test_target_id_serializes_as_plain_string() {
        let id = TargetId::from_string("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
