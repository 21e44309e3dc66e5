//! UTF-16 protocol string buffers.
//!
//! The engine's inspector library speaks UTF-16 while the wire carries
//! UTF-8. Every payload crossing the message plane is a [`Utf16String`];
//! the I/O thread converts at the socket boundary in both directions.
//! Invalid sequences are replaced with U+FFFD rather than rejected, so a
//! hostile frontend cannot wedge the pipeline with malformed text.

use std::fmt;

// ============================================================================
// Utf16String
// ============================================================================

/// An owned UTF-16 code-unit buffer.
///
/// This is the payload type of message-plane envelopes. It is deliberately
/// not a `String` so that lossy conversions happen exactly once, at the
/// thread boundary, instead of ad hoc throughout the pipeline.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Utf16String(Vec<u16>);

impl Utf16String {
    /// Creates an empty buffer.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Encodes a UTF-8 string into UTF-16 code units.
    #[must_use]
    pub fn from_utf8(text: &str) -> Self {
        Self(text.encode_utf16().collect())
    }

    /// Decodes back to UTF-8, replacing unpaired surrogates with U+FFFD.
    #[must_use]
    pub fn to_utf8(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }

    /// Returns the raw code units.
    #[inline]
    #[must_use]
    pub fn as_code_units(&self) -> &[u16] {
        &self.0
    }

    /// Number of UTF-16 code units (not characters, not bytes).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the buffer holds no code units.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Utf16String {
    fn from(text: &str) -> Self {
        Self::from_utf8(text)
    }
}

impl From<Vec<u16>> for Utf16String {
    fn from(units: Vec<u16>) -> Self {
        Self(units)
    }
}

impl fmt::Display for Utf16String {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_utf8())
    }
}

impl fmt::Debug for Utf16String {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Utf16String({:?})", self.to_utf8())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_round_trip() {
        let s = Utf16String::from_utf8(r#"{"id":1,"method":"Runtime.enable"}"#);
        assert_eq!(s.to_utf8(), r#"{"id":1,"method":"Runtime.enable"}"#);
    }

    #[test]
    fn test_bmp_and_astral_round_trip() {
        // Astral characters occupy two code units.
        let s = Utf16String::from_utf8("π 𝄞 ok");
        assert_eq!(s.to_utf8(), "π 𝄞 ok");
        assert_eq!(s.len(), "π 𝄞 ok".encode_utf16().count());
    }

    #[test]
    fn test_unpaired_surrogate_becomes_replacement_char() {
        // 0xD800 is a lone high surrogate.
        let s = Utf16String::from(vec![0x0061, 0xD800, 0x0062]);
        assert_eq!(s.to_utf8(), "a\u{FFFD}b");
    }

    #[test]
    fn test_empty() {
        let s = Utf16String::new();
        assert!(s.is_empty());
        assert_eq!(s.to_utf8(), "");
    }

    #[test]
    fn test_debug_shows_decoded_text() {
        let s = Utf16String::from("hi");
        assert_eq!(format!("{s:?}"), "Utf16String(\"hi\")");
    }
}
