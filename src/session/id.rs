//! Session identifier type.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::TunnelError;

/// Longest accepted session identifier, in bytes.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Identifier of a user session.
///
/// Session IDs are opaque strings, usually chosen by the client. Because a
/// session's workspace is a directory named after its ID, only a single safe
/// path component is accepted: ASCII alphanumerics, `-`, `_` and `.`, and
/// never `.` or `..` on their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Validate a client-supplied identifier.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        raw.parse()
    }

    /// Derive an identifier for a connection that did not supply one.
    ///
    /// `conn-` followed by 32 random hex digits, so one connection cannot
    /// guess the id of another.
    pub fn for_connection() -> Self {
        Self(format!("conn-{}", Uuid::new_v4().simple()))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_safe_component(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= MAX_SESSION_ID_LEN
        && raw != "."
        && raw != ".."
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if is_safe_component(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(TunnelError::InvalidSession(s.into()))
        }
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_connection_ids_unique() {
        let mut ids = HashSet::new();
        for _ in 0..10_000 {
            let id = SessionId::for_connection();
            assert!(ids.insert(id.clone()), "Duplicate ID generated: {}", id);
        }
    }

    #[test]
    fn test_connection_id_format() {
        let id = SessionId::for_connection();
        assert!(id.as_str().starts_with("conn-"));
        assert_eq!(id.as_str().len(), "conn-".len() + 32);
        assert!(id.as_str()["conn-".len()..]
            .bytes()
            .all(|b| b.is_ascii_hexdigit()));
        // Derived ids must themselves be valid session ids.
        assert!(SessionId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_connection_ids_not_sequential() {
        let first = SessionId::for_connection();
        let second = SessionId::for_connection();
        let a = u128::from_str_radix(&first.as_str()[5..], 16).unwrap();
        let b = u128::from_str_radix(&second.as_str()[5..], 16).unwrap();
        assert_ne!(a.wrapping_add(1), b);
        assert_ne!(first.as_str()[5..20], second.as_str()[5..20]);
    }

    #[test]
    fn test_parse_valid() {
        let id = SessionId::parse("session_k3j9x2a1b").unwrap();
        assert_eq!(id.as_str(), "session_k3j9x2a1b");
        assert!(SessionId::parse("a.b-c_d").is_ok());
    }

    #[test]
    fn test_parse_empty_is_invalid_session() {
        let err = SessionId::parse("").unwrap_err();
        assert!(matches!(err, TunnelError::InvalidSession(_)));
    }

    #[test]
    fn test_parse_rejects_path_fragments() {
        for raw in ["..", ".", "a/b", "../etc", "/abs", "a\\b", "a b", "a\0b"] {
            assert!(SessionId::parse(raw).is_err(), "accepted {:?}", raw);
        }
    }

    #[test]
    fn test_parse_rejects_overlong() {
        let long = "x".repeat(MAX_SESSION_ID_LEN + 1);
        assert!(SessionId::parse(&long).is_err());
        assert!(SessionId::parse(&long[1..]).is_ok());
    }
}
