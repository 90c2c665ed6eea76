//! Type-safe identifier newtypes for certrelay.
//!
//! Request identifiers are supplied by the requester and must stay stable
//! across re-deliveries of the same CSR, so they are never generated here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a certificate-signing request, as chosen by the requester.
///
/// The orchestrator de-duplicates on this value: while a request with a
/// given id is in flight, a second request with the same id is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Generation of a tracked request.
///
/// Each time an id is (re)tracked it receives a fresh generation. Timer and
/// worker events carry the generation they were scheduled for, so events
/// belonging to a withdrawn or replaced request can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// The generation following this one.
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id() {
        let id = RequestId::new("unit-0/csr-1");
        assert_eq!(id.as_str(), "unit-0/csr-1");
        assert_eq!(id.to_string(), "unit-0/csr-1");
        assert_eq!(RequestId::from("unit-0/csr-1"), id);
    }

    #[test]
    fn test_request_id_serializes_as_plain_string() {
        let id = RequestId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let back: RequestId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_generation_advances() {
        let g = Generation::new(1);
        assert_eq!(g.next().value(), 2);
        assert!(g < g.next());
        assert_eq!(g.to_string(), "g1");
    }
}
