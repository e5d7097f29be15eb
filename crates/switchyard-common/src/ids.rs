//! Process-wide id allocation.
//!
//! Bearer and request ids are monotonic `u32`s from atomic counters —
//! cheap, ordered by creation, and unambiguous in logs. Session ids are
//! assigned by the data service, one per transport side of a bearer, and
//! are only unique among live bearers on the same transport.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Identifies one bearer for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BearerId(pub u32);

impl BearerId {
    /// Allocate the next bearer id.
    pub fn next() -> BearerId {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        BearerId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for BearerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bearer-{}", self.0)
    }
}

/// Identifies one consumer request for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u32);

impl RequestId {
    /// Allocate the next request id.
    pub fn next() -> RequestId {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        RequestId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// A transport-assigned session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sid-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_ids_are_unique_and_ordered() {
        let a = BearerId::next();
        let b = BearerId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::next(), RequestId::next());
    }

    #[test]
    fn display_is_prefixed() {
        assert!(BearerId(7).to_string().starts_with("bearer-"));
        assert!(RequestId(7).to_string().starts_with("req-"));
        assert!(SessionId(7).to_string().starts_with("sid-"));
    }
}
