//! Correlation identifiers and their generation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Token embedded in a request and its reply to match the two up.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wraps an existing identifier, for example one received from a peer.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as it appears on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Issues correlation ids that never repeat for the lifetime of the generator.
///
/// An id is made of a prefix, a random session token drawn once at
/// construction and a monotonic sequence number, for example
/// `query_3f9a1c2e_0000002a`. The sequence number guarantees uniqueness within
/// one generator; the session token keeps concurrent clients talking to the
/// same worker apart.
#[derive(Debug)]
pub struct IdGenerator {
    prefix: String,
    session: u32,
    next: u64,
}

impl IdGenerator {
    /// Creates a generator with a random session token.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_session(prefix, rand::random())
    }

    /// Creates a generator with a fixed session token.
    pub fn with_session(prefix: impl Into<String>, session: u32) -> Self {
        Self {
            prefix: prefix.into(),
            session,
            next: 0,
        }
    }

    /// Returns the next unused id.
    pub fn next_id(&mut self) -> CorrelationId {
        let sequence = self.next;
        self.next += 1;
        CorrelationId(format!(
            "{}_{:08x}_{sequence:08x}",
            self.prefix, self.session
        ))
    }

    /// Number of ids issued so far.
    pub fn issued(&self) -> u64 {
        self.next
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new("query")
    }
}

/// Generates an identity for a client connection, such as `client_5be0c8a1d34f9e72`.
pub fn client_identity() -> String {
    format!("client_{:016x}", rand::random::<u64>())
}
