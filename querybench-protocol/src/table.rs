//! Bookkeeping of outstanding and answered requests.
//!
//! A dispatched id lives in exactly one of two places: the [`PendingTable`]
//! while it awaits a reply, and the [`ResultTable`] once answered. The only
//! way to move an id between them is [`settle`], which never moves anything
//! back.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use tokio::time::Instant;

use crate::envelope::Reply;
use crate::error::{Error, Result};
use crate::id::CorrelationId;
use crate::payload::Payload;

/// A request that has been sent but not answered.
#[derive(Clone, Debug)]
pub struct PendingEntry {
    /// The query that was sent.
    pub query: Payload,
    /// When the request was handed to the transport.
    pub sent_at: Instant,
}

/// Requests awaiting a reply, keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<CorrelationId, PendingEntry>,
}

impl PendingTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty table with room for `capacity` requests.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Registers a request that is about to be sent.
    ///
    /// Fails with [`Error::DuplicateId`] if the id is already outstanding, as
    /// two requests sharing an id could never be told apart.
    pub fn insert(&mut self, id: CorrelationId, query: Payload) -> Result<()> {
        match self.entries.entry(id) {
            Entry::Occupied(entry) => Err(Error::DuplicateId(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(PendingEntry {
                    query,
                    sent_at: Instant::now(),
                });
                Ok(())
            }
        }
    }

    /// Returns the entry for `id`, if it is still outstanding.
    pub fn get(&self, id: &CorrelationId) -> Option<&PendingEntry> {
        self.entries.get(id)
    }

    /// Returns `true` if `id` is still awaiting a reply.
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` once every request has been answered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The outstanding ids in sorted order.
    pub fn ids(&self) -> Vec<CorrelationId> {
        let mut ids: Vec<_> = self.entries.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }
}

/// Replies received so far, keyed by correlation id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultTable {
    entries: HashMap<CorrelationId, Payload>,
}

impl ResultTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty table with room for `capacity` results.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Returns the result recorded for `id`.
    pub fn get(&self, id: &CorrelationId) -> Option<&Payload> {
        self.entries.get(id)
    }

    /// Returns `true` if a result for `id` has been recorded.
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of recorded results.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no result has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all results in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&CorrelationId, &Payload)> {
        self.entries.iter()
    }

    /// The answered ids in sorted order.
    pub fn ids(&self) -> Vec<CorrelationId> {
        let mut ids: Vec<_> = self.entries.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Unwraps the underlying map.
    pub fn into_inner(self) -> HashMap<CorrelationId, Payload> {
        self.entries
    }
}

/// What happened to a reply matched against the tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// The reply answered an outstanding request.
    Matched {
        /// Time between handing the request to the transport and settling it.
        latency: Duration,
    },
    /// The request was already answered; the earlier result is kept.
    Duplicate,
    /// No request with this id was ever dispatched.
    Unknown,
}

impl Settlement {
    /// Returns `true` for replies that did not answer an outstanding request.
    pub fn is_stray(&self) -> bool {
        !matches!(self, Settlement::Matched { .. })
    }
}

/// Moves the request answered by `reply` from `pending` into `results`.
///
/// Stray replies leave both tables untouched.
pub fn settle(pending: &mut PendingTable, results: &mut ResultTable, reply: Reply) -> Settlement {
    let Reply { id, data } = reply;

    match pending.entries.remove(&id) {
        Some(entry) => {
            let latency = Instant::now().saturating_duration_since(entry.sent_at);
            results.entries.insert(id, data);
            Settlement::Matched { latency }
        }
        None if results.contains(&id) => Settlement::Duplicate,
        None => Settlement::Unknown,
    }
}
