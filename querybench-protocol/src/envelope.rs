//! Wire-level messages.

use serde::{Deserialize, Serialize};

use crate::id::CorrelationId;
use crate::payload::Payload;

/// A query sent to a worker, encoded as the mapping `{id, query}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id the reply must echo.
    pub id: CorrelationId,
    /// The work to perform.
    pub query: Payload,
}

/// A worker's answer to a [`Request`], encoded as the mapping `{id, data}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Correlation id of the request this answers.
    pub id: CorrelationId,
    /// The result of the work.
    pub data: Payload,
}
