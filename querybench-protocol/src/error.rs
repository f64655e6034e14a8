use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;
use crate::id::CorrelationId;
use crate::transport::TransportError;

/// Errors that abort a dispatch run.
///
/// Undecodable and stray replies are not represented here, since the collector
/// recovers from them locally. See [`CollectStats`](crate::CollectStats).
#[derive(Debug, Error)]
pub enum Error {
    /// The batch or its surrounding configuration is invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The underlying channel failed to connect, send or receive.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A request could not be serialized.
    #[error("failed to encode request {id}: {source}")]
    Encode {
        /// The id of the request that failed to encode.
        id: CorrelationId,
        /// The codec failure.
        #[source]
        source: CodecError,
    },

    /// The same correlation id was issued twice within one batch.
    #[error("correlation id {0} was issued twice")]
    DuplicateId(CorrelationId),

    /// Replies stopped arriving before every request was answered.
    #[error("timed out after {elapsed:?} with {} requests pending", .pending.len())]
    Timeout {
        /// Time spent collecting before giving up.
        elapsed: Duration,
        /// The ids still awaiting a reply, sorted.
        pending: Vec<CorrelationId>,
    },
}

/// Result type for protocol operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
