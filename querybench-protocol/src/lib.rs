//! The protocol layer of querybench: dispatching many queries over a single
//! message channel and collecting their replies out of order.
//!
//! Every request carries a [`CorrelationId`]. The [`Dispatcher`] sends a whole
//! batch without waiting for any reply, keeps the outstanding ids in a
//! [`PendingTable`], and then moves each id into a [`ResultTable`] as soon as a
//! reply with that id arrives. A run completes once every dispatched id has a
//! result, so its wall time approaches the slowest round trip rather than the
//! sum of all of them.
//!
//! The channel itself is abstracted behind the [`Transport`] trait, and the
//! wire format behind [`Codec`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod codec;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod id;
pub mod payload;
pub mod table;
pub mod transport;

pub use crate::codec::{Codec, CodecError};
pub use crate::dispatcher::{
    CollectStats, Collection, DispatchOptions, Dispatcher, NoopObserver, Observer, RunReport,
    WorkItem,
};
pub use crate::envelope::{Reply, Request};
pub use crate::error::{Error, Result};
pub use crate::id::{CorrelationId, IdGenerator, client_identity};
pub use crate::payload::Payload;
pub use crate::table::{PendingTable, ResultTable, Settlement};
pub use crate::transport::{BoxedTransport, Transport, TransportError};
