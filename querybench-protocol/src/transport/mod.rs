//! Message channels carrying encoded envelopes.
//!
//! A [`Transport`] delivers whole frames: any multi-part framing used by the
//! underlying connection is resolved before a frame reaches the dispatcher.

use std::fmt::Debug;
use std::io;

use bytes::Bytes;
use thiserror::Error;

mod channel;
mod tcp;
#[cfg(feature = "zmq")]
mod dealer;

pub use channel::ChannelTransport;
pub use tcp::{TcpTransport, frame_codec};
#[cfg(feature = "zmq")]
pub use dealer::ZmqDealer;

/// A boxed transport chosen at runtime.
pub type BoxedTransport = Box<dyn Transport>;

/// A bidirectional, message-oriented connection owned by one dispatcher.
#[async_trait::async_trait]
pub trait Transport: Debug + Send {
    /// Enqueues a frame for delivery without waiting for the peer.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Pushes any buffered frames out to the peer.
    async fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Waits for the next inbound frame.
    async fn recv(&mut self) -> Result<Bytes, TransportError>;
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        (**self).send(frame).await
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        (**self).flush().await
    }

    async fn recv(&mut self) -> Result<Bytes, TransportError> {
        (**self).recv().await
    }
}

/// Errors raised by a [`Transport`]. None of them are retried.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// The address that was dialed.
        addr: String,
        /// The underlying failure.
        #[source]
        source: io::Error,
    },

    /// Writing a frame failed.
    #[error("failed to send frame: {0}")]
    Send(#[source] io::Error),

    /// Reading a frame failed.
    #[error("failed to receive frame: {0}")]
    Receive(#[source] io::Error),

    /// The peer went away.
    #[error("connection closed")]
    Closed,

    /// The ZeroMQ socket reported an error.
    #[cfg(feature = "zmq")]
    #[error("zeromq error: {0}")]
    Zmq(#[from] zmq::Error),
}
