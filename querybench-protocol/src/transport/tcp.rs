use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::{Transport, TransportError};

/// Largest frame accepted in either direction.
const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Returns the framing used on TCP connections.
///
/// Every frame is prefixed with its length as a big-endian `u32`. Workers use
/// the same codec on their side of the connection.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Transport over a TCP stream of length-delimited frames.
///
/// The first frame on a new connection carries the client identity, so the
/// worker can address replies to it. Sent frames are buffered until
/// [`flush`](Transport::flush) is called or the buffer fills up.
#[derive(Debug)]
pub struct TcpTransport {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl TcpTransport {
    /// Connects to a worker and announces `identity`.
    pub async fn connect(addr: &str, identity: &str) -> Result<Self, TransportError> {
        let connect_error = |source| TransportError::Connect {
            addr: addr.to_owned(),
            source,
        };

        let stream = TcpStream::connect(addr).await.map_err(connect_error)?;
        stream.set_nodelay(true).map_err(connect_error)?;

        let mut framed = Framed::new(stream, frame_codec());
        framed
            .send(Bytes::copy_from_slice(identity.as_bytes()))
            .await
            .map_err(connect_error)?;

        tracing::debug!(addr, identity, "connected to worker");

        Ok(Self { framed })
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.framed.feed(frame).await.map_err(TransportError::Send)
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        SinkExt::<Bytes>::flush(&mut self.framed)
            .await
            .map_err(TransportError::Send)
    }

    async fn recv(&mut self) -> Result<Bytes, TransportError> {
        match self.framed.next().await {
            Some(Ok(frame)) => Ok(frame.freeze()),
            Some(Err(err)) => Err(TransportError::Receive(err)),
            None => Err(TransportError::Closed),
        }
    }
}
