use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Transport, TransportError};

/// In-process transport made of two unbounded channels.
///
/// [`ChannelTransport::pair`] returns both ends; frames sent on one end are
/// received on the other. Used for tests and for running a worker in the same
/// process.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl ChannelTransport {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        let a = Self { tx: a_tx, rx: a_rx };
        let b = Self { tx: b_tx, rx: b_rx };
        (a, b)
    }

    /// Returns a frame that has already arrived, without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Result<Bytes, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_over() {
        let (mut a, mut b) = ChannelTransport::pair();

        a.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), "ping");

        b.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn dropped_peer_closes() {
        let (mut a, b) = ChannelTransport::pair();
        drop(b);

        assert!(matches!(a.recv().await, Err(TransportError::Closed)));
        assert!(matches!(
            a.send(Bytes::new()).await,
            Err(TransportError::Closed)
        ));
    }
}
