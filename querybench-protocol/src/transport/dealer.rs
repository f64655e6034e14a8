use std::thread;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::{Transport, TransportError};

/// Milliseconds the socket thread waits for inbound messages before checking
/// for new outbound frames again.
const POLL_INTERVAL_MS: i64 = 5;

type Inbound = Result<Bytes, TransportError>;

/// Transport over a ZeroMQ `DEALER` socket.
///
/// `zmq::Socket` is blocking and cannot be shared between threads, so the
/// socket is owned by a dedicated thread and frames cross over channels. Each
/// outbound frame is sent as the multipart message `['', frame]`. Of every
/// inbound multipart message only the last part, the payload, is forwarded.
#[derive(Debug)]
pub struct ZmqDealer {
    outbound: mpsc::UnboundedSender<Bytes>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl ZmqDealer {
    /// Connects a `DEALER` socket with the given identity to `addr`.
    pub fn connect(addr: &str, identity: &str) -> Result<Self, TransportError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::DEALER)?;
        socket.set_identity(identity.as_bytes())?;
        socket.set_linger(0)?;
        socket.connect(addr)?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name("zmq-dealer".into())
            .spawn(move || pump(socket, outbound_rx, inbound_tx))
            .map_err(|source| TransportError::Connect {
                addr: addr.to_owned(),
                source,
            })?;

        tracing::debug!(addr, identity, "connected dealer socket");
        Ok(Self { outbound, inbound })
    }
}

/// Shuttles frames between the socket and the channels until either side
/// goes away or the socket fails.
fn pump(
    socket: zmq::Socket,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        loop {
            match outbound.try_recv() {
                Ok(frame) => {
                    if let Err(err) = socket.send_multipart([&b""[..], &frame[..]], 0) {
                        inbound.send(Err(err.into())).ok();
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        match socket.poll(zmq::POLLIN, POLL_INTERVAL_MS) {
            Ok(0) => {}
            Ok(_) => match socket.recv_multipart(0) {
                Ok(parts) => {
                    let Some(payload) = parts.into_iter().last() else {
                        continue;
                    };
                    if inbound.send(Ok(Bytes::from(payload))).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    inbound.send(Err(err.into())).ok();
                    return;
                }
            },
            Err(err) => {
                inbound.send(Err(err.into())).ok();
                return;
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for ZmqDealer {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Result<Bytes, TransportError> {
        self.inbound.recv().await.ok_or(TransportError::Closed)?
    }
}

#[cfg(all(test, feature = "zmq"))]
mod tests {
    use super::*;

    /// Binds a `ROUTER` socket that answers the first request with an echo,
    /// followed by an extra message of several frames.
    fn spawn_router() -> (String, thread::JoinHandle<Vec<Vec<u8>>>) {
        let context = zmq::Context::new();
        let router = context.socket(zmq::ROUTER).unwrap();
        router.bind("tcp://127.0.0.1:*").unwrap();
        let endpoint = router.get_last_endpoint().unwrap().unwrap();

        let handle = thread::spawn(move || {
            let parts = router.recv_multipart(0).unwrap();
            let identity = parts[0].clone();

            router.send_multipart(parts.clone(), 0).unwrap();
            router
                .send_multipart([&identity[..], &b""[..], &b"extra"[..], &b"last"[..]], 0)
                .unwrap();
            parts
        });

        (endpoint, handle)
    }

    #[tokio::test]
    async fn echo_through_router() {
        let (endpoint, router) = spawn_router();
        let mut dealer = ZmqDealer::connect(&endpoint, "client_test").unwrap();

        dealer.send(Bytes::from_static(b"payload")).await.unwrap();
        assert_eq!(dealer.recv().await.unwrap(), "payload");
        assert_eq!(dealer.recv().await.unwrap(), "last");

        let parts = router.join().unwrap();
        assert_eq!(parts, [b"client_test".to_vec(), Vec::new(), b"payload".to_vec()]);
    }

    #[tokio::test]
    async fn dropped_dealer_stops_pump() {
        let (endpoint, _router) = spawn_router();
        let ZmqDealer { outbound, mut inbound } =
            ZmqDealer::connect(&endpoint, "client_test").unwrap();
        drop(outbound);

        assert!(inbound.recv().await.is_none());
    }
}
