//! An in-process loopback worker for use in integration tests.
//!
//! ```
//! use querybench_test::worker::TestWorker;
//!
//! #[tokio::main]
//! async fn main() {
//!     let worker = TestWorker::new().await;
//!     let addr = worker.addr();
//!     // point the benchmark at `addr`...
//! }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use querybench::config::Worker;
use querybench::worker::LoopbackWorker;
use tokio::net::TcpListener;

/// A loopback worker listening on a random port on localhost.
///
/// The worker is stopped when this handle is dropped.
#[derive(Debug)]
pub struct TestWorker {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl TestWorker {
    /// Starts a worker that replies after up to 5 milliseconds.
    pub async fn new() -> Self {
        Self::with_delay(Duration::ZERO, Duration::from_millis(5)).await
    }

    /// Starts a worker whose simulated processing time lies between `min` and `max`.
    pub async fn with_delay(min: Duration, max: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let socket = listener.local_addr().unwrap();

        let config = Worker {
            listen_addr: socket,
            min_delay: min,
            max_delay: max,
            ..Default::default()
        };

        let worker = LoopbackWorker::new(listener, config);
        let handle = tokio::spawn(async move {
            worker.serve().await.ok();
        });

        Self { handle, socket }
    }

    /// Returns the `host:port` address of the worker.
    pub fn addr(&self) -> String {
        self.socket.to_string()
    }
}

impl Drop for TestWorker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
