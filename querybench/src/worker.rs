//! A loopback worker that answers queries without a database.
//!
//! The worker accepts TCP connections speaking the same length-delimited framing as
//! [`TcpTransport`](querybench_protocol::transport::TcpTransport). The first frame of each
//! connection names the client. Every following frame is a request, which is handed to a shared
//! pool of at most `concurrency` in-flight tasks. Each task sleeps for a random time within the
//! configured bounds and then replies with the query echoed back as data, so replies leave the
//! worker in a different order than their requests arrived.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use querybench_protocol::transport::frame_codec;
use querybench_protocol::{Codec, Reply, Request};
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::Worker;

/// Serves the loopback worker until the process receives SIGINT or SIGTERM.
pub async fn run(config: Worker) -> Result<()> {
    let worker = LoopbackWorker::bind(config).await?;
    tracing::info!(addr = %worker.local_addr()?, "worker listening");

    let shutdown = elegant_departure::tokio::depart()
        .on_termination()
        .on_sigint();

    serve_until(worker.serve(), shutdown).await
}

/// Runs `server` until `shutdown` resolves, or returns the error `server` stopped with.
async fn serve_until<S>(server: S, shutdown: impl Future<Output = ()>) -> Result<()>
where
    S: Future<Output = Result<()>> + Send + 'static,
{
    let mut server = tokio::spawn(server);

    tokio::select! {
        result = &mut server => {
            result.context("worker task failed")??;
            Ok(())
        }
        _ = shutdown => {
            tracing::info!("shutting down");
            server.abort();
            Ok(())
        }
    }
}

/// A TCP server echoing queries back after a simulated delay.
#[derive(Debug)]
pub struct LoopbackWorker {
    listener: TcpListener,
    config: Arc<Worker>,
    permits: Arc<Semaphore>,
}

impl LoopbackWorker {
    /// Binds to the configured listen address.
    pub async fn bind(config: Worker) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .with_context(|| format!("failed to bind to {}", config.listen_addr))?;
        Ok(Self::new(listener, config))
    }

    /// Creates a worker on an already bound listener.
    pub fn new(listener: TcpListener, config: Worker) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency));
        Self {
            listener,
            config: Arc::new(config),
            permits,
        }
    }

    /// The address the worker accepts connections on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(self) -> Result<()> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .context("failed to accept connection")?;

            let config = Arc::clone(&self.config);
            let permits = Arc::clone(&self.permits);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, config, permits).await {
                    tracing::warn!(
                        %peer,
                        error = &*err as &dyn std::error::Error,
                        "connection failed"
                    );
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    config: Arc<Worker>,
    permits: Arc<Semaphore>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    let mut frames = FramedRead::new(reader, frame_codec());
    let mut sink = FramedWrite::new(writer, frame_codec());

    let Some(identity) = frames.next().await.transpose()? else {
        return Ok(());
    };
    let identity = String::from_utf8_lossy(&identity).into_owned();
    tracing::debug!(identity, "client connected");

    let (replies, mut outbound) = mpsc::unbounded_channel::<Bytes>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            sink.send(frame).await?;
        }
        anyhow::Ok(())
    });

    let mut served = 0u64;
    while let Some(frame) = frames.next().await {
        let frame = frame.context("failed to read request")?;

        let request: Request = match config.codec.decode(&frame) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(
                    identity,
                    error = &err as &dyn std::error::Error,
                    "skipping malformed request"
                );
                continue;
            }
        };

        let permit = Arc::clone(&permits).acquire_owned().await?;
        let delay = sample_delay(config.min_delay, config.max_delay);
        let replies = replies.clone();
        let codec = config.codec;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(frame) = answer(codec, request) {
                replies.send(frame).ok();
            }
            drop(permit);
        });
        served += 1;
    }

    drop(replies);
    writer.await??;
    tracing::debug!(identity, served, "client disconnected");

    Ok(())
}

/// Builds the reply to `request`, echoing the query as its data.
fn answer(codec: Codec, request: Request) -> Option<Bytes> {
    let Request { id, query } = request;
    let reply = Reply { id, data: query };

    match codec.encode(&reply) {
        Ok(frame) => Some(frame),
        Err(err) => {
            tracing::error!(
                id = %reply.id,
                error = &err as &dyn std::error::Error,
                "failed to encode reply"
            );
            None
        }
    }
}

fn sample_delay(min: Duration, max: Duration) -> Duration {
    if min >= max {
        return min;
    }
    rand::rng().random_range(min..=max)
}
