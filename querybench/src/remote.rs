//! Opening the transport to the configured worker.

use anyhow::{Context, Result};
use querybench_protocol::BoxedTransport;
use querybench_protocol::transport::TcpTransport;

use crate::config::Remote;

/// Connects to `remote`, announcing `identity`.
pub async fn connect(remote: &Remote, identity: &str) -> Result<BoxedTransport> {
    let transport: BoxedTransport = match remote {
        Remote::Tcp { addr } => Box::new(
            TcpTransport::connect(addr, identity)
                .await
                .context("failed to connect to tcp worker")?,
        ),
        Remote::Zmq { addr } => connect_zmq(addr, identity)?,
    };

    tracing::info!(remote = remote.addr(), identity, "connected");
    Ok(transport)
}

#[cfg(feature = "zmq")]
fn connect_zmq(addr: &str, identity: &str) -> Result<BoxedTransport> {
    let dealer = querybench_protocol::transport::ZmqDealer::connect(addr, identity)
        .context("failed to connect zmq dealer")?;
    Ok(Box::new(dealer))
}

#[cfg(not(feature = "zmq"))]
fn connect_zmq(addr: &str, _identity: &str) -> Result<BoxedTransport> {
    anyhow::bail!("cannot connect to {addr}: querybench was built without the `zmq` feature")
}
