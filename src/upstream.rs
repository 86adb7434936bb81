use std::{net::SocketAddr, time::Duration};

use tokio::{net::TcpStream, time::timeout};
use tracing::debug;

use crate::error::SessionError;

/// Dials the destination, giving up after `limit`. Nagle is disabled so
/// relayed writes go out as they arrive.
pub async fn connect(addr: SocketAddr, limit: Duration) -> Result<TcpStream, SessionError> {
    debug!(target_addr = %addr, "Attempting to connect to destination");

    let stream = timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| SessionError::ConnectTimeout { addr, limit })?
        .map_err(|source| SessionError::Connect { addr, source })?;

    if let Err(e) = stream.set_nodelay(true) {
        debug!(target_addr = %addr, error = %e, "Failed to disable Nagle on upstream socket");
    }

    Ok(stream)
}
