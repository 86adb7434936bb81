//! Bidirectional copy between a WebSocket client and an upstream TCP socket.
//!
//! Each direction runs its own loop. Whichever loop finishes first raises a
//! stop signal that the other loop observes between reads and writes. Both
//! loops are joined before the upstream write side is shut down and the
//! client receives its close frame.

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::watch,
    time::timeout,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        Error as TungsteniteError, Message,
        error::ProtocolError,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, info, warn};

use crate::protocol::close_code;

/// How one direction of the relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The client sent a close frame or its stream ended.
    ClientClosed,
    /// The upstream reached end-of-stream.
    UpstreamClosed,
    IdleTimeout,
    ClientError,
    UpstreamError,
    /// The sibling direction finished first.
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct RelaySummary {
    pub client_to_upstream: RelayEnd,
    pub upstream_to_client: RelayEnd,
    pub bytes_to_upstream: u64,
    pub bytes_to_client: u64,
}

impl RelaySummary {
    /// The end reported by the direction that finished first.
    #[must_use]
    pub fn cause(&self) -> RelayEnd {
        if self.client_to_upstream == RelayEnd::Stopped {
            self.upstream_to_client
        } else {
            self.client_to_upstream
        }
    }

    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self.cause() {
            RelayEnd::ClientClosed | RelayEnd::UpstreamClosed | RelayEnd::Stopped => {
                close_code::RELAY_FINISHED
            }
            RelayEnd::IdleTimeout => close_code::IDLE_TIMEOUT,
            RelayEnd::ClientError | RelayEnd::UpstreamError => close_code::RELAY_ERROR,
        }
    }

    fn close_reason(&self) -> &'static str {
        match self.cause() {
            RelayEnd::ClientClosed | RelayEnd::Stopped => "client closed",
            RelayEnd::UpstreamClosed => "upstream closed",
            RelayEnd::IdleTimeout => "idle timeout",
            RelayEnd::ClientError => "client error",
            RelayEnd::UpstreamError => "upstream error",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// Longest any single read may wait for data.
    pub idle_timeout: Duration,
    /// Largest upstream read forwarded as one WebSocket message.
    pub chunk_size: usize,
}

/// Relays until either side closes, errors or goes idle, then tears both down.
pub async fn pump<S>(
    client: &mut WebSocketStream<S>,
    upstream: TcpStream,
    settings: RelaySettings,
) -> RelaySummary
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_rx, mut upstream_tx) = upstream.into_split();
    let (stop_tx, stop_rx) = watch::channel(false);

    let outbound = async {
        let result = client_to_upstream(
            &mut client_rx,
            &mut upstream_tx,
            settings.idle_timeout,
            stop_rx.clone(),
        )
        .await;
        stop_tx.send_replace(true);
        result
    };

    let inbound = async {
        let result = upstream_to_client(
            &mut upstream_rx,
            &mut client_tx,
            settings,
            stop_rx.clone(),
        )
        .await;
        stop_tx.send_replace(true);
        result
    };

    let ((client_to_upstream, bytes_to_upstream), (upstream_to_client, bytes_to_client)) =
        tokio::join!(outbound, inbound);

    let summary = RelaySummary {
        client_to_upstream,
        upstream_to_client,
        bytes_to_upstream,
        bytes_to_client,
    };

    if let Err(e) = upstream_tx.shutdown().await {
        debug!(error = %e, "Upstream write side already closed");
    }

    let frame = CloseFrame {
        code: summary.close_code(),
        reason: summary.close_reason().into(),
    };
    if let Err(e) = client_tx.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Client already closed");
    }
    let _ = client_tx.close().await;

    info!(
        cause = ?summary.cause(),
        bytes_to_upstream = summary.bytes_to_upstream,
        bytes_to_client = summary.bytes_to_client,
        "Relay finished"
    );
    summary
}

async fn client_to_upstream<S>(
    client: &mut SplitStream<&mut WebSocketStream<S>>,
    upstream: &mut OwnedWriteHalf,
    idle_timeout: Duration,
    mut stop: watch::Receiver<bool>,
) -> (RelayEnd, u64)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut forwarded = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = stop.changed() => return (RelayEnd::Stopped, forwarded),
            next = timeout(idle_timeout, client.next()) => next,
        };

        let data = match next {
            Err(_) => {
                debug!(timeout = ?idle_timeout, "Client idle, ending relay");
                return (RelayEnd::IdleTimeout, forwarded);
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => {
                debug!("Client closed the WebSocket");
                return (RelayEnd::ClientClosed, forwarded);
            }
            Ok(Some(Ok(message @ (Message::Binary(_) | Message::Text(_))))) => message.into_data(),
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                return match e {
                    TungsteniteError::ConnectionClosed
                    | TungsteniteError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                        debug!("Client disconnected: {e}");
                        (RelayEnd::ClientClosed, forwarded)
                    }
                    _ => {
                        warn!(error = %e, "WebSocket error");
                        (RelayEnd::ClientError, forwarded)
                    }
                };
            }
        };

        if data.is_empty() {
            return (RelayEnd::ClientClosed, forwarded);
        }

        let write = tokio::select! {
            biased;
            _ = stop.changed() => return (RelayEnd::Stopped, forwarded),
            write = upstream.write_all(&data) => write,
        };
        if let Err(e) = write {
            warn!(error = %e, bytes = data.len(), "Failed to write to upstream");
            return (RelayEnd::UpstreamError, forwarded);
        }
        forwarded += data.len() as u64;
    }
}

async fn upstream_to_client<S>(
    upstream: &mut OwnedReadHalf,
    client: &mut SplitSink<&mut WebSocketStream<S>, Message>,
    settings: RelaySettings,
    mut stop: watch::Receiver<bool>,
) -> (RelayEnd, u64)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; settings.chunk_size];
    let mut forwarded = 0u64;

    loop {
        let read = tokio::select! {
            biased;
            _ = stop.changed() => return (RelayEnd::Stopped, forwarded),
            read = timeout(settings.idle_timeout, upstream.read(&mut buffer)) => read,
        };

        let n = match read {
            Err(_) => {
                debug!(timeout = ?settings.idle_timeout, "Upstream idle, ending relay");
                return (RelayEnd::IdleTimeout, forwarded);
            }
            Ok(Ok(0)) => {
                debug!("Upstream reached end of stream");
                return (RelayEnd::UpstreamClosed, forwarded);
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read from upstream");
                return (RelayEnd::UpstreamError, forwarded);
            }
        };

        let message = Message::Binary(buffer[..n].to_vec().into());
        let send = tokio::select! {
            biased;
            _ = stop.changed() => return (RelayEnd::Stopped, forwarded),
            send = client.send(message) => send,
        };
        if let Err(e) = send {
            debug!(error = %e, bytes = n, "Failed to send WebSocket message");
            return (RelayEnd::ClientError, forwarded);
        }
        forwarded += n as u64;
    }
}
