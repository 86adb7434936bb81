//! One accepted WebSocket connection, from handshake to relay teardown.

use futures_util::{SinkExt, StreamExt};
use std::{fmt, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::{Instant, timeout, timeout_at},
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, info, warn};

use crate::{
    config::ProxySettings,
    error::SessionError,
    protocol::HandshakeRequest,
    relay::{self, RelaySettings, RelaySummary},
    resolver, upstream,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    AwaitingHandshake,
    Authenticated,
    Connecting,
    Relaying,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingHandshake => "awaiting-handshake",
            Self::Authenticated => "authenticated",
            Self::Connecting => "connecting",
            Self::Relaying => "relaying",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

pub struct Session<S> {
    client: WebSocketStream<S>,
    settings: Arc<ProxySettings>,
    state: SessionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(client: WebSocketStream<S>, settings: Arc<ProxySettings>) -> Self {
        Self {
            client,
            settings,
            state: SessionState::AwaitingHandshake,
        }
    }

    /// Moves forward to `next`. States never go backwards.
    fn advance(&mut self, next: SessionState) {
        debug_assert!(next > self.state, "{} -> {next} is not forward", self.state);
        debug!(from = %self.state, to = %next, "Session state changed");
        self.state = next;
    }

    /// Drives the session to completion. The client is closed exactly once,
    /// either here on a setup failure or by the relay.
    pub async fn run(mut self) -> Result<RelaySummary, SessionError> {
        match self.establish().await {
            Ok(upstream) => {
                self.advance(SessionState::Relaying);
                let relay_settings = RelaySettings {
                    idle_timeout: self.settings.timeout,
                    chunk_size: self.settings.relay_chunk_size(),
                };
                let summary = relay::pump(&mut self.client, upstream, relay_settings).await;
                self.advance(SessionState::Closed);
                Ok(summary)
            }
            Err(e) => {
                self.log_failure(&e);
                self.close(e.close_code(), e.close_reason()).await;
                Err(e)
            }
        }
    }

    /// Runs the handshake, resolution and connect steps. On success the
    /// acknowledgement has been sent and any early payload forwarded.
    async fn establish(&mut self) -> Result<TcpStream, SessionError> {
        let limit = self.settings.timeout;

        let first = self.read_handshake().await?;
        let request = HandshakeRequest::decode(&first, &self.settings.secret)?;
        self.advance(SessionState::Authenticated);
        info!(
            destination = %request.destination,
            version = request.version,
            "Handshake accepted"
        );

        let addr = resolver::resolve(&request.destination, limit).await?;
        self.advance(SessionState::Connecting);

        let mut upstream = upstream::connect(addr, limit).await?;
        info!(target_addr = %addr, "Connected to destination");

        self.client
            .send(Message::Binary(request.acknowledgement().to_vec().into()))
            .await?;

        let payload = request.payload(&first);
        if !payload.is_empty() {
            debug!(bytes = payload.len(), "Forwarding handshake payload");
            timeout(limit, upstream.write_all(payload))
                .await
                .map_err(|_| SessionError::UpstreamWriteTimeout(limit))?
                .map_err(SessionError::UpstreamWrite)?;
        }

        Ok(upstream)
    }

    /// Waits for the first data message. Control frames are skipped but do
    /// not extend the deadline.
    async fn read_handshake(&mut self) -> Result<Vec<u8>, SessionError> {
        let limit = self.settings.timeout;
        let deadline = Instant::now() + limit;
        loop {
            let next = timeout_at(deadline, self.client.next())
                .await
                .map_err(|_| SessionError::HandshakeTimeout(limit))?;

            match next {
                Some(Ok(message @ (Message::Binary(_) | Message::Text(_)))) => {
                    return Ok(message.into_data().to_vec());
                }
                Some(Ok(Message::Close(_))) | None => return Err(SessionError::ClientGone),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    fn log_failure(&self, error: &SessionError) {
        match error {
            SessionError::Handshake(e) if e.is_auth_failure() => {
                warn!(state = %self.state, "Rejected handshake: authentication failed");
            }
            SessionError::Handshake(e) => {
                warn!(state = %self.state, error = %e, "Rejected handshake: malformed request");
            }
            SessionError::ClientGone => {
                debug!(state = %self.state, "Client left before the handshake");
            }
            other => {
                warn!(state = %self.state, error = %other, "Session failed");
            }
        }
    }

    async fn close(&mut self, code: CloseCode, reason: &'static str) {
        self.advance(SessionState::Closed);
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        if let Err(e) = self.client.close(Some(frame)).await {
            debug!(error = %e, "Client already closed");
        }
    }
}
