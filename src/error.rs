use std::{io, net::SocketAddr, time::Duration};

use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, protocol::frame::coding::CloseCode};

use crate::protocol::{HandshakeError, close_code};

/// Why a session ended before its relay started.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid handshake: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("no handshake received within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("client went away before sending a handshake")]
    ClientGone,
    #[error("failed to resolve {domain}: {source}")]
    Resolve {
        domain: String,
        #[source]
        source: io::Error,
    },
    #[error("{domain} has no IPv4 address")]
    NoIpv4Address { domain: String },
    #[error("resolving {domain} took longer than {limit:?}")]
    ResolveTimeout { domain: String, limit: Duration },
    #[error("connecting to {addr} took longer than {limit:?}")]
    ConnectTimeout { addr: SocketAddr, limit: Duration },
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to forward handshake payload upstream: {0}")]
    UpstreamWrite(#[source] io::Error),
    #[error("upstream did not accept the handshake payload within {0:?}")]
    UpstreamWriteTimeout(Duration),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

impl SessionError {
    /// Close code reported to the client for this failure.
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Self::Handshake(_) => close_code::BAD_REQUEST,
            Self::HandshakeTimeout(_) | Self::UpstreamWriteTimeout(_) => close_code::IDLE_TIMEOUT,
            Self::Resolve { .. } | Self::NoIpv4Address { .. } | Self::ResolveTimeout { .. } => {
                close_code::RESOLUTION_FAILED
            }
            Self::ConnectTimeout { .. } | Self::Connect { .. } => close_code::UPSTREAM_UNREACHABLE,
            Self::ClientGone | Self::UpstreamWrite(_) | Self::WebSocket(_) => {
                close_code::RELAY_ERROR
            }
        }
    }

    /// Reason text for the close frame. Auth and format failures share one.
    #[must_use]
    pub const fn close_reason(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "invalid request",
            Self::HandshakeTimeout(_) => "handshake timeout",
            Self::UpstreamWriteTimeout(_) => "upstream stalled",
            Self::Resolve { .. } | Self::NoIpv4Address { .. } | Self::ResolveTimeout { .. } => {
                "destination resolution failed"
            }
            Self::ConnectTimeout { .. } | Self::Connect { .. } => "destination unreachable",
            Self::ClientGone | Self::UpstreamWrite(_) | Self::WebSocket(_) => "relay error",
        }
    }
}
