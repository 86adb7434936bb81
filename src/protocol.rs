//! VLESS handshake codec.
//!
//! ```text
//! +---------+----------+---------+---------+---------+------+-----------+---------+
//! | version | identity | opt len | options | command | port | addr type | address |
//! +---------+----------+---------+---------+---------+------+-----------+---------+
//! |   1B    |   16B    |   1B    |   N B   |   1B    |  2B  |    1B     |   var   |
//! +---------+----------+---------+---------+---------+------+-----------+---------+
//! ```
//!
//! Anything after the address is payload to forward to the upstream as-is.

use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
};

use thiserror::Error;
use uuid::Uuid;

/// Shortest buffer that can hold a handshake.
pub const MIN_HEADER_LEN: usize = 24;

const IDENTITY_OFFSET: usize = 1;
const IDENTITY_LEN: usize = 16;
const OPTIONS_LEN_OFFSET: usize = IDENTITY_OFFSET + IDENTITY_LEN;

const COMMAND_CONNECT: u8 = 1;

const ADDRESS_TYPE_IPV4: u8 = 1;
const ADDRESS_TYPE_DOMAIN: u8 = 2;
const ADDRESS_TYPE_IPV6: u8 = 3;

/// WebSocket close codes sent to the client, one per failure class.
pub mod close_code {
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    pub const PATH_MISMATCH: CloseCode = CloseCode::Policy;
    /// Shared by structural and authentication failures.
    pub const BAD_REQUEST: CloseCode = CloseCode::Protocol;
    pub const RESOLUTION_FAILED: CloseCode = CloseCode::Library(4001);
    pub const UPSTREAM_UNREACHABLE: CloseCode = CloseCode::Library(4002);
    pub const IDLE_TIMEOUT: CloseCode = CloseCode::Library(4003);
    pub const RELAY_FINISHED: CloseCode = CloseCode::Normal;
    pub const RELAY_ERROR: CloseCode = CloseCode::Error;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("handshake too short: {len} bytes, need at least {MIN_HEADER_LEN}")]
    TooShort { len: usize },
    #[error("handshake truncated: field ends at byte {needed}, buffer has {len}")]
    Truncated { needed: usize, len: usize },
    #[error("identity token does not match")]
    Unauthorized,
    #[error("unsupported command {0}")]
    UnsupportedCommand(u8),
    #[error("unknown address type {0}")]
    UnknownAddressType(u8),
    #[error("domain name is empty or not valid UTF-8")]
    InvalidDomain,
    #[error("domain name is {0} bytes, at most 255 fit in a handshake")]
    DomainTooLong(usize),
}

impl HandshakeError {
    /// Authentication failures are only told apart in logs, never on the wire.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
}

impl TryFrom<u8> for Command {
    type Error = HandshakeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            COMMAND_CONNECT => Ok(Self::Connect),
            other => Err(HandshakeError::UnsupportedCommand(other)),
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        match command {
            Command::Connect => COMMAND_CONNECT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4(ip) => ip.fmt(f),
            Self::Domain(name) => f.write_str(name),
            Self::Ipv6(ip) => ip.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address: Address,
    pub port: u16,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Address::Ipv6(ip) => write!(f, "[{ip}]:{}", self.port),
            other => write!(f, "{other}:{}", self.port),
        }
    }
}

/// A decoded and authenticated handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub version: u8,
    pub identity: Uuid,
    pub command: Command,
    pub destination: Destination,
    /// Offset of the first payload byte in the buffer the request was decoded from.
    pub payload_offset: usize,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], HandshakeError> {
        let end = self.pos + n;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(HandshakeError::Truncated {
                needed: end,
                len: self.buf.len(),
            })?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, HandshakeError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], HandshakeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16_be(&mut self) -> Result<u16, HandshakeError> {
        Ok(u16::from_be_bytes(self.array()?))
    }
}

impl HandshakeRequest {
    /// Decodes `buf` and checks its identity token against `secret`, a
    /// lowercase hyphenated UUID. The comparison is exact.
    pub fn decode(buf: &[u8], secret: &str) -> Result<Self, HandshakeError> {
        if buf.len() < MIN_HEADER_LEN {
            return Err(HandshakeError::TooShort { len: buf.len() });
        }

        let version = buf[0];

        let mut identity_bytes = [0u8; IDENTITY_LEN];
        identity_bytes.copy_from_slice(&buf[IDENTITY_OFFSET..OPTIONS_LEN_OFFSET]);
        let identity = Uuid::from_bytes(identity_bytes);
        if identity.hyphenated().to_string() != secret {
            return Err(HandshakeError::Unauthorized);
        }

        let mut cursor = Cursor::new(buf, OPTIONS_LEN_OFFSET);
        let options_len = cursor.u8()?;
        cursor.take(usize::from(options_len))?;

        let command = Command::try_from(cursor.u8()?)?;
        let port = cursor.u16_be()?;

        let address = match cursor.u8()? {
            ADDRESS_TYPE_IPV4 => Address::Ipv4(Ipv4Addr::from(cursor.array::<4>()?)),
            ADDRESS_TYPE_DOMAIN => {
                let len = cursor.u8()?;
                let raw = cursor.take(usize::from(len))?;
                let name = std::str::from_utf8(raw).map_err(|_| HandshakeError::InvalidDomain)?;
                if name.is_empty() {
                    return Err(HandshakeError::InvalidDomain);
                }
                Address::Domain(name.to_owned())
            }
            ADDRESS_TYPE_IPV6 => Address::Ipv6(Ipv6Addr::from(cursor.array::<16>()?)),
            other => return Err(HandshakeError::UnknownAddressType(other)),
        };

        Ok(Self {
            version,
            identity,
            command,
            destination: Destination { address, port },
            payload_offset: cursor.pos,
        })
    }

    /// Bytes of `buf` past the header. Empty when there are none.
    #[must_use]
    pub fn payload<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        buf.get(self.payload_offset..).unwrap_or_default()
    }

    /// The two-byte reply sent once the upstream is connected.
    #[must_use]
    pub const fn acknowledgement(&self) -> [u8; 2] {
        [self.version, 0]
    }

    /// Encodes the request with no option bytes, followed by `payload`.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let mut out = Vec::with_capacity(MIN_HEADER_LEN + 16 + payload.len());
        out.push(self.version);
        out.extend_from_slice(self.identity.as_bytes());
        out.push(0);
        out.push(self.command.into());
        out.extend_from_slice(&self.destination.port.to_be_bytes());
        match &self.destination.address {
            Address::Ipv4(ip) => {
                out.push(ADDRESS_TYPE_IPV4);
                out.extend_from_slice(&ip.octets());
            }
            Address::Domain(name) => {
                let len = u8::try_from(name.len())
                    .map_err(|_| HandshakeError::DomainTooLong(name.len()))?;
                out.push(ADDRESS_TYPE_DOMAIN);
                out.push(len);
                out.extend_from_slice(name.as_bytes());
            }
            Address::Ipv6(ip) => {
                out.push(ADDRESS_TYPE_IPV6);
                out.extend_from_slice(&ip.octets());
            }
        }
        out.extend_from_slice(payload);
        Ok(out)
    }
}
