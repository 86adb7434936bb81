//! VLESS-over-WebSocket Relay
//!
//! Accepts WebSocket clients on a fixed path, authenticates a single binary
//! VLESS handshake per connection, dials the requested TCP destination and
//! then relays bytes in both directions until either side closes or goes idle.
//! Supports TLS termination and allowlisting of fronting proxies.

pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod resolver;
pub mod security;
pub mod server;
pub mod session;
pub mod stream;
pub mod tls;
pub mod upstream;

// Re-export commonly used types and functions
pub use config::{Config, ListenConfig, ProxyConfig, ProxySettings, TlsConfig, load_config};
pub use error::SessionError;
pub use protocol::{Address, Command, Destination, HandshakeError, HandshakeRequest};
pub use relay::{RelayEnd, RelaySummary};
pub use security::{Allowlist, parse_original_client_ip};
pub use server::{Listener, handle_connection};
pub use session::{Session, SessionState};
pub use stream::ClientStream;
pub use tls::load_tls_acceptor;
