use anyhow::{Context, Result, anyhow};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::{
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{Request, Response},
        protocol::CloseFrame,
    },
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{Config, ProxySettings},
    protocol::close_code,
    security::{Allowlist, parse_original_client_ip},
    session::Session,
    stream::ClientStream,
    tls::load_tls_acceptor,
};

/// Accepts WebSocket clients and hands each one to its own session task.
pub struct Listener {
    listener: TcpListener,
    settings: Arc<ProxySettings>,
    tls: Option<TlsAcceptor>,
    allowlist: Arc<Allowlist>,
}

impl Listener {
    pub async fn bind(config: &Config) -> Result<Self> {
        let settings = ProxySettings::from_config(config)?;
        let allowlist = Allowlist::parse(config.listen.allowed_proxy_ips.as_deref())?;
        let tls = config
            .listen
            .tls
            .as_ref()
            .map(load_tls_acceptor)
            .transpose()?;

        let addr = format!("{}:{}", config.listen.ip, config.listen.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to address {addr}"))?;

        Ok(Self::from_listener(listener, settings)
            .with_tls(tls)
            .with_allowlist(allowlist))
    }

    pub fn from_listener(listener: TcpListener, settings: ProxySettings) -> Self {
        Self {
            listener,
            settings: Arc::new(settings),
            tls: None,
            allowlist: Arc::new(Allowlist::default()),
        }
    }

    #[must_use]
    pub fn with_tls(mut self, tls: Option<TlsAcceptor>) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn with_allowlist(mut self, allowlist: Allowlist) -> Self {
        self.allowlist = Arc::new(allowlist);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to get listener local address")
    }

    /// Accepts forever. Failures stay inside their own connection task.
    pub async fn run(self) -> Result<()> {
        info!(
            listen_addr = %self.local_addr()?,
            path = %self.settings.path,
            tls = self.tls.is_some(),
            allowlist = !self.allowlist.is_unrestricted(),
            "VLESS relay listening"
        );

        loop {
            let (stream, client_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            if !self.allowlist.allows(client_addr.ip()) {
                warn!(client_addr = %client_addr, "Rejected connection from address not in allowlist");
                continue;
            }

            let settings = Arc::clone(&self.settings);
            let tls = self.tls.clone();
            tokio::spawn(async move {
                if let Err(e) = accept_client(stream, tls, settings).await {
                    error!(client_addr = %client_addr, error = %e, "Connection failed");
                }
            });
        }
    }
}

async fn accept_client(
    stream: TcpStream,
    tls: Option<TlsAcceptor>,
    settings: Arc<ProxySettings>,
) -> Result<()> {
    let stream = match tls {
        Some(acceptor) => {
            let tls_stream = timeout(settings.timeout, acceptor.accept(stream))
                .await
                .map_err(|_| anyhow!("TLS handshake timed out"))?
                .context("TLS handshake failed")?;
            ClientStream::Tls(Box::new(tls_stream))
        }
        None => ClientStream::Plain(stream),
    };
    handle_connection(stream, settings).await
}

/// Upgrades one connection, checks its path and runs its session.
#[tracing::instrument(skip(stream, settings), fields(client_addr = %stream.peer_addr().map_or_else(|_| "unknown".to_string(), |a| a.to_string())))]
pub async fn handle_connection(stream: ClientStream, settings: Arc<ProxySettings>) -> Result<()> {
    let tls = stream.is_tls();
    let request_path = Arc::new(Mutex::new(None::<String>));
    let request_path_clone = request_path.clone();
    let client_ip = Arc::new(Mutex::new(None::<String>));
    let client_ip_clone = client_ip.clone();

    let callback = move |req: &Request, response: Response| {
        if let Ok(mut guard) = request_path_clone.lock() {
            *guard = Some(req.uri().path().to_string());
        }

        if let Some(original_ip) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|xff| xff.to_str().ok())
            .and_then(parse_original_client_ip)
        {
            if let Ok(mut guard) = client_ip_clone.lock() {
                *guard = Some(original_ip);
            }
        }

        Ok(response)
    };

    let mut ws_stream = timeout(
        settings.timeout,
        accept_hdr_async_with_config(stream, callback, Some(settings.websocket_config())),
    )
    .await
    .map_err(|_| anyhow!("WebSocket upgrade timed out"))?
    .context("Failed to perform WebSocket handshake")?;

    let path = request_path
        .lock()
        .map_err(|_| anyhow!("Request path lock poisoned"))?
        .take()
        .unwrap_or_default();
    let original_client_ip = client_ip
        .lock()
        .map_err(|_| anyhow!("Client IP lock poisoned"))?
        .take();

    if path != settings.path {
        warn!(path = %path, expected = %settings.path, "Rejected WebSocket on unknown path");
        let frame = CloseFrame {
            code: close_code::PATH_MISMATCH,
            reason: "unknown path".into(),
        };
        if let Err(e) = ws_stream.close(Some(frame)).await {
            debug!(error = %e, "Client already closed");
        }
        return Ok(());
    }

    match original_client_ip {
        Some(ref ip) => info!(client_ip = %ip, tls, "WebSocket client connected"),
        None => info!(tls, "WebSocket client connected"),
    }

    // Session failures are logged and reported to the client by the session.
    let _ = Session::new(ws_stream, settings).run().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Address, Command, Destination, HandshakeRequest};
    use futures_util::{SinkExt, StreamExt};
    use std::{
        net::{Ipv4Addr, SocketAddr},
        time::Duration,
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        sync::{Mutex as AsyncMutex, oneshot},
        time::{sleep, timeout},
    };
    use tokio_tungstenite::{
        connect_async,
        tungstenite::{Message, protocol::frame::coding::CloseCode},
    };
    use uuid::Uuid;

    const SECRET: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";
    const PATH: &str = "/tunnel";
    const TEST_TIMEOUT: Duration = Duration::from_secs(2);
    const DATA_PROCESSING_DELAY: Duration = Duration::from_millis(200);

    type WsSender = futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >;
    type WsReceiver = futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >;

    fn settings() -> ProxySettings {
        ProxySettings::new(SECRET).with_path(PATH)
    }

    fn handshake_to(address: Address, port: u16, payload: &[u8]) -> Vec<u8> {
        HandshakeRequest {
            version: 0,
            identity: Uuid::parse_str(SECRET).unwrap(),
            command: Command::Connect,
            destination: Destination { address, port },
            payload_offset: 0,
        }
        .encode(payload)
        .unwrap()
    }

    fn handshake(target: SocketAddr, payload: &[u8]) -> Vec<u8> {
        let SocketAddr::V4(target) = target else {
            panic!("tests use IPv4 targets");
        };
        handshake_to(Address::Ipv4(*target.ip()), target.port(), payload)
    }

    /// Starts the proxy on a free port, returns its address
    async fn start_proxy(settings: ProxySettings) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Listener::from_listener(listener, settings);
        let addr = proxy.local_addr().unwrap();
        tokio::spawn(proxy.run());
        addr
    }

    async fn connect_websocket(addr: SocketAddr, path: &str) -> (WsSender, WsReceiver) {
        let url = format!("ws://{addr}{path}");
        let (ws_stream, _) = connect_async(&url).await.unwrap();
        ws_stream.split()
    }

    async fn send_binary_message(sender: &mut WsSender, data: &[u8]) {
        sender
            .send(Message::Binary(data.to_vec().into()))
            .await
            .unwrap();
    }

    /// Next data or close message, skipping pings
    async fn next_message(receiver: &mut WsReceiver) -> Option<Message> {
        loop {
            match timeout(TEST_TIMEOUT, receiver.next()).await {
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
                Ok(Some(Ok(message))) => return Some(message),
                Ok(Some(Err(_)) | None) | Err(_) => return None,
            }
        }
    }

    async fn receive_binary_message(receiver: &mut WsReceiver) -> Vec<u8> {
        match next_message(receiver).await {
            Some(Message::Binary(data)) => data.to_vec(),
            other => panic!("Expected binary message, got: {other:?}"),
        }
    }

    async fn expect_close(receiver: &mut WsReceiver) -> CloseCode {
        match next_message(receiver).await {
            Some(Message::Close(Some(frame))) => frame.code,
            other => panic!("Expected close frame, got: {other:?}"),
        }
    }

    /// Receives binary messages until `len` bytes have arrived
    async fn receive_bytes(receiver: &mut WsReceiver, len: usize) -> Vec<u8> {
        let mut received = Vec::new();
        while received.len() < len {
            received.extend(receive_binary_message(receiver).await);
        }
        received
    }

    async fn start_echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buffer = [0; 4096];
                    loop {
                        match stream.read(&mut buffer).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) if stream.write_all(&buffer[..n]).await.is_err() => break,
                            Ok(_) => {}
                        }
                    }
                });
            }
        });

        addr
    }

    /// Upstream that records everything it reads and reports end-of-stream
    async fn start_capturing_server() -> (SocketAddr, Arc<AsyncMutex<Vec<u8>>>, oneshot::Receiver<()>) {
        let received = Arc::new(AsyncMutex::new(Vec::new()));
        let received_clone = received.clone();
        let (eof_tx, eof_rx) = oneshot::channel();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buffer = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buffer).await {
                    if n == 0 {
                        break;
                    }
                    received_clone.lock().await.extend_from_slice(&buffer[..n]);
                }
                let _ = eof_tx.send(());
            }
        });

        (addr, received, eof_rx)
    }

    /// Address with nothing listening on it
    async fn absent_upstream() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    mod handshake_flow {
        use super::*;

        #[tokio::test]
        async fn acknowledges_then_relays_in_order() {
            let upstream = start_echo_server().await;
            let proxy = start_proxy(settings()).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            send_binary_message(&mut sender, &handshake(upstream, &[])).await;
            assert_eq!(receive_binary_message(&mut receiver).await, vec![0, 0]);

            for message in [b"first".as_slice(), b"second", b"third"] {
                send_binary_message(&mut sender, message).await;
                assert_eq!(receive_bytes(&mut receiver, message.len()).await, message);
            }
        }

        #[tokio::test]
        async fn forwards_handshake_payload_before_later_messages() {
            let (upstream, received, _eof) = start_capturing_server().await;
            let proxy = start_proxy(settings()).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            send_binary_message(&mut sender, &handshake(upstream, b"early ")).await;
            assert_eq!(receive_binary_message(&mut receiver).await, vec![0, 0]);
            send_binary_message(&mut sender, b"late").await;

            sleep(DATA_PROCESSING_DELAY).await;
            assert_eq!(received.lock().await.as_slice(), b"early late");
        }

        #[tokio::test]
        async fn text_messages_are_forwarded_as_bytes() {
            let (upstream, received, _eof) = start_capturing_server().await;
            let proxy = start_proxy(settings()).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            send_binary_message(&mut sender, &handshake(upstream, &[])).await;
            assert_eq!(receive_binary_message(&mut receiver).await, vec![0, 0]);
            sender
                .send(Message::Text("plain text".to_string().into()))
                .await
                .unwrap();

            sleep(DATA_PROCESSING_DELAY).await;
            assert_eq!(received.lock().await.as_slice(), b"plain text");
        }

        #[tokio::test]
        async fn large_upstream_data_arrives_intact() {
            let upstream = start_echo_server().await;
            let proxy = start_proxy(settings()).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            send_binary_message(&mut sender, &handshake(upstream, &[])).await;
            assert_eq!(receive_binary_message(&mut receiver).await, vec![0, 0]);

            let large: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
            send_binary_message(&mut sender, &large).await;
            assert_eq!(receive_bytes(&mut receiver, large.len()).await, large);
        }

        #[tokio::test]
        async fn handles_concurrent_sessions() {
            let upstream = start_echo_server().await;
            let proxy = start_proxy(settings()).await;

            let tasks: Vec<_> = (0..3)
                .map(|i| {
                    tokio::spawn(async move {
                        let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;
                        send_binary_message(&mut sender, &handshake(upstream, &[])).await;
                        assert_eq!(receive_binary_message(&mut receiver).await, vec![0, 0]);

                        let data = format!("Message from client {i}").into_bytes();
                        send_binary_message(&mut sender, &data).await;
                        assert_eq!(receive_bytes(&mut receiver, data.len()).await, data);
                    })
                })
                .collect();

            for task in tasks {
                task.await.unwrap();
            }
        }
    }

    mod rejection {
        use super::*;

        #[tokio::test]
        async fn unknown_path_is_closed_with_policy_violation() {
            let proxy = start_proxy(settings()).await;
            let (_, mut receiver) = connect_websocket(proxy, "/other").await;
            assert_eq!(expect_close(&mut receiver).await, close_code::PATH_MISMATCH);
        }

        #[tokio::test]
        async fn short_handshake_never_reaches_upstream() {
            let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let upstream_addr = upstream.local_addr().unwrap();
            let proxy = start_proxy(settings()).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            let full = handshake(upstream_addr, &[]);
            send_binary_message(&mut sender, &full[..10]).await;

            assert_eq!(expect_close(&mut receiver).await, close_code::BAD_REQUEST);
            assert!(
                timeout(DATA_PROCESSING_DELAY, upstream.accept()).await.is_err(),
                "no upstream connection may be attempted"
            );
        }

        #[tokio::test]
        async fn wrong_identity_closes_like_malformed_request() {
            let upstream = start_echo_server().await;
            let proxy = start_proxy(settings()).await;

            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;
            let mut bad_auth = handshake(upstream, &[]);
            bad_auth[1] ^= 0xFF;
            send_binary_message(&mut sender, &bad_auth).await;
            let auth_code = expect_close(&mut receiver).await;

            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;
            let mut bad_type = handshake(upstream, &[]);
            bad_type[21] = 9;
            send_binary_message(&mut sender, &bad_type).await;
            let format_code = expect_close(&mut receiver).await;

            assert_eq!(auth_code, close_code::BAD_REQUEST);
            assert_eq!(auth_code, format_code);
        }

        #[tokio::test]
        async fn absent_upstream_closes_without_acknowledgement() {
            let upstream = absent_upstream().await;
            let proxy = start_proxy(settings()).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            send_binary_message(&mut sender, &handshake(upstream, &[])).await;

            // The first frame must be the close, not the [0, 0] acknowledgement.
            assert_eq!(
                expect_close(&mut receiver).await,
                close_code::UPSTREAM_UNREACHABLE
            );
        }

        #[tokio::test]
        async fn missing_handshake_times_out() {
            let settings = settings().with_timeout(Duration::from_millis(300));
            let proxy = start_proxy(settings).await;
            let (_sender, mut receiver) = connect_websocket(proxy, PATH).await;
            assert_eq!(expect_close(&mut receiver).await, close_code::IDLE_TIMEOUT);
        }

        #[tokio::test]
        async fn pings_do_not_extend_handshake_deadline() {
            let upstream = start_echo_server().await;
            let settings = settings().with_timeout(Duration::from_millis(300));
            let proxy = start_proxy(settings).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            for _ in 0..6 {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                sleep(Duration::from_millis(100)).await;
            }
            let _ = sender
                .send(Message::Binary(handshake(upstream, &[]).into()))
                .await;

            assert_eq!(expect_close(&mut receiver).await, close_code::IDLE_TIMEOUT);
        }

        #[tokio::test]
        async fn oversized_message_is_rejected_before_upstream() {
            let (upstream, received, _eof) = start_capturing_server().await;
            let settings = settings().with_max_message_size(1024);
            let proxy = start_proxy(settings).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            send_binary_message(&mut sender, &handshake(upstream, &[0xAB; 4096])).await;

            assert_eq!(expect_close(&mut receiver).await, close_code::RELAY_ERROR);
            sleep(DATA_PROCESSING_DELAY).await;
            assert!(received.lock().await.is_empty());
        }

        #[tokio::test]
        async fn unresolvable_domain_closes_with_resolution_failure() {
            let proxy = start_proxy(settings()).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            let request = handshake_to(Address::Domain("does-not-exist.invalid".into()), 80, &[]);
            send_binary_message(&mut sender, &request).await;

            assert_eq!(
                expect_close(&mut receiver).await,
                close_code::RESOLUTION_FAILED
            );
        }

        #[tokio::test]
        async fn stalled_upstream_cannot_block_early_payload() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let upstream = listener.local_addr().unwrap();
            let (hold_tx, hold_rx) = oneshot::channel::<()>();
            tokio::spawn(async move {
                // Accept but never read until the test finishes.
                let accepted = listener.accept().await;
                let _ = hold_rx.await;
                drop(accepted);
            });

            let settings = settings()
                .with_timeout(Duration::from_secs(1))
                .with_max_message_size(32 * 1024 * 1024);
            let proxy = start_proxy(settings).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            let payload = vec![0x5A; 24 * 1024 * 1024];
            send_binary_message(&mut sender, &handshake(upstream, &payload)).await;

            assert_eq!(receive_binary_message(&mut receiver).await, vec![0, 0]);
            assert_eq!(expect_close(&mut receiver).await, close_code::IDLE_TIMEOUT);
            let _ = hold_tx.send(());
        }

        #[tokio::test]
        async fn listener_survives_failed_sessions() {
            let upstream = start_echo_server().await;
            let proxy = start_proxy(settings()).await;

            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;
            send_binary_message(&mut sender, b"garbage").await;
            expect_close(&mut receiver).await;

            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;
            send_binary_message(&mut sender, &handshake(upstream, &[])).await;
            assert_eq!(receive_binary_message(&mut receiver).await, vec![0, 0]);
        }
    }

    mod teardown {
        use super::*;

        #[tokio::test]
        async fn domain_destination_is_resolved_and_relayed() {
            let upstream = start_echo_server().await;
            let proxy = start_proxy(settings()).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            let request = handshake_to(Address::Domain("localhost".into()), upstream.port(), &[]);
            send_binary_message(&mut sender, &request).await;
            assert_eq!(receive_binary_message(&mut receiver).await, vec![0, 0]);

            send_binary_message(&mut sender, b"via name").await;
            assert_eq!(receive_bytes(&mut receiver, 8).await, b"via name");
        }

        #[tokio::test]
        async fn idle_session_is_closed_and_upstream_released() {
            let (upstream, _received, eof) = start_capturing_server().await;
            let settings = settings().with_timeout(Duration::from_millis(300));
            let proxy = start_proxy(settings).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            send_binary_message(&mut sender, &handshake(upstream, &[])).await;
            assert_eq!(receive_binary_message(&mut receiver).await, vec![0, 0]);

            assert_eq!(expect_close(&mut receiver).await, close_code::IDLE_TIMEOUT);
            assert!(
                timeout(TEST_TIMEOUT, eof).await.is_ok(),
                "upstream should observe end-of-stream"
            );
        }

        #[tokio::test]
        async fn upstream_close_closes_client() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let upstream = listener.local_addr().unwrap();
            tokio::spawn(async move {
                if let Ok((mut stream, _)) = listener.accept().await {
                    let _ = stream.write_all(b"goodbye").await;
                }
            });

            let proxy = start_proxy(settings()).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            send_binary_message(&mut sender, &handshake(upstream, &[])).await;
            assert_eq!(receive_binary_message(&mut receiver).await, vec![0, 0]);
            assert_eq!(receive_bytes(&mut receiver, 7).await, b"goodbye");
            assert_eq!(
                expect_close(&mut receiver).await,
                close_code::RELAY_FINISHED
            );
        }

        #[tokio::test]
        async fn client_close_shuts_down_upstream() {
            let (upstream, received, eof) = start_capturing_server().await;
            let proxy = start_proxy(settings()).await;
            let (mut sender, mut receiver) = connect_websocket(proxy, PATH).await;

            send_binary_message(&mut sender, &handshake(upstream, b"bye")).await;
            assert_eq!(receive_binary_message(&mut receiver).await, vec![0, 0]);
            sender.close().await.unwrap();

            assert!(
                timeout(TEST_TIMEOUT, eof).await.is_ok(),
                "upstream should observe end-of-stream"
            );
            assert_eq!(received.lock().await.as_slice(), b"bye");
        }
    }

    mod allowlist {
        use super::*;
        use crate::security::Allowlist;

        #[tokio::test]
        async fn drops_peers_outside_allowlist() {
            let list = vec!["10.0.0.0/8".to_string()];
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let proxy = Listener::from_listener(listener, settings())
                .with_allowlist(Allowlist::parse(Some(list.as_slice())).unwrap());
            let addr = proxy.local_addr().unwrap();
            tokio::spawn(proxy.run());

            let url = format!("ws://{addr}{PATH}");
            let result = timeout(TEST_TIMEOUT, connect_async(&url)).await;
            assert!(matches!(result, Ok(Err(_))));
        }

        #[tokio::test]
        async fn admits_peers_inside_allowlist() {
            let list = vec![Ipv4Addr::LOCALHOST.to_string()];
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let proxy = Listener::from_listener(listener, settings())
                .with_allowlist(Allowlist::parse(Some(list.as_slice())).unwrap());
            let addr = proxy.local_addr().unwrap();
            tokio::spawn(proxy.run());

            let url = format!("ws://{addr}{PATH}");
            assert!(connect_async(&url).await.is_ok());
        }
    }
}
