use anyhow::Result;
use tracing::info;
use vless_relay::{Listener, ProxySettings, load_config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = load_config()?;
    let settings = ProxySettings::from_config(&config)?;
    info!(
        listen_ip = %config.listen.ip,
        listen_port = config.listen.port,
        path = %settings.path,
        max_message_size = settings.max_message_size,
        timeout_secs = settings.timeout.as_secs(),
        tls = config.listen.tls.is_some(),
        "Configuration loaded"
    );

    Listener::bind(&config).await?.run().await
}
