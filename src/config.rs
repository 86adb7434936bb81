use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::{env, fs, time::Duration};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use uuid::Uuid;

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "VLESS_RELAY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

pub const DEFAULT_PATH: &str = "/";
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Upper bound on a single upstream read, whatever the message size limit.
pub const RELAY_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub listen: ListenConfig,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Deserialize)]
pub struct ListenConfig {
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    pub allowed_proxy_ips: Option<Vec<String>>,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Deserialize)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub uuid: String,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

const fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Read-only settings shared by every session.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Lowercase hyphenated UUID clients must present.
    pub secret: String,
    pub path: String,
    pub max_message_size: usize,
    /// Bounds the handshake, resolution, upstream connect and every relay read.
    pub timeout: Duration,
}

impl ProxySettings {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            path: DEFAULT_PATH.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = Self::new(config.proxy.uuid.clone())
            .with_path(config.listen.path.clone())
            .with_timeout(Duration::from_secs(config.proxy.timeout_secs))
            .with_max_message_size(config.proxy.max_message_size);
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let parsed = Uuid::parse_str(&self.secret)
            .with_context(|| format!("proxy.uuid is not a valid UUID: {}", self.secret))?;
        if parsed.hyphenated().to_string() != self.secret {
            bail!(
                "proxy.uuid must be written in lowercase hyphenated form, e.g. {}",
                parsed.hyphenated()
            );
        }
        if !self.path.starts_with('/') {
            bail!("listen.path must start with '/': {}", self.path);
        }
        if self.max_message_size == 0 {
            bail!("proxy.max_message_size must be greater than zero");
        }
        if self.timeout.is_zero() {
            bail!("proxy.timeout_secs must be greater than zero");
        }
        Ok(())
    }

    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size))
    }

    #[must_use]
    pub fn relay_chunk_size(&self) -> usize {
        self.max_message_size.min(RELAY_CHUNK_SIZE)
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).context("Failed to parse configuration as valid TOML")
}

pub fn load_config() -> Result<Config> {
    let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let content =
        fs::read_to_string(&path).with_context(|| format!("Failed to read config file {path}"))?;
    parse_config(&content).with_context(|| format!("Invalid config file {path}"))
}
