use anyhow::{Result, anyhow};
use ipnet::IpNet;
use std::net::IpAddr;

/// Peers permitted to open connections. Empty means unrestricted.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    networks: Vec<IpNet>,
}

impl Allowlist {
    /// Parses single addresses and CIDR blocks. `None` allows every peer.
    pub fn parse(entries: Option<&[String]>) -> Result<Self> {
        let Some(entries) = entries else {
            return Ok(Self::default());
        };

        let networks = entries
            .iter()
            .map(|entry| {
                let entry = entry.trim();
                entry
                    .parse::<IpAddr>()
                    .map(IpNet::from)
                    .or_else(|_| entry.parse::<IpNet>())
                    .map_err(|_| anyhow!("Invalid IP address or CIDR in allowed_proxy_ips: {entry}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { networks })
    }

    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.networks.is_empty()
    }

    #[must_use]
    pub fn allows(&self, peer: IpAddr) -> bool {
        let peer = peer.to_canonical();
        self.is_unrestricted() || self.networks.iter().any(|net| net.contains(&peer))
    }
}

/// Leftmost entry of an X-Forwarded-For header, the originating client.
#[must_use]
pub fn parse_original_client_ip(xff_header: &str) -> Option<String> {
    xff_header
        .split(',')
        .next()
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}
