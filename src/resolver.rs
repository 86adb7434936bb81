use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use tokio::{net::lookup_host, time::timeout};
use tracing::debug;

use crate::{
    error::SessionError,
    protocol::{Address, Destination},
};

/// Turns a destination into a socket address.
///
/// IP literals pass through untouched. Domains are looked up on tokio's
/// blocking pool and the first IPv4 answer wins; `limit` bounds the lookup.
pub async fn resolve(destination: &Destination, limit: Duration) -> Result<SocketAddr, SessionError> {
    let domain = match &destination.address {
        Address::Ipv4(ip) => return Ok(SocketAddr::new(IpAddr::V4(*ip), destination.port)),
        Address::Ipv6(ip) => return Ok(SocketAddr::new(IpAddr::V6(*ip), destination.port)),
        Address::Domain(domain) => domain,
    };

    let mut answers = timeout(limit, lookup_host((domain.as_str(), destination.port)))
        .await
        .map_err(|_| SessionError::ResolveTimeout {
            domain: domain.clone(),
            limit,
        })?
        .map_err(|source| SessionError::Resolve {
            domain: domain.clone(),
            source,
        })?;

    let addr = answers
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| SessionError::NoIpv4Address {
            domain: domain.clone(),
        })?;

    debug!(domain = %domain, resolved = %addr, "Resolved destination");
    Ok(addr)
}
