//! Multiaddress resolution
//!
//! Turns a possibly DNS-tagged multiaddress into concrete IP addresses and
//! extracts the host and UDP port the QUIC binding needs.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{Component, Multiaddr, Protocol};
use crate::error::{Result, TransportError};

/// Name lookup backend
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn lookup(&self, name: &str) -> io::Result<Vec<IpAddr>>;
}

/// System resolver through `tokio::net::lookup_host`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDnsResolver;

#[async_trait]
impl DnsResolver for TokioDnsResolver {
    async fn lookup(&self, name: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((name, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Fixed name table, unknown names resolve to nothing
#[derive(Debug, Default)]
pub struct StaticResolver {
    table: RwLock<HashMap<String, Vec<IpAddr>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, addrs: Vec<IpAddr>) {
        self.table.write().insert(name.to_string(), addrs);
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn lookup(&self, name: &str) -> io::Result<Vec<IpAddr>> {
        Ok(self.table.read().get(name).cloned().unwrap_or_default())
    }
}

/// Multiaddress resolver used by the transport
#[derive(Clone)]
pub struct Resolver {
    dns: Arc<dyn DnsResolver>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(Arc::new(TokioDnsResolver))
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(dns: Arc<dyn DnsResolver>) -> Self {
        Self { dns }
    }

    /// Whether the address names a host this transport can reach
    pub fn handles(addr: &Multiaddr) -> bool {
        addr.iter().any(|c| c.protocol().is_host())
    }

    /// Resolves the first DNS component of `addr` into concrete IP addresses.
    ///
    /// Addresses without a DNS component resolve to themselves. A DNS-tagged
    /// address that yields no usable IP fails with `AddressResolution`.
    pub async fn resolve(&self, addr: &Multiaddr) -> Result<Vec<Multiaddr>> {
        let Some((index, name, protocol)) =
            addr.iter().enumerate().find_map(|(index, component)| match component {
                Component::Dns4(name) => Some((index, name.as_str(), Protocol::Dns4)),
                Component::Dns6(name) => Some((index, name.as_str(), Protocol::Dns6)),
                Component::DnsAddr(name) => Some((index, name.as_str(), Protocol::DnsAddr)),
                _ => None,
            })
        else {
            return Ok(vec![addr.clone()]);
        };

        let ips = match self.dns.lookup(name).await {
            Ok(ips) => ips,
            Err(e) => {
                debug!(name, error = %e, "DNS lookup failed");
                Vec::new()
            }
        };

        let resolved: Vec<Multiaddr> = ips
            .into_iter()
            .filter_map(|ip| match (protocol, ip) {
                (Protocol::Dns6, IpAddr::V4(_)) | (Protocol::Dns4, IpAddr::V6(_)) => None,
                (_, IpAddr::V4(v4)) => Some(Component::Ip4(v4)),
                (_, IpAddr::V6(v6)) => Some(Component::Ip6(v6)),
            })
            .map(|host| addr.replace(index, vec![host]))
            .collect();

        if resolved.is_empty() {
            return Err(TransportError::AddressResolution(addr.clone()));
        }
        debug!(%addr, count = resolved.len(), "resolved multiaddress");
        Ok(resolved)
    }

    /// First IP4/IP6 value among the resolved addresses
    pub async fn host_of(&self, addr: &Multiaddr) -> Result<IpAddr> {
        let resolved = self.resolve(addr).await?;
        resolved
            .iter()
            .flat_map(|a| a.iter())
            .find_map(|c| match c {
                Component::Ip4(ip) => Some(IpAddr::V4(*ip)),
                Component::Ip6(ip) => Some(IpAddr::V6(*ip)),
                _ => None,
            })
            .ok_or_else(|| TransportError::MissingHost(addr.clone()))
    }

    /// Value of the UDP component; TCP components are not consulted
    pub fn port_of(addr: &Multiaddr) -> Result<u16> {
        addr.iter()
            .find_map(|c| match c {
                Component::Udp(port) => Some(*port),
                _ => None,
            })
            .ok_or_else(|| TransportError::MissingPort(addr.clone()))
    }

    /// Socket address for a QUIC bind or connect; the port is checked first
    /// so malformed targets fail without a DNS round trip
    pub async fn socket_addr_of(&self, addr: &Multiaddr) -> Result<SocketAddr> {
        let port = Self::port_of(addr)?;
        let host = self.host_of(addr).await?;
        Ok(SocketAddr::new(host, port))
    }
}
