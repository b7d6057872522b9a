//! Self-describing multi-layer network addresses
//!
//! A [`Multiaddr`] is an ordered list of `(protocol, value)` components such as
//! `/ip4/127.0.0.1/udp/4001/quic-v1/p2p/Qm...`. Addresses are immutable once
//! parsed and serve both as dial targets and as listener registry keys.
//!
//! Both the text form and the binary form (varint protocol code followed by the
//! protocol-specific value encoding) are supported.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, TransportError};
use crate::peer::PeerId;

pub mod resolve;

pub use resolve::{DnsResolver, Resolver, StaticResolver, TokioDnsResolver};

/// Protocols understood by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ip4,
    Tcp,
    Dns4,
    Dns6,
    DnsAddr,
    Ip6,
    Udp,
    P2p,
    Quic,
    QuicV1,
}

/// Value size class of a protocol in the binary encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueSize {
    Zero,
    Fixed(usize),
    Variable,
}

impl Protocol {
    pub const ALL: [Protocol; 10] = [
        Protocol::Ip4,
        Protocol::Tcp,
        Protocol::Dns4,
        Protocol::Dns6,
        Protocol::DnsAddr,
        Protocol::Ip6,
        Protocol::Udp,
        Protocol::P2p,
        Protocol::Quic,
        Protocol::QuicV1,
    ];

    /// Multicodec code of the protocol
    pub fn code(self) -> u64 {
        match self {
            Protocol::Ip4 => 4,
            Protocol::Tcp => 6,
            Protocol::Dns4 => 54,
            Protocol::Dns6 => 55,
            Protocol::DnsAddr => 56,
            Protocol::Ip6 => 41,
            Protocol::Udp => 273,
            Protocol::P2p => 421,
            Protocol::Quic => 460,
            Protocol::QuicV1 => 461,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Ip4 => "ip4",
            Protocol::Tcp => "tcp",
            Protocol::Dns4 => "dns4",
            Protocol::Dns6 => "dns6",
            Protocol::DnsAddr => "dnsaddr",
            Protocol::Ip6 => "ip6",
            Protocol::Udp => "udp",
            Protocol::P2p => "p2p",
            Protocol::Quic => "quic",
            Protocol::QuicV1 => "quic-v1",
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        // `ipfs` is the legacy name of `p2p`
        if name == "ipfs" {
            return Some(Protocol::P2p);
        }
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Whether the protocol names a host (directly or through DNS)
    pub fn is_host(self) -> bool {
        matches!(
            self,
            Protocol::Ip4 | Protocol::Ip6 | Protocol::Dns4 | Protocol::Dns6 | Protocol::DnsAddr
        )
    }

    pub fn is_dns(self) -> bool {
        matches!(self, Protocol::Dns4 | Protocol::Dns6 | Protocol::DnsAddr)
    }

    fn value_size(self) -> ValueSize {
        match self {
            Protocol::Ip4 => ValueSize::Fixed(4),
            Protocol::Ip6 => ValueSize::Fixed(16),
            Protocol::Tcp | Protocol::Udp => ValueSize::Fixed(2),
            Protocol::Dns4 | Protocol::Dns6 | Protocol::DnsAddr | Protocol::P2p => {
                ValueSize::Variable
            }
            Protocol::Quic | Protocol::QuicV1 => ValueSize::Zero,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One `(protocol, value)` pair of a multiaddress
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Component {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Dns4(String),
    Dns6(String),
    DnsAddr(String),
    Tcp(u16),
    Udp(u16),
    P2p(PeerId),
    Quic,
    QuicV1,
}

impl Component {
    pub fn protocol(&self) -> Protocol {
        match self {
            Component::Ip4(_) => Protocol::Ip4,
            Component::Ip6(_) => Protocol::Ip6,
            Component::Dns4(_) => Protocol::Dns4,
            Component::Dns6(_) => Protocol::Dns6,
            Component::DnsAddr(_) => Protocol::DnsAddr,
            Component::Tcp(_) => Protocol::Tcp,
            Component::Udp(_) => Protocol::Udp,
            Component::P2p(_) => Protocol::P2p,
            Component::Quic => Protocol::Quic,
            Component::QuicV1 => Protocol::QuicV1,
        }
    }

    /// Text value of the component, `None` for zero-sized protocols
    pub fn value(&self) -> Option<String> {
        match self {
            Component::Ip4(ip) => Some(ip.to_string()),
            Component::Ip6(ip) => Some(ip.to_string()),
            Component::Dns4(name) | Component::Dns6(name) | Component::DnsAddr(name) => {
                Some(name.clone())
            }
            Component::Tcp(port) | Component::Udp(port) => Some(port.to_string()),
            Component::P2p(peer) => Some(peer.to_base58()),
            Component::Quic | Component::QuicV1 => None,
        }
    }

    fn parse(protocol: Protocol, value: &str) -> Result<Self> {
        let invalid = |what: &str| {
            TransportError::InvalidMultiaddr(format!("invalid {} value '{}': {}", protocol, value, what))
        };
        match protocol {
            Protocol::Ip4 => value.parse().map(Component::Ip4).map_err(|e| invalid(&e.to_string())),
            Protocol::Ip6 => value.parse().map(Component::Ip6).map_err(|e| invalid(&e.to_string())),
            Protocol::Tcp => value.parse().map(Component::Tcp).map_err(|e| invalid(&e.to_string())),
            Protocol::Udp => value.parse().map(Component::Udp).map_err(|e| invalid(&e.to_string())),
            Protocol::Dns4 => Ok(Component::Dns4(validate_dns_name(value).map_err(|e| invalid(e))?)),
            Protocol::Dns6 => Ok(Component::Dns6(validate_dns_name(value).map_err(|e| invalid(e))?)),
            Protocol::DnsAddr => {
                Ok(Component::DnsAddr(validate_dns_name(value).map_err(|e| invalid(e))?))
            }
            Protocol::P2p => PeerId::from_base58(value).map(Component::P2p),
            Protocol::Quic => Ok(Component::Quic),
            Protocol::QuicV1 => Ok(Component::QuicV1),
        }
    }

    fn encode_value(&self, out: &mut Vec<u8>) {
        match self {
            Component::Ip4(ip) => out.extend_from_slice(&ip.octets()),
            Component::Ip6(ip) => out.extend_from_slice(&ip.octets()),
            Component::Tcp(port) | Component::Udp(port) => out.extend_from_slice(&port.to_be_bytes()),
            Component::Dns4(name) | Component::Dns6(name) | Component::DnsAddr(name) => {
                write_varint(name.len() as u64, out);
                out.extend_from_slice(name.as_bytes());
            }
            Component::P2p(peer) => {
                write_varint(peer.as_bytes().len() as u64, out);
                out.extend_from_slice(peer.as_bytes());
            }
            Component::Quic | Component::QuicV1 => {}
        }
    }

    fn decode_value(protocol: Protocol, raw: &[u8]) -> Result<Self> {
        let invalid = |what: &str| {
            TransportError::InvalidMultiaddr(format!("invalid {} bytes: {}", protocol, what))
        };
        let text = || {
            std::str::from_utf8(raw)
                .map(str::to_string)
                .map_err(|e| invalid(&e.to_string()))
        };
        match protocol {
            Protocol::Ip4 => {
                let octets: [u8; 4] = raw.try_into().map_err(|_| invalid("expected 4 bytes"))?;
                Ok(Component::Ip4(Ipv4Addr::from(octets)))
            }
            Protocol::Ip6 => {
                let octets: [u8; 16] = raw.try_into().map_err(|_| invalid("expected 16 bytes"))?;
                Ok(Component::Ip6(Ipv6Addr::from(octets)))
            }
            Protocol::Tcp | Protocol::Udp => {
                let port: [u8; 2] = raw.try_into().map_err(|_| invalid("expected 2 bytes"))?;
                let port = u16::from_be_bytes(port);
                Ok(if protocol == Protocol::Tcp {
                    Component::Tcp(port)
                } else {
                    Component::Udp(port)
                })
            }
            Protocol::Dns4 => Ok(Component::Dns4(text()?)),
            Protocol::Dns6 => Ok(Component::Dns6(text()?)),
            Protocol::DnsAddr => Ok(Component::DnsAddr(text()?)),
            Protocol::P2p => PeerId::from_bytes(raw.to_vec()).map(Component::P2p),
            Protocol::Quic => Ok(Component::Quic),
            Protocol::QuicV1 => Ok(Component::QuicV1),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.protocol())?;
        if let Some(value) = self.value() {
            write!(f, "/{}", value)?;
        }
        Ok(())
    }
}

fn validate_dns_name(name: &str) -> std::result::Result<String, &'static str> {
    if name.len() > 253 {
        return Err("name longer than 253 bytes");
    }
    if name
        .split('.')
        .any(|label| label.is_empty() || label.len() > 63)
    {
        return Err("empty or oversized label");
    }
    Ok(name.to_string())
}

/// Layered network address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Multiaddr {
    components: Vec<Component>,
}

impl Multiaddr {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_components(components: Vec<Component>) -> Self {
        Self { components }
    }

    /// `/ip4|ip6/<ip>/udp/<port>/quic-v1` for a bound QUIC socket
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        let host = match addr.ip() {
            IpAddr::V4(ip) => Component::Ip4(ip),
            IpAddr::V6(ip) => Component::Ip6(ip),
        };
        Self {
            components: vec![host, Component::Udp(addr.port()), Component::QuicV1],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn has(&self, protocol: Protocol) -> bool {
        self.components.iter().any(|c| c.protocol() == protocol)
    }

    pub fn has_any(&self, protocols: &[Protocol]) -> bool {
        self.components.iter().any(|c| protocols.contains(&c.protocol()))
    }

    /// First component carrying `protocol`
    pub fn component(&self, protocol: Protocol) -> Option<&Component> {
        self.components.iter().find(|c| c.protocol() == protocol)
    }

    /// Text value of the first component carrying `protocol`
    pub fn value_of(&self, protocol: Protocol) -> Option<String> {
        self.component(protocol).and_then(Component::value)
    }

    /// Peer identity from the `/p2p` component, if present
    pub fn peer_id(&self) -> Option<PeerId> {
        self.components.iter().find_map(|c| match c {
            Component::P2p(peer) => Some(peer.clone()),
            _ => None,
        })
    }

    /// Returns a copy with `component` appended
    pub fn with(&self, component: Component) -> Self {
        let mut components = self.components.clone();
        components.push(component);
        Self { components }
    }

    /// Returns a copy where the component at `index` is replaced by `replacement`
    pub(crate) fn replace(&self, index: usize, replacement: Vec<Component>) -> Self {
        let mut components = Vec::with_capacity(self.components.len() + replacement.len());
        components.extend_from_slice(&self.components[..index]);
        components.extend(replacement);
        components.extend_from_slice(&self.components[index + 1..]);
        Self { components }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for component in &self.components {
            write_varint(component.protocol().code(), &mut out);
            component.encode_value(&mut out);
        }
        out
    }

    pub fn from_bytes(mut raw: &[u8]) -> Result<Self> {
        let mut components = Vec::new();
        while !raw.is_empty() {
            let code = read_varint(&mut raw)?;
            let protocol = Protocol::from_code(code).ok_or_else(|| {
                TransportError::InvalidMultiaddr(format!("unknown protocol code {}", code))
            })?;
            let len = match protocol.value_size() {
                ValueSize::Zero => 0,
                ValueSize::Fixed(n) => n,
                ValueSize::Variable => read_varint(&mut raw)? as usize,
            };
            if raw.len() < len {
                return Err(TransportError::InvalidMultiaddr(format!(
                    "truncated {} value",
                    protocol
                )));
            }
            let (value, rest) = raw.split_at(len);
            components.push(Component::decode_value(protocol, value)?);
            raw = rest;
        }
        Ok(Self { components })
    }
}

impl FromStr for Multiaddr {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }
        let rest = trimmed.strip_prefix('/').ok_or_else(|| {
            TransportError::InvalidMultiaddr(format!("'{}' must start with a /", s))
        })?;

        let mut parts = rest.split('/');
        let mut components = Vec::new();
        while let Some(name) = parts.next() {
            let protocol = Protocol::from_name(name).ok_or_else(|| {
                TransportError::InvalidMultiaddr(format!("unknown protocol '{}' in {}", name, s))
            })?;
            let component = if protocol.value_size() == ValueSize::Zero {
                Component::parse(protocol, "")?
            } else {
                match parts.next() {
                    Some(value) if !value.is_empty() => Component::parse(protocol, value)?,
                    _ => {
                        return Err(TransportError::InvalidMultiaddr(format!(
                            "protocol {} requires a value in {}",
                            protocol, s
                        )))
                    }
                }
            };
            components.push(component);
        }
        Ok(Self { components })
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for component in &self.components {
            write!(f, "{}", component)?;
        }
        Ok(())
    }
}

impl From<SocketAddr> for Multiaddr {
    fn from(addr: SocketAddr) -> Self {
        Self::from_socket_addr(addr)
    }
}

impl Serialize for Multiaddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Multiaddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(raw: &mut &[u8]) -> Result<u64> {
    let bytes: &[u8] = *raw;
    let mut value = 0u64;
    // unsigned-varint caps encodings at 9 bytes
    for (i, byte) in bytes.iter().enumerate().take(9) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            *raw = &bytes[i + 1..];
            return Ok(value);
        }
    }
    Err(TransportError::InvalidMultiaddr("truncated or overlong varint".to_string()))
}
