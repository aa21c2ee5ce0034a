//! Data models shared across lanwatch

use chrono::{DateTime, Utc};
use pnet::datalink::NetworkInterface;
use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// A host discovered on the local subnet. Identity is the IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Host {
    pub fn new(ip: Ipv4Addr, mac: MacAddr) -> Self {
        Self { ip, mac, name: None }
    }
}

/// Transport classification of a dissected packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Other,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "TCP",
            TransportProtocol::Udp => "UDP",
            TransportProtocol::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One packet summary from the external dissector.
///
/// Every field is best-effort. Missing addresses are `None`, missing ports are 0.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    pub timestamp: DateTime<Utc>,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: TransportProtocol,
    pub length: u64,
    /// Best available hostname (TLS SNI > DNS query > HTTP Host)
    pub hostname: Option<String>,
    /// Link-layer destination, used for broadcast detection
    pub eth_dst: Option<MacAddr>,
}

impl PacketRecord {
    /// Minimal record with the given source and length; other fields empty.
    pub fn new(src_ip: Option<IpAddr>, length: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            src_ip,
            dst_ip: None,
            src_port: 0,
            dst_port: 0,
            protocol: TransportProtocol::Other,
            length,
            hostname: None,
            eth_dst: None,
        }
    }

    pub fn with_ports(mut self, protocol: TransportProtocol, src_port: u16, dst_port: u16) -> Self {
        self.protocol = protocol;
        self.src_port = src_port;
        self.dst_port = dst_port;
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_eth_dst(mut self, mac: MacAddr) -> Self {
        self.eth_dst = Some(mac);
        self
    }

    /// Hostname if present and non-empty
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref().filter(|h| !h.is_empty())
    }
}

/// Local interface with its own IPv4, MAC and mask
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub prefix_len: u8,
    pub pnet_interface: NetworkInterface,
}

impl InterfaceInfo {
    /// Interface description not backed by an OS adapter, for use with an in-memory link.
    pub fn detached(name: &str, ip: Ipv4Addr, mac: MacAddr, prefix_len: u8) -> Self {
        Self {
            name: name.to_string(),
            ip,
            mac,
            prefix_len,
            pnet_interface: NetworkInterface {
                name: name.to_string(),
                description: String::new(),
                index: 0,
                mac: Some(mac),
                ips: vec![],
                flags: 0,
            },
        }
    }
}
