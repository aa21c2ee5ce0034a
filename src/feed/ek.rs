//! Parser for the dissector's `-T ek` line format
//!
//! With `-e` field selection tshark flattens each packet into
//! `{"timestamp": "...", "layers": {"ip_src": ["10.0.0.1"], ...}}`, replacing
//! dots in field names with underscores. Interleaved index lines carry no
//! `layers` key and are skipped.

use chrono::{DateTime, TimeZone, Utc};
use pnet::util::MacAddr;
use serde::Deserialize;
use std::net::IpAddr;
use std::str::FromStr;

use crate::models::{PacketRecord, TransportProtocol};

/// Fields requested from the dissector, in `-e` order
pub const EK_FIELDS: &[&str] = &[
    "frame.len",
    "ip.src",
    "ip.dst",
    "tcp.srcport",
    "tcp.dstport",
    "udp.srcport",
    "udp.dstport",
    "dns.qry.name",
    "tls.handshake.extensions_server_name",
    "http.host",
    "eth.dst",
];

#[derive(Debug, Default, Deserialize)]
struct EkLine {
    #[serde(default)]
    timestamp: Option<String>,
    layers: EkLayers,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EkLayers {
    frame_len: Vec<String>,
    ip_src: Vec<String>,
    ip_dst: Vec<String>,
    tcp_srcport: Vec<String>,
    tcp_dstport: Vec<String>,
    udp_srcport: Vec<String>,
    udp_dstport: Vec<String>,
    dns_qry_name: Vec<String>,
    tls_handshake_extensions_server_name: Vec<String>,
    http_host: Vec<String>,
    eth_dst: Vec<String>,
}

fn first(values: &[String]) -> Option<&str> {
    values.first().map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn first_parsed<T: FromStr>(values: &[String]) -> Option<T> {
    first(values).and_then(|v| v.parse().ok())
}

/// EK timestamps are epoch milliseconds as a string
fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|v| v.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

/// Convert one output line into a record.
///
/// Returns `None` for blank lines, index lines, malformed JSON, and packets
/// without any IP address.
pub fn parse_ek_line(line: &str) -> Option<PacketRecord> {
    let line = line.trim();
    if line.is_empty() || !line.contains("\"layers\"") {
        return None;
    }

    let parsed: EkLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::trace!("Skipping malformed dissector line: {}", e);
            return None;
        }
    };
    let layers = &parsed.layers;

    if first(&layers.ip_src).is_none() && first(&layers.ip_dst).is_none() {
        return None;
    }

    let (protocol, src_port, dst_port) =
        if !layers.tcp_srcport.is_empty() || !layers.tcp_dstport.is_empty() {
            (
                TransportProtocol::Tcp,
                first_parsed(&layers.tcp_srcport).unwrap_or(0),
                first_parsed(&layers.tcp_dstport).unwrap_or(0),
            )
        } else if !layers.udp_srcport.is_empty() || !layers.udp_dstport.is_empty() {
            (
                TransportProtocol::Udp,
                first_parsed(&layers.udp_srcport).unwrap_or(0),
                first_parsed(&layers.udp_dstport).unwrap_or(0),
            )
        } else {
            (TransportProtocol::Other, 0, 0)
        };

    // TLS SNI > DNS query > HTTP host
    let hostname = first(&layers.tls_handshake_extensions_server_name)
        .or_else(|| first(&layers.dns_qry_name))
        .or_else(|| first(&layers.http_host))
        .map(str::to_string);

    Some(PacketRecord {
        timestamp: parse_timestamp(parsed.timestamp.as_deref()),
        src_ip: first_parsed::<IpAddr>(&layers.ip_src),
        dst_ip: first_parsed::<IpAddr>(&layers.ip_dst),
        src_port,
        dst_port,
        protocol,
        length: first_parsed(&layers.frame_len).unwrap_or(0),
        hostname,
        eth_dst: first_parsed::<MacAddr>(&layers.eth_dst),
    })
}
