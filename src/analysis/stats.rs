//! Streaming traffic statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::ring::BoundedLog;
use super::services::{DNS_PORT, SNI_PORTS};
use crate::config::DOMAIN_LOG_CAPACITY;
use crate::models::{PacketRecord, TransportProtocol};

/// Bytes sent by one source address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpStat {
    pub ip: IpAddr,
    pub bytes: u64,
}

/// Packets seen for one transport protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStat {
    pub protocol: TransportProtocol,
    pub count: u64,
}

/// Where a logged hostname was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DomainSource {
    Sni,
    Dns,
    Http,
}

impl DomainSource {
    /// SNI for ports 443/853, DNS for port 53 or any UDP, HTTP otherwise
    pub fn classify(record: &PacketRecord) -> Self {
        if SNI_PORTS.contains(&record.dst_port) {
            DomainSource::Sni
        } else if record.dst_port == DNS_PORT || record.protocol == TransportProtocol::Udp {
            DomainSource::Dns
        } else {
            DomainSource::Http
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainSource::Sni => "SNI",
            DomainSource::Dns => "DNS",
            DomainSource::Http => "HTTP",
        }
    }
}

/// A hostname seen in the traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEntry {
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    pub source: DomainSource,
}

/// Throughput since the previous rate sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficRates {
    pub bits_per_second: f64,
    pub packets_per_second: f64,
}

struct StatsInner {
    total_bytes: u64,
    total_packets: u64,
    window_bytes: u64,
    window_packets: u64,
    window_start: Instant,
    ip_bytes: HashMap<IpAddr, u64>,
    protocol_counts: HashMap<TransportProtocol, u64>,
    domain_log: BoundedLog<DomainEntry>,
}

/// Thread-safe traffic aggregator.
///
/// Every [`process`](Self::process) call updates all counters under one lock,
/// so readers never see a half-applied record.
pub struct TrafficStats {
    inner: Mutex<StatsInner>,
}

impl TrafficStats {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Aggregator whose first rate window begins at `start`
    pub fn starting_at(start: Instant) -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                total_bytes: 0,
                total_packets: 0,
                window_bytes: 0,
                window_packets: 0,
                window_start: start,
                ip_bytes: HashMap::new(),
                protocol_counts: HashMap::new(),
                domain_log: BoundedLog::new(DOMAIN_LOG_CAPACITY),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn process(&self, record: &PacketRecord) {
        let mut inner = self.lock();

        inner.total_bytes = inner.total_bytes.saturating_add(record.length);
        inner.total_packets += 1;
        inner.window_bytes = inner.window_bytes.saturating_add(record.length);
        inner.window_packets += 1;

        if let Some(src) = record.src_ip {
            *inner.ip_bytes.entry(src).or_insert(0) += record.length;
        }

        *inner.protocol_counts.entry(record.protocol).or_insert(0) += 1;

        if let Some(hostname) = record.hostname() {
            let entry = DomainEntry {
                hostname: hostname.to_string(),
                timestamp: record.timestamp,
                source: DomainSource::classify(record),
            };
            inner.domain_log.push(entry);
        }
    }

    /// Rates since the previous call, then start a new window.
    pub fn rates(&self) -> TrafficRates {
        self.rates_at(Instant::now())
    }

    /// [`rates`](Self::rates) against an explicit clock.
    ///
    /// Zero elapsed time returns zeros and keeps the window intact.
    pub fn rates_at(&self, now: Instant) -> TrafficRates {
        let mut inner = self.lock();

        let elapsed = now.saturating_duration_since(inner.window_start).as_secs_f64();
        if elapsed <= 0.0 {
            return TrafficRates::default();
        }

        let rates = TrafficRates {
            bits_per_second: (inner.window_bytes as f64 * 8.0) / elapsed,
            packets_per_second: inner.window_packets as f64 / elapsed,
        };

        inner.window_bytes = 0;
        inner.window_packets = 0;
        inner.window_start = now;

        rates
    }

    /// Top `limit` sources by bytes, largest first
    pub fn top_talkers(&self, limit: usize) -> Vec<IpStat> {
        let inner = self.lock();

        let mut stats: Vec<IpStat> = inner
            .ip_bytes
            .iter()
            .map(|(ip, bytes)| IpStat {
                ip: *ip,
                bytes: *bytes,
            })
            .collect();
        stats.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.ip.cmp(&b.ip)));
        stats.truncate(limit);
        stats
    }

    /// Packet counts per protocol, largest first
    pub fn protocol_breakdown(&self) -> Vec<ProtocolStat> {
        let inner = self.lock();

        let mut stats: Vec<ProtocolStat> = inner
            .protocol_counts
            .iter()
            .map(|(protocol, count)| ProtocolStat {
                protocol: *protocol,
                count: *count,
            })
            .collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.protocol.cmp(&b.protocol)));
        stats
    }

    /// Copy of the domain log, oldest first
    pub fn domain_log(&self) -> Vec<DomainEntry> {
        self.lock().domain_log.to_vec()
    }

    pub fn total_bytes(&self) -> u64 {
        self.lock().total_bytes
    }

    pub fn total_packets(&self) -> u64 {
        self.lock().total_packets
    }
}

impl Default for TrafficStats {
    fn default() -> Self {
        Self::new()
    }
}
