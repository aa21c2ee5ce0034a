//! Monitoring snapshots
//!
//! Serialisable views handed to a presentation layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::{Alert, DomainEntry, IpStat, ProtocolStat, TrafficRates};

/// Point-in-time view of both analytics components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    pub timestamp: DateTime<Utc>,
    pub rates: TrafficRates,
    pub total_bytes: u64,
    pub total_packets: u64,
    pub top_talkers: Vec<IpStat>,
    pub protocols: Vec<ProtocolStat>,
    pub domains: Vec<DomainEntry>,
    pub alerts: Vec<Alert>,
}

/// Monitor status information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringStatus {
    pub is_running: bool,
    pub records_processed: u64,
}
