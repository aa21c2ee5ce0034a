//! Traffic analytics
//!
//! [`TrafficStats`] and [`AnomalyDetector`] consume the same record stream
//! independently; neither shares state with the other.

pub mod anomalies;
mod ring;
pub mod services;
pub mod stats;

pub use anomalies::{Alert, AlertKind, AnomalyConfig, AnomalyDetector};
pub use ring::BoundedLog;
pub use stats::{DomainEntry, DomainSource, IpStat, ProtocolStat, TrafficRates, TrafficStats};
