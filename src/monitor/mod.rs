//! Live traffic monitoring

mod events;
mod traffic;

pub use events::{MonitoringStatus, TrafficSnapshot};
pub use traffic::TrafficMonitor;
