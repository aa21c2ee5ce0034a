//! Scanner module - ARP resolution and subnet discovery

mod cancel;
mod discovery;
mod resolver;

pub use cancel::CancelToken;
pub use discovery::{discover_hosts, HostScanner, ScanConfig};
pub use resolver::{resolve_mac, ArpResolver};
