use std::net::Ipv4Addr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    Scan {
        interface: Option<String>,
        max_hosts: Option<i64>,
        timeout_secs: u64,
    },
    Resolve {
        ip: Ipv4Addr,
        interface: Option<String>,
    },
    Mitm {
        target: Ipv4Addr,
        gateway: Ipv4Addr,
        interface: Option<String>,
        duration_secs: Option<u64>,
        capture: bool,
        interval_secs: u64,
    },
    Monitor {
        interface: Option<String>,
        replay: Option<PathBuf>,
        filter: Option<String>,
        interval_secs: u64,
        reports: Option<u32>,
    },
    Interfaces,
    Help,
    Version,
}
