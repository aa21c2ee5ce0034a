//! lanwatch - LAN host discovery, ARP interception and live traffic analytics
//!
//! This crate provides:
//! - Active ARP sweeps of the local subnet
//! - Single-target MAC resolution
//! - Bidirectional ARP cache poisoning with restoration on stop
//! - A streaming feed of dissected packets from an external `tshark`
//! - Traffic statistics and anomaly alerts over that feed

pub mod analysis;
pub mod app;
pub mod capture;
pub mod cli;
pub mod command;
pub(crate) mod command_handlers;
pub mod config;
pub mod error;
pub mod feed;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod network;
pub mod scanner;
pub mod spoofer;

pub use analysis::{Alert, AlertKind, AnomalyConfig, AnomalyDetector, TrafficStats};
pub use app::{
    execute_command, execute_command_typed, execute_command_with_context, run, run_with_context,
    run_with_ctrl_c, AppCommandResult, AppContext, AppEvent, EventHook, OutputHook,
};
pub use capture::{default_link, LinkLayer, MemoryLink, PnetLink, SharedLink};
pub use command::AppCommand;
pub use command_handlers::{MitmReport, ResolveReport, ScanReport};
pub use error::{Error, Result};
pub use models::*;
pub use monitor::{TrafficMonitor, TrafficSnapshot};
pub use network::{find_interface_by_name, find_valid_interface, list_valid_interfaces};
pub use scanner::{discover_hosts, resolve_mac, CancelToken, HostScanner, ScanConfig};
pub use spoofer::{MitmEngine, MitmState, SpoofSession};

// Re-export logging macros for use across crate
pub use crate::logging::macros;
