//! Error types for lanwatch

use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for lanwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the ARP, capture and spoofing layers.
///
/// Analytics never produce errors; malformed records are skipped.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid address, interface or parameter at setup time
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No matching ARP reply arrived before the deadline
    #[error("No ARP reply from {ip} within {timeout:?}")]
    ResolutionTimeout { ip: Ipv4Addr, timeout: Duration },

    /// A MITM endpoint could not be resolved
    #[error("Failed to resolve {role} MAC ({ip}): {source}")]
    ResolutionFailure {
        role: &'static str,
        ip: Ipv4Addr,
        #[source]
        source: Box<Error>,
    },

    /// Capture handle could not be opened, configured or read
    #[error("Packet capture error: {0}")]
    Capture(String),

    /// Frame serialization or send failure
    #[error("Transmit error: {0}")]
    Transmit(String),

    /// Caller aborted the operation
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn capture<S: Into<String>>(msg: S) -> Self {
        Error::Capture(msg.into())
    }

    pub fn transmit<S: Into<String>>(msg: S) -> Self {
        Error::Transmit(msg.into())
    }

    /// True for errors caused by the caller aborting.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
