//! Raw Ethernet I/O behind a small trait seam
//!
//! Every ARP component opens its own [`CaptureHandle`] through a [`LinkLayer`]
//! and owns it exclusively for its lifetime. Production code uses
//! [`PnetLink`]; [`MemoryLink`] runs the same components without privileges.

mod memory;
mod pnet_link;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::models::InterfaceInfo;

pub use memory::MemoryLink;
pub use pnet_link::PnetLink;

/// How a capture handle is opened
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Open the interface in promiscuous mode
    pub promiscuous: bool,
    /// Longest a single receive blocks before reporting "nothing yet"
    pub poll_interval: Duration,
    /// Drop every non-ARP frame before it reaches the caller
    pub arp_only: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            promiscuous: true,
            poll_interval: Duration::from_millis(100),
            arp_only: false,
        }
    }
}

impl CaptureOptions {
    pub fn arp(poll_interval: Duration, promiscuous: bool) -> Self {
        Self {
            promiscuous,
            poll_interval,
            arp_only: true,
        }
    }
}

/// Transmit half of a capture handle
pub trait FrameSender: Send {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()>;
}

/// Receive half of a capture handle
pub trait FrameReceiver: Send {
    /// Next frame, or `Ok(None)` when the poll interval elapsed without one.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// An open link-layer channel. Dropping both halves closes it.
pub struct CaptureHandle {
    pub sender: Box<dyn FrameSender>,
    pub receiver: Box<dyn FrameReceiver>,
}

impl CaptureHandle {
    pub fn split(self) -> (Box<dyn FrameSender>, Box<dyn FrameReceiver>) {
        (self.sender, self.receiver)
    }
}

/// Opens capture handles on an interface
pub trait LinkLayer: Send + Sync {
    fn open(&self, interface: &InterfaceInfo, options: &CaptureOptions) -> Result<CaptureHandle>;
}

/// Link layer shared between components
pub type SharedLink = Arc<dyn LinkLayer>;

/// The production link layer
pub fn default_link() -> SharedLink {
    Arc::new(PnetLink)
}
