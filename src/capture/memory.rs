//! In-process link layer
//!
//! Records every transmitted frame, delivers injected frames, and answers ARP
//! requests for registered hosts the way a real neighbour would. All handles
//! opened from one `MemoryLink` share the same wire.

use pnet::util::MacAddr;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{CaptureHandle, CaptureOptions, FrameReceiver, FrameSender, LinkLayer};
use crate::error::{Error, Result};
use crate::models::InterfaceInfo;
use crate::network::frames::{build_arp_reply, is_arp_frame, parse_arp_frame, ArpFrame};

#[derive(Default)]
struct Wire {
    attempts: usize,
    sent: Vec<Vec<u8>>,
    inbound: VecDeque<Vec<u8>>,
    neighbours: HashMap<Ipv4Addr, MacAddr>,
    fail_all_sends: bool,
    fail_next_sends: usize,
    fail_open: bool,
    opened: usize,
}

#[derive(Default)]
struct Shared {
    wire: Mutex<Wire>,
    arrived: Condvar,
}

impl Shared {
    fn wire(&self) -> MutexGuard<'_, Wire> {
        self.wire.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared in-memory wire
#[derive(Clone, Default)]
pub struct MemoryLink {
    shared: Arc<Shared>,
}

impl MemoryLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a neighbour that answers ARP requests for `ip`
    pub fn with_neighbour(self, ip: Ipv4Addr, mac: MacAddr) -> Self {
        self.add_neighbour(ip, mac);
        self
    }

    pub fn add_neighbour(&self, ip: Ipv4Addr, mac: MacAddr) {
        self.shared.wire().neighbours.insert(ip, mac);
    }

    /// Queue a frame for delivery to receivers
    pub fn inject(&self, frame: Vec<u8>) {
        self.shared.wire().inbound.push_back(frame);
        self.shared.arrived.notify_all();
    }

    /// Make every send fail (the attempt is still counted)
    pub fn fail_all_sends(&self, fail: bool) {
        self.shared.wire().fail_all_sends = fail;
    }

    /// Make the next `count` sends fail
    pub fn fail_next_sends(&self, count: usize) {
        self.shared.wire().fail_next_sends = count;
    }

    /// Make `open` fail with a capture error
    pub fn fail_open(&self, fail: bool) {
        self.shared.wire().fail_open = fail;
    }

    /// Frames that were transmitted successfully, in order
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.shared.wire().sent.clone()
    }

    /// Successfully transmitted frames that parse as ARP
    pub fn sent_arp(&self) -> Vec<ArpFrame> {
        self.shared
            .wire()
            .sent
            .iter()
            .filter_map(|frame| parse_arp_frame(frame))
            .collect()
    }

    /// Every send call, successful or not
    pub fn send_attempts(&self) -> usize {
        self.shared.wire().attempts
    }

    /// Number of handles opened so far
    pub fn opened_handles(&self) -> usize {
        self.shared.wire().opened
    }
}

impl LinkLayer for MemoryLink {
    fn open(&self, interface: &InterfaceInfo, options: &CaptureOptions) -> Result<CaptureHandle> {
        {
            let mut wire = self.shared.wire();
            if wire.fail_open {
                return Err(Error::capture(format!(
                    "Failed to open datalink channel on {}",
                    interface.name
                )));
            }
            wire.opened += 1;
        }

        Ok(CaptureHandle {
            sender: Box::new(MemorySender {
                shared: Arc::clone(&self.shared),
            }),
            receiver: Box::new(MemoryReceiver {
                shared: Arc::clone(&self.shared),
                poll_interval: options.poll_interval,
                arp_only: options.arp_only,
            }),
        })
    }
}

struct MemorySender {
    shared: Arc<Shared>,
}

impl FrameSender for MemorySender {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let mut wire = self.shared.wire();
        wire.attempts += 1;

        if wire.fail_all_sends {
            return Err(Error::transmit("Injected send failure"));
        }
        if wire.fail_next_sends > 0 {
            wire.fail_next_sends -= 1;
            return Err(Error::transmit("Injected send failure"));
        }

        wire.sent.push(frame.to_vec());

        // Neighbour answers "who has" for its own address
        if let Some(request) = parse_arp_frame(frame).filter(ArpFrame::is_request) {
            if let Some(mac) = wire.neighbours.get(&request.target_ip).copied() {
                let reply =
                    build_arp_reply(mac, request.target_ip, request.sender_mac, request.sender_ip)?;
                wire.inbound.push_back(reply);
                self.shared.arrived.notify_all();
            }
        }

        Ok(())
    }
}

struct MemoryReceiver {
    shared: Arc<Shared>,
    poll_interval: Duration,
    arp_only: bool,
}

impl FrameReceiver for MemoryReceiver {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut wire = self.shared.wire();

        if wire.inbound.is_empty() {
            wire = self
                .shared
                .arrived
                .wait_timeout(wire, self.poll_interval)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        while let Some(frame) = wire.inbound.pop_front() {
            if self.arp_only && !is_arp_frame(&frame) {
                continue;
            }
            return Ok(Some(frame));
        }
        Ok(None)
    }
}
