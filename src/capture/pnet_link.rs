//! pnet datalink channels

use pnet::datalink::{self, Channel, DataLinkReceiver, DataLinkSender};
use std::io::ErrorKind;
use std::time::{Duration, Instant};

use super::{CaptureHandle, CaptureOptions, FrameReceiver, FrameSender, LinkLayer};
use crate::error::{Error, Result};
use crate::models::InterfaceInfo;
use crate::network::frames::is_arp_frame;

/// Link layer backed by `pnet::datalink` (AF_PACKET on Linux, BPF on macOS, Npcap on Windows)
#[derive(Debug, Clone, Copy, Default)]
pub struct PnetLink;

impl LinkLayer for PnetLink {
    fn open(&self, interface: &InterfaceInfo, options: &CaptureOptions) -> Result<CaptureHandle> {
        let config = datalink::Config {
            read_timeout: Some(options.poll_interval),
            promiscuous: options.promiscuous,
            ..Default::default()
        };

        let (tx, rx) = match datalink::channel(&interface.pnet_interface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => return Err(Error::capture("Unsupported channel type")),
            Err(e) => {
                let error_msg = e.to_string();
                if e.kind() == ErrorKind::PermissionDenied
                    || error_msg.contains("permission")
                    || error_msg.contains("Npcap")
                {
                    return Err(Error::capture(format!(
                        "Failed to open {} for raw capture. Run as root or grant \
                         CAP_NET_RAW (on Windows install Npcap and run as Administrator). \
                         Original error: {}",
                        interface.name, e
                    )));
                }
                return Err(Error::capture(format!(
                    "Failed to open datalink channel on {}: {}",
                    interface.name, e
                )));
            }
        };

        tracing::debug!(
            "Opened capture on {} (promiscuous: {}, arp_only: {})",
            interface.name,
            options.promiscuous,
            options.arp_only
        );

        Ok(CaptureHandle {
            sender: Box::new(PnetSender { tx }),
            receiver: Box::new(PnetReceiver {
                rx,
                poll_interval: options.poll_interval,
                arp_only: options.arp_only,
            }),
        })
    }
}

struct PnetSender {
    tx: Box<dyn DataLinkSender>,
}

impl FrameSender for PnetSender {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        match self.tx.send_to(frame, None) {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(Error::transmit(format!("Failed to write frame: {}", e))),
            None => Err(Error::transmit("Send buffer unavailable")),
        }
    }
}

struct PnetReceiver {
    rx: Box<dyn DataLinkReceiver>,
    poll_interval: Duration,
    arp_only: bool,
}

impl FrameReceiver for PnetReceiver {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + self.poll_interval;

        loop {
            match self.rx.next() {
                Ok(frame) => {
                    if self.arp_only && !is_arp_frame(frame) {
                        if Instant::now() >= deadline {
                            return Ok(None);
                        }
                        continue;
                    }
                    return Ok(Some(frame.to_vec()));
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::capture(format!("Receive failed: {}", e))),
            }
        }
    }
}
