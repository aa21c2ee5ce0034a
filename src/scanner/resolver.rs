//! Single-target MAC resolution

use pnet::util::MacAddr;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::capture::{default_link, CaptureOptions, SharedLink};
use crate::config::{resolve_timeout, RESOLVE_POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::models::InterfaceInfo;
use crate::network::frames::{build_arp_request, parse_arp_reply};

/// Resolves one IPv4 address to a MAC with a broadcast ARP request.
#[derive(Clone)]
pub struct ArpResolver {
    link: SharedLink,
    poll_interval: Duration,
}

impl ArpResolver {
    pub fn new(link: SharedLink) -> Self {
        Self {
            link,
            poll_interval: RESOLVE_POLL_INTERVAL,
        }
    }

    /// Override the receive poll increment
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Broadcast one "who has `target_ip`" and wait up to `deadline` for the answer.
    ///
    /// Exactly one frame is transmitted. Replies from other hosts and any
    /// non-reply ARP traffic are ignored.
    pub fn resolve(
        &self,
        target_ip: Ipv4Addr,
        interface: &InterfaceInfo,
        deadline: Duration,
    ) -> Result<MacAddr> {
        if target_ip.is_unspecified() || target_ip.is_broadcast() {
            return Err(Error::configuration(format!(
                "Cannot resolve special address {}",
                target_ip
            )));
        }

        let options = CaptureOptions::arp(self.poll_interval, true);
        let (mut sender, mut receiver) = self.link.open(interface, &options)?.split();

        let request = build_arp_request(interface.mac, interface.ip, target_ip)?;
        sender.send_frame(&request)?;
        tracing::debug!("[ARP] who-has {} tell {} ({})", target_ip, interface.ip, interface.name);

        let start = Instant::now();
        while start.elapsed() < deadline {
            let Some(frame) = receiver.next_frame()? else {
                continue;
            };

            if let Some(reply) = parse_arp_reply(&frame) {
                if reply.sender_ip == target_ip {
                    tracing::debug!(
                        "[ARP] {} is-at {} ({:?})",
                        target_ip,
                        reply.sender_mac,
                        start.elapsed()
                    );
                    return Ok(reply.sender_mac);
                }
            }
        }

        Err(Error::ResolutionTimeout {
            ip: target_ip,
            timeout: deadline,
        })
    }
}

/// Resolve `target_ip` on the real interface with the configured deadline.
pub fn resolve_mac(target_ip: Ipv4Addr, interface: &InterfaceInfo) -> Result<MacAddr> {
    ArpResolver::new(default_link()).resolve(target_ip, interface, resolve_timeout())
}
