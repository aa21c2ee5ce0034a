//! Subnet-wide ARP host discovery
//!
//! A collector thread drains ARP replies while the calling thread walks the
//! subnet in ascending order, one request per address, spaced by the rate
//! limit. After the last probe the scan lingers for `idle_wait` to catch
//! stragglers, then stops and joins the collector.

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::cancel::CancelToken;
use crate::capture::{default_link, CaptureOptions, FrameReceiver, SharedLink};
use crate::config::{
    scan_idle_wait, scan_max_hosts, scan_rate_limit, SCAN_COLLECTOR_POLL, SCAN_IDLE_WAIT,
    SCAN_MAX_HOSTS, SCAN_MIN_HOSTS_CAP, SCAN_RATE_LIMIT,
};
use crate::error::{Error, Result};
use crate::models::{Host, InterfaceInfo};
use crate::network::frames::{build_arp_request, parse_arp_reply};
use crate::network::{local_subnet, probe_targets};

/// Discovery tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Delay between probes
    pub rate_limit: Duration,
    /// Grace period for late replies after the last probe
    pub idle_wait: Duration,
    /// Probe cap; zero or negative scans the whole subnet
    pub max_hosts: i64,
    /// Open the capture in promiscuous mode
    pub promiscuous: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            rate_limit: SCAN_RATE_LIMIT,
            idle_wait: SCAN_IDLE_WAIT,
            max_hosts: SCAN_MAX_HOSTS,
            promiscuous: true,
        }
    }
}

impl ScanConfig {
    /// Defaults overridden by `LANWATCH_SCAN_*` environment variables
    pub fn from_env() -> Self {
        Self {
            rate_limit: scan_rate_limit(),
            idle_wait: scan_idle_wait(),
            max_hosts: scan_max_hosts(),
            promiscuous: true,
        }
    }

    /// Zero durations take their defaults
    pub fn normalized(&self) -> Self {
        Self {
            rate_limit: if self.rate_limit.is_zero() {
                SCAN_RATE_LIMIT
            } else {
                self.rate_limit
            },
            idle_wait: if self.idle_wait.is_zero() {
                SCAN_IDLE_WAIT
            } else {
                self.idle_wait
            },
            max_hosts: self.max_hosts,
            promiscuous: self.promiscuous,
        }
    }

    /// Effective probe cap: `None` when uncapped, never below the 512 floor when capped
    pub fn probe_cap(&self) -> Option<usize> {
        if self.max_hosts <= 0 {
            return None;
        }
        let requested = usize::try_from(self.max_hosts).unwrap_or(usize::MAX);
        Some(requested.max(SCAN_MIN_HOSTS_CAP))
    }
}

type Discovered = Arc<Mutex<HashMap<Ipv4Addr, Host>>>;

/// ARP sweep over the local subnet
#[derive(Clone)]
pub struct HostScanner {
    link: SharedLink,
    collector_poll: Duration,
}

impl HostScanner {
    pub fn new(link: SharedLink) -> Self {
        Self {
            link,
            collector_poll: SCAN_COLLECTOR_POLL,
        }
    }

    /// Sweep the interface's subnet and return live hosts sorted by IP.
    ///
    /// Cancellation before the first probe fails with [`Error::Cancelled`];
    /// later cancellation returns whatever replies already arrived.
    pub fn scan(
        &self,
        interface: &InterfaceInfo,
        config: &ScanConfig,
        cancel: &CancelToken,
    ) -> Result<Vec<Host>> {
        let config = config.normalized();
        let subnet = local_subnet(interface)?;
        let scan_start = Instant::now();

        let options = CaptureOptions::arp(self.collector_poll, config.promiscuous);
        let (mut sender, receiver) = self.link.open(interface, &options)?.split();

        let discovered: Discovered = Arc::new(Mutex::new(HashMap::new()));
        let collector = Collector::spawn(receiver, subnet, interface.ip, Arc::clone(&discovered))?;

        let cap = config.probe_cap();
        tracing::info!(
            "ARP sweep of {} from {} (cap: {}, rate: {:?})",
            subnet,
            interface.ip,
            cap.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()),
            config.rate_limit
        );

        let mut sent = 0usize;
        let mut cancelled = false;

        for target in probe_targets(subnet, interface.ip) {
            if cap.is_some_and(|cap| sent >= cap) {
                tracing::info!("Probe cap of {} reached, stopping sweep", sent);
                break;
            }

            if !cancel.sleep(config.rate_limit) {
                cancelled = true;
                break;
            }

            match build_arp_request(interface.mac, interface.ip, target)
                .and_then(|frame| sender.send_frame(&frame))
            {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!("Probe to {} failed: {}", target, e),
            }
        }

        if cancelled && sent == 0 {
            collector.stop()?;
            return Err(Error::Cancelled);
        }

        if !cancelled {
            cancel.sleep(config.idle_wait);
        }

        collector.stop()?;

        let mut hosts: Vec<Host> = discovered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        hosts.sort_by_key(|host| host.ip);

        tracing::info!(
            "ARP sweep complete: {} probes, {} hosts in {:?}{}",
            sent,
            hosts.len(),
            scan_start.elapsed(),
            if cancelled { " (cancelled)" } else { "" }
        );

        Ok(hosts)
    }
}

/// Reply collector thread; owns the receive half of the scan's capture handle.
struct Collector {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Collector {
    fn spawn(
        mut receiver: Box<dyn FrameReceiver>,
        subnet: Ipv4Network,
        local_ip: Ipv4Addr,
        discovered: Discovered,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);

        let handle = std::thread::Builder::new()
            .name("arp-collector".to_string())
            .spawn(move || {
                while running_clone.load(Ordering::SeqCst) {
                    match receiver.next_frame() {
                        Ok(Some(frame)) => record_reply(&frame, &subnet, local_ip, &discovered),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!("ARP collector stopped early: {}", e);
                            break;
                        }
                    }
                }
            })
            .map_err(|e| Error::capture(format!("Failed to spawn ARP collector: {}", e)))?;

        Ok(Self { running, handle })
    }

    fn stop(self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.handle
            .join()
            .map_err(|_| Error::capture("ARP collector thread panicked"))
    }
}

fn record_reply(frame: &[u8], subnet: &Ipv4Network, local_ip: Ipv4Addr, discovered: &Discovered) {
    let Some(reply) = parse_arp_reply(frame) else {
        return;
    };

    if !subnet.contains(reply.sender_ip) || reply.sender_ip == local_ip {
        return;
    }

    let mut map = discovered.lock().unwrap_or_else(PoisonError::into_inner);
    map.entry(reply.sender_ip).or_insert_with(|| {
        tracing::debug!("[ARP] Found: {} -> {}", reply.sender_ip, reply.sender_mac);
        Host::new(reply.sender_ip, reply.sender_mac)
    });
}

/// Sweep `interface` on the real link, giving up after `deadline`.
pub fn discover_hosts(
    interface: &InterfaceInfo,
    config: &ScanConfig,
    deadline: Duration,
) -> Result<Vec<Host>> {
    let cancel = CancelToken::with_deadline(deadline);
    HostScanner::new(default_link()).scan(interface, config, &cancel)
}
