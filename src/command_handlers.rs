use anyhow::{Context, Result};
use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::task::JoinHandle;

use crate::app::{AppContext, AppEvent};
use crate::config::resolve_timeout;
use crate::feed::{read_records, record_channel, DissectorCommand, DissectorFeed};
use crate::models::{Host, InterfaceInfo};
use crate::monitor::{TrafficMonitor, TrafficSnapshot};
use crate::network::{
    find_interface_by_name, find_valid_interface, ip_forwarding_enabled, list_valid_interfaces,
    local_subnet,
};
use crate::scanner::{ArpResolver, HostScanner, ScanConfig};
use crate::spoofer::{MitmEngine, SpoofSession};

/// How often long-running commands re-check cancellation and deadlines
const COMMAND_POLL: Duration = Duration::from_millis(100);

/// Longest the monitor waits for buffered records after the feed stops
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanReport {
    pub interface_name: String,
    pub local_ip: Ipv4Addr,
    pub local_mac: MacAddr,
    pub subnet: String,
    pub hosts: Vec<Host>,
    pub total_hosts: usize,
    pub scan_duration_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveReport {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub interface_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MitmReport {
    pub session: SpoofSession,
    /// Filter handed to the dissector, absent with `--no-capture`
    pub capture_filter: Option<String>,
    pub duration_ms: u64,
    pub final_snapshot: Option<TrafficSnapshot>,
}

enum FeedSource {
    Dissector(DissectorCommand),
    Replay(Box<dyn AsyncBufRead + Send + Unpin>),
}

enum RunningFeed {
    Live(DissectorFeed),
    Replay(JoinHandle<u64>),
}

pub(crate) fn collect_interfaces() -> Vec<String> {
    list_valid_interfaces()
        .into_iter()
        .map(|interface| {
            format!(
                "{}  {}/{}  {}",
                interface.name, interface.ip, interface.prefix_len, interface.mac
            )
        })
        .collect()
}

pub(crate) async fn scan_report(
    interface: Option<String>,
    max_hosts: Option<i64>,
    timeout_secs: u64,
    context: &AppContext,
) -> Result<ScanReport> {
    let interface = select_interface(interface, context)?;
    let subnet = local_subnet(&interface)?;

    let mut config = ScanConfig::from_env();
    if let Some(cap) = max_hosts {
        config.max_hosts = cap;
    }

    ensure_not_cancelled(context, "scan setup")?;
    crate::log_stderr!(
        "[SCAN] Sweeping {} on {} (cap: {:?}, deadline: {}s)",
        subnet,
        interface.name,
        config.normalized().probe_cap(),
        timeout_secs
    );

    let started = Instant::now();
    let cancel = context
        .cancel_token()
        .with_timeout(Duration::from_secs(timeout_secs));
    let scanner = HostScanner::new(context.link());
    let scanned = tokio::task::spawn_blocking({
        let interface = interface.clone();
        move || scanner.scan(&interface, &config, &cancel)
    })
    .await
    .context("Host discovery task failed")?;

    let hosts = match scanned {
        Ok(hosts) => hosts,
        Err(e) if e.is_cancelled() => {
            context.emit_event(AppEvent::Cancelled {
                stage: "scan".to_string(),
            });
            return Err(e).context("Scan aborted before any probe was sent");
        }
        Err(e) => return Err(e.into()),
    };

    let scan_duration = started.elapsed();
    crate::log_stderr!(
        "[SCAN] {} hosts answered in {:.2}s",
        hosts.len(),
        scan_duration.as_secs_f64()
    );

    Ok(ScanReport {
        interface_name: interface.name.clone(),
        local_ip: interface.ip,
        local_mac: interface.mac,
        subnet: subnet.to_string(),
        total_hosts: hosts.len(),
        hosts,
        scan_duration_ms: scan_duration.as_millis() as u64,
    })
}

pub(crate) async fn resolve_report(
    ip: Ipv4Addr,
    interface: Option<String>,
    context: &AppContext,
) -> Result<ResolveReport> {
    let interface = select_interface(interface, context)?;
    ensure_not_cancelled(context, "resolve")?;

    let resolver = ArpResolver::new(context.link());
    let mac = tokio::task::spawn_blocking({
        let interface = interface.clone();
        move || resolver.resolve(ip, &interface, resolve_timeout())
    })
    .await
    .context("ARP resolve task failed")??;

    Ok(ResolveReport {
        ip,
        mac,
        interface_name: interface.name,
    })
}

pub(crate) async fn mitm_report(
    target: Ipv4Addr,
    gateway: Ipv4Addr,
    interface: Option<String>,
    duration_secs: Option<u64>,
    capture: bool,
    interval_secs: u64,
    context: &AppContext,
) -> Result<MitmReport> {
    let interface = select_interface(interface, context)?;

    if ip_forwarding_enabled() == Some(false) {
        context.emit_event(AppEvent::Warn {
            message: "IP forwarding is disabled; intercepted traffic will not reach its destination"
                .to_string(),
        });
    }
    ensure_not_cancelled(context, "mitm setup")?;

    crate::log_stderr!(
        "[MITM] Intercepting {} <-> {} on {}",
        target,
        gateway,
        interface.name
    );

    let link = context.link();
    let mut engine = tokio::task::spawn_blocking({
        let interface = interface.clone();
        move || -> crate::Result<MitmEngine> {
            let mut engine = MitmEngine::with_link(link);
            engine.initialize(target, gateway, &interface)?;
            engine.start()?;
            Ok(engine)
        }
    })
    .await
    .context("MITM setup task failed")??;

    let session = engine
        .session()
        .cloned()
        .context("MITM engine started without a session")?;
    let filter = session.monitor_filter();

    let started = Instant::now();
    let deadline = duration_secs.map(|secs| started + Duration::from_secs(secs));

    let monitored = if capture {
        let command = DissectorCommand::new(Some(interface.name.clone()))
            .with_capture_filter(filter.clone());
        run_traffic_monitor(
            FeedSource::Dissector(command),
            Duration::from_secs(interval_secs),
            deadline,
            None,
            context,
        )
        .await
        .map(Some)
    } else {
        wait_until(deadline, context).await;
        Ok(None)
    };

    // restore the caches even when monitoring failed
    if let Err(e) = tokio::task::spawn_blocking(move || engine.stop()).await {
        crate::log_error!("[MITM] Stop task failed, ARP caches may stay poisoned: {}", e);
    }
    let final_snapshot = monitored?;

    Ok(MitmReport {
        session,
        capture_filter: capture.then_some(filter),
        duration_ms: started.elapsed().as_millis() as u64,
        final_snapshot,
    })
}

pub(crate) async fn monitor_report(
    interface: Option<String>,
    replay: Option<PathBuf>,
    filter: Option<String>,
    interval_secs: u64,
    reports: Option<u32>,
    context: &AppContext,
) -> Result<TrafficSnapshot> {
    let source = match replay {
        Some(path) => {
            crate::log_stderr!("[MONITOR] Replaying records from {}", path.display());
            FeedSource::Replay(open_replay(&path).await?)
        }
        None => {
            let interface = select_interface(interface, context)?;
            let mut command = DissectorCommand::new(Some(interface.name));
            if let Some(filter) = filter {
                command = command.with_capture_filter(filter);
            }
            FeedSource::Dissector(command)
        }
    };

    run_traffic_monitor(
        source,
        Duration::from_secs(interval_secs),
        None,
        reports,
        context,
    )
    .await
}

async fn open_replay(path: &Path) -> Result<Box<dyn AsyncBufRead + Send + Unpin>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open replay file {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Feed records into a fresh monitor, emitting one JSON snapshot per interval.
///
/// Stops on cancellation, at `deadline`, after `reports` snapshots, or when the
/// feed runs dry. Returns the snapshot taken after the feed is drained.
async fn run_traffic_monitor(
    source: FeedSource,
    interval: Duration,
    deadline: Option<Instant>,
    reports: Option<u32>,
    context: &AppContext,
) -> Result<TrafficSnapshot> {
    let monitor = TrafficMonitor::default();
    let (tx, rx) = record_channel();
    let mut consumer = monitor.start(rx);

    let feed = match source {
        FeedSource::Dissector(command) => match command.spawn(tx) {
            Ok(feed) => RunningFeed::Live(feed),
            Err(e) => {
                monitor.stop();
                return Err(e).context("Failed to start packet dissector");
            }
        },
        FeedSource::Replay(reader) => RunningFeed::Replay(tokio::spawn(read_records(reader, tx))),
    };

    let mut next_report = Instant::now() + interval;
    let mut emitted = 0u32;
    loop {
        if context.is_cancelled() {
            context.emit_event(AppEvent::Cancelled {
                stage: "monitor".to_string(),
            });
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if consumer.is_finished() {
            if matches!(feed, RunningFeed::Live(_)) {
                context.emit_event(AppEvent::Warn {
                    message: "Packet dissector exited early".to_string(),
                });
            }
            break;
        }

        if Instant::now() >= next_report {
            let snapshot = monitor.snapshot();
            context.emit_line(
                &serde_json::to_string(&snapshot).context("Failed to serialize traffic snapshot")?,
            );
            emitted += 1;
            next_report += interval;
            if reports.is_some_and(|limit| emitted >= limit) {
                break;
            }
        }

        tokio::time::sleep(COMMAND_POLL).await;
    }

    match feed {
        RunningFeed::Live(feed) => {
            let forwarded = feed.shutdown().await;
            crate::log_debug!("[MONITOR] Dissector forwarded {} records", forwarded);
        }
        RunningFeed::Replay(reader) => reader.abort(),
    }

    let processed = match tokio::time::timeout(DRAIN_TIMEOUT, &mut consumer).await {
        Ok(Ok(processed)) => processed,
        Ok(Err(e)) => {
            crate::log_warn!("[MONITOR] Consumer task failed: {}", e);
            0
        }
        Err(_) => {
            monitor.stop();
            consumer.await.unwrap_or(0)
        }
    };
    crate::log_stderr!("[MONITOR] Processed {} records", processed);

    Ok(monitor.snapshot())
}

async fn wait_until(deadline: Option<Instant>, context: &AppContext) {
    loop {
        if context.is_cancelled() {
            context.emit_event(AppEvent::Cancelled {
                stage: "mitm".to_string(),
            });
            return;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return;
        }
        tokio::time::sleep(COMMAND_POLL).await;
    }
}

fn select_interface(interface: Option<String>, context: &AppContext) -> Result<InterfaceInfo> {
    if let Some(fixed) = context.interface_override() {
        if interface.as_deref().is_some_and(|name| name != fixed.name) {
            return Err(anyhow::anyhow!(
                "Interface '{}' is not available in this context (bound to '{}')",
                interface.unwrap_or_default(),
                fixed.name
            ));
        }
        return Ok(fixed.clone());
    }

    match interface {
        Some(name) => {
            crate::log_stderr!("Using requested interface: {}", name);
            Ok(find_interface_by_name(&name)?)
        }
        None => {
            crate::log_stderr!("Detecting network interfaces...");
            Ok(find_valid_interface()?)
        }
    }
}

fn ensure_not_cancelled(context: &AppContext, stage: &str) -> Result<()> {
    if context.is_cancelled() {
        context.emit_event(AppEvent::Cancelled {
            stage: stage.to_string(),
        });
        return Err(anyhow::anyhow!("Operation cancelled during {}", stage));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MemoryLink;
    use std::sync::{Arc, Mutex};

    fn iface() -> InterfaceInfo {
        InterfaceInfo::detached(
            "mem0",
            Ipv4Addr::new(192, 168, 50, 10),
            MacAddr::new(0x02, 0, 0, 0, 0, 0x10),
            24,
        )
    }

    #[test]
    fn select_interface_prefers_context_override() {
        let context = AppContext::from_env().with_interface(iface());
        let selected = select_interface(None, &context).expect("override should be used");
        assert_eq!(selected.name, "mem0");

        let err = select_interface(Some("eth9".to_string()), &context)
            .expect_err("mismatched name should fail");
        assert!(err.to_string().contains("eth9"));
    }

    #[test]
    fn ensure_not_cancelled_reports_stage() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let context = AppContext::from_env().with_event_hook(Arc::new(move |event: &AppEvent| {
            sink.lock().unwrap().push(event.clone());
        }));

        assert!(ensure_not_cancelled(&context, "scan").is_ok());
        context.cancel();
        assert!(ensure_not_cancelled(&context, "scan").is_err());
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[AppEvent::Cancelled {
                stage: "scan".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn resolve_report_uses_context_link() {
        let neighbour = MacAddr::new(0x02, 0, 0, 0, 0, 0x01);
        let link = Arc::new(MemoryLink::new().with_neighbour(Ipv4Addr::new(192, 168, 50, 1), neighbour));
        let context = AppContext::from_env()
            .with_link(link.clone())
            .with_interface(iface());

        let report = resolve_report(Ipv4Addr::new(192, 168, 50, 1), None, &context)
            .await
            .expect("neighbour should answer");
        assert_eq!(report.mac, neighbour);
        assert_eq!(report.interface_name, "mem0");
        assert_eq!(link.sent_arp().len(), 1);
    }

    #[tokio::test]
    async fn replay_monitor_ends_when_feed_runs_dry() {
        let lines = [
            r#"{"index":{"_index":"packets"}}"#,
            r#"{"timestamp":"1700000000000","layers":{"ip_src":["10.0.0.5"],"ip_dst":["10.0.0.1"],"frame_len":["900"],"tcp_srcport":["50000"],"tcp_dstport":["443"],"tls_handshake_extensions_server_name":["example.org"]}}"#,
            r#"{"timestamp":"1700000000001","layers":{"ip_src":["10.0.0.6"],"frame_len":["100"],"udp_srcport":["5353"],"udp_dstport":["53"]}}"#,
        ];
        let reader: Box<dyn AsyncBufRead + Send + Unpin> =
            Box::new(BufReader::new(std::io::Cursor::new(lines.join("\n").into_bytes())));
        let context = AppContext::from_env();

        let snapshot = run_traffic_monitor(
            FeedSource::Replay(reader),
            Duration::from_secs(60),
            None,
            None,
            &context,
        )
        .await
        .expect("replay should succeed");

        assert_eq!(snapshot.total_packets, 2);
        assert_eq!(snapshot.total_bytes, 1000);
        assert_eq!(snapshot.top_talkers[0].bytes, 900);
        assert_eq!(snapshot.domains.len(), 1);
        assert_eq!(snapshot.domains[0].hostname, "example.org");
    }
}
