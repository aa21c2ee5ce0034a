//! Background traffic monitor
//!
//! Drains the record channel on a tokio task and hands every record, in
//! arrival order, to the aggregator and then the detector.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events::{MonitoringStatus, TrafficSnapshot};
use crate::analysis::{AnomalyConfig, AnomalyDetector, TrafficStats};
use crate::config::{SNAPSHOT_ALERTS, SNAPSHOT_TOP_TALKERS};
use crate::models::PacketRecord;

/// How often an idle monitor re-checks its stop flag
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Traffic monitor owning one aggregator and one detector
pub struct TrafficMonitor {
    stats: Arc<TrafficStats>,
    detector: Arc<AnomalyDetector>,
    is_running: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
}

impl TrafficMonitor {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            stats: Arc::new(TrafficStats::new()),
            detector: Arc::new(AnomalyDetector::new(config)),
            is_running: Arc::new(AtomicBool::new(false)),
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn stats(&self) -> Arc<TrafficStats> {
        Arc::clone(&self.stats)
    }

    pub fn detector(&self) -> Arc<AnomalyDetector> {
        Arc::clone(&self.detector)
    }

    /// Consume `rx` until it closes or [`stop`](Self::stop) is called.
    ///
    /// The task resolves to the number of records it processed.
    pub fn start(&self, mut rx: mpsc::Receiver<PacketRecord>) -> JoinHandle<u64> {
        self.is_running.store(true, Ordering::SeqCst);

        let stats = Arc::clone(&self.stats);
        let detector = Arc::clone(&self.detector);
        let is_running = Arc::clone(&self.is_running);
        let processed = Arc::clone(&self.processed);

        tokio::spawn(async move {
            tracing::info!("[MONITOR] Traffic monitoring started");
            let mut handled = 0u64;

            while is_running.load(Ordering::SeqCst) {
                let record = match tokio::time::timeout(STOP_CHECK_INTERVAL, rx.recv()).await {
                    Ok(Some(record)) => record,
                    Ok(None) => break,
                    Err(_) => continue,
                };

                stats.process(&record);
                detector.process(&record);
                handled += 1;
                processed.fetch_add(1, Ordering::SeqCst);
            }

            is_running.store(false, Ordering::SeqCst);
            tracing::info!("[MONITOR] Traffic monitoring stopped after {} records", handled);
            handled
        })
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> MonitoringStatus {
        MonitoringStatus {
            is_running: self.is_running(),
            records_processed: self.processed.load(Ordering::SeqCst),
        }
    }

    /// Sample rates (resetting the rate window) and copy everything else.
    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            timestamp: Utc::now(),
            rates: self.stats.rates(),
            total_bytes: self.stats.total_bytes(),
            total_packets: self.stats.total_packets(),
            top_talkers: self.stats.top_talkers(SNAPSHOT_TOP_TALKERS),
            protocols: self.stats.protocol_breakdown(),
            domains: self.stats.domain_log(),
            alerts: self.detector.recent_alerts(SNAPSHOT_ALERTS),
        }
    }
}

impl Default for TrafficMonitor {
    fn default() -> Self {
        Self::new(AnomalyConfig::default())
    }
}
