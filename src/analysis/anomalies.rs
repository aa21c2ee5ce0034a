//! Rule-based anomaly detection
//!
//! Three independent rules run on every record:
//! - broadcast storm: link-layer broadcasts per 1s window above a threshold
//! - unsecure protocol: plaintext destination ports, throttled per (source, port)
//! - possible DoS: packets per source per 1s window above a threshold
//!
//! Storm and DoS counters reset as soon as they alert, so a sustained flood
//! alerts once per window that crosses the threshold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::ring::BoundedLog;
use super::services::unsecure_protocol;
use crate::config::{
    ALERT_HISTORY_CAPACITY, BROADCAST_THRESHOLD, CLEANUP_INTERVAL, DATA_RETENTION, DOS_THRESHOLD,
    RATE_WINDOW, UNSECURE_COOLDOWN,
};
use crate::models::PacketRecord;
use crate::network::frames::BROADCAST_MAC;

/// Detector thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub broadcast_threshold: u32,
    pub dos_threshold: u32,
    pub unsecure_cooldown: Duration,
    pub cleanup_interval: Duration,
    pub data_retention: Duration,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            broadcast_threshold: BROADCAST_THRESHOLD,
            dos_threshold: DOS_THRESHOLD,
            unsecure_cooldown: UNSECURE_COOLDOWN,
            cleanup_interval: CLEANUP_INTERVAL,
            data_retention: DATA_RETENTION,
        }
    }
}

/// Which rule fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    BroadcastStorm,
    UnsecureProtocol,
    PossibleDos,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::BroadcastStorm => "BROADCAST_STORM",
            AlertKind::UnsecureProtocol => "UNSECURE_PROTOCOL",
            AlertKind::PossibleDos => "POSSIBLE_DOS",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected anomaly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    /// Offending source address, or "Network" for link-wide events
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    fn new(kind: AlertKind, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started: Instant,
    count: u32,
    last_seen: Instant,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            started: now,
            count: 0,
            last_seen: now,
        }
    }

    /// Count one event; returns the count if it crossed `threshold` (and resets).
    fn hit(&mut self, now: Instant, threshold: u32) -> Option<u32> {
        if now.saturating_duration_since(self.started) > RATE_WINDOW {
            self.started = now;
            self.count = 0;
        }
        self.last_seen = now;
        self.count = self.count.saturating_add(1);

        if self.count > threshold {
            let count = self.count;
            self.started = now;
            self.count = 0;
            Some(count)
        } else {
            None
        }
    }
}

struct DetectorInner {
    broadcast: Option<RateWindow>,
    unsecure_last_alert: HashMap<(IpAddr, u16), Instant>,
    source_windows: HashMap<IpAddr, RateWindow>,
    alerts: BoundedLog<Alert>,
    last_cleanup: Instant,
}

/// Thread-safe anomaly detector with bounded alert history
pub struct AnomalyDetector {
    config: AnomalyConfig,
    inner: Mutex<DetectorInner>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    /// Detector whose cleanup clock starts at `start`
    pub fn starting_at(config: AnomalyConfig, start: Instant) -> Self {
        Self {
            config,
            inner: Mutex::new(DetectorInner {
                broadcast: None,
                unsecure_last_alert: HashMap::new(),
                source_windows: HashMap::new(),
                alerts: BoundedLog::new(ALERT_HISTORY_CAPACITY),
                last_cleanup: start,
            }),
        }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, DetectorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn process(&self, record: &PacketRecord) {
        self.process_at(record, Instant::now());
    }

    /// [`process`](Self::process) against an explicit clock
    pub fn process_at(&self, record: &PacketRecord, now: Instant) {
        let mut inner = self.lock();

        self.detect_broadcast_storm(&mut inner, record, now);
        self.detect_unsecure_protocol(&mut inner, record, now);
        self.detect_dos(&mut inner, record, now);
        self.maybe_cleanup(&mut inner, now);
    }

    fn detect_broadcast_storm(&self, inner: &mut DetectorInner, record: &PacketRecord, now: Instant) {
        if record.eth_dst != Some(BROADCAST_MAC) {
            return;
        }

        let window = inner.broadcast.get_or_insert_with(|| RateWindow::new(now));
        if let Some(count) = window.hit(now, self.config.broadcast_threshold) {
            tracing::warn!("[ANOMALY] Broadcast storm: {} broadcasts in 1s", count);
            inner.alerts.push(Alert::new(
                AlertKind::BroadcastStorm,
                "Network",
                format!("Broadcast storm detected: {} broadcasts in 1 second", count),
            ));
        }
    }

    fn detect_unsecure_protocol(&self, inner: &mut DetectorInner, record: &PacketRecord, now: Instant) {
        let Some(protocol) = unsecure_protocol(record.dst_port) else {
            return;
        };
        let Some(src) = record.src_ip else {
            return;
        };

        let key = (src, record.dst_port);
        let throttled = inner
            .unsecure_last_alert
            .get(&key)
            .is_some_and(|last| now.saturating_duration_since(*last) <= self.config.unsecure_cooldown);
        if throttled {
            return;
        }

        inner.unsecure_last_alert.insert(key, now);
        tracing::debug!("[ANOMALY] Plaintext {} from {}", protocol, src);
        inner.alerts.push(Alert::new(
            AlertKind::UnsecureProtocol,
            src.to_string(),
            format!(
                "Plaintext {} traffic on port {} from {}",
                protocol, record.dst_port, src
            ),
        ));
    }

    fn detect_dos(&self, inner: &mut DetectorInner, record: &PacketRecord, now: Instant) {
        let Some(src) = record.src_ip else {
            return;
        };

        let window = inner
            .source_windows
            .entry(src)
            .or_insert_with(|| RateWindow::new(now));
        if let Some(count) = window.hit(now, self.config.dos_threshold) {
            tracing::warn!("[ANOMALY] High packet rate from {}: {} pps", src, count);
            inner.alerts.push(Alert::new(
                AlertKind::PossibleDos,
                src.to_string(),
                format!("High packet rate from {}: {} pps", src, count),
            ));
        }
    }

    fn maybe_cleanup(&self, inner: &mut DetectorInner, now: Instant) {
        if now.saturating_duration_since(inner.last_cleanup) < self.config.cleanup_interval {
            return;
        }
        inner.last_cleanup = now;

        let retention = self.config.data_retention;
        let before = inner.unsecure_last_alert.len() + inner.source_windows.len();

        inner
            .unsecure_last_alert
            .retain(|_, last| now.saturating_duration_since(*last) <= retention);
        inner
            .source_windows
            .retain(|_, window| now.saturating_duration_since(window.last_seen) <= retention);

        let after = inner.unsecure_last_alert.len() + inner.source_windows.len();
        if after < before {
            tracing::debug!("[ANOMALY] Cleanup purged {} idle entries", before - after);
        }
    }

    /// Up to `limit` most recent alerts, oldest first
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.lock().alerts.last_n(limit)
    }

    /// Live throttle and per-source window entries
    pub fn tracked_sources(&self) -> usize {
        let inner = self.lock();
        inner.unsecure_last_alert.len() + inner.source_windows.len()
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(AnomalyConfig::default())
    }
}
