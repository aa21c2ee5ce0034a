//! Configuration constants for lanwatch
//!
//! Compile-time defaults plus env-tunable accessors. Every accessor clamps
//! to a sane range so a bad environment can't stall a scan or flood a link.

use std::time::Duration;

// ====== ARP Resolution ======

/// Deadline for a single-target MAC lookup
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(3);

/// Receive poll increment while waiting for an ARP reply
pub const RESOLVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ====== Host Discovery ======

/// Delay between ARP probes
pub const SCAN_RATE_LIMIT: Duration = Duration::from_micros(50);

/// Grace period for late replies after the last probe
pub const SCAN_IDLE_WAIT: Duration = Duration::from_millis(500);

/// Default probe cap for large subnets
pub const SCAN_MAX_HOSTS: i64 = 4096;

/// Lowest cap accepted when a cap is set at all
pub const SCAN_MIN_HOSTS_CAP: usize = 512;

/// Collector receive poll increment
pub const SCAN_COLLECTOR_POLL: Duration = Duration::from_millis(50);

/// Granularity of cancellable sleeps during discovery
pub const SCAN_CANCEL_CHECK: Duration = Duration::from_millis(10);

/// Default overall deadline for `discover_hosts` from the CLI
pub const SCAN_DEADLINE: Duration = Duration::from_secs(10);

// ====== ARP Spoofing ======

/// Interval between poisoning rounds
pub const SPOOF_INTERVAL: Duration = Duration::from_secs(2);

/// Number of restoration rounds sent on stop
pub const RESTORE_ROUNDS: usize = 3;

/// Gap between restoration rounds
pub const RESTORE_GAP: Duration = Duration::from_millis(100);

// ====== Traffic Analytics ======

/// Domain log capacity
pub const DOMAIN_LOG_CAPACITY: usize = 50;

/// Alert history capacity
pub const ALERT_HISTORY_CAPACITY: usize = 20;

/// Broadcasts per second above which a storm alert fires
pub const BROADCAST_THRESHOLD: u32 = 50;

/// Packets per second from one source above which a DoS alert fires
pub const DOS_THRESHOLD: u32 = 500;

/// Minimum gap between unsecure-protocol alerts for one (source, port)
pub const UNSECURE_COOLDOWN: Duration = Duration::from_secs(10);

/// Minimum gap between detector cleanup passes
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Tracking entries idle longer than this are purged
pub const DATA_RETENTION: Duration = Duration::from_secs(300);

/// Rate window for broadcast and DoS counters
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

// ====== Packet Feed ======

/// Capacity of the record channel between the dissector and analytics
pub const FEED_CHANNEL_CAPACITY: usize = 1000;

/// Dissector executable
pub const TSHARK_PATH: &str = "tshark";

/// Default interval between monitor snapshots (seconds)
pub const DEFAULT_REPORT_INTERVAL: u64 = 2;

/// Number of top talkers in a snapshot
pub const SNAPSHOT_TOP_TALKERS: usize = 10;

/// Number of alerts in a snapshot
pub const SNAPSHOT_ALERTS: usize = 5;

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    match env_var(name).and_then(|v| v.parse::<u64>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_i64(name: &str, default: i64, min: i64, max: i64) -> i64 {
    match env_var(name).and_then(|v| v.parse::<i64>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_usize(name: &str, default: usize, min: usize, max: usize) -> usize {
    match env_var(name).and_then(|v| v.parse::<usize>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

/// Runtime-tunable MAC lookup deadline.
/// Env: `LANWATCH_RESOLVE_TIMEOUT_MS`
pub fn resolve_timeout() -> Duration {
    Duration::from_millis(env_parse_u64(
        "LANWATCH_RESOLVE_TIMEOUT_MS",
        RESOLVE_TIMEOUT.as_millis() as u64,
        100,
        30_000,
    ))
}

/// Runtime-tunable probe spacing.
/// Env: `LANWATCH_SCAN_RATE_US`
pub fn scan_rate_limit() -> Duration {
    Duration::from_micros(env_parse_u64(
        "LANWATCH_SCAN_RATE_US",
        SCAN_RATE_LIMIT.as_micros() as u64,
        1,
        1_000_000,
    ))
}

/// Runtime-tunable post-probe grace period.
/// Env: `LANWATCH_SCAN_IDLE_MS`
pub fn scan_idle_wait() -> Duration {
    Duration::from_millis(env_parse_u64(
        "LANWATCH_SCAN_IDLE_MS",
        SCAN_IDLE_WAIT.as_millis() as u64,
        10,
        30_000,
    ))
}

/// Runtime-tunable probe cap (0 or negative disables the cap).
/// Env: `LANWATCH_SCAN_MAX_HOSTS`
pub fn scan_max_hosts() -> i64 {
    env_parse_i64("LANWATCH_SCAN_MAX_HOSTS", SCAN_MAX_HOSTS, -1, 1 << 24)
}

/// Runtime-tunable record channel capacity.
/// Env: `LANWATCH_FEED_CHANNEL_CAPACITY`
pub fn feed_channel_capacity() -> usize {
    env_parse_usize(
        "LANWATCH_FEED_CHANNEL_CAPACITY",
        FEED_CHANNEL_CAPACITY,
        16,
        1_000_000,
    )
}

/// Runtime-tunable dissector path.
/// Env: `LANWATCH_TSHARK_PATH`
pub fn tshark_path() -> String {
    env_var("LANWATCH_TSHARK_PATH").unwrap_or_else(|| TSHARK_PATH.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_clamps_to_range() {
        std::env::set_var("LANWATCH_TEST_CLAMP", "999999");
        assert_eq!(env_parse_u64("LANWATCH_TEST_CLAMP", 5, 1, 100), 100);
        std::env::remove_var("LANWATCH_TEST_CLAMP");
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("LANWATCH_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_parse_i64("LANWATCH_TEST_GARBAGE", 42, -1, 100), 42);
        std::env::remove_var("LANWATCH_TEST_GARBAGE");
    }

    #[test]
    fn test_unset_env_uses_default() {
        assert_eq!(
            env_parse_usize("LANWATCH_TEST_DEFINITELY_UNSET", 7, 1, 10),
            7
        );
    }
}
