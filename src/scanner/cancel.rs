//! Cancellation for blocking scans

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SCAN_CANCEL_CHECK;

/// Cloneable cancellation signal with an optional deadline.
///
/// Clones share the flag, so any clone can cancel the others.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that cancels itself once `timeout` has elapsed
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Clone that shares this token's flag but also expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Sleeps for `duration`, waking early on cancellation.
    ///
    /// Returns `false` if the token was cancelled before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }

        // an unrepresentable end means sleeping until cancelled
        let until = Instant::now().checked_add(duration);
        loop {
            let now = Instant::now();
            let remaining = match until {
                Some(until) if now >= until => return !self.is_cancelled(),
                Some(until) => until - now,
                None => SCAN_CANCEL_CHECK,
            };
            std::thread::sleep(remaining.min(SCAN_CANCEL_CHECK));
            if self.is_cancelled() {
                return false;
            }
        }
    }
}
