//! Freshness policy for prewarmed threads.
//!
//! A prewarmed thread is only handed out while it is younger than
//! [`PREWARM_TTL_SECS`]. An entry whose creation time has not been reported
//! yet is always fresh.

use std::sync::Arc;

use parking_lot::Mutex;

/// Maximum age of a prewarmed thread before it is discarded (4.75 minutes).
pub const PREWARM_TTL_SECS: f64 = 4.75 * 60.0;

/// Check whether a thread created at `created_at_seconds` is still fresh at `now_seconds`.
///
/// `None` means the producer has not reported a creation time yet.
pub fn is_fresh(created_at_seconds: Option<i64>, now_seconds: f64) -> bool {
    match created_at_seconds {
        None => true,
        Some(created) => now_seconds - (created as f64) < PREWARM_TTL_SECS,
    }
}

/// Source of wall-clock time in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in (fractional) seconds since the epoch.
    fn now_seconds(&self) -> f64;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

/// Manually driven clock.
///
/// Clones share the same underlying time, so a test can hold one handle and
/// hand another to the cache.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    /// Create a clock frozen at `now_seconds`.
    pub fn new(now_seconds: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(now_seconds)),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_seconds: f64) {
        *self.now.lock() = now_seconds;
    }

    /// Move the clock forward.
    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }
}

impl Clock for ManualClock {
    fn now_seconds(&self) -> f64 {
        *self.now.lock()
    }
}
