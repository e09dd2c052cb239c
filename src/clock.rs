//! Wall-clock timestamps and cancellable waits.
//!
//! Timestamps are epoch seconds. They are taken from one wall-clock reading at
//! start-up advanced by the tokio monotonic clock, so paused-time tests see
//! exact durations.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

/// Longest single wait, in seconds (one week). Longer requests are shortened to it.
pub const MAX_WAIT_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Epoch-seconds clock for log records
#[derive(Debug, Clone)]
pub struct SessionClock {
    epoch: f64,
    anchor: Instant,
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClock {
    /// Clock anchored at the current wall-clock time
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        Self {
            epoch: now.timestamp_micros() as f64 / 1e6,
            anchor: Instant::now(),
        }
    }

    /// Clock anchored at a fixed epoch time
    pub fn starting_at(epoch: f64) -> Self {
        Self {
            epoch,
            anchor: Instant::now(),
        }
    }

    /// Current time in epoch seconds
    pub fn now(&self) -> f64 {
        self.epoch + self.anchor.elapsed().as_secs_f64()
    }
}

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitOutcome {
    /// Ran for the full duration
    Completed,
    /// Cut short by a cancel signal after `elapsed` seconds
    Cancelled {
        /// Seconds waited before the signal
        elapsed: f64,
    },
}

impl WaitOutcome {
    /// Whether the wait was cut short
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitOutcome::Cancelled { .. })
    }
}

/// Sends the cancel signal. Cheap to clone; hand one to the Ctrl-C handler.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<u64>>,
}

impl CancelHandle {
    /// Interrupt whatever wait is in flight. Waits started later are unaffected.
    pub fn cancel(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

/// Source of cancellable waits
#[derive(Debug)]
pub struct Waiter {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Waiter {
    /// New waiter with no signal pending
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0u64);
        Self { tx: Arc::new(tx) }
    }

    /// Handle that interrupts this waiter's waits
    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.tx),
        }
    }

    /// Sleep for `seconds`, returning early if cancelled.
    ///
    /// Zero, negative and non-finite durations return at once. Durations above
    /// [`MAX_WAIT_SECS`] are clamped to it and reported.
    pub async fn wait(&self, seconds: f64) -> WaitOutcome {
        if !seconds.is_finite() || seconds <= 0.0 {
            return WaitOutcome::Completed;
        }
        if seconds > MAX_WAIT_SECS {
            warn!(requested = seconds, max = MAX_WAIT_SECS, "Wait too long. Clamping");
        }
        let Ok(duration) = Duration::try_from_secs_f64(seconds.min(MAX_WAIT_SECS)) else {
            return WaitOutcome::Completed;
        };
        let mut rx = self.tx.subscribe();
        let started = Instant::now();

        tokio::select! {
            _ = tokio::time::sleep(duration) => WaitOutcome::Completed,
            changed = rx.changed() => {
                if changed.is_err() {
                    // Sender gone: nothing can cancel us any more
                    tokio::time::sleep_until(started + duration).await;
                    return WaitOutcome::Completed;
                }
                let elapsed = started.elapsed().as_secs_f64();
                info!(elapsed, requested = seconds, "Wait cancelled");
                WaitOutcome::Cancelled { elapsed }
            }
        }
    }
}
