//! Wall-clock anchored epoch scheduling.
//!
//! Epoch `n` begins at `start_time + n * duration` in absolute unix time, so
//! nodes started independently (but with the same start time) stay in
//! lock-step. A deadline that has already passed is reported as an error
//! rather than skipped.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Error)]
pub enum EpochError {
    #[error("Start time {start_time:.3} is already over (now {now:.3})")]
    StartElapsed { start_time: f64, now: f64 },

    #[error("Start time {0} is not a schedulable unix time")]
    StartOutOfRange(f64),

    #[error("Epoch clock already started")]
    AlreadyStarted,

    #[error("Epoch clock has not been started")]
    NotStarted,

    #[error("Already {late_by:?} past the start of epoch {epoch}")]
    DeadlineMissed { epoch: u64, late_by: Duration },
}

/// Parameters of the epoch clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSettings {
    /// Unix time of epoch 0; 0 means "when `start()` is called"
    pub start_time: f64,
    /// Number of epochs in the run
    pub max_epoch: u64,
    /// Length of one epoch
    pub duration: Duration,
}

/// Result of waiting for the next epoch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The boundary of this epoch was reached
    Epoch(u64),
    /// The clock was stopped; no further exchanges should start
    Stopped,
}

/// Round scheduler shared by both roles.
pub struct EpochController {
    settings: EpochSettings,
    /// Resolved start time, set once by `start()`
    anchor: OnceLock<f64>,
    epoch: AtomicU64,
    stopped: AtomicBool,
    stop_signal: Notify,
}

impl EpochController {
    pub fn new(settings: EpochSettings) -> Self {
        Self {
            settings,
            anchor: OnceLock::new(),
            epoch: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            stop_signal: Notify::new(),
        }
    }

    pub fn settings(&self) -> &EpochSettings {
        &self.settings
    }

    /// Wait for the configured start time.
    ///
    /// A start time of zero starts immediately. A start time in the past is a
    /// misconfiguration and fails.
    pub async fn start(&self) -> Result<(), EpochError> {
        if self.anchor.get().is_some() {
            return Err(EpochError::AlreadyStarted);
        }

        let now = unix_now();
        let anchor = if self.settings.start_time == 0.0 {
            now
        } else {
            let start_time = self.settings.start_time;
            let wait = start_time - now;
            if wait <= 0.0 {
                return Err(EpochError::StartElapsed { start_time, now });
            }
            let wait = Duration::try_from_secs_f64(wait)
                .map_err(|_| EpochError::StartOutOfRange(start_time))?;
            info!("Waiting {:.3}s for experiment start", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
            self.settings.start_time
        };

        self.anchor
            .set(anchor)
            .map_err(|_| EpochError::AlreadyStarted)?;
        info!(
            "Epoch clock started at {:.3} ({} epochs of {:?})",
            anchor, self.settings.max_epoch, self.settings.duration
        );
        Ok(())
    }

    /// Start time resolved by `start()`, if started.
    pub fn start_time(&self) -> Option<f64> {
        self.anchor.get().copied()
    }

    /// Advance the counter and wait for that epoch's boundary.
    ///
    /// The counter moves forward even when the boundary has already passed;
    /// the missed deadline is then returned as an error.
    pub async fn next_epoch(&self) -> Result<Tick, EpochError> {
        let anchor = *self.anchor.get().ok_or(EpochError::NotStarted)?;
        let max = self.settings.max_epoch;

        let epoch = match self
            .epoch
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |e| {
                (e < max).then(|| e + 1)
            }) {
            Ok(previous) => previous + 1,
            Err(_) => return Ok(Tick::Stopped),
        };

        let deadline = anchor + epoch as f64 * self.settings.duration.as_secs_f64();
        let wait = deadline - unix_now();
        debug!("Next epoch: {} (sleeping for {:.3}s)", epoch, wait);
        if wait <= 0.0 {
            return Err(EpochError::DeadlineMissed {
                epoch,
                late_by: Duration::from_secs_f64(-wait),
            });
        }

        // Register before checking the flag so a concurrent stop() is not missed
        let stopped = self.stop_signal.notified();
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(Tick::Stopped);
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(wait)) => Ok(Tick::Epoch(epoch)),
            _ = stopped => Ok(Tick::Stopped),
        }
    }

    /// Current epoch counter.
    pub fn current(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn last_epoch_reached(&self) -> bool {
        self.current() >= self.settings.max_epoch
    }

    /// End the run early: raise the counter to max and wake boundary waits.
    ///
    /// Idempotent. Never moves the counter backwards.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("Stopping epoch clock at epoch {}", self.current());
        }
        self.epoch.fetch_max(self.settings.max_epoch, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Unix time at which the last epoch's window closes.
    pub fn end_time(&self) -> Option<f64> {
        let anchor = self.start_time()?;
        let windows = self.settings.max_epoch.saturating_add(1) as f64;
        Some(anchor + windows * self.settings.duration.as_secs_f64())
    }

    /// Whether the last epoch's window, extended by `grace`, is over.
    ///
    /// False until the clock has started.
    pub fn final_window_elapsed(&self, grace: Duration) -> bool {
        self.end_time()
            .is_some_and(|end| unix_now() >= end + grace.as_secs_f64())
    }

    /// Upper bound for the random delay before an outbound dial.
    pub fn max_jitter(&self) -> Duration {
        self.settings.duration / 10
    }
}
