//! Gossip roles and the loop that drives them.
//!
//! A node runs two roles concurrently: the active role dials a random
//! neighbour once per epoch, the passive role answers inbound exchanges.
//! Both implement [`GossipRole`], a single exchange step, and are driven by a
//! [`RoleRunner`] which owns the loop, the "lock owed" slot, the error budget
//! and the backoff between failed rounds.

mod active;
mod passive;

pub use active::ActiveRole;
pub use passive::PassiveRole;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::epoch::{EpochController, EpochError};
use crate::state::{StateLease, StateStore};
use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Active,
    Passive,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Active => write!(f, "active"),
            RoleKind::Passive => write!(f, "passive"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RoundError {
    #[error(transparent)]
    Epoch(#[from] EpochError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("No neighbours to exchange with")]
    NoNeighbours,

    #[error("State lock was released before the exchange completed")]
    LeaseLost,
}

impl RoundError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RoundError::Transport(e) if e.is_timeout())
    }
}

/// How one call to [`GossipRole::round`] ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoundOutcome {
    /// An exchange completed; carries the new local estimate
    Exchanged(f64),
    /// The epoch clock was stopped before an exchange began
    Stopped,
}

/// One side of the gossip protocol.
#[async_trait]
pub trait GossipRole: Send {
    fn kind(&self) -> RoleKind;

    /// Perform one exchange.
    ///
    /// A lease taken during the round must be kept in `owed` until it is
    /// handed back through [`StateStore::update_and_release`], so the runner
    /// can release it if the round fails.
    async fn round(&mut self, owed: &mut Option<StateLease>) -> Result<RoundOutcome, RoundError>;

    /// Whether the runner should stop calling [`GossipRole::round`].
    fn finished(&self, epoch: &EpochController) -> bool {
        epoch.last_epoch_reached()
    }
}

/// Error budget and pacing for one role.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorPolicy {
    /// Non-timeout errors tolerated before the run is stopped
    pub max_error: u32,
    /// Pause after any failed round
    pub backoff: Duration,
}

/// Counters for one role's run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleReport {
    pub role: RoleKind,
    pub exchanges: u64,
    pub timeouts: u64,
    pub errors: u32,
    /// Whether this role used up its error budget and stopped the run
    pub exhausted: bool,
}

impl RoleReport {
    fn new(role: RoleKind) -> Self {
        Self {
            role,
            exchanges: 0,
            timeouts: 0,
            errors: 0,
            exhausted: false,
        }
    }
}

/// Drives a role until it reports itself finished.
pub struct RoleRunner<R> {
    role: R,
    store: StateStore,
    epoch: Arc<EpochController>,
    policy: ErrorPolicy,
}

impl<R: GossipRole> RoleRunner<R> {
    pub fn new(role: R, store: StateStore, epoch: Arc<EpochController>, policy: ErrorPolicy) -> Self {
        Self {
            role,
            store,
            epoch,
            policy,
        }
    }

    pub async fn run(mut self) -> RoleReport {
        let kind = self.role.kind();
        let mut report = RoleReport::new(kind);
        let mut owed: Option<StateLease> = None;

        info!("Starting {} role", kind);

        while !self.role.finished(&self.epoch) {
            let result = self.role.round(&mut owed).await;

            // Whatever happened, nothing may still hold the lock here
            self.store.emergency_release(&mut owed);

            match result {
                Ok(RoundOutcome::Exchanged(value)) => {
                    report.exchanges += 1;
                    debug!("{} exchange complete, state is now {}", kind, value);
                }
                Ok(RoundOutcome::Stopped) => break,
                Err(e) if e.is_timeout() => {
                    report.timeouts += 1;
                    debug!("{} round timed out: {}", kind, e);
                    self.pause().await;
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(
                        "{} round failed ({}/{}): {}",
                        kind, report.errors, self.policy.max_error, e
                    );
                    if report.errors >= self.policy.max_error {
                        error!("{} role exhausted its error budget, stopping", kind);
                        report.exhausted = true;
                        self.epoch.stop();
                        break;
                    }
                    self.pause().await;
                }
            }
        }

        info!(
            "{} role finished: {} exchanges, {} timeouts, {} errors",
            kind, report.exchanges, report.timeouts, report.errors
        );
        report
    }

    async fn pause(&self) {
        if !self.policy.backoff.is_zero() {
            tokio::time::sleep(self.policy.backoff).await;
        }
    }
}
