//! Shared aggregate state with lease-based locking.
//!
//! Both roles share one `StateStore`. A role takes the lock with
//! [`StateStore::get_and_acquire`], which hands out a [`StateLease`], and
//! keeps it across the network exchange. The lease is given back either by
//! [`StateStore::update_and_release`] after a successful exchange or by
//! [`StateStore::emergency_release`] on any failure path.

use std::sync::Arc;

use gossip_core::{Aggregate, History};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::epoch::unix_now;

/// Exclusive access to the aggregate, held for the duration of one exchange.
pub struct StateLease {
    guard: OwnedMutexGuard<Aggregate>,
}

impl StateLease {
    /// Local estimate at the time the lease was taken.
    pub fn value(&self) -> f64 {
        self.guard.value()
    }
}

/// The node's estimate and history behind a single FIFO-fair async mutex.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<Aggregate>>,
}

impl StateStore {
    pub fn new(initial: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Aggregate::new(initial))),
        }
    }

    /// Wait for the lock and return a lease exposing the current value.
    pub async fn get_and_acquire(&self) -> StateLease {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        debug!("Acquired state lock");
        StateLease { guard }
    }

    /// Average `remote` into the state, record it, and release the lock.
    ///
    /// Returns the new local estimate.
    pub fn update_and_release(&self, lease: StateLease, remote: f64, epoch: u64) -> f64 {
        debug_assert!(
            Arc::ptr_eq(OwnedMutexGuard::mutex(&lease.guard), &self.inner),
            "lease belongs to a different state store"
        );
        let mut guard = lease.guard;
        let value = guard.merge(remote, epoch, unix_now());
        drop(guard);
        debug!("Released state lock (state {} at epoch {})", value, epoch);
        value
    }

    /// Release the lock if `slot` holds a lease, without touching the state.
    ///
    /// Used on failure paths so an aborted exchange can never leave the lock
    /// held. Returns whether a lease was released.
    pub fn emergency_release(&self, slot: &mut Option<StateLease>) -> bool {
        match slot.take() {
            Some(lease) => {
                drop(lease);
                warn!("Emergency release of state lock");
                true
            }
            None => false,
        }
    }

    /// Whether some lease is currently outstanding.
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// Current estimate (waits for the lock).
    pub async fn value(&self) -> f64 {
        self.inner.lock().await.value()
    }

    /// Snapshot of the history (waits for the lock).
    pub async fn history(&self) -> History {
        self.inner.lock().await.history().clone()
    }
}
