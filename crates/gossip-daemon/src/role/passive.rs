use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{GossipRole, RoleKind, RoundError, RoundOutcome};
use crate::epoch::EpochController;
use crate::state::{StateLease, StateStore};
use crate::transport::Transport;

/// Responder: answers one inbound exchange per round.
///
/// The state lock is only taken once a connection has been accepted, so an
/// idle responder never blocks its own node's initiator. A request whose
/// sender has already hung up is rejected before anything is applied.
///
/// Keeps serving until the last epoch's window has closed.
pub struct PassiveRole {
    epoch: Arc<EpochController>,
    store: StateStore,
    transport: Transport,
}

impl PassiveRole {
    pub fn new(epoch: Arc<EpochController>, store: StateStore, transport: Transport) -> Self {
        Self {
            epoch,
            store,
            transport,
        }
    }

    async fn answer(&mut self, owed: &mut Option<StateLease>) -> Result<RoundOutcome, RoundError> {
        let peer = self.transport.accept().await?;

        let local = owed.insert(self.store.get_and_acquire().await).value();
        let remote = self.transport.recv().await?;
        self.transport.ensure_peer_waiting()?;
        self.transport.send(local).await?;
        self.transport.close();

        let epoch = self.epoch.current();
        debug!("Epoch {}: answered {} (remote state {})", epoch, peer, remote);

        let lease = owed.take().ok_or(RoundError::LeaseLost)?;
        let value = self.store.update_and_release(lease, remote, epoch);
        Ok(RoundOutcome::Exchanged(value))
    }
}

#[async_trait]
impl GossipRole for PassiveRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Passive
    }

    async fn round(&mut self, owed: &mut Option<StateLease>) -> Result<RoundOutcome, RoundError> {
        let result = self.answer(owed).await;
        if result.is_err() {
            self.transport.close();
        }
        result
    }

    fn finished(&self, epoch: &EpochController) -> bool {
        epoch.is_stopped() || epoch.final_window_elapsed(self.transport.settings().timeout)
    }
}
