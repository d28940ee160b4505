use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gossip_core::NeighborTable;
use rand::Rng;
use rand::rngs::StdRng;
use tracing::debug;

use super::{GossipRole, RoleKind, RoundError, RoundOutcome};
use crate::epoch::{EpochController, Tick};
use crate::state::{StateLease, StateStore};
use crate::transport::Transport;

/// Initiator: once per epoch, dials a random neighbour and swaps estimates.
pub struct ActiveRole {
    epoch: Arc<EpochController>,
    store: StateStore,
    neighbors: Arc<NeighborTable>,
    transport: Transport,
    /// Port dialed for neighbours listed without one
    recv_port: u16,
    rng: StdRng,
}

impl ActiveRole {
    pub fn new(
        epoch: Arc<EpochController>,
        store: StateStore,
        neighbors: Arc<NeighborTable>,
        transport: Transport,
        recv_port: u16,
        rng: StdRng,
    ) -> Self {
        Self {
            epoch,
            store,
            neighbors,
            transport,
            recv_port,
            rng,
        }
    }

    async fn exchange(
        &mut self,
        epoch: u64,
        owed: &mut Option<StateLease>,
    ) -> Result<RoundOutcome, RoundError> {
        let local = owed.insert(self.store.get_and_acquire().await).value();

        let neighbor = self
            .neighbors
            .pick(&mut self.rng)
            .ok_or(RoundError::NoNeighbours)?;
        let addr = neighbor.address.socket_addr(self.recv_port);
        debug!("Epoch {}: exchanging with {} at {}", epoch, neighbor.id, addr);

        self.transport.connect(addr).await?;
        self.transport.send(local).await?;
        let remote = self.transport.recv().await?;
        self.transport.close();

        let lease = owed.take().ok_or(RoundError::LeaseLost)?;
        let value = self.store.update_and_release(lease, remote, epoch);
        Ok(RoundOutcome::Exchanged(value))
    }

    fn jitter(&mut self) -> Duration {
        let max = self.epoch.max_jitter().as_secs_f64();
        if max > 0.0 {
            Duration::from_secs_f64(self.rng.random_range(0.0..max))
        } else {
            Duration::ZERO
        }
    }
}

#[async_trait]
impl GossipRole for ActiveRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Active
    }

    async fn round(&mut self, owed: &mut Option<StateLease>) -> Result<RoundOutcome, RoundError> {
        let epoch = match self.epoch.next_epoch().await? {
            Tick::Epoch(epoch) => epoch,
            Tick::Stopped => return Ok(RoundOutcome::Stopped),
        };

        let jitter = self.jitter();
        debug!("Epoch {}: waiting {:?} before dialing", epoch, jitter);
        tokio::time::sleep(jitter).await;

        // A failed exchange must not stay answerable by the peer
        let result = self.exchange(epoch, owed).await;
        if result.is_err() {
            self.transport.close();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::EpochSettings;
    use crate::role::{ErrorPolicy, RoleReport, RoleRunner};
    use crate::transport::TransportSettings;
    use gossip_core::{Neighbor, NeighborAddr};
    use rand::SeedableRng;
    use std::net::SocketAddr;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_millis(300);
    const EPOCH: Duration = Duration::from_millis(50);

    fn single_neighbor(addr: SocketAddr) -> Arc<NeighborTable> {
        Arc::new(
            [Neighbor::new("peer", NeighborAddr::Socket(addr))]
                .into_iter()
                .collect(),
        )
    }

    async fn run_active(
        store: &StateStore,
        neighbors: Arc<NeighborTable>,
        max_epoch: u64,
        max_error: u32,
    ) -> (RoleReport, Arc<EpochController>) {
        run_active_every(store, neighbors, max_epoch, max_error, EPOCH).await
    }

    async fn run_active_every(
        store: &StateStore,
        neighbors: Arc<NeighborTable>,
        max_epoch: u64,
        max_error: u32,
        duration: Duration,
    ) -> (RoleReport, Arc<EpochController>) {
        let clock = Arc::new(EpochController::new(EpochSettings {
            start_time: 0.0,
            max_epoch,
            duration,
        }));
        clock.start().await.unwrap();

        let transport = Transport::new(
            "127.0.0.1:0".parse().unwrap(),
            TransportSettings {
                timeout: TIMEOUT,
                buf_size: 64,
                backlog: 8,
            },
        );
        let role = ActiveRole::new(
            Arc::clone(&clock),
            store.clone(),
            neighbors,
            transport,
            0,
            StdRng::seed_from_u64(7),
        );
        let policy = ErrorPolicy {
            max_error,
            backoff: Duration::ZERO,
        };

        let report = RoleRunner::new(role, store.clone(), Arc::clone(&clock), policy)
            .run()
            .await;
        (report, clock)
    }

    #[tokio::test]
    async fn test_exchange_with_replying_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(b"0.0").await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let store = StateStore::new(100.0);
        let (report, _) = run_active(&store, single_neighbor(addr), 1, 3).await;

        assert_eq!(report.exchanges, 1);
        assert_eq!(peer.await.unwrap(), "100.0");
        let history = store.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history.last().unwrap().epoch, 1);
        assert_eq!(history.last().unwrap().state, 50.0);
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_without_counting() {
        // Connections queue in the backlog but nobody ever answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let store = StateStore::new(1.0);
        let started = Instant::now();
        let (report, _) = run_active(&store, single_neighbor(addr), 1, 1).await;

        assert_eq!(report.timeouts, 1);
        assert_eq!(report.errors, 0);
        assert!(!report.exhausted);
        assert!(!store.is_locked());
        assert!(started.elapsed() < EPOCH + TIMEOUT + Duration::from_secs(1));
        assert!(store.history().await.is_empty());
        drop(listener);
    }

    #[tokio::test]
    async fn test_timed_out_exchange_is_hung_up_at_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            // First request goes unanswered; the initiator must hang up
            // when its receive times out, not when it next dials
            let (mut stream, _) = listener.accept().await.unwrap();
            let accepted = Instant::now();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).await.unwrap();
            let hung_up_after = accepted.elapsed();

            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            stream.read(&mut buf).await.unwrap();
            stream.write_all(b"1.0").await.unwrap();
            (request, hung_up_after)
        });

        let store = StateStore::new(1.0);
        let (report, _) =
            run_active_every(&store, single_neighbor(addr), 2, 1, Duration::from_secs(1)).await;
        let (request, hung_up_after) = peer.await.unwrap();

        assert_eq!(request, b"1.0");
        assert!(hung_up_after < TIMEOUT + Duration::from_millis(400));
        assert_eq!(report.timeouts, 1);
        assert_eq!(report.exchanges, 1);
        assert_eq!(store.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_refused_connections_exhaust_budget() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let store = StateStore::new(1.0);
        let (report, clock) = run_active(&store, single_neighbor(addr), 100, 3).await;

        assert_eq!(report.errors, 3);
        assert!(report.exhausted);
        assert!(clock.last_epoch_reached());
        assert!(!store.is_locked());
    }

    #[tokio::test]
    async fn test_malformed_reply_releases_lock() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"not json").await.unwrap();
            stream
        });

        let store = StateStore::new(3.0);
        let (report, _) = run_active(&store, single_neighbor(addr), 5, 1).await;

        assert_eq!(report.errors, 1);
        assert!(report.exhausted);
        assert!(!store.is_locked());
        assert_eq!(store.value().await, 3.0);
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_table_is_counted_error() {
        let store = StateStore::new(0.0);
        let (report, _) = run_active(&store, Arc::new(NeighborTable::default()), 10, 2).await;

        assert_eq!(report.errors, 2);
        assert!(report.exhausted);
        assert!(!store.is_locked());
    }
}
