//! Node orchestration: setup, the two concurrent roles, and shutdown.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use gossip_core::NeighborTable;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::epoch::{EpochController, EpochSettings};
use crate::interface::resolve_node_ip;
use crate::output::write_history;
use crate::role::{ActiveRole, ErrorPolicy, PassiveRole, RoleReport, RoleRunner};
use crate::state::StateStore;
use crate::transport::{Transport, TransportSettings};

/// Everything the orchestrator needs from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonSettings {
    pub epoch: EpochSettings,
    pub policy: ErrorPolicy,
    pub transport: TransportSettings,
    pub recv_port: u16,
    pub send_port: u16,
    /// How long roles get to finish after a shutdown request
    pub drain: Duration,
}

impl DaemonSettings {
    pub fn from_config(config: &Config, start_time: f64) -> Self {
        Self {
            epoch: EpochSettings {
                start_time,
                max_epoch: config.epochs.max,
                duration: config.epoch_duration(),
            },
            policy: ErrorPolicy {
                max_error: config.threads.max_error,
                backoff: config.backoff(),
            },
            transport: TransportSettings {
                timeout: config.socket_timeout(),
                buf_size: config.network.buf_size,
                backlog: config.network.backlog,
            },
            recv_port: config.network.recv_port,
            send_port: config.network.send_port,
            drain: config.drain(),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// `None` if the role had to be aborted or never ran
    pub active: Option<RoleReport>,
    pub passive: Option<RoleReport>,
    pub history_len: usize,
    /// Whether the run ended because of a shutdown request
    pub interrupted: bool,
}

impl RunOutcome {
    /// Whether either role stopped the run by using up its error budget.
    pub fn exhausted(&self) -> bool {
        [&self.active, &self.passive]
            .into_iter()
            .flatten()
            .any(|r| r.exhausted)
    }
}

/// One gossip node, ready to run.
pub struct Daemon {
    settings: DaemonSettings,
    neighbors: Arc<NeighborTable>,
    store: StateStore,
    epoch: Arc<EpochController>,
    passive: Transport,
    active: Transport,
    history_path: PathBuf,
}

impl Daemon {
    /// Resolve the node address, load neighbours and bind the listener.
    pub fn setup(
        config: &Config,
        start_time: f64,
        initial_state: f64,
        history_path: PathBuf,
    ) -> Result<Self> {
        let node_ip = resolve_node_ip(&config.network.node_interface)
            .context("Failed to resolve node address")?;
        let neighbors = NeighborTable::load(&config.paths.list_of_neighbours_file)
            .context("Failed to load neighbour file")?;

        Self::new(
            DaemonSettings::from_config(config, start_time),
            node_ip,
            neighbors,
            initial_state,
            history_path,
        )
    }

    pub fn new(
        settings: DaemonSettings,
        node_ip: IpAddr,
        neighbors: NeighborTable,
        initial_state: f64,
        history_path: PathBuf,
    ) -> Result<Self> {
        if neighbors.is_empty() {
            bail!("Neighbour table is empty");
        }

        let mut passive = Transport::new(
            SocketAddr::new(node_ip, settings.recv_port),
            settings.transport,
        );
        passive.bind().context("Failed to bind receive port")?;
        let active = Transport::new(
            SocketAddr::new(node_ip, settings.send_port),
            settings.transport,
        );

        info!(
            "Node {} with {} neighbours, initial state {}",
            node_ip,
            neighbors.len(),
            initial_state
        );

        Ok(Self {
            epoch: Arc::new(EpochController::new(settings.epoch)),
            store: StateStore::new(initial_state),
            neighbors: Arc::new(neighbors),
            passive,
            active,
            history_path,
            settings,
        })
    }

    /// Address the passive role listens on.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.passive.local_addr()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run both roles to completion and persist the history.
    ///
    /// When `shutdown` resolves first, the epoch clock is stopped and the
    /// roles get `drain` to finish before they are aborted. History is
    /// written in every case.
    pub async fn run<F>(self, shutdown: F) -> Result<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        let Daemon {
            settings,
            neighbors,
            store,
            epoch,
            passive,
            active,
            history_path,
        } = self;
        tokio::pin!(shutdown);

        let started = tokio::select! {
            result = epoch.start() => {
                result.context("Failed to start epoch clock")?;
                true
            }
            _ = &mut shutdown => {
                info!("Shutdown requested before the first epoch");
                false
            }
        };

        let mut outcome = RunOutcome {
            active: None,
            passive: None,
            history_len: 0,
            interrupted: !started,
        };

        if started {
            let active_role = ActiveRole::new(
                Arc::clone(&epoch),
                store.clone(),
                neighbors,
                active,
                settings.recv_port,
                StdRng::from_os_rng(),
            );
            let passive_role = PassiveRole::new(Arc::clone(&epoch), store.clone(), passive);

            let active_task = tokio::spawn(
                RoleRunner::new(active_role, store.clone(), Arc::clone(&epoch), settings.policy)
                    .run(),
            );
            let passive_task = tokio::spawn(
                RoleRunner::new(passive_role, store.clone(), Arc::clone(&epoch), settings.policy)
                    .run(),
            );
            let aborts = [active_task.abort_handle(), passive_task.abort_handle()];

            let roles = async { tokio::join!(active_task, passive_task) };
            tokio::pin!(roles);

            let (active_result, passive_result) = tokio::select! {
                results = &mut roles => results,
                _ = &mut shutdown => {
                    outcome.interrupted = true;
                    info!("Shutdown requested, draining for up to {:?}", settings.drain);
                    epoch.stop();

                    match tokio::time::timeout(settings.drain, &mut roles).await {
                        Ok(results) => results,
                        Err(_) => {
                            warn!("Roles did not drain in time, aborting");
                            for handle in &aborts {
                                handle.abort();
                            }
                            roles.await
                        }
                    }
                }
            };

            outcome.active = role_report(active_result);
            outcome.passive = role_report(passive_result);
        }

        let history = store.history().await;
        outcome.history_len = history.len();
        write_history(&history_path, &history).context("Failed to persist history")?;

        info!(
            "Run finished at epoch {} with state {} ({} exchanges recorded)",
            epoch.current(),
            store.value().await,
            outcome.history_len
        );
        Ok(outcome)
    }
}

fn role_report(result: std::result::Result<RoleReport, JoinError>) -> Option<RoleReport> {
    match result {
        Ok(report) => Some(report),
        Err(e) if e.is_cancelled() => None,
        Err(e) => {
            error!("Role task failed: {}", e);
            None
        }
    }
}
