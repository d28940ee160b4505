//! gossip-daemon library: Exposes the node components for the binaries and tests.
//!
//! A node runs an active and a passive gossip role over TCP, sharing one
//! aggregate behind a lock, paced by a wall-clock epoch controller.

pub mod config;
pub mod daemon;
pub mod epoch;
pub mod interface;
pub mod output;
pub mod role;
pub mod state;
pub mod transport;

// Re-export key types for convenience
pub use config::{Config, LogFormat};
pub use daemon::{Daemon, DaemonSettings, RunOutcome};
pub use epoch::{EpochController, EpochError, EpochSettings, Tick};
pub use output::{OutputError, OutputPaths};
pub use role::{ActiveRole, ErrorPolicy, GossipRole, PassiveRole, RoleReport, RoleRunner};
pub use state::{StateLease, StateStore};
pub use transport::{Transport, TransportError, TransportSettings};
