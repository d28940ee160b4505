//! gossip-core: Shared Rust library for push-pull gossip aggregation.
//!
//! This crate provides the runtime-agnostic pieces of the protocol:
//! - The pairwise-average aggregate and its append-only history
//! - Neighbor table parsing and random neighbor selection
//! - The unframed JSON wire codec for a single scalar
//! - An offline round-based simulator of the same averaging process

pub mod aggregate;
pub mod message;
pub mod neighbors;
pub mod simulation;

pub use aggregate::{Aggregate, History, HistoryEntry, average};
pub use message::{DEFAULT_BUF_SIZE, MessageError, decode_state, encode_state};
pub use neighbors::{Neighbor, NeighborAddr, NeighborError, NeighborTable};
pub use simulation::{SimulationError, Topology, random_states, simulate};
