//! Neighbor table: who this node may gossip with.
//!
//! Loaded once at startup from a file with one `<id>,<address>` line per
//! neighbor. The separator is a comma optionally followed by one space.
//! An address is either a bare IP (dialed at the configured receive port)
//! or a full `ip:port` socket address.

use rand::Rng;
use rand::seq::IndexedRandom;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NeighborError {
    #[error("Neighbour file {path:?} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Neighbour file is ill-formatted at line {line}: {content:?}")]
    Format { line: usize, content: String },

    #[error("Invalid neighbour address at line {line}: {address:?}")]
    InvalidAddress { line: usize, address: String },
}

/// Where a neighbor can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborAddr {
    /// Bare IP, dialed at the configured receive port
    Ip(IpAddr),
    /// Explicit IP and port
    Socket(SocketAddr),
}

impl NeighborAddr {
    /// Resolve to a socket address, using `default_port` for a bare IP.
    pub fn socket_addr(&self, default_port: u16) -> SocketAddr {
        match *self {
            NeighborAddr::Ip(ip) => SocketAddr::new(ip, default_port),
            NeighborAddr::Socket(addr) => addr,
        }
    }
}

impl FromStr for NeighborAddr {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<IpAddr>() {
            Ok(ip) => Ok(NeighborAddr::Ip(ip)),
            Err(_) => s.parse::<SocketAddr>().map(NeighborAddr::Socket),
        }
    }
}

impl Display for NeighborAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NeighborAddr::Ip(ip) => write!(f, "{}", ip),
            NeighborAddr::Socket(addr) => write!(f, "{}", addr),
        }
    }
}

/// A single neighbor entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub id: String,
    pub address: NeighborAddr,
}

impl Neighbor {
    pub fn new(id: impl Into<String>, address: NeighborAddr) -> Self {
        Self {
            id: id.into(),
            address,
        }
    }
}

/// Immutable mapping from neighbor id to address.
///
/// Iteration order is sorted by id. A repeated id keeps its last address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborTable {
    neighbors: Vec<Neighbor>,
}

impl NeighborTable {
    /// Read and parse a neighbor file.
    pub fn load(path: &Path) -> Result<Self, NeighborError> {
        tracing::debug!("Reading neighbour file at {:?}", path);
        let contents = std::fs::read_to_string(path).map_err(|source| NeighborError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::parse(&contents)?;
        tracing::debug!("Loaded {} neighbour(s)", table.len());
        Ok(table)
    }

    /// Parse neighbor file contents. Blank lines are skipped.
    pub fn parse(contents: &str) -> Result<Self, NeighborError> {
        let mut by_id = BTreeMap::new();

        for (index, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let line_no = index + 1;

            let (id, address) = split_entry(line).ok_or_else(|| NeighborError::Format {
                line: line_no,
                content: line.to_string(),
            })?;

            let address: NeighborAddr =
                address.parse().map_err(|_| NeighborError::InvalidAddress {
                    line: line_no,
                    address: address.to_string(),
                })?;

            by_id.insert(id.to_string(), address);
        }

        Ok(Self {
            neighbors: by_id
                .into_iter()
                .map(|(id, address)| Neighbor { id, address })
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Neighbor> {
        self.neighbors.iter().find(|n| n.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.iter()
    }

    /// Pick a neighbor uniformly at random. None if the table is empty.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Neighbor> {
        self.neighbors.choose(rng)
    }

    /// The table as a plain id → address map.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.neighbors
            .iter()
            .map(|n| (n.id.clone(), n.address.to_string()))
            .collect()
    }
}

impl FromIterator<Neighbor> for NeighborTable {
    fn from_iter<I: IntoIterator<Item = Neighbor>>(iter: I) -> Self {
        let by_id: BTreeMap<String, NeighborAddr> =
            iter.into_iter().map(|n| (n.id, n.address)).collect();
        Self {
            neighbors: by_id
                .into_iter()
                .map(|(id, address)| Neighbor { id, address })
                .collect(),
        }
    }
}

/// Split `<id>,<address>` or `<id>, <address>`. Exactly one separator.
fn split_entry(line: &str) -> Option<(&str, &str)> {
    let (id, rest) = line.split_once(',')?;
    let address = rest.strip_prefix(' ').unwrap_or(rest);
    if id.is_empty() || address.is_empty() || address.contains(',') {
        return None;
    }
    Some((id, address))
}
