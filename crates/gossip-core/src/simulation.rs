//! Offline simulation of push-pull averaging over a fixed topology.
//!
//! Runs the same pairwise-average exchange as the live daemon, but in
//! lock-step rounds over an in-memory state vector. Useful for predicting
//! how fast a given graph converges before deploying it.

use crate::aggregate::average;
use rand::Rng;
use rand::seq::IndexedRandom;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    #[error("Adjacency matrix is empty")]
    Empty,

    #[error("Adjacency matrix row {row} has {found} columns, expected {expected}")]
    NotSquare {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("Invalid adjacency entry at row {row}, column {column}: {value:?}")]
    InvalidEntry {
        row: usize,
        column: usize,
        value: String,
    },

    #[error("Unreadable adjacency matrix: {0}")]
    Unreadable(String),

    #[error("Expected {expected} initial states, got {found}")]
    StateCount { expected: usize, found: usize },
}

/// Neighbor lists indexed by node number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    neighbors: Vec<Vec<usize>>,
}

impl Topology {
    /// Parse a square, comma-separated adjacency matrix. Any non-zero entry
    /// is an edge from the row's node to the column's node.
    pub fn from_adjacency_matrix(contents: &str) -> Result<Self, SimulationError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(contents.as_bytes());

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| SimulationError::Unreadable(e.to_string()))?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            rows.push(record);
        }
        let size = rows.len();
        if size == 0 {
            return Err(SimulationError::Empty);
        }

        let mut neighbors = Vec::with_capacity(size);
        for (row, cells) in rows.iter().enumerate() {
            if cells.len() != size {
                return Err(SimulationError::NotSquare {
                    row,
                    found: cells.len(),
                    expected: size,
                });
            }

            let mut adjacent = Vec::new();
            for (column, cell) in cells.iter().enumerate() {
                let weight: i64 = cell.parse().map_err(|_| SimulationError::InvalidEntry {
                    row,
                    column,
                    value: cell.to_string(),
                })?;
                if weight != 0 {
                    adjacent.push(column);
                }
            }
            neighbors.push(adjacent);
        }

        Ok(Self { neighbors })
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn neighbors(&self, node: usize) -> &[usize] {
        &self.neighbors[node]
    }
}

/// Random initial states, integers in `0..=1000`, one per node.
pub fn random_states<R: Rng + ?Sized>(size: usize, rng: &mut R) -> Vec<f64> {
    (0..size).map(|_| rng.random_range(0..=1000) as f64).collect()
}

/// Run `rounds` rounds of averaging and return the state vector after each.
///
/// In every round each node in turn picks a random neighbor, and both adopt
/// the average of their two states. Nodes without neighbors keep their state.
pub fn simulate<R: Rng + ?Sized>(
    topology: &Topology,
    initial: Vec<f64>,
    rounds: usize,
    rng: &mut R,
) -> Result<Vec<Vec<f64>>, SimulationError> {
    if initial.len() != topology.len() {
        return Err(SimulationError::StateCount {
            expected: topology.len(),
            found: initial.len(),
        });
    }

    let mut state = initial;
    let mut snapshots = Vec::with_capacity(rounds);

    for _ in 0..rounds {
        for node in 0..topology.len() {
            let Some(&dest) = topology.neighbors(node).choose(rng) else {
                continue;
            };
            let merged = average(state[node], state[dest]);
            state[node] = merged;
            state[dest] = merged;
        }
        snapshots.push(state.clone());
    }

    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const RING: &str = "0,1,0,1\n1,0,1,0\n0,1,0,1\n1,0,1,0\n";

    #[test]
    fn test_parse_ring() {
        let topology = Topology::from_adjacency_matrix(RING).unwrap();
        assert_eq!(topology.len(), 4);
        assert_eq!(topology.neighbors(0), &[1, 3]);
        assert_eq!(topology.neighbors(2), &[1, 3]);
    }

    #[test]
    fn test_parse_accepts_csv_dialect() {
        // CRLF line endings, padded and quoted cells, blank lines in between
        let matrix = "0, 1 ,\"1\"\r\n\r\n1,0,0\r\n\"1\",0,0\r\n";
        let topology = Topology::from_adjacency_matrix(matrix).unwrap();
        assert_eq!(topology.len(), 3);
        assert_eq!(topology.neighbors(0), &[1, 2]);
        assert_eq!(topology.neighbors(1), &[0]);
        assert_eq!(topology.neighbors(2), &[0]);
    }

    #[test]
    fn test_parse_rejects_non_square() {
        let err = Topology::from_adjacency_matrix("0,1\n1,0,1\n").unwrap_err();
        assert_eq!(
            err,
            SimulationError::NotSquare {
                row: 1,
                found: 3,
                expected: 2
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Topology::from_adjacency_matrix("0,x\n1,0\n"),
            Err(SimulationError::InvalidEntry { row: 0, column: 1, .. })
        ));
        assert_eq!(
            Topology::from_adjacency_matrix("\n\n"),
            Err(SimulationError::Empty)
        );
    }

    #[test]
    fn test_simulation_conserves_mean_and_converges() {
        let topology = Topology::from_adjacency_matrix(RING).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let initial = vec![1000.0, 0.0, 500.0, 100.0];
        let mean = initial.iter().sum::<f64>() / 4.0;

        let snapshots = simulate(&topology, initial, 40, &mut rng).unwrap();
        assert_eq!(snapshots.len(), 40);

        for snapshot in &snapshots {
            let snapshot_mean = snapshot.iter().sum::<f64>() / 4.0;
            assert!((snapshot_mean - mean).abs() < 1e-9);
        }

        let last = snapshots.last().unwrap();
        assert!(last.iter().all(|s| (s - mean).abs() < 1e-3));
    }

    #[test]
    fn test_isolated_node_keeps_state() {
        let topology = Topology::from_adjacency_matrix("0,1,0\n1,0,0\n0,0,0\n").unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let snapshots = simulate(&topology, vec![10.0, 20.0, 77.0], 3, &mut rng).unwrap();
        assert!(snapshots.iter().all(|s| s[2] == 77.0));
    }

    #[test]
    fn test_state_count_mismatch() {
        let topology = Topology::from_adjacency_matrix(RING).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            simulate(&topology, vec![1.0], 1, &mut rng),
            Err(SimulationError::StateCount {
                expected: 4,
                found: 1
            })
        );
    }

    #[test]
    fn test_random_states_in_range() {
        let mut rng = StdRng::seed_from_u64(9);
        let states = random_states(100, &mut rng);
        assert_eq!(states.len(), 100);
        assert!(states.iter().all(|s| (0.0..=1000.0).contains(s) && s.fract() == 0.0));
    }
}
