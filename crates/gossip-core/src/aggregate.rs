//! Aggregate state: a single scalar estimate plus its exchange history.
//!
//! The estimate only ever changes through [`Aggregate::merge`], which folds a
//! remote value in with [`average`] and appends the result to the history.

use serde::{Deserialize, Serialize};

/// The aggregation function: arithmetic mean of two estimates.
pub fn average(local: f64, remote: f64) -> f64 {
    (local + remote) / 2.0
}

/// One completed exchange as recorded in the history.
///
/// Field names double as the CSV header (`epoch,time,state`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Epoch the exchange completed in
    pub epoch: u64,
    /// Wall-clock time of the update (unix seconds)
    pub time: f64,
    /// Estimate after the update
    pub state: f64,
}

/// Append-only, insertion-ordered record of completed exchanges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a HistoryEntry;
    type IntoIter = std::slice::Iter<'a, HistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// A node's local estimate and the history of how it got there.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    value: f64,
    history: History,
}

impl Aggregate {
    /// Create an aggregate holding the initial estimate and an empty history.
    pub fn new(initial: f64) -> Self {
        Self {
            value: initial,
            history: History::new(),
        }
    }

    /// Current estimate.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Fold a remote estimate into the local one and record the result.
    ///
    /// Returns the new local estimate.
    pub fn merge(&mut self, remote: f64, epoch: u64, at: f64) -> f64 {
        self.value = average(self.value, remote);
        self.history.push(HistoryEntry {
            epoch,
            time: at,
            state: self.value,
        });
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average() {
        assert_eq!(average(100.0, 0.0), 50.0);
        assert_eq!(average(-4.0, 4.0), 0.0);
        assert_eq!(average(3.0, 3.0), 3.0);
    }

    #[test]
    fn test_merge_is_left_fold_of_average() {
        let remotes = [10.0, -2.5, 7.0, 0.0, 1e6, 42.0];
        let mut aggregate = Aggregate::new(3.0);

        for (i, remote) in remotes.iter().enumerate() {
            aggregate.merge(*remote, i as u64, 1000.0 + i as f64);
        }

        let expected = remotes.iter().fold(3.0, |acc, r| average(acc, *r));
        assert_eq!(aggregate.value(), expected);
    }

    #[test]
    fn test_history_grows_by_one_per_merge() {
        let mut aggregate = Aggregate::new(0.0);
        assert!(aggregate.history().is_empty());

        for i in 0..5u64 {
            aggregate.merge(8.0, i, i as f64);
            assert_eq!(aggregate.history().len(), (i + 1) as usize);
        }
    }

    #[test]
    fn test_history_preserves_insertion_order() {
        let mut aggregate = Aggregate::new(100.0);
        aggregate.merge(0.0, 1, 10.0);
        aggregate.merge(0.0, 1, 11.0);
        aggregate.merge(0.0, 2, 12.0);

        let states: Vec<f64> = aggregate.history().iter().map(|e| e.state).collect();
        assert_eq!(states, vec![50.0, 25.0, 12.5]);

        let epochs: Vec<u64> = aggregate.history().iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, vec![1, 1, 2]);

        let last = aggregate.history().last().unwrap();
        assert_eq!(last.time, 12.0);
        assert_eq!(last.state, aggregate.value());
    }

    #[test]
    fn test_pairwise_exchange_conserves_sum() {
        let mut p = Aggregate::new(100.0);
        let mut q = Aggregate::new(0.0);

        let (p_value, q_value) = (p.value(), q.value());
        p.merge(q_value, 1, 0.0);
        q.merge(p_value, 1, 0.0);

        assert_eq!(p.value(), 50.0);
        assert_eq!(q.value(), 50.0);
        assert_eq!(p.value() + q.value(), 100.0);
    }
}
