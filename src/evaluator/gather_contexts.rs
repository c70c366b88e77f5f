//! Majority vote over the owning contexts of an expression's leaves.

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared collector of leaf contexts. Clones feed the same tally.
#[derive(Clone, Debug, Default)]
pub struct GatherContexts {
    counts: Arc<Mutex<HashMap<usize, usize>>>,
}

impl GatherContexts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a leaf. Leaves present everywhere (`None`) do not vote.
    pub fn add(&self, context: Option<usize>) {
        if let Some(c) = context {
            *self.counts.lock().entry(c).or_insert(0) += 1;
        }
    }

    /// Number of voting leaves seen.
    pub fn votes(&self) -> usize {
        self.counts.lock().values().sum()
    }

    /// Context owning the most leaves, ties going to the lowest context;
    /// `None` when no leaf voted.
    pub fn most_common_context(&self) -> Option<usize> {
        self.counts
            .lock()
            .iter()
            .max_by(|(ca, na), (cb, nb)| na.cmp(nb).then(cb.cmp(ca)))
            .map(|(c, _)| *c)
    }
}
