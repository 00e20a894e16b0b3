use tracing::trace;

use super::{ConnectionLoad, LoadBalancingStrategy};
use crate::cluster::Address;
use crate::utils::round_robin::RoundRobinIndex;

/// A Round-robin load balancing strategy.
///
/// Readers and writers are rotated independently.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    readers_index: RoundRobinIndex,
    writers_index: RoundRobinIndex,
}

impl RoundRobinStrategy {
    /// Creates the strategy with both rotations at the first candidate.
    pub fn new() -> Self {
        Self::default()
    }

    fn select(index: &RoundRobinIndex, candidates: &[Address]) -> Option<Address> {
        let picked = candidates.get(index.next(candidates.len())?).cloned();
        trace!(
            candidates = candidates.len(),
            picked = ?picked.as_ref().map(ToString::to_string),
            "RoundRobin"
        );
        picked
    }
}

impl LoadBalancingStrategy for RoundRobinStrategy {
    fn select_reader(&self, readers: &[Address], _load: &dyn ConnectionLoad) -> Option<Address> {
        Self::select(&self.readers_index, readers)
    }

    fn select_writer(&self, writers: &[Address], _load: &dyn ConnectionLoad) -> Option<Address> {
        Self::select(&self.writers_index, writers)
    }

    fn name(&self) -> String {
        "RoundRobinStrategy".to_string()
    }
}
