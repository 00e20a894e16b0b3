use tracing::trace;

use super::{slice_rotated_left, ConnectionLoad, LoadBalancingStrategy};
use crate::cluster::Address;
use crate::utils::round_robin::RoundRobinIndex;

/// Picks the candidate with the fewest connections in use.
///
/// Candidates are scanned starting from a rotating position and only a strictly
/// lower count replaces the current pick, so equally loaded servers take turns.
#[derive(Debug, Default)]
pub struct LeastConnectedStrategy {
    readers_index: RoundRobinIndex,
    writers_index: RoundRobinIndex,
}

impl LeastConnectedStrategy {
    /// Creates the strategy with both rotations at the first candidate.
    pub fn new() -> Self {
        Self::default()
    }

    fn select(
        index: &RoundRobinIndex,
        candidates: &[Address],
        load: &dyn ConnectionLoad,
    ) -> Option<Address> {
        let start = index.next(candidates.len())?;
        let mut least: Option<(&Address, usize)> = None;
        for candidate in slice_rotated_left(candidates, start) {
            let in_use = load.in_use_connections(candidate);
            if least.is_none_or(|(_, fewest)| in_use < fewest) {
                least = Some((candidate, in_use));
            }
        }
        let (picked, in_use) = least?;
        trace!(address = %picked, in_use, "LeastConnected");
        Some(picked.clone())
    }
}

impl LoadBalancingStrategy for LeastConnectedStrategy {
    fn select_reader(&self, readers: &[Address], load: &dyn ConnectionLoad) -> Option<Address> {
        Self::select(&self.readers_index, readers, load)
    }

    fn select_writer(&self, writers: &[Address], load: &dyn ConnectionLoad) -> Option<Address> {
        Self::select(&self.writers_index, writers, load)
    }

    fn name(&self) -> String {
        "LeastConnectedStrategy".to_string()
    }
}
