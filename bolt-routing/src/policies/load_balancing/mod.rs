//! Load balancing strategies.\
//! [LoadBalancer](crate::client::load_balancer::LoadBalancer) can use any strategy
//! which implements the [LoadBalancingStrategy] trait.

use std::sync::Arc;

use crate::cluster::Address;

mod least_connected;
mod round_robin;
pub use least_connected::LeastConnectedStrategy;
pub use round_robin::RoundRobinStrategy;

/// Live load of the servers, as seen by the connection pools.
pub trait ConnectionLoad: Send + Sync {
    /// Number of connections to `address` currently checked out.
    fn in_use_connections(&self, address: &Address) -> usize;
}

/// Picks the server a request is sent to, among the readers or the writers
/// of a routing table.
///
/// Both methods return `None` only when there is no candidate.
pub trait LoadBalancingStrategy: Send + Sync + std::fmt::Debug {
    /// Picks one of `readers`.
    fn select_reader(&self, readers: &[Address], load: &dyn ConnectionLoad) -> Option<Address>;

    /// Picks one of `writers`.
    fn select_writer(&self, writers: &[Address], load: &dyn ConnectionLoad) -> Option<Address>;

    /// Returns the name of the strategy.
    fn name(&self) -> String;
}

/// The built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancingStrategyKind {
    /// Servers take turns.
    RoundRobin,
    /// The server with the fewest checked out connections wins.
    #[default]
    LeastConnected,
}

impl LoadBalancingStrategyKind {
    /// Creates a fresh instance of the strategy.
    pub fn build(self) -> Arc<dyn LoadBalancingStrategy> {
        match self {
            LoadBalancingStrategyKind::RoundRobin => Arc::new(RoundRobinStrategy::new()),
            LoadBalancingStrategyKind::LeastConnected => Arc::new(LeastConnectedStrategy::new()),
        }
    }
}

// similar to slice::rotate_left, but works on references
fn slice_rotated_left<T>(slice: &[T], mid: usize) -> impl Iterator<Item = &T> + Clone {
    let begin = &slice[mid..];
    let end = &slice[..mid];
    begin.iter().chain(end.iter())
}
