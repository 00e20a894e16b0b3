//! This module holds entities that represent the cluster as seen by the driver:
//! - server addresses ([Address]),
//! - the per-database topology ([RoutingTable]), which is replaced as a whole
//!   upon rediscovery and only ever shrinks in between,
//! - [Discovery], fetching the topology from a router,
//! - [RoutingTableRegistry], keeping one table per database fresh.

mod address;
pub use address::{Address, DEFAULT_PORT};

mod routing_table;
pub use routing_table::{AccessMode, RoutingTable};

mod discovery;
pub use discovery::Discovery;

mod registry;
pub use registry::{RoutingTableRegistry, DEFAULT_ROUTING_TABLE_PURGE_DELAY};
