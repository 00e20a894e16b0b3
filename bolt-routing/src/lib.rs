//! Cluster routing layer of an async [Bolt](https://neo4j.com/docs/bolt/current/) database driver.
//!
//! The crate decides which member of a causal cluster every unit of work is
//! sent to. Opening sockets, authenticating and encoding messages are left to
//! the transport, plugged in through [ConnectionFactory](network::ConnectionFactory).
//!
//! # Overview
//! ### Routing tables
//! Each database has its own [RoutingTable](cluster::RoutingTable) listing its
//! routers, readers and writers. Tables are fetched from a router by
//! [Discovery](cluster::Discovery) and kept fresh by the
//! [RoutingTableRegistry](cluster::RoutingTableRegistry): a table past its
//! time-to-live, or lacking servers for the requested access mode, is
//! rediscovered before use.
//!
//! ### Acquiring connections
//! All driver activity goes through the [LoadBalancer]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bolt_routing::{AccessMode, LoadBalancer, RoutingConfigBuilder};
//! use bolt_routing::network::{Bookmarks, Connection, ConnectionFactory, Query};
//! use std::error::Error;
//!
//! async fn run(factory: Arc<dyn ConnectionFactory>) -> Result<(), Box<dyn Error>> {
//!     let config = RoutingConfigBuilder::new()
//!         .initial_address("core1.example.com:7687")
//!         .build()?;
//!     let load_balancer = LoadBalancer::new(config, factory);
//!
//!     let mut connection = load_balancer
//!         .acquire_connection(AccessMode::Write, "movies", &Bookmarks::empty())
//!         .await?;
//!     connection.run(Query::new("CREATE (:Movie {title: 'Heat'})")).await?;
//!     connection.close().await;
//!
//!     load_balancer.dispose().await;
//!     Ok(())
//! }
//! ```
//! Readers and writers are chosen by a
//! [LoadBalancingStrategy](policies::load_balancing::LoadBalancingStrategy);
//! connections come out of one pool per server.
//!
//! ### Errors
//! Failures of the returned [ClusterConnection] are fed back into the routing
//! tables: an unreachable server is forgotten, a former writer stops
//! receiving writes. The caller observes them as [DriverError]s whose category
//! tells whether retrying makes sense.

pub mod client;
pub mod cluster;
pub mod errors;
pub mod network;
pub mod policies;

pub(crate) mod utils;

pub use client::{
    ClusterConnection, ClusterErrorHandler, LoadBalancer, RoutingConfig, RoutingConfigBuilder,
};
pub use cluster::{AccessMode, Address, RoutingTable};
pub use errors::DriverError;
