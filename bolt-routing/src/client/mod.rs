//! The surface the session layer talks to: [LoadBalancer] hands out
//! [ClusterConnection]s, configured through [RoutingConfig].

pub mod cluster_connection;
pub use cluster_connection::{ClusterConnection, ClusterErrorHandler};

pub mod load_balancer;
pub use load_balancer::LoadBalancer;

mod routing_config;
pub use routing_config::{RoutingConfig, RoutingConfigBuilder};
