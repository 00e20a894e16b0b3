//! Entry point of the routing layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tracing::{debug, info, trace, warn};

use super::cluster_connection::{ClusterConnection, ClusterErrorHandler};
use super::routing_config::RoutingConfig;
use crate::cluster::{AccessMode, Address, Discovery, RoutingTable, RoutingTableRegistry};
use crate::errors::DriverError;
use crate::network::{
    Bookmarks, Connection, ConnectionFactory, ConnectionPoolRegistry, ServerInfo, ServerVersion,
};
use crate::policies::load_balancing::LoadBalancingStrategy;

const MULTI_DB_VERSION: ServerVersion = ServerVersion::new(4, 0);

/// Applies the routing changes called for by failing connections.
#[derive(Debug)]
struct RoutingMaintenance {
    routing_tables: Arc<RoutingTableRegistry>,
    pools: Arc<ConnectionPoolRegistry>,
}

#[async_trait]
impl ClusterErrorHandler for RoutingMaintenance {
    async fn on_connection_error(&self, address: &Address, database: &str) {
        self.pools.deactivate(address).await;
        self.routing_tables.forget_server(address, database);
    }

    async fn on_write_error(&self, address: &Address, database: &str) {
        self.routing_tables.forget_writer(address, database);
    }
}

/// Hands out connections to the cluster member fit for each unit of work.
///
/// The routing table of the requested database is refreshed first if needed,
/// then the load balancing strategy picks a reader or writer, and a connection
/// to it is checked out of its pool. Failures surfacing later from that
/// connection are fed back into the routing tables and pools.
pub struct LoadBalancer {
    config: RoutingConfig,
    pools: Arc<ConnectionPoolRegistry>,
    routing_tables: Arc<RoutingTableRegistry>,
    strategy: Arc<dyn LoadBalancingStrategy>,
    maintenance: Arc<RoutingMaintenance>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("config", &self.config)
            .field("strategy", &self.strategy.name())
            .field("routing_tables", &self.routing_tables)
            .field("pools", &self.pools)
            .finish_non_exhaustive()
    }
}

impl LoadBalancer {
    /// Creates a load balancer using the strategy named in `config`.
    pub fn new(config: RoutingConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let strategy = config.load_balancing_strategy().build();
        Self::with_strategy(config, factory, strategy)
    }

    /// Creates a load balancer using a custom strategy.
    pub fn with_strategy(
        config: RoutingConfig,
        factory: Arc<dyn ConnectionFactory>,
        strategy: Arc<dyn LoadBalancingStrategy>,
    ) -> Self {
        let pools = Arc::new(ConnectionPoolRegistry::new(factory, config.pool_config()));
        let routing_tables = Arc::new(RoutingTableRegistry::new(
            config.initial_addresses().to_vec(),
            Discovery::new(config.routing_context().clone()),
            Arc::clone(&pools),
            config.routing_table_purge_delay(),
        ));
        let maintenance = Arc::new(RoutingMaintenance {
            routing_tables: Arc::clone(&routing_tables),
            pools: Arc::clone(&pools),
        });
        debug!(
            strategy = strategy.name(),
            initial_addresses = %config.initial_addresses().iter().join(", "),
            "Creating load balancer"
        );
        Self {
            config,
            pools,
            routing_tables,
            strategy,
            maintenance,
            disposed: AtomicBool::new(false),
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn disposed_error() -> DriverError {
        DriverError::InvalidOperation(
            "Failed to acquire a new connection as the driver has already been disposed."
                .to_owned(),
        )
    }

    /// Returns a connection to a server able to serve `mode` on `database`.
    ///
    /// `database` is empty for the default database.
    pub async fn acquire_connection(
        &self,
        mode: AccessMode,
        database: &str,
        bookmarks: &Bookmarks,
    ) -> Result<ClusterConnection, DriverError> {
        if self.is_disposed() {
            return Err(Self::disposed_error());
        }

        let table = self
            .routing_tables
            .ensure_routing_table_for_mode(mode, database, bookmarks)
            .await?;
        self.acquire_from(&table, mode, database, bookmarks).await
    }

    async fn acquire_from(
        &self,
        table: &RoutingTable,
        mode: AccessMode,
        database: &str,
        bookmarks: &Bookmarks,
    ) -> Result<ClusterConnection, DriverError> {
        loop {
            let candidates = table.servers_for(mode);
            let selected = match mode {
                AccessMode::Read => self.strategy.select_reader(&candidates, self.pools.as_ref()),
                AccessMode::Write => self.strategy.select_writer(&candidates, self.pools.as_ref()),
            };
            let Some(address) = selected else {
                return Err(DriverError::SessionExpired(format!(
                    "Failed to connect to any {} server.",
                    mode
                )));
            };
            trace!(address = %address, mode = %mode, database, "Selected server");

            let acquired = self.pools.acquire(&address, mode, database, bookmarks).await;
            // The driver may have been disposed while connecting.
            if self.is_disposed() {
                if let Ok(mut connection) = acquired {
                    connection.close().await;
                }
                return Err(Self::disposed_error());
            }

            match acquired {
                Ok(connection) => {
                    let handler: Arc<dyn ClusterErrorHandler> = self.maintenance.clone();
                    return Ok(ClusterConnection::new(
                        Box::new(connection),
                        database,
                        handler,
                    ));
                }
                Err(error) if error.is_connection_error() => {
                    warn!(address = %address, database, error = %error, "Failed to connect to server");
                    // The table may have been replaced or purged in the meantime.
                    table.remove(&address);
                    self.maintenance
                        .on_connection_error(&address, database)
                        .await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Stops routing to `address` after its connection failed, and maps `error`
    /// to what the caller should observe.
    pub async fn on_connection_error(
        &self,
        address: &Address,
        database: &str,
        error: DriverError,
    ) -> DriverError {
        info!(address = %address, database, error = %error, "Server is no longer available");
        self.maintenance.on_connection_error(address, database).await;
        if error.is_client_error() {
            error
        } else {
            DriverError::SessionExpired(format!(
                "Server at {} is no longer available: {}",
                address, error
            ))
        }
    }

    /// Stops sending writes for `database` to `address`; it may still serve reads.
    pub async fn on_write_error(&self, address: &Address, database: &str) {
        self.maintenance.on_write_error(address, database).await;
    }

    /// Whether the cluster hosts multiple databases (servers 4.0 and newer).
    pub async fn supports_multi_db(&self) -> Result<bool, DriverError> {
        let server = self.first_reachable_initial_server().await?;
        Ok(server.version >= MULTI_DB_VERSION)
    }

    /// Checks that one of the initial servers can be connected to.
    pub async fn verify_connectivity(&self) -> Result<ServerInfo, DriverError> {
        self.first_reachable_initial_server().await
    }

    async fn first_reachable_initial_server(&self) -> Result<ServerInfo, DriverError> {
        let mut failures = Vec::new();
        for address in self.config.initial_addresses() {
            match self.pools.create_router_connection(address).await {
                Ok(mut connection) => {
                    let server = connection.server_info().clone();
                    connection.close().await;
                    return Ok(server);
                }
                Err(error) if error.is_security_error() => return Err(error),
                Err(error) => {
                    debug!(address = %address, error = %error, "Initial server unreachable");
                    failures.push(format!("{} ({})", address, error));
                }
            }
        }
        Err(DriverError::ServiceUnavailable(format!(
            "Failed to connect to any of the initial servers: {}",
            failures.join(", ")
        )))
    }

    /// Current routing table of `database`, if it was discovered.
    pub fn routing_table_for(&self, database: &str) -> Option<Arc<RoutingTable>> {
        self.routing_tables.routing_table_for(database)
    }

    /// The per-server connection pools.
    pub fn connection_pools(&self) -> &ConnectionPoolRegistry {
        &self.pools
    }

    /// Closes every pool and forgets every routing table.
    ///
    /// Later acquisitions fail; calling it again has no effect.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Disposing load balancer");
        self.pools.dispose().await;
        self.routing_tables.clear();
    }
}
