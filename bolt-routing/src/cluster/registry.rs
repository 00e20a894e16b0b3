use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use itertools::Itertools;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::errors::DriverError;
use crate::network::{Bookmarks, ConnectionPoolRegistry};

use super::{AccessMode, Address, Discovery, RoutingTable};

/// Default time an expired routing table of an unused database is kept around.
pub const DEFAULT_ROUTING_TABLE_PURGE_DELAY: Duration = Duration::from_secs(30);

/// What to do after a router failed to provide a routing table.
enum RouterFailure {
    /// The router cannot be reached; forget it and ask the next one.
    Unreachable,
    /// The router may be fine but could not answer now; ask the next one.
    Retryable,
    /// Asking other routers would fail the same way.
    Fatal,
}

impl RouterFailure {
    fn of_connect(error: &DriverError) -> Self {
        if error.is_security_error() {
            RouterFailure::Fatal
        } else {
            RouterFailure::Unreachable
        }
    }

    fn of_discovery(error: &DriverError) -> Self {
        if error.is_connection_error() {
            RouterFailure::Unreachable
        } else if error.is_transient_error()
            || error
                .server_error()
                .is_some_and(|e| e.code.starts_with("Neo.DatabaseError."))
        {
            RouterFailure::Retryable
        } else {
            RouterFailure::Fatal
        }
    }
}

/// Keeps one routing table per database and refreshes them on demand.
///
/// Refreshes of a database are serialized: callers arriving while a refresh
/// is in flight wait for it and then use its result. Databases refresh
/// independently of each other.
pub struct RoutingTableRegistry {
    tables: DashMap<String, Arc<RoutingTable>>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    discovery: Discovery,
    pools: Arc<ConnectionPoolRegistry>,
    initial_addresses: Vec<Address>,
    purge_delay: Duration,
}

impl std::fmt::Debug for RoutingTableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let databases: Vec<String> = self
            .tables
            .iter()
            .map(|table| table.key().clone())
            .sorted()
            .collect();
        f.debug_struct("RoutingTableRegistry")
            .field("databases", &databases)
            .field("initial_addresses", &self.initial_addresses)
            .field("purge_delay", &self.purge_delay)
            .finish_non_exhaustive()
    }
}

impl RoutingTableRegistry {
    /// Creates a registry without any table; `initial_addresses` are the routers
    /// asked when nothing better is known.
    pub fn new(
        initial_addresses: Vec<Address>,
        discovery: Discovery,
        pools: Arc<ConnectionPoolRegistry>,
        purge_delay: Duration,
    ) -> Self {
        Self {
            tables: DashMap::new(),
            refresh_locks: DashMap::new(),
            discovery,
            pools,
            initial_addresses,
            purge_delay,
        }
    }

    /// Returns a table of `database` fit for `mode`, rediscovering it if needed.
    ///
    /// `database` is empty for the default database.
    pub async fn ensure_routing_table_for_mode(
        &self,
        mode: AccessMode,
        database: &str,
        bookmarks: &Bookmarks,
    ) -> Result<Arc<RoutingTable>, DriverError> {
        if let Some(table) = self.fresh_table(mode, database) {
            return Ok(table);
        }

        let lock = self.refresh_lock(database);
        let _guard = lock.lock().await;

        // Someone else may have refreshed the table while we were waiting.
        if let Some(table) = self.fresh_table(mode, database) {
            return Ok(table);
        }

        let table = Arc::new(self.rediscover(mode, database, bookmarks).await?);
        self.publish(Arc::clone(&table)).await?;
        Ok(table)
    }

    fn fresh_table(&self, mode: AccessMode, database: &str) -> Option<Arc<RoutingTable>> {
        self.routing_table_for(database)
            .filter(|table| !table.is_stale(mode))
    }

    fn refresh_lock(&self, database: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.refresh_locks
                .entry(database.to_owned())
                .or_default()
                .value(),
        )
    }

    async fn rediscover(
        &self,
        mode: AccessMode,
        database: &str,
        bookmarks: &Bookmarks,
    ) -> Result<RoutingTable, DriverError> {
        debug!(database, mode = %mode, "Updating routing table");

        let existing = self
            .routing_table_for(database)
            .unwrap_or_else(|| Arc::new(RoutingTable::empty(database)));

        let mut tried = HashSet::new();
        let mut prepended_initial = false;
        if existing.is_reading_in_absence_of_writer(mode) {
            // A member partitioned from the writer may keep serving a writer-less view;
            // start from the seed routers instead.
            existing.prepend_routers(self.initial_addresses.iter().cloned());
            prepended_initial = true;
        }

        if let Some(table) = self
            .discover_from_known_routers(&existing, database, bookmarks, &mut tried)
            .await?
        {
            return Ok(table);
        }

        if !prepended_initial {
            let untried: Vec<Address> = self
                .initial_addresses
                .iter()
                .filter(|address| !tried.contains(*address))
                .cloned()
                .collect();
            if !untried.is_empty() {
                debug!(
                    database,
                    routers = %untried.iter().join(", "),
                    "Falling back to initial routers"
                );
                existing.prepend_routers(untried);
                if let Some(table) = self
                    .discover_from_known_routers(&existing, database, bookmarks, &mut tried)
                    .await?
                {
                    return Ok(table);
                }
            }
        }

        Err(DriverError::ServiceUnavailable(
            "Failed to connect to any routing server. \
             Please make sure that the cluster is up and can be accessed by the driver and retry."
                .to_owned(),
        ))
    }

    /// Asks the routers of `table` in rotation, skipping the ones in `tried`.
    ///
    /// Unreachable routers are removed from `table`.
    async fn discover_from_known_routers(
        &self,
        table: &RoutingTable,
        database: &str,
        bookmarks: &Bookmarks,
        tried: &mut HashSet<Address>,
    ) -> Result<Option<RoutingTable>, DriverError> {
        while let Some(router) = table.next_router() {
            if !tried.insert(router.clone()) {
                // Went full circle.
                break;
            }

            let result = match self.pools.create_router_connection(&router).await {
                Ok(connection) => self
                    .discovery
                    .discover(connection, database, bookmarks)
                    .await
                    .map_err(|e| (RouterFailure::of_discovery(&e), e)),
                Err(e) => Err((RouterFailure::of_connect(&e), e)),
            };

            match result {
                Ok(discovered) => return Ok(Some(discovered)),
                Err((RouterFailure::Unreachable, e)) => {
                    warn!(router = %router, database, error = %e, "Failed to update routing table, forgetting router");
                    table.remove(&router);
                }
                Err((RouterFailure::Retryable, e)) => {
                    warn!(router = %router, database, error = %e, "Failed to update routing table");
                }
                Err((RouterFailure::Fatal, e)) => {
                    error!(router = %router, database, error = %e, "Failed to update routing table, giving up");
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    async fn publish(&self, table: Arc<RoutingTable>) -> Result<(), DriverError> {
        self.purge_aged();

        let database = table.database();
        let mut servers: HashSet<Address> = self
            .tables
            .iter()
            .filter(|entry| entry.key() != database)
            .flat_map(|entry| entry.value().all_servers())
            .collect();
        servers.extend(table.all_servers());
        self.pools.update(&servers).await?;

        self.tables.insert(database.to_owned(), Arc::clone(&table));
        // Dispose may have cleared the tables while the pools were updated.
        if self.pools.is_disposed() {
            self.tables
                .remove_if(database, |_, published| Arc::ptr_eq(published, &table));
            table.clear();
            return Err(DriverError::InvalidOperation(format!(
                "Failed to update the routing table of database {:?} as the driver has already been disposed.",
                database
            )));
        }

        info!("Routing table is updated => {}", table);
        Ok(())
    }

    fn purge_aged(&self) {
        let aged: Vec<String> = self
            .tables
            .iter()
            .filter(|entry| entry.value().is_expired_for(self.purge_delay))
            .map(|entry| entry.key().clone())
            .collect();
        for database in aged {
            debug!(database = %database, "Purging routing table of unused database");
            self.tables.remove(&database);
            // A refresh in flight keeps its lock, so later callers queue behind it.
            self.refresh_locks
                .remove_if(&database, |_, lock| Arc::strong_count(lock) == 1);
        }
    }

    /// Removes `address` from every role of the table of `database`.
    pub fn forget_server(&self, address: &Address, database: &str) {
        if let Some(table) = self.routing_table_for(database) {
            info!(address = %address, database, "Forgetting server");
            table.remove(address);
        }
    }

    /// Removes `address` from the writers of the table of `database`.
    pub fn forget_writer(&self, address: &Address, database: &str) {
        if let Some(table) = self.routing_table_for(database) {
            info!(address = %address, database, "Forgetting writer");
            table.remove_writer(address);
        }
    }

    /// Current table of `database`, if any.
    pub fn routing_table_for(&self, database: &str) -> Option<Arc<RoutingTable>> {
        self.tables
            .get(database)
            .map(|table| Arc::clone(table.value()))
    }

    /// Forgets every table.
    ///
    /// Tables still held by callers are emptied, so they stop routing anywhere.
    pub fn clear(&self) {
        for table in self.tables.iter() {
            table.value().clear();
        }
        self.tables.clear();
        self.refresh_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn insert(&self, table: RoutingTable) {
        self.tables
            .insert(table.database().to_owned(), Arc::new(table));
    }
}
