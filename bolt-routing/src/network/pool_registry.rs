use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use itertools::Itertools;
use tracing::{debug, info, trace};

use super::connection::{Bookmarks, Connection, ConnectionFactory};
use super::connection_pool::{PoolConfig, PooledConnection, ServerConnectionPool};
use crate::cluster::{AccessMode, Address};
use crate::errors::DriverError;
use crate::policies::load_balancing::ConnectionLoad;

/// One connection pool per known server, created on demand.
pub struct ConnectionPoolRegistry {
    pools: DashMap<Address, Arc<ServerConnectionPool>>,
    factory: Arc<dyn ConnectionFactory>,
    config: PoolConfig,
    disposed: AtomicBool,
}

impl std::fmt::Debug for ConnectionPoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPoolRegistry")
            .field("servers", &self.addresses())
            .field("config", &self.config)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ConnectionPoolRegistry {
    /// Creates an empty registry opening connections through `factory`.
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: PoolConfig) -> Self {
        Self {
            pools: DashMap::new(),
            factory,
            config,
            disposed: AtomicBool::new(false),
        }
    }

    /// Whether [dispose](Self::dispose) was called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn disposed_error(address: &Address) -> DriverError {
        DriverError::InvalidOperation(format!(
            "Failed to create connections with server {} as the driver has already been disposed.",
            address
        ))
    }

    fn new_pool(&self, address: &Address) -> Arc<ServerConnectionPool> {
        debug!(address = %address, "Creating connection pool");
        Arc::new(ServerConnectionPool::new(
            address.clone(),
            Arc::clone(&self.factory),
            self.config,
        ))
    }

    /// Checks a connection to `address` out, creating the pool first if needed.
    pub async fn acquire(
        &self,
        address: &Address,
        mode: AccessMode,
        database: &str,
        bookmarks: &Bookmarks,
    ) -> Result<PooledConnection, DriverError> {
        if self.is_disposed() {
            return Err(Self::disposed_error(address));
        }
        trace!(
            address = %address,
            mode = %mode,
            database,
            bookmarks = bookmarks.values().len(),
            "Acquiring connection"
        );
        let pool = Arc::clone(
            self.pools
                .entry(address.clone())
                .or_insert_with(|| self.new_pool(address))
                .value(),
        );
        // Dispose may have drained the map between the check and the insert.
        if self.is_disposed() {
            self.pools
                .remove_if(address, |_, inserted| Arc::ptr_eq(inserted, &pool));
            pool.close().await;
            return Err(Self::disposed_error(address));
        }
        pool.acquire(mode).await
    }

    /// Opens a connection outside of any pool, used for discovery.
    pub async fn create_router_connection(
        &self,
        address: &Address,
    ) -> Result<Box<dyn Connection>, DriverError> {
        if self.is_disposed() {
            return Err(Self::disposed_error(address));
        }
        self.factory.connect(address).await
    }

    /// Closes and forgets the pool of a server found unreachable.
    ///
    /// Connections already checked out are closed when given back.
    pub async fn deactivate(&self, address: &Address) {
        if let Some((_, pool)) = self.pools.remove(address) {
            info!(address = %address, "Deactivating connection pool of unreachable server");
            pool.close().await;
        }
    }

    /// Closes and forgets the pool of `address`; does nothing if there is none.
    pub async fn purge(&self, address: &Address) {
        if let Some((_, pool)) = self.pools.remove(address) {
            debug!(address = %address, "Purging connection pool");
            pool.close().await;
        }
    }

    /// Number of connections to `address` currently checked out.
    pub fn number_of_in_use_connections(&self, address: &Address) -> usize {
        self.pools
            .get(address)
            .map(|pool| pool.in_use())
            .unwrap_or(0)
    }

    /// Makes the registry hold a pool for exactly the given servers.
    pub async fn update(&self, servers: &HashSet<Address>) -> Result<(), DriverError> {
        let mut created = Vec::new();
        for address in servers {
            if self.pools.contains_key(address) {
                continue;
            }
            if self.is_disposed() {
                self.roll_back(&created);
                return Err(Self::disposed_error(address));
            }
            self.pools
                .entry(address.clone())
                .or_insert_with(|| self.new_pool(address));
            created.push(address.clone());
            // Dispose may have drained the map between the check and the insert.
            if self.is_disposed() {
                self.roll_back(&created);
                return Err(Self::disposed_error(address));
            }
        }

        let removed: Vec<Address> = self
            .pools
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|address| !servers.contains(address))
            .collect();
        if !removed.is_empty() {
            debug!(servers = %removed.iter().join(", "), "Removing servers absent from every routing table");
        }
        for address in removed {
            self.purge(&address).await;
        }
        Ok(())
    }

    fn roll_back(&self, created: &[Address]) {
        for address in created {
            self.pools.remove(address);
        }
    }

    /// Closes every pool. Later acquisitions fail.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let addresses = self.addresses();
        debug!(pools = addresses.len(), "Disposing connection pools");
        let pools: Vec<_> = addresses
            .iter()
            .filter_map(|address| self.pools.remove(address).map(|(_, pool)| pool))
            .collect();
        join_all(pools.iter().map(|pool| pool.close())).await;
    }

    /// Servers the registry currently holds a pool for.
    pub fn addresses(&self) -> Vec<Address> {
        self.pools.iter().map(|entry| entry.key().clone()).sorted().collect()
    }

    #[cfg(test)]
    fn pool(&self, address: &Address) -> Option<Arc<ServerConnectionPool>> {
        self.pools.get(address).map(|pool| Arc::clone(pool.value()))
    }
}

impl ConnectionLoad for ConnectionPoolRegistry {
    fn in_use_connections(&self, address: &Address) -> usize {
        self.number_of_in_use_connections(address)
    }
}
