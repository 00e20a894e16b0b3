use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use super::connection::{Connection, ConnectionFactory, Query, Record, ServerInfo};
use crate::cluster::{AccessMode, Address};
use crate::errors::{ConnectionPoolError, DriverError};

const ORDER_TYPE: Ordering = Ordering::Relaxed;

/// Default maximum number of connections per server.
pub const DEFAULT_MAX_POOL_SIZE: usize = 100;
/// Default maximum number of idle connections kept per server.
pub const DEFAULT_MAX_IDLE_POOL_SIZE: usize = 100;
/// Default time to wait for a free connection slot.
pub const DEFAULT_CONNECTION_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(60);

/// Sizing of the per-server connection pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections checked out at once, per server.
    pub max_size: usize,
    /// Connections kept open while unused, per server.
    pub max_idle_size: usize,
    /// How long `acquire` waits for a connection to be returned when the pool is full.
    pub acquisition_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_POOL_SIZE,
            max_idle_size: DEFAULT_MAX_IDLE_POOL_SIZE,
            acquisition_timeout: DEFAULT_CONNECTION_ACQUISITION_TIMEOUT,
        }
    }
}

/// Connections to a single server.
///
/// At most `max_size` connections are checked out at any time; further
/// acquisitions wait for one to be returned. Once closed, the pool refuses
/// acquisitions, and connections returned to it are closed instead of kept.
pub(crate) struct ServerConnectionPool {
    address: Address,
    factory: Arc<dyn ConnectionFactory>,
    config: PoolConfig,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    slots: Arc<Semaphore>,
    in_use: AtomicUsize,
    closed: AtomicBool,
}

impl std::fmt::Debug for ServerConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnectionPool")
            .field("address", &self.address)
            .field("config", &self.config)
            .field("in_use", &self.in_use())
            .field("idle", &self.idle_count())
            .field("closed", &self.closed.load(ORDER_TYPE))
            .finish_non_exhaustive()
    }
}

impl ServerConnectionPool {
    pub(crate) fn new(
        address: Address,
        factory: Arc<dyn ConnectionFactory>,
        config: PoolConfig,
    ) -> Self {
        Self {
            address,
            factory,
            slots: Arc::new(Semaphore::new(config.max_size)),
            config,
            idle: Mutex::new(Vec::new()),
            in_use: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of connections currently checked out.
    pub(crate) fn in_use(&self) -> usize {
        self.in_use.load(ORDER_TYPE)
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(ORDER_TYPE)
    }

    fn closed_error(&self) -> DriverError {
        ConnectionPoolError::Closed {
            address: self.address.clone(),
        }
        .into()
    }

    /// Checks a connection out, tagged with `mode`.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        mode: AccessMode,
    ) -> Result<PooledConnection, DriverError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let permit = match tokio::time::timeout(
            self.config.acquisition_timeout,
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            // The semaphore is closed together with the pool.
            Ok(Err(_)) => return Err(self.closed_error()),
            Err(_) => {
                return Err(ConnectionPoolError::AcquisitionTimeout {
                    address: self.address.clone(),
                    timeout: self.config.acquisition_timeout,
                }
                .into())
            }
        };

        let mut connection = match self.take_idle().await {
            Some(connection) => {
                trace!(address = %self.address, "Reusing idle connection");
                connection
            }
            None => {
                trace!(address = %self.address, "Opening new connection");
                self.factory.connect(&self.address).await?
            }
        };

        if self.is_closed() {
            connection.close().await;
            return Err(self.closed_error());
        }

        connection.set_mode(mode);
        self.in_use.fetch_add(1, ORDER_TYPE);
        Ok(PooledConnection {
            info: connection.server_info().clone(),
            mode,
            connection: Some(connection),
            pool: Arc::clone(self),
            permit: Some(permit),
        })
    }

    async fn take_idle(&self) -> Option<Box<dyn Connection>> {
        loop {
            let candidate = self
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop();
            let mut connection = candidate?;
            if connection.is_open() {
                return Some(connection);
            }
            connection.close().await;
        }
    }

    async fn release(&self, mut connection: Box<dyn Connection>) {
        if !self.is_closed() && connection.is_open() {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            if idle.len() < self.config.max_idle_size {
                idle.push(connection);
                return;
            }
        }
        connection.close().await;
    }

    /// Closes the pool and its idle connections.
    ///
    /// Checked out connections stay usable and are closed when given back.
    pub(crate) async fn close(&self) {
        if self.closed.swap(true, ORDER_TYPE) {
            return;
        }
        self.slots.close();
        let idle = std::mem::take(&mut *self.idle.lock().unwrap_or_else(PoisonError::into_inner));
        debug!(
            address = %self.address,
            idle = idle.len(),
            in_use = self.in_use(),
            "Closing connection pool"
        );
        join_all(idle.into_iter().map(|mut connection| async move {
            connection.close().await;
        }))
        .await;
    }
}

/// A connection checked out of a server's pool.
///
/// [Connection::close] gives it back to the pool. Dropping it without closing
/// frees its slot but discards the underlying connection.
#[derive(Debug)]
pub struct PooledConnection {
    info: ServerInfo,
    mode: AccessMode,
    connection: Option<Box<dyn Connection>>,
    pool: Arc<ServerConnectionPool>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    fn release_slot(&mut self) {
        if self.permit.take().is_some() {
            self.pool.in_use.fetch_sub(1, ORDER_TYPE);
        }
    }
}

#[async_trait]
impl Connection for PooledConnection {
    fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn set_mode(&mut self, mode: AccessMode) {
        self.mode = mode;
        if let Some(connection) = self.connection.as_mut() {
            connection.set_mode(mode);
        }
    }

    fn is_open(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.is_open())
    }

    async fn run(&mut self, query: Query) -> Result<Vec<Record>, DriverError> {
        match self.connection.as_mut() {
            Some(connection) => connection.run(query).await,
            None => Err(DriverError::InvalidOperation(format!(
                "Connection to {} has already been returned to the pool",
                self.info.address
            ))),
        }
    }

    async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection).await;
        }
        self.release_slot();
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release_slot();
    }
}
