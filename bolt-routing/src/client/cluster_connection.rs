//! Reclassification of the errors of routed connections.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::cluster::{AccessMode, Address};
use crate::errors::DriverError;
use crate::network::{Connection, Query, Record, ServerInfo};

/// Receives the failures of routed connections which call for a routing change.
#[async_trait]
pub trait ClusterErrorHandler: Send + Sync {
    /// The server at `address` could not be talked to; it should not be used anymore.
    async fn on_connection_error(&self, address: &Address, database: &str);

    /// The server at `address` stopped accepting writes for `database`.
    async fn on_write_error(&self, address: &Address, database: &str);
}

/// A connection obtained through routing.
///
/// Errors surfacing from it are mapped to the categories the caller's retry
/// logic understands, and the ones revealing a topology change are reported
/// to a [ClusterErrorHandler] first.
pub struct ClusterConnection {
    inner: Box<dyn Connection>,
    database: String,
    handler: Arc<dyn ClusterErrorHandler>,
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("inner", &self.inner)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl ClusterConnection {
    /// Wraps `inner`, used for `database`.
    pub fn new(
        inner: Box<dyn Connection>,
        database: impl Into<String>,
        handler: Arc<dyn ClusterErrorHandler>,
    ) -> Self {
        Self {
            inner,
            database: database.into(),
            handler,
        }
    }

    /// Address of the server the connection is bound to.
    pub fn address(&self) -> &Address {
        &self.inner.server_info().address
    }

    /// Database the connection was acquired for; empty for the default database.
    pub fn database(&self) -> &str {
        &self.database
    }
}

async fn reclassify(
    error: DriverError,
    address: &Address,
    mode: AccessMode,
    database: &str,
    handler: &dyn ClusterErrorHandler,
) -> DriverError {
    if error.is_connection_error() {
        debug!(address = %address, error = %error, "Connection to server failed");
        handler.on_connection_error(address, database).await;
        return DriverError::SessionExpired(format!(
            "Server at {} is no longer available: {}",
            address, error
        ));
    }

    let Some(server_error) = error.server_error() else {
        return error;
    };

    if server_error.is_database_unavailable() {
        // Treated as unreachable, yet surfaced as is so it gets retried as a transient error.
        handler.on_connection_error(address, database).await;
        return error;
    }

    if server_error.is_cluster_write_error() {
        return match mode {
            AccessMode::Read => DriverError::Client(
                "Write queries cannot be performed in READ access mode.".to_owned(),
            ),
            AccessMode::Write => {
                debug!(address = %address, error = %error, "Server no longer accepts writes");
                handler.on_write_error(address, database).await;
                DriverError::SessionExpired(format!(
                    "Server at {} no longer accepts writes",
                    address
                ))
            }
        };
    }

    error
}

#[async_trait]
impl Connection for ClusterConnection {
    fn server_info(&self) -> &ServerInfo {
        self.inner.server_info()
    }

    fn mode(&self) -> AccessMode {
        self.inner.mode()
    }

    fn set_mode(&mut self, mode: AccessMode) {
        self.inner.set_mode(mode);
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn run(&mut self, query: Query) -> Result<Vec<Record>, DriverError> {
        let error = match self.inner.run(query).await {
            Ok(records) => return Ok(records),
            Err(error) => error,
        };
        let address = self.address().clone();
        let mode = self.inner.mode();
        Err(reclassify(error, &address, mode, &self.database, self.handler.as_ref()).await)
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}
