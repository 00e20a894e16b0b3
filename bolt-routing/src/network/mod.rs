//! Connections to single servers and the per-server pools holding them.

mod connection;
pub use connection::{
    Bookmarks, Connection, ConnectionFactory, Query, Record, ServerInfo, ServerVersion, Value,
};

mod connection_pool;
pub use connection_pool::{
    PoolConfig, PooledConnection, DEFAULT_CONNECTION_ACQUISITION_TIMEOUT,
    DEFAULT_MAX_IDLE_POOL_SIZE, DEFAULT_MAX_POOL_SIZE,
};

mod pool_registry;
pub use pool_registry::ConnectionPoolRegistry;
