//! This module contains the errors which can be returned by the routing layer.
//!
//! All of them are folded into [DriverError], which is what callers of
//! [LoadBalancer](crate::client::load_balancer::LoadBalancer) and of
//! [ClusterConnection](crate::client::cluster_connection::ClusterConnection)
//! observe. The variants correspond to the categories the session layer
//! reacts to:
//! - [DriverError::ServiceUnavailable]: no server is reachable at all,
//! - [DriverError::SessionExpired]: the server the caller was bound to is no longer
//!   appropriate, retrying will route to a different one,
//! - [DriverError::Protocol]: the cluster answered with something malformed,
//! - [DriverError::Client] and security failures: configuration or usage problems.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cluster::Address;

/// Status code of the "not a leader" failure, reported by a former writer.
pub const NOT_A_LEADER: &str = "Neo.ClientError.Cluster.NotALeader";

/// Status code reported when a write is attempted on a read-only member.
pub const FORBIDDEN_ON_READ_ONLY_DATABASE: &str =
    "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase";

/// Status code of the transient failure reported while a database is being
/// stopped, started or copied.
pub const DATABASE_UNAVAILABLE: &str = "Neo.TransientError.General.DatabaseUnavailable";

const CLIENT_CODE_PREFIX: &str = "Neo.ClientError.";
const SECURITY_CODE_PREFIX: &str = "Neo.ClientError.Security.";
const TRANSIENT_CODE_PREFIX: &str = "Neo.TransientError.";

/// Error that occurred while routing a request, or while using a routed connection.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum DriverError {
    /// No router or server could be reached.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The server bound to the current unit of work can no longer serve it.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The server sent a response which does not follow the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The caller did something the cluster refuses to serve.
    #[error("Client error: {0}")]
    Client(String),

    /// The server sent a FAILURE response.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Input/Output error has occurred, connection broken etc.
    #[error("IO Error: {0}")]
    IoError(Arc<std::io::Error>),

    /// Selected server's connection pool cannot hand out a connection.
    #[error(transparent)]
    ConnectionPool(#[from] ConnectionPoolError),

    /// The operation is not valid in the current state of the driver.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<std::io::Error> for DriverError {
    fn from(error: std::io::Error) -> Self {
        DriverError::IoError(Arc::new(error))
    }
}

impl DriverError {
    /// Failures of the connection itself: the server should be considered gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DriverError::ServiceUnavailable(_)
                | DriverError::IoError(_)
                | DriverError::ConnectionPool(ConnectionPoolError::Closed { .. })
        )
    }

    /// Authentication and authorization failures.
    pub fn is_security_error(&self) -> bool {
        matches!(self, DriverError::Server(e) if e.is_security())
    }

    /// Failures caused by the caller: bad usage, bad query, bad credentials.
    pub fn is_client_error(&self) -> bool {
        match self {
            DriverError::Client(_) => true,
            DriverError::Server(e) => e.code.starts_with(CLIENT_CODE_PREFIX),
            _ => false,
        }
    }

    /// Malformed responses.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, DriverError::Protocol(_))
    }

    /// Transient failures reported by the server, worth retrying elsewhere.
    pub fn is_transient_error(&self) -> bool {
        matches!(self, DriverError::Server(e) if e.is_transient())
    }

    /// Returns the server-reported failure, if this is one.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            DriverError::Server(e) => Some(e),
            _ => None,
        }
    }
}

/// A FAILURE response of the server, identified by its status code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Database returned an error: {code}, Error message: {message}")]
pub struct ServerError {
    /// Status code, e.g. `Neo.ClientError.Cluster.NotALeader`.
    pub code: String,
    /// Human-readable description sent by the server.
    pub message: String,
}

impl ServerError {
    /// Creates a server error with the given status code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Authentication, authorization and token expiry failures.
    pub fn is_security(&self) -> bool {
        self.code.starts_with(SECURITY_CODE_PREFIX)
    }

    /// Failures that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        self.code.starts_with(TRANSIENT_CODE_PREFIX)
    }

    /// The member stopped being the writer of the database.
    pub fn is_not_a_leader(&self) -> bool {
        self.code == NOT_A_LEADER
    }

    /// A write reached a member which only serves reads.
    pub fn is_forbidden_on_read_only_database(&self) -> bool {
        self.code == FORBIDDEN_ON_READ_ONLY_DATABASE
    }

    /// Either of the two errors signalling that writes must go elsewhere.
    pub fn is_cluster_write_error(&self) -> bool {
        self.is_not_a_leader() || self.is_forbidden_on_read_only_database()
    }

    /// The database is temporarily unavailable on this member.
    pub fn is_database_unavailable(&self) -> bool {
        self.code == DATABASE_UNAVAILABLE
    }
}

/// Error returned when a per-server pool cannot hand out a connection.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectionPoolError {
    /// The pool was deactivated or disposed.
    #[error("Connection pool for server {address} is closed")]
    Closed {
        /// Server the pool belonged to.
        address: Address,
    },

    /// All connections stayed checked out for the whole acquisition timeout.
    #[error("Failed to obtain a connection to {address} from the pool within {timeout:?}")]
    AcquisitionTimeout {
        /// Server the pool belongs to.
        address: Address,
        /// The configured acquisition timeout.
        timeout: Duration,
    },
}

/// Error returned when a `host:port` string cannot be parsed into an [Address].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AddressParseError {
    /// Nothing to parse.
    #[error("Empty server address")]
    Empty,
    /// `[` without a matching `]`.
    #[error("Unterminated IPv6 literal in address {0:?}")]
    UnterminatedIpv6(String),
    /// Port is not a number in range 0..=65535.
    #[error("Invalid port in address {0:?}")]
    InvalidPort(String),
    /// Trailing characters after the bracketed host.
    #[error("Unexpected characters after host in address {0:?}")]
    TrailingCharacters(String),
}

impl From<AddressParseError> for DriverError {
    fn from(error: AddressParseError) -> Self {
        DriverError::Protocol(format!("Unable to parse server address: {}", error))
    }
}

/// Error that occurred while validating a [RoutingConfig](crate::client::RoutingConfig).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// There needs to be at least one address to connect to.
    #[error("Empty initial address list")]
    EmptyInitialAddresses,

    /// One of the initial addresses is malformed.
    #[error(transparent)]
    InvalidAddress(#[from] AddressParseError),

    /// A pool must be able to hold at least one connection.
    #[error("Max connection pool size must be positive")]
    ZeroPoolSize,
}
