//! The capabilities this crate consumes from the transport/protocol layer.
//!
//! Establishing a physical connection, authenticating it and streaming records
//! are done elsewhere. The routing layer only needs to run the discovery procedure,
//! tag connections with an access mode and close them.

use std::collections::HashMap;
use std::fmt::Display;

use async_trait::async_trait;

use crate::cluster::{AccessMode, Address};
use crate::errors::DriverError;

/// A value bound as a query parameter or received in a record.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    /// Absence of a value.
    Null,
    /// A boolean.
    Boolean(bool),
    /// A 64-bit signed integer.
    Integer(i64),
    /// A 64-bit float.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A map keyed by strings.
    Map(HashMap<String, Value>),
}

impl Value {
    /// Returns the string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the list elements, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Returns the map, if this is one.
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Integer(i) => write!(f, "{}", i),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(list: Vec<T>) -> Self {
        Value::List(list.into_iter().map(Into::into).collect())
    }
}

/// A single result record: field names and the values, position by position.
///
/// The two sequences are kept as received; a well-formed record has as many
/// keys as values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Field names.
    pub keys: Vec<String>,
    /// Field values.
    pub values: Vec<Value>,
}

impl Record {
    /// Creates a record from its keys and values.
    pub fn new(keys: Vec<String>, values: Vec<Value>) -> Self {
        Self { keys, values }
    }

    /// Looks a field up by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let position = self.keys.iter().position(|k| k == key)?;
        self.values.get(position)
    }
}

/// Opaque causal-consistency tokens of previously committed transactions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bookmarks(Vec<String>);

impl Bookmarks {
    /// No bookmarks.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Bookmarks from the given tokens.
    pub fn from_values(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(values.into_iter().map(Into::into).collect())
    }

    /// The tokens, in order.
    pub fn values(&self) -> &[String] {
        &self.0
    }

    /// Whether there are no tokens.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A query sent over a connection, together with its routing-relevant metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Query text.
    pub text: String,
    /// Bound parameters.
    pub parameters: HashMap<String, Value>,
    /// Database the query runs against; `None` means the default database.
    pub database: Option<String>,
    /// Bookmarks the server must have caught up with before running the query.
    pub bookmarks: Bookmarks,
}

impl Query {
    /// Creates a query without parameters against the default database.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Binds a parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Sets the database the query runs against.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the bookmarks.
    pub fn with_bookmarks(mut self, bookmarks: Bookmarks) -> Self {
        self.bookmarks = bookmarks;
        self
    }
}

/// Server product version, as advertised in the agent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
}

impl ServerVersion {
    /// Creates a version.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parses an agent string such as `Neo4j/4.1.3`.
    pub fn from_agent(agent: &str) -> Option<Self> {
        let (_, version) = agent.split_once('/')?;
        let mut parts = version.split('.');
        let major = parts.next()?.trim().parse().ok()?;
        let minor = parts
            .next()
            .and_then(|minor| {
                let digits: String = minor.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().ok()
            })
            .unwrap_or(0);
        Some(Self { major, minor })
    }
}

impl Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// What a connection knows about the server it is connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Address the connection was opened to.
    pub address: Address,
    /// Agent string sent by the server.
    pub agent: String,
    /// Version of the server.
    pub version: ServerVersion,
}

/// An established connection to a single server.
#[async_trait]
pub trait Connection: Send + std::fmt::Debug {
    /// Information about the server on the other end.
    fn server_info(&self) -> &ServerInfo;

    /// Access mode the connection is currently used for.
    fn mode(&self) -> AccessMode;

    /// Tags the connection with the access mode of the work it is handed out for.
    fn set_mode(&mut self, mode: AccessMode);

    /// Whether the connection can still be used.
    fn is_open(&self) -> bool;

    /// Runs a query and returns all its records.
    async fn run(&mut self, query: Query) -> Result<Vec<Record>, DriverError>;

    /// Closes the connection (or gives it back to its owner).
    async fn close(&mut self);
}

/// Opens connections to arbitrary servers.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Opens and initializes a connection to `address`.
    async fn connect(&self, address: &Address) -> Result<Box<dyn Connection>, DriverError>;
}
