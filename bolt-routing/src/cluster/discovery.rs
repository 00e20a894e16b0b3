//! Fetching the topology of the cluster from a router.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::errors::DriverError;
use crate::network::{Bookmarks, Connection, Query, Record, ServerVersion, Value};

use super::{AccessMode, Address, RoutingTable};

const GET_SERVERS: &str = "CALL dbms.cluster.routing.getServers";
const GET_ROUTING_TABLE: &str = "CALL dbms.cluster.routing.getRoutingTable($context)";
const GET_ROUTING_TABLE_FOR_DATABASE: &str =
    "CALL dbms.routing.getRoutingTable($context, $database)";

const SYSTEM_DATABASE: &str = "system";

const TTL_KEY: &str = "ttl";
const SERVERS_KEY: &str = "servers";
const ROLE_KEY: &str = "role";
const ADDRESSES_KEY: &str = "addresses";

/// Shape of the topology-fetch procedure call understood by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiscoveryQuery {
    /// Servers before 3.2 take no routing context.
    GetServers,
    /// Servers of the 3.x line from 3.2 on.
    GetRoutingTable,
    /// Servers from 4.0 on, hosting multiple databases.
    GetRoutingTableForDatabase,
}

impl DiscoveryQuery {
    pub(crate) fn for_version(version: ServerVersion) -> Self {
        if version >= ServerVersion::new(4, 0) {
            DiscoveryQuery::GetRoutingTableForDatabase
        } else if version >= ServerVersion::new(3, 2) {
            DiscoveryQuery::GetRoutingTable
        } else {
            DiscoveryQuery::GetServers
        }
    }

    fn text(self) -> &'static str {
        match self {
            DiscoveryQuery::GetServers => GET_SERVERS,
            DiscoveryQuery::GetRoutingTable => GET_ROUTING_TABLE,
            DiscoveryQuery::GetRoutingTableForDatabase => GET_ROUTING_TABLE_FOR_DATABASE,
        }
    }

    fn build(
        self,
        context: &HashMap<String, Value>,
        database: &str,
        bookmarks: &Bookmarks,
    ) -> Query {
        let query = Query::new(self.text()).with_bookmarks(bookmarks.clone());
        match self {
            DiscoveryQuery::GetServers => query,
            DiscoveryQuery::GetRoutingTable => {
                query.with_param("context", Value::Map(context.clone()))
            }
            DiscoveryQuery::GetRoutingTableForDatabase => {
                let database = if database.is_empty() {
                    Value::Null
                } else {
                    Value::from(database)
                };
                query
                    .with_param("context", Value::Map(context.clone()))
                    .with_param("database", database)
                    .with_database(SYSTEM_DATABASE)
            }
        }
    }
}

/// Runs the routing procedure on a router and parses its answer.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    routing_context: HashMap<String, Value>,
}

impl Discovery {
    /// Creates a discovery forwarding `routing_context` to the routers.
    pub fn new(routing_context: HashMap<String, Value>) -> Self {
        Self { routing_context }
    }

    /// Fetches the routing table of `database` through `connection`.
    ///
    /// The connection is closed afterwards, whatever the outcome.
    pub async fn discover(
        &self,
        mut connection: Box<dyn Connection>,
        database: &str,
        bookmarks: &Bookmarks,
    ) -> Result<RoutingTable, DriverError> {
        let server = connection.server_info().clone();
        let discovery_query = DiscoveryQuery::for_version(server.version);
        debug!(
            router = %server.address,
            database,
            procedure = discovery_query.text(),
            "Fetching routing table"
        );

        connection.set_mode(AccessMode::Read);
        let result = connection
            .run(discovery_query.build(&self.routing_context, database, bookmarks))
            .await;
        connection.close().await;

        parse_routing_table(result?, database, discovery_query)
    }
}

fn parse_routing_table(
    records: Vec<Record>,
    database: &str,
    discovery_query: DiscoveryQuery,
) -> Result<RoutingTable, DriverError> {
    let mut records = records.into_iter();
    let record = match (records.next(), records.next()) {
        (Some(record), None) => record,
        (None, _) => {
            return Err(DriverError::Protocol(format!(
                "Error when parsing the result of '{}': sequence contains no elements.",
                discovery_query.text()
            )))
        }
        (Some(_), Some(_)) => {
            return Err(DriverError::Protocol(format!(
                "Error when parsing the result of '{}': sequence contains more than one element.",
                discovery_query.text()
            )))
        }
    };

    if record.keys.len() != record.values.len() {
        return Err(DriverError::Protocol(format!(
            "Error when parsing the result of '{}': record has {} keys but {} values.",
            discovery_query.text(),
            record.keys.len(),
            record.values.len()
        )));
    }

    let ttl = parse_ttl(&record)?;

    let mut routers = Vec::new();
    let mut readers = Vec::new();
    let mut writers = Vec::new();
    let servers = record
        .get(SERVERS_KEY)
        .and_then(Value::as_list)
        .ok_or_else(|| missing_field(SERVERS_KEY))?;
    for server in servers {
        let server = server
            .as_map()
            .ok_or_else(|| malformed_field(SERVERS_KEY, server))?;
        let role = server
            .get(ROLE_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| missing_field(ROLE_KEY))?;
        let target = match role {
            "ROUTE" => &mut routers,
            "READ" => &mut readers,
            "WRITE" => &mut writers,
            // Roles introduced by newer servers are of no use here.
            _ => continue,
        };
        let addresses = server
            .get(ADDRESSES_KEY)
            .and_then(Value::as_list)
            .ok_or_else(|| missing_field(ADDRESSES_KEY))?;
        for address in addresses {
            let address = address
                .as_str()
                .ok_or_else(|| malformed_field(ADDRESSES_KEY, address))?;
            target.push(Address::parse(address)?);
        }
    }

    if routers.is_empty() {
        return Err(DriverError::Protocol(format!(
            "Invalid discovery result: discovered {} routers, {} writers and {} readers.",
            routers.len(),
            writers.len(),
            readers.len()
        )));
    }

    Ok(RoutingTable::new(database, routers, readers, writers, ttl))
}

fn parse_ttl(record: &Record) -> Result<Duration, DriverError> {
    let ttl = record
        .get(TTL_KEY)
        .ok_or_else(|| missing_field(TTL_KEY))?;
    let seconds = ttl
        .as_int()
        .and_then(|seconds| u64::try_from(seconds).ok())
        .ok_or_else(|| malformed_field(TTL_KEY, ttl))?;
    Ok(Duration::from_secs(seconds))
}

fn missing_field(field: &str) -> DriverError {
    DriverError::Protocol(format!(
        "Error when parsing the routing table: missing field '{}'.",
        field
    ))
}

fn malformed_field(field: &str, value: &Value) -> DriverError {
    DriverError::Protocol(format!(
        "Error when parsing the routing table: unexpected value {} in field '{}'.",
        value, field
    ))
}
