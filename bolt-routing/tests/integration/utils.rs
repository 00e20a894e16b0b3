use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use bolt_routing::cluster::Address;
use bolt_routing::errors::DriverError;
use bolt_routing::network::{
    Connection, ConnectionFactory, Query, Record, ServerInfo, ServerVersion, Value,
};
use bolt_routing::AccessMode;

pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

pub(crate) fn addr(host: &str) -> Address {
    Address::new(host, 7687)
}

pub(crate) fn io_error() -> DriverError {
    std::io::Error::from(std::io::ErrorKind::BrokenPipe).into()
}

/// Topology a router answers with: ttl in seconds and `(role, hosts)` pairs.
#[derive(Debug, Clone)]
pub(crate) struct Topology {
    ttl: i64,
    servers: Vec<(String, Vec<String>)>,
}

impl Topology {
    pub(crate) fn new(ttl: i64) -> Self {
        Self {
            ttl,
            servers: Vec::new(),
        }
    }

    pub(crate) fn routers(self, hosts: &[&str]) -> Self {
        self.role("ROUTE", hosts)
    }

    pub(crate) fn writers(self, hosts: &[&str]) -> Self {
        self.role("WRITE", hosts)
    }

    pub(crate) fn readers(self, hosts: &[&str]) -> Self {
        self.role("READ", hosts)
    }

    fn role(mut self, role: &str, hosts: &[&str]) -> Self {
        let addresses = hosts.iter().map(|host| format!("{}:7687", host)).collect();
        self.servers.push((role.to_owned(), addresses));
        self
    }

    fn record(&self) -> Record {
        let servers = self
            .servers
            .iter()
            .map(|(role, addresses)| {
                Value::Map(HashMap::from([
                    ("role".to_owned(), Value::from(role.as_str())),
                    ("addresses".to_owned(), Value::from(addresses.clone())),
                ]))
            })
            .collect();
        Record::new(
            vec!["ttl".to_owned(), "servers".to_owned()],
            vec![Value::Integer(self.ttl), Value::List(servers)],
        )
    }
}

#[derive(Debug)]
struct MockServer {
    version: ServerVersion,
    down: bool,
    topologies: HashMap<Option<String>, Topology>,
    discovery_delay: Option<Duration>,
    failures: VecDeque<DriverError>,
    discoveries: Vec<Query>,
    queries: Vec<(String, AccessMode)>,
    connects: usize,
}

impl MockServer {
    fn new() -> Self {
        Self {
            version: ServerVersion::new(4, 4),
            down: false,
            topologies: HashMap::new(),
            discovery_delay: None,
            failures: VecDeque::new(),
            discoveries: Vec::new(),
            queries: Vec::new(),
            connects: 0,
        }
    }
}

/// In-memory cluster: every host answers queries, routers also answer discovery.
///
/// Hosts never mentioned refuse connections.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockCluster {
    servers: Arc<Mutex<HashMap<Address, MockServer>>>,
}

impl MockCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Connection factory reaching this cluster.
    pub(crate) fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(self.clone())
    }

    fn with_server<R>(&self, host: &str, f: impl FnOnce(&mut MockServer) -> R) -> R {
        let mut servers = self.servers.lock().unwrap();
        f(servers.entry(addr(host)).or_insert_with(MockServer::new))
    }

    pub(crate) fn server(&self, host: &str) {
        self.with_server(host, |_| ());
    }

    pub(crate) fn servers(&self, hosts: &[&str]) {
        for host in hosts {
            self.server(host);
        }
    }

    /// `host` answers discovery of the default database with `topology`.
    pub(crate) fn router(&self, host: &str, topology: Topology) {
        self.with_server(host, |server| server.topologies.insert(None, topology));
    }

    /// `host` answers discovery of `database` with `topology`.
    pub(crate) fn router_for(&self, host: &str, database: &str, topology: Topology) {
        self.with_server(host, |server| {
            server.topologies.insert(Some(database.to_owned()), topology)
        });
    }

    pub(crate) fn set_version(&self, host: &str, version: ServerVersion) {
        self.with_server(host, |server| server.version = version);
    }

    pub(crate) fn slow_discovery(&self, host: &str, delay: Duration) {
        self.with_server(host, |server| server.discovery_delay = Some(delay));
    }

    pub(crate) fn fail_next_query(&self, host: &str, error: DriverError) {
        self.with_server(host, |server| server.failures.push_back(error));
    }

    pub(crate) fn take_down(&self, host: &str) {
        self.with_server(host, |server| server.down = true);
    }

    pub(crate) fn bring_up(&self, host: &str) {
        self.with_server(host, |server| server.down = false);
    }

    pub(crate) fn discoveries(&self, host: &str) -> Vec<Query> {
        self.with_server(host, |server| server.discoveries.clone())
    }

    pub(crate) fn queries(&self, host: &str) -> Vec<(String, AccessMode)> {
        self.with_server(host, |server| server.queries.clone())
    }

    pub(crate) fn connects(&self, host: &str) -> usize {
        self.with_server(host, |server| server.connects)
    }

    fn is_known(&self, address: &Address) -> bool {
        self.servers.lock().unwrap().contains_key(address)
    }
}

#[async_trait]
impl ConnectionFactory for MockCluster {
    async fn connect(&self, address: &Address) -> Result<Box<dyn Connection>, DriverError> {
        if !self.is_known(address) {
            return Err(DriverError::ServiceUnavailable(format!(
                "Unable to connect to {}",
                address
            )));
        }
        let version = self.with_server(address.host(), |server| {
            server.connects += 1;
            (!server.down).then_some(server.version)
        });
        let version = version.ok_or_else(io_error)?;
        Ok(Box::new(MockConnection {
            info: ServerInfo {
                address: address.clone(),
                agent: format!("Neo4j/{}", version),
                version,
            },
            mode: AccessMode::Write,
            open: true,
            cluster: self.clone(),
        }))
    }
}

#[derive(Debug)]
struct MockConnection {
    info: ServerInfo,
    mode: AccessMode,
    open: bool,
    cluster: MockCluster,
}

impl MockConnection {
    fn answer(&self, query: Query) -> (Result<Vec<Record>, DriverError>, Option<Duration>) {
        let mode = self.mode;
        self.cluster.with_server(self.info.address.host(), |server| {
            if server.down {
                return (Err(io_error()), None);
            }
            if let Some(error) = server.failures.pop_front() {
                return (Err(error), None);
            }
            if !query.text.starts_with("CALL dbms.") {
                server.queries.push((query.text, mode));
                return (Ok(Vec::new()), None);
            }
            let database = query
                .parameters
                .get("database")
                .and_then(Value::as_str)
                .map(str::to_owned);
            server.discoveries.push(query);
            let records = match server.topologies.get(&database) {
                Some(topology) => vec![topology.record()],
                None => Vec::new(),
            };
            (Ok(records), server.discovery_delay)
        })
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn set_mode(&mut self, mode: AccessMode) {
        self.mode = mode;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn run(&mut self, query: Query) -> Result<Vec<Record>, DriverError> {
        let (result, delay) = self.answer(query);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if matches!(&result, Err(e) if e.is_connection_error()) {
            self.open = false;
        }
        result
    }

    async fn close(&mut self) {
        self.open = false;
    }
}
