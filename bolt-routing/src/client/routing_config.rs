use std::collections::HashMap;
use std::time::Duration;

use crate::cluster::{Address, DEFAULT_ROUTING_TABLE_PURGE_DELAY};
use crate::errors::ConfigError;
use crate::network::{PoolConfig, Value};
use crate::policies::load_balancing::LoadBalancingStrategyKind;

/// Settings of the routing layer, fixed once the [LoadBalancer](super::LoadBalancer) is created.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    initial_addresses: Vec<Address>,
    routing_context: HashMap<String, Value>,
    load_balancing_strategy: LoadBalancingStrategyKind,
    pool: PoolConfig,
    routing_table_purge_delay: Duration,
}

impl RoutingConfig {
    /// Routers contacted when no routing table knows better.
    pub fn initial_addresses(&self) -> &[Address] {
        &self.initial_addresses
    }

    /// Key/value pairs forwarded verbatim to every discovery call.
    pub fn routing_context(&self) -> &HashMap<String, Value> {
        &self.routing_context
    }

    /// Strategy choosing among the readers or writers.
    pub fn load_balancing_strategy(&self) -> LoadBalancingStrategyKind {
        self.load_balancing_strategy
    }

    /// Sizing of the per-server pools.
    pub fn pool_config(&self) -> PoolConfig {
        self.pool
    }

    /// How long an expired table of a database nobody uses is kept.
    pub fn routing_table_purge_delay(&self) -> Duration {
        self.routing_table_purge_delay
    }
}

/// Builder of [RoutingConfig].
///
/// # Example
/// ```
/// # use bolt_routing::client::RoutingConfigBuilder;
/// # use bolt_routing::policies::load_balancing::LoadBalancingStrategyKind;
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RoutingConfigBuilder::new()
///     .initial_address("core1.example.com:7687")
///     .initial_address("[::1]")
///     .routing_context_entry("region", "europe")
///     .load_balancing_strategy(LoadBalancingStrategyKind::RoundRobin)
///     .build()?;
/// assert_eq!(config.initial_addresses().len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RoutingConfigBuilder {
    initial_addresses: Vec<String>,
    routing_context: HashMap<String, Value>,
    load_balancing_strategy: LoadBalancingStrategyKind,
    pool: PoolConfig,
    routing_table_purge_delay: Duration,
}

impl Default for RoutingConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingConfigBuilder {
    /// Creates a builder with the default configuration
    /// # Default configuration
    /// * load balancing: least connected
    /// * max connection pool size: 100
    /// * max idle connection pool size: 100
    /// * connection acquisition timeout: 60 seconds
    /// * routing table purge delay: 30 seconds
    pub fn new() -> Self {
        Self {
            initial_addresses: Vec::new(),
            routing_context: HashMap::new(),
            load_balancing_strategy: LoadBalancingStrategyKind::default(),
            pool: PoolConfig::default(),
            routing_table_purge_delay: DEFAULT_ROUTING_TABLE_PURGE_DELAY,
        }
    }

    /// Adds a router to start from, as `host`, `host:port` or `[ipv6]:port`.
    pub fn initial_address(mut self, address: impl AsRef<str>) -> Self {
        self.initial_addresses.push(address.as_ref().to_owned());
        self
    }

    /// Adds several routers to start from.
    pub fn initial_addresses(mut self, addresses: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.initial_addresses
            .extend(addresses.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Adds an entry to the routing context.
    pub fn routing_context_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.routing_context.insert(key.into(), value.into());
        self
    }

    /// Chooses the load balancing strategy.
    pub fn load_balancing_strategy(mut self, strategy: LoadBalancingStrategyKind) -> Self {
        self.load_balancing_strategy = strategy;
        self
    }

    /// Limits the number of connections checked out per server.
    pub fn max_connection_pool_size(mut self, size: usize) -> Self {
        self.pool.max_size = size;
        self
    }

    /// Limits the number of unused connections kept per server.
    pub fn max_idle_connection_pool_size(mut self, size: usize) -> Self {
        self.pool.max_idle_size = size;
        self
    }

    /// Sets how long an acquisition waits for a connection of a full pool.
    pub fn connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.pool.acquisition_timeout = timeout;
        self
    }

    /// Sets how long an expired table of an unused database is kept.
    pub fn routing_table_purge_delay(mut self, delay: Duration) -> Self {
        self.routing_table_purge_delay = delay;
        self
    }

    /// Validates the settings.
    pub fn build(self) -> Result<RoutingConfig, ConfigError> {
        if self.initial_addresses.is_empty() {
            return Err(ConfigError::EmptyInitialAddresses);
        }
        if self.pool.max_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        let mut initial_addresses = Vec::with_capacity(self.initial_addresses.len());
        for address in &self.initial_addresses {
            let address = Address::parse(address)?;
            if !initial_addresses.contains(&address) {
                initial_addresses.push(address);
            }
        }
        Ok(RoutingConfig {
            initial_addresses,
            routing_context: self.routing_context,
            load_balancing_strategy: self.load_balancing_strategy,
            pool: self.pool,
            routing_table_purge_delay: self.routing_table_purge_delay,
        })
    }
}
