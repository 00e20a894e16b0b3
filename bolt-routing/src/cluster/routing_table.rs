use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::utils::round_robin::ConcurrentRoundRobinSet;

use super::Address;

/// Kind of work a connection is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Work that can be served by any reader.
    Read,
    /// Work that must be served by the writer.
    Write,
}

impl Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::Read => write!(f, "read"),
            AccessMode::Write => write!(f, "write"),
        }
    }
}

/// Topology of the cluster as seen for a single database.
///
/// A table is produced by discovery and replaced as a whole when rediscovered.
/// In between, servers reported as failed are removed from it in place: every
/// role list is a copy-on-write snapshot, so readers never observe a partially
/// updated list and never take a lock.
#[derive(Debug)]
pub struct RoutingTable {
    database: String,
    routers: ConcurrentRoundRobinSet<Address>,
    readers: ConcurrentRoundRobinSet<Address>,
    writers: ConcurrentRoundRobinSet<Address>,
    ttl: Duration,
    // None if the deadline lies beyond what the clock can represent.
    expires_at: Option<Instant>,
}

impl RoutingTable {
    /// Creates a table which expires `ttl` from now.
    pub fn new(
        database: impl Into<String>,
        routers: impl IntoIterator<Item = Address>,
        readers: impl IntoIterator<Item = Address>,
        writers: impl IntoIterator<Item = Address>,
        ttl: Duration,
    ) -> Self {
        Self {
            database: database.into(),
            routers: routers.into_iter().collect(),
            readers: readers.into_iter().collect(),
            writers: writers.into_iter().collect(),
            ttl,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    /// A table knowing no servers at all, stale for every access mode.
    pub fn empty(database: impl Into<String>) -> Self {
        Self::new(database, [], [], [], Duration::ZERO)
    }

    /// Name of the database; empty for the default database.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Servers able to answer discovery.
    pub fn routers(&self) -> Arc<Vec<Address>> {
        self.routers.snapshot()
    }

    /// Servers serving reads.
    pub fn readers(&self) -> Arc<Vec<Address>> {
        self.readers.snapshot()
    }

    /// Servers serving writes.
    pub fn writers(&self) -> Arc<Vec<Address>> {
        self.writers.snapshot()
    }

    /// Servers able to serve the given access mode.
    pub fn servers_for(&self, mode: AccessMode) -> Arc<Vec<Address>> {
        match mode {
            AccessMode::Read => self.readers(),
            AccessMode::Write => self.writers(),
        }
    }

    /// Time to live the table was created with.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether the table must be rediscovered before serving `mode`.
    ///
    /// A table without writers is legitimate (e.g. during a leader election),
    /// but it is stale for writes so that a refresh is attempted.
    pub fn is_stale(&self, mode: AccessMode) -> bool {
        self.is_expired()
            || self.routers.is_empty()
            || match mode {
                AccessMode::Read => self.readers.is_empty(),
                AccessMode::Write => self.writers.is_empty(),
            }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Whether the table expired at least `delay` ago.
    pub fn is_expired_for(&self, delay: Duration) -> bool {
        self.expires_at
            .and_then(|at| at.checked_add(delay))
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// A read is requested while the table still has readers but lost its writers.
    pub fn is_reading_in_absence_of_writer(&self, mode: AccessMode) -> bool {
        mode == AccessMode::Read && !self.readers.is_empty() && self.writers.is_empty()
    }

    /// Removes `address` from every role.
    pub fn remove(&self, address: &Address) {
        self.routers.remove(address);
        self.readers.remove(address);
        self.writers.remove(address);
    }

    /// Removes `address` from the writers only.
    pub fn remove_writer(&self, address: &Address) {
        self.writers.remove(address);
    }

    /// Removes every server from every role.
    pub fn clear(&self) {
        self.routers.clear();
        self.readers.clear();
        self.writers.clear();
    }

    /// Puts `addresses` in front of the known routers, without duplicates.
    pub fn prepend_routers(&self, addresses: impl IntoIterator<Item = Address>) {
        self.routers.prepend_all(addresses);
    }

    /// Next router in rotation.
    pub(crate) fn next_router(&self) -> Option<Address> {
        self.routers.try_next()
    }

    /// Every server the table mentions, whatever its role.
    pub fn all_servers(&self) -> HashSet<Address> {
        let mut all = HashSet::new();
        all.extend(self.routers().iter().cloned());
        all.extend(self.readers().iter().cloned());
        all.extend(self.writers().iter().cloned());
        all
    }
}

impl Display for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let database = if self.database.is_empty() {
            "default database"
        } else {
            &self.database
        };
        write!(
            f,
            "RoutingTable{{database={}, routers=[{}], writers=[{}], readers=[{}], ttl={}s}}",
            database,
            self.routers,
            self.writers,
            self.readers,
            self.ttl.as_secs()
        )
    }
}
