//! Keyed connection pool for backend clients
//!
//! Entries are keyed by `(uri, user, database)`; secrets participate only in
//! client construction on a miss. A per-key creation lock prevents a
//! thundering herd of handshakes, and acquisition hands out RAII guards that
//! keep the in-flight count accurate. A background sweeper (driven by the
//! gateway's maintenance task) evicts entries that are idle beyond
//! `max_idle`, and `close` drains the pool at shutdown.
//!
//! Locking rule: the entry map is only ever locked for map mutation; client
//! construction and close run outside of it.

use dashmap::DashMap;
use flouds_core::error::{GatewayError, Result};
use flouds_core::traits::backend::{BackendConnector, VectorBackend};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pool identity of one backend client
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub uri: String,
    pub user: String,
    pub database: String,
}

struct PoolEntry {
    client: Arc<dyn VectorBackend>,
    created_at: Instant,
    last_used: Mutex<Instant>,
    in_flight: AtomicUsize,
}

impl PoolEntry {
    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .expect("pool entry lock poisoned")
            .elapsed()
    }
}

/// Per-key statistics exposed by the health surface
#[derive(Debug, Clone, Serialize)]
pub struct PoolEntryStats {
    pub uri: String,
    pub user: String,
    pub database: String,
    pub in_flight: usize,
    pub age_secs: u64,
    pub idle_secs: u64,
}

/// Aggregate pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub max_entries: usize,
    pub by_key: Vec<PoolEntryStats>,
}

/// RAII handle over a pooled client
///
/// Dropping the handle releases the entry: the in-flight count decrements
/// and the idle clock restarts.
pub struct PooledClient {
    entry: Arc<PoolEntry>,
}

impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient").finish_non_exhaustive()
    }
}

impl PooledClient {
    /// The underlying backend client
    #[must_use]
    pub fn client(&self) -> Arc<dyn VectorBackend> {
        self.entry.client.clone()
    }
}

impl std::ops::Deref for PooledClient {
    type Target = dyn VectorBackend;

    fn deref(&self) -> &Self::Target {
        &*self.entry.client
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::SeqCst);
        *self
            .entry
            .last_used
            .lock()
            .expect("pool entry lock poisoned") = Instant::now();
    }
}

/// Keyed, reference-counted, idle-evicted pool of backend clients
pub struct ConnectionPool {
    connector: Arc<dyn BackendConnector>,
    entries: DashMap<PoolKey, Arc<PoolEntry>>,
    creation_locks: DashMap<PoolKey, Arc<tokio::sync::Mutex<()>>>,
    max_entries: usize,
    max_idle: Duration,
    min_entries: usize,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("entries", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    #[must_use]
    pub fn new(
        connector: Arc<dyn BackendConnector>,
        max_entries: usize,
        max_idle: Duration,
        min_entries: usize,
    ) -> Self {
        Self {
            connector,
            entries: DashMap::new(),
            creation_locks: DashMap::new(),
            max_entries,
            max_idle,
            min_entries,
            closed: AtomicBool::new(false),
        }
    }

    /// Acquire a client for `(uri, user, database)`, constructing one on miss
    ///
    /// The secret is only consulted when a new client must be built;
    /// subsequent acquisitions assume the already-bound credentials remain
    /// valid.
    ///
    /// # Errors
    ///
    /// `GatewayError::Connection` when the pool is closed or exhausted, or
    /// when client construction fails (such clients are never cached).
    pub async fn acquire(
        &self,
        uri: &str,
        user: &str,
        secret: &str,
        database: &str,
    ) -> Result<PooledClient> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::connection("connection pool is shut down"));
        }
        let key = PoolKey {
            uri: uri.to_string(),
            user: user.to_string(),
            database: database.to_string(),
        };

        // Fast path: reuse a live entry
        if let Some(entry) = self.entries.get(&key) {
            entry.in_flight.fetch_add(1, Ordering::SeqCst);
            return Ok(PooledClient {
                entry: entry.clone(),
            });
        }

        // Slow path: construct under the per-key creation lock
        let creation_lock = self
            .creation_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _creating = creation_lock.lock().await;

        // Another task may have won the race while we waited
        if let Some(entry) = self.entries.get(&key) {
            entry.in_flight.fetch_add(1, Ordering::SeqCst);
            return Ok(PooledClient {
                entry: entry.clone(),
            });
        }

        if self.entries.len() >= self.max_entries {
            self.evict_one_idle().await;
            if self.entries.len() >= self.max_entries {
                warn!(
                    max_entries = self.max_entries,
                    "Connection pool exhausted, rejecting acquisition"
                );
                return Err(GatewayError::connection(
                    "connection pool exhausted: all entries are in flight",
                ));
            }
        }

        let client = self.connector.connect(uri, user, secret, database).await?;
        let entry = Arc::new(PoolEntry {
            client,
            created_at: Instant::now(),
            last_used: Mutex::new(Instant::now()),
            in_flight: AtomicUsize::new(1),
        });
        self.entries.insert(key.clone(), entry.clone());
        debug!(uri, user, database, "Pooled new backend client");
        Ok(PooledClient { entry })
    }

    /// Evict one zero-in-flight entry to make room, preferring the idlest
    async fn evict_one_idle(&self) {
        let victim = self
            .entries
            .iter()
            .filter(|kv| kv.value().in_flight.load(Ordering::SeqCst) == 0)
            .max_by_key(|kv| kv.value().idle_for())
            .map(|kv| kv.key().clone());
        if let Some(key) = victim {
            if let Some((_, entry)) = self.entries.remove(&key) {
                entry.client.close().await;
                debug!(?key, "Evicted idle pool entry to make room");
            }
        }
    }

    /// Close idle entries older than `max_idle`, respecting the soft floor
    ///
    /// Returns the number of entries evicted. Called by the background
    /// maintenance task every sweep interval.
    pub async fn sweep(&self) -> usize {
        let candidates: Vec<PoolKey> = self
            .entries
            .iter()
            .filter(|kv| {
                kv.value().in_flight.load(Ordering::SeqCst) == 0
                    && kv.value().idle_for() >= self.max_idle
            })
            .map(|kv| kv.key().clone())
            .collect();

        let mut evicted = 0;
        for key in candidates {
            if self.entries.len() <= self.min_entries {
                break;
            }
            // Re-check under removal; the entry may have been re-acquired
            let removable = self
                .entries
                .get(&key)
                .is_some_and(|e| e.in_flight.load(Ordering::SeqCst) == 0);
            if removable {
                if let Some((_, entry)) = self.entries.remove(&key) {
                    entry.client.close().await;
                    evicted += 1;
                }
            }
        }

        self.creation_locks
            .retain(|key, _| self.entries.contains_key(key));

        if evicted > 0 {
            debug!(evicted, "Pool sweep closed idle entries");
        }
        evicted
    }

    /// Aggregate statistics for health and metrics surfaces
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut by_key = Vec::with_capacity(self.entries.len());
        let mut active = 0;
        for kv in self.entries.iter() {
            let in_flight = kv.value().in_flight.load(Ordering::SeqCst);
            if in_flight > 0 {
                active += 1;
            }
            by_key.push(PoolEntryStats {
                uri: kv.key().uri.clone(),
                user: kv.key().user.clone(),
                database: kv.key().database.clone(),
                in_flight,
                age_secs: kv.value().created_at.elapsed().as_secs(),
                idle_secs: kv.value().idle_for().as_secs(),
            });
        }
        let total = by_key.len();
        PoolStats {
            total,
            active,
            idle: total - active,
            max_entries: self.max_entries,
            by_key,
        }
    }

    /// Drain and close all clients; further acquisitions fail
    ///
    /// Waits up to `grace` for in-flight operations to finish, then
    /// force-closes whatever remains.
    pub async fn close(&self, grace: Duration) {
        self.closed.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + grace;
        loop {
            let in_flight: usize = self
                .entries
                .iter()
                .map(|kv| kv.value().in_flight.load(Ordering::SeqCst))
                .sum();
            if in_flight == 0 || Instant::now() >= deadline {
                if in_flight > 0 {
                    warn!(in_flight, "Force-closing pool with operations in flight");
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let keys: Vec<PoolKey> = self.entries.iter().map(|kv| kv.key().clone()).collect();
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                entry.client.close().await;
            }
        }
        self.creation_locks.clear();
        info!("Connection pool closed");
    }
}
