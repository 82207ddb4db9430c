//! Connection pool (spec §2, §4.8).
//!
//! One `HostConnectionPool` per `(host, port)`, bounded by
//! `PoolConfig::max_connections`. Idle connections older than
//! `idle_timeout_ms` or alive longer than `max_lifetime_ms` are reaped by a
//! periodic background task, the same "cancellable task handle stored on
//! the pool" pattern the teacher uses for its background warmup worker.

use crate::common::error::{Error, Result};
use crate::config::PoolConfig;
use crate::events::{EventBus, EventType, NetworkEvent};
use crate::registry::{ConnectionId, ConnectionRegistry, ConnectionState, Protocol};
use crate::resource::{ResourceKind, ResourceTracker};
use crate::transport::{self, Socket};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A connector dials a fresh upstream connection for a host pool; the
/// default is a direct TCP dial, but `UpstreamConnectionManager` can plug
/// in a `ProxyChain::connect` here instead.
pub type Connector =
    Arc<dyn Fn(String, u16) -> Pin<Box<dyn Future<Output = Result<Box<dyn Socket>>> + Send>> + Send + Sync>;

fn direct_connector() -> Connector {
    Arc::new(|host: String, port: u16| {
        Box::pin(async move {
            let socket = transport::connect_tcp(&host, port).await?;
            Ok(Box::new(socket) as Box<dyn Socket>)
        })
    })
}

struct Idle {
    conn_id: ConnectionId,
    socket: Box<dyn Socket>,
    created_at: Instant,
    last_used_at: Instant,
}

impl Idle {
    fn is_stale(&self, idle_timeout: Duration, max_lifetime: Duration) -> bool {
        self.last_used_at.elapsed() > idle_timeout || self.created_at.elapsed() > max_lifetime
    }
}

/// A connection leased from the pool. Dropping without calling
/// `ConnectionPoolManager::release`/`remove` leaks the slot in `total` —
/// callers are expected to always release or remove, mirroring an RAII
/// guard without implementing `Drop` itself (the coordinator owns the
/// socket's lifetime, not this struct).
pub struct PooledConnection {
    pub id: ConnectionId,
    pub host: String,
    pub port: u16,
    pub socket: Box<dyn Socket>,
    pub created_at: Instant,
}

/// Pool of connections to a single `(host, port)` target.
pub struct HostConnectionPool {
    host: String,
    port: u16,
    config: PoolConfig,
    idle: Mutex<VecDeque<Idle>>,
    total: AtomicUsize,
    cleanup_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    registry: Arc<ConnectionRegistry>,
    tracker: Arc<ResourceTracker>,
}

impl HostConnectionPool {
    fn new(
        host: String,
        port: u16,
        config: PoolConfig,
        registry: Arc<ConnectionRegistry>,
        tracker: Arc<ResourceTracker>,
    ) -> Arc<Self> {
        Arc::new(HostConnectionPool {
            host,
            port,
            config,
            idle: Mutex::new(VecDeque::new()),
            total: AtomicUsize::new(0),
            cleanup_handle: Mutex::new(None),
            registry,
            tracker,
        })
    }

    /// Spawns the periodic stale-connection reaper. Idempotent: a second
    /// call replaces (and aborts) the previous task handle.
    fn start_cleanup(self: &Arc<Self>) {
        let this = self.clone();
        let interval = Duration::from_millis(self.config.health_check_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.reap_stale();
            }
        });
        let mut slot = self.cleanup_handle.lock();
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = Some(handle);
    }

    /// Closes, unregisters and releases the tracker quota for one evicted
    /// idle connection (spec §4.8: "close, unregister, remove"). The socket
    /// itself is dropped here rather than asynchronously closed — the
    /// periodic reaper and `take_idle` are both synchronous call sites.
    fn evict(&self, conn_id: &ConnectionId) {
        self.registry.unregister(conn_id);
        self.tracker.release(ResourceKind::Connections, 1);
    }

    fn reap_stale(&self) {
        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let max_lifetime = Duration::from_millis(self.config.max_lifetime_ms);
        let mut idle = self.idle.lock();
        let mut stale = Vec::new();
        idle.retain(|c| {
            if c.is_stale(idle_timeout, max_lifetime) {
                stale.push(c.conn_id.clone());
                false
            } else {
                true
            }
        });
        drop(idle);
        if !stale.is_empty() {
            self.total.fetch_sub(stale.len(), Ordering::SeqCst);
            for conn_id in &stale {
                self.evict(conn_id);
            }
            debug!(host = %self.host, port = self.port, reaped = stale.len(), "reaped stale pooled connections");
        }
    }

    /// Pops the first non-stale idle connection, evicting any stale ones
    /// found ahead of it.
    fn take_idle(&self) -> Option<Idle> {
        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let max_lifetime = Duration::from_millis(self.config.max_lifetime_ms);
        loop {
            let front = self.idle.lock().pop_front()?;
            if front.is_stale(idle_timeout, max_lifetime) {
                self.total.fetch_sub(1, Ordering::SeqCst);
                self.evict(&front.conn_id);
                continue;
            }
            return Some(front);
        }
    }

    fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn abort_cleanup(&self) {
        if let Some(handle) = self.cleanup_handle.lock().take() {
            handle.abort();
        }
    }
}

/// Aggregate counters surfaced per host pool (spec §4.8 statistics).
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
}

/// Owns one `HostConnectionPool` per `(host, port)` and wires acquire/
/// release through the registry, resource tracker, and event bus.
pub struct ConnectionPoolManager {
    pools: DashMap<(String, u16), Arc<HostConnectionPool>>,
    config: PoolConfig,
    connector: Connector,
    registry: Arc<ConnectionRegistry>,
    tracker: Arc<ResourceTracker>,
    events: EventBus,
}

impl ConnectionPoolManager {
    pub fn new(config: PoolConfig, registry: Arc<ConnectionRegistry>, tracker: Arc<ResourceTracker>, events: EventBus) -> Self {
        ConnectionPoolManager {
            pools: DashMap::new(),
            config,
            connector: direct_connector(),
            registry,
            tracker,
            events,
        }
    }

    /// Overrides how fresh connections are dialed (e.g. through a proxy chain).
    pub fn with_connector(mut self, connector: Connector) -> Self {
        self.connector = connector;
        self
    }

    fn get_or_create_pool(&self, host: &str, port: u16) -> Arc<HostConnectionPool> {
        self.pools
            .entry((host.to_string(), port))
            .or_insert_with(|| {
                let pool = HostConnectionPool::new(
                    host.to_string(),
                    port,
                    self.config,
                    self.registry.clone(),
                    self.tracker.clone(),
                );
                pool.start_cleanup();
                pool
            })
            .clone()
    }

    /// Acquires a connection to `host:port`: reuses an idle one if
    /// available, otherwise dials a new one if under `max_connections`,
    /// otherwise fails with `Error::PoolExhausted`.
    pub async fn acquire(&self, host: &str, port: u16) -> Result<PooledConnection> {
        let pool = self.get_or_create_pool(host, port);

        if let Some(idle) = pool.take_idle() {
            self.registry.set_state(&idle.conn_id, ConnectionState::InUse);
            self.registry.increment_requests(&idle.conn_id);
            self.events
                .emit(NetworkEvent::new(EventType::PoolAcquired).with_connection(idle.conn_id.to_string()))
                .await;
            return Ok(PooledConnection {
                id: idle.conn_id,
                host: host.to_string(),
                port,
                socket: idle.socket,
                created_at: idle.created_at,
            });
        }

        if pool.total() >= self.config.max_connections {
            self.events
                .emit(NetworkEvent::new(EventType::PoolExhausted))
                .await;
            return Err(Error::pool_exhausted(format!(
                "pool for {}:{} at max_connections={}",
                host, port, self.config.max_connections
            )));
        }

        if !self.tracker.allocate(ResourceKind::Connections, 1) {
            return Err(Error::resource_exhausted("connection quota exhausted"));
        }

        let dial = (self.connector)(host.to_string(), port);
        let socket = match tokio::time::timeout(
            Duration::from_millis(self.config.connection_timeout_ms),
            dial,
        )
        .await
        {
            Ok(Ok(socket)) => socket,
            Ok(Err(err)) => {
                self.tracker.release(ResourceKind::Connections, 1);
                return Err(err);
            }
            Err(_) => {
                self.tracker.release(ResourceKind::Connections, 1);
                return Err(Error::timeout(format!("dial {}:{} exceeded connection_timeout_ms", host, port)));
            }
        };

        pool.total.fetch_add(1, Ordering::SeqCst);
        let protocol = if port == 443 { Protocol::Tls } else { Protocol::Tcp };
        let id = self
            .registry
            .register(host, port, protocol, crate::common::metadata::Metadata::new());
        self.registry.set_state(&id, ConnectionState::InUse);
        self.events
            .emit(NetworkEvent::new(EventType::ConnectionOpened).with_connection(id.to_string()))
            .await;

        Ok(PooledConnection {
            id,
            host: host.to_string(),
            port,
            socket,
            created_at: Instant::now(),
        })
    }

    /// Returns a connection to its pool for reuse. If the idle queue is
    /// already at `max_connections` the connection is closed and dropped
    /// instead (mirrors the teacher's "pool full, dropping connection").
    pub async fn release(&self, mut conn: PooledConnection) {
        let pool = self.get_or_create_pool(&conn.host, conn.port);

        if pool.idle_len() >= self.config.max_connections {
            let _ = conn.socket.close().await;
            pool.total.fetch_sub(1, Ordering::SeqCst);
            self.tracker.release(ResourceKind::Connections, 1);
            self.registry.unregister(&conn.id);
            return;
        }

        self.registry.set_state(&conn.id, ConnectionState::Idle);
        pool.idle.lock().push_back(Idle {
            conn_id: conn.id.clone(),
            socket: conn.socket,
            created_at: conn.created_at,
            last_used_at: Instant::now(),
        });
        self.events
            .emit(NetworkEvent::new(EventType::PoolReleased).with_connection(conn.id.to_string()))
            .await;
    }

    /// Removes a connection permanently (e.g. it errored) instead of
    /// returning it to the idle pool.
    pub async fn remove(&self, mut conn: PooledConnection) {
        let pool = self.get_or_create_pool(&conn.host, conn.port);
        let _ = conn.socket.close().await;
        pool.total.fetch_sub(1, Ordering::SeqCst);
        self.tracker.release(ResourceKind::Connections, 1);
        self.registry.unregister(&conn.id);
    }

    pub fn stats(&self, host: &str, port: u16) -> PoolStats {
        match self.pools.get(&(host.to_string(), port)) {
            Some(pool) => {
                let idle = pool.idle_len();
                let total = pool.total();
                PoolStats {
                    total,
                    idle,
                    in_use: total.saturating_sub(idle),
                }
            }
            None => PoolStats::default(),
        }
    }

    /// Aborts every pool's cleanup task and closes all idle connections.
    pub async fn close_all(&self) {
        for entry in self.pools.iter() {
            entry.value().abort_cleanup();
        }
        for entry in self.pools.iter() {
            let mut idle = entry.value().idle.lock();
            let drained: Vec<Idle> = idle.drain(..).collect();
            drop(idle);
            for mut conn in drained {
                let _ = conn.socket.close().await;
            }
        }
        self.pools.clear();
    }
}
