//! Network Coordinator (spec §2, §4.11): the façade binding Registry,
//! Resource Tracker, Event Bus, and Lifecycle Manager into atomic
//! cross-cutting operations so callers never update one without the
//! others drifting out of sync.

use crate::common::error::{Error, Result};
use crate::common::metadata::Metadata;
use crate::events::{EventBus, EventType, NetworkEvent};
use crate::lifecycle::{LifecycleManager, Phase};
use crate::pool::{ConnectionPoolManager, PooledConnection};
use crate::registry::{ConnectionId, ConnectionRegistry, ConnectionState, Protocol};
use crate::resource::{ResourceKind, ResourceTracker};
use std::sync::Arc;
use tracing::warn;

/// Binds the pool, registry, resource tracker, event bus and lifecycle
/// manager into one entry point. Every method here keeps those four
/// subsystems consistent with each other; callers should not mutate them
/// directly once a `NetworkCoordinator` owns a connection.
pub struct NetworkCoordinator {
    pool: ConnectionPoolManager,
    registry: Arc<ConnectionRegistry>,
    tracker: Arc<ResourceTracker>,
    events: EventBus,
    lifecycle: Arc<LifecycleManager>,
}

impl NetworkCoordinator {
    pub fn new(
        pool: ConnectionPoolManager,
        registry: Arc<ConnectionRegistry>,
        tracker: Arc<ResourceTracker>,
        events: EventBus,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        NetworkCoordinator {
            pool,
            registry,
            tracker,
            events,
            lifecycle,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Acquires a connection to `host:port` through the pool, running the
    /// `BeforeConnect`/`AfterConnect` lifecycle phases around it and
    /// emitting `ConnectionOpened` on success.
    ///
    /// Per spec §4.11, a precondition check against the `ResourceTracker`
    /// runs first: if the connection quota is already exhausted, this emits
    /// `resource:exhausted` and returns without touching lifecycle or the
    /// registry at all.
    pub async fn open_connection(&self, host: &str, port: u16) -> Result<PooledConnection> {
        if self.tracker.current(ResourceKind::Connections) >= self.tracker.limit(ResourceKind::Connections) {
            warn!(host, port, "open_connection denied: connection quota exhausted");
            self.events
                .emit(NetworkEvent::new(EventType::ResourceExhausted))
                .await;
            return Err(Error::resource_exhausted(format!(
                "connection quota exhausted for {}:{}",
                host, port
            )));
        }

        self.lifecycle
            .execute_phase(format!("{}:{}", host, port), Phase::BeforeConnect, Metadata::new())
            .await;

        match self.pool.acquire(host, port).await {
            Ok(conn) => {
                self.lifecycle
                    .execute_phase(conn.id.to_string(), Phase::AfterConnect, Metadata::new())
                    .await;
                Ok(conn)
            }
            Err(err) => {
                warn!(host, port, error = %err, "open_connection failed");
                let event_type = match &err {
                    Error::ResourceExhausted(_) => EventType::ResourceExhausted,
                    _ => EventType::ConnectionError,
                };
                self.events.emit(NetworkEvent::new(event_type)).await;
                Err(err)
            }
        }
    }

    /// Closes a connection: runs `BeforeClose`/`AfterClose`, releases it
    /// back to the pool (healthy) or removes it (unhealthy) and reconciles
    /// registry state, then emits `ConnectionClosed`.
    pub async fn close_connection(&self, conn: PooledConnection, healthy: bool) {
        let id = conn.id.clone();
        self.lifecycle
            .execute_phase(id.to_string(), Phase::BeforeClose, Metadata::new())
            .await;

        if healthy {
            self.pool.release(conn).await;
        } else {
            self.registry.set_state(&id, ConnectionState::Error);
            self.pool.remove(conn).await;
        }

        self.lifecycle
            .execute_phase(id.to_string(), Phase::AfterClose, Metadata::new())
            .await;
        self.events
            .emit(NetworkEvent::new(EventType::ConnectionClosed).with_connection(id.to_string()))
            .await;
    }

    /// Marks the start of a request on `id`: runs `BeforeRequest`,
    /// increments the registry's request counter, emits `RequestStarted`.
    pub async fn handle_request(&self, id: &ConnectionId) {
        self.registry.increment_requests(id);
        self.lifecycle
            .execute_phase(id.to_string(), Phase::BeforeRequest, Metadata::new())
            .await;
        self.events
            .emit(NetworkEvent::new(EventType::RequestStarted).with_connection(id.to_string()))
            .await;
    }

    /// Marks a response received on `id`: runs `BeforeResponse`/
    /// `AfterResponse`, emits `ResponseReceived` then `RequestCompleted`.
    pub async fn handle_response(&self, id: &ConnectionId) {
        self.lifecycle
            .execute_phase(id.to_string(), Phase::BeforeResponse, Metadata::new())
            .await;
        self.events
            .emit(NetworkEvent::new(EventType::ResponseReceived).with_connection(id.to_string()))
            .await;
        self.lifecycle
            .execute_phase(id.to_string(), Phase::AfterResponse, Metadata::new())
            .await;
        self.events
            .emit(NetworkEvent::new(EventType::RequestCompleted).with_connection(id.to_string()))
            .await;
    }

    /// Records an error against `id`: increments the registry's error
    /// counter, transitions registry state to `Error`, runs `OnError`, and
    /// emits `ConnectionError`.
    pub async fn handle_error(&self, id: &ConnectionId, error: &Error) {
        self.registry.increment_errors(id);
        self.registry.set_state(id, ConnectionState::Error);
        let metadata = Metadata::new().with("error", error.to_string());
        self.lifecycle.execute_phase(id.to_string(), Phase::OnError, metadata).await;
        self.events
            .emit(NetworkEvent::new(EventType::ConnectionError).with_connection(id.to_string()))
            .await;
    }

    /// Records `n` bytes read on `id`: updates registry counters, the
    /// resource tracker's bandwidth window, and emits `DataRead`.
    pub async fn record_data_read(&self, id: &ConnectionId, n: u64) {
        self.registry.update_activity(id, n, 0);
        self.tracker.record_bandwidth(n);
        self.events
            .emit(NetworkEvent::new(EventType::DataRead).with_connection(id.to_string()))
            .await;
    }

    /// Records `n` bytes written on `id`: updates registry counters, the
    /// resource tracker's bandwidth window, and emits `DataWritten`.
    pub async fn record_data_write(&self, id: &ConnectionId, n: u64) {
        self.registry.update_activity(id, 0, n);
        self.tracker.record_bandwidth(n);
        self.events
            .emit(NetworkEvent::new(EventType::DataWritten).with_connection(id.to_string()))
            .await;
    }

    /// True iff resource pressure is below the overload threshold and the
    /// registry holds no connections in `Error` state exceeding a 10%
    /// share of the total (a simple composite health signal; no single
    /// spec field defines "healthy" so this combines the two subsystems
    /// that do carry a pressure/error signal).
    pub fn is_healthy(&self) -> bool {
        if self.tracker.is_under_pressure() {
            return false;
        }
        let stats = self.registry.statistics();
        if stats.total == 0 {
            return true;
        }
        let errors = *stats.by_state.get("error").unwrap_or(&0);
        (errors as f64 / stats.total as f64) < 0.1
    }

    pub fn resource_pressure(&self) -> f64 {
        self.tracker.get_pressure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, ResourceLimits};
    use crate::transport::Socket;
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

    struct FakeSocket;

    impl AsyncRead for FakeSocket {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for FakeSocket {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[async_trait::async_trait]
    impl Socket for FakeSocket {
        fn local_addr(&self) -> Option<SocketAddr> {
            None
        }
        fn remote_addr(&self) -> Option<SocketAddr> {
            None
        }
        fn state(&self) -> crate::transport::SocketState {
            crate::transport::SocketState::Open
        }
        fn stats(&self) -> crate::transport::SocketStats {
            crate::transport::SocketStats {
                bytes_read: 0,
                bytes_written: 0,
                opened_at: 0,
                last_active_at: 0,
            }
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn test_coordinator() -> NetworkCoordinator {
        let registry = Arc::new(ConnectionRegistry::new());
        let tracker = Arc::new(ResourceTracker::new(ResourceLimits::default()));
        let events = EventBus::new();
        let lifecycle = Arc::new(LifecycleManager::new());
        let pool = ConnectionPoolManager::new(PoolConfig::default(), registry.clone(), tracker.clone(), events.clone())
            .with_connector(Arc::new(|_h, _p| Box::pin(async { Ok(Box::new(FakeSocket) as Box<dyn Socket>) })));
        NetworkCoordinator::new(pool, registry, tracker, events, lifecycle)
    }

    #[tokio::test]
    async fn test_open_connection_runs_lifecycle_phases() {
        let coordinator = test_coordinator();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s1 = seen.clone();
        coordinator.lifecycle().register(Phase::BeforeConnect, 0, move |_, _| {
            let s = s1.clone();
            async move {
                s.lock().push("before");
                Ok(())
            }
        });
        let s2 = seen.clone();
        coordinator.lifecycle().register(Phase::AfterConnect, 0, move |_, _| {
            let s = s2.clone();
            async move {
                s.lock().push("after");
                Ok(())
            }
        });

        let conn = coordinator.open_connection("example.com", 443).await.unwrap();
        assert_eq!(*seen.lock(), vec!["before", "after"]);
        coordinator.close_connection(conn, true).await;
    }

    #[tokio::test]
    async fn test_handle_error_marks_registry_and_fires_hook() {
        let coordinator = test_coordinator();
        let conn = coordinator.open_connection("h", 1).await.unwrap();
        coordinator.handle_error(&conn.id, &Error::connection("boom")).await;

        let record = coordinator.registry().get(&conn.id).unwrap();
        assert_eq!(record.state, ConnectionState::Error);
        assert_eq!(record.counters.error_count, 1);
    }

    #[tokio::test]
    async fn test_record_data_updates_counters() {
        let coordinator = test_coordinator();
        let conn = coordinator.open_connection("h", 1).await.unwrap();
        coordinator.record_data_read(&conn.id, 100).await;
        coordinator.record_data_write(&conn.id, 40).await;

        let record = coordinator.registry().get(&conn.id).unwrap();
        assert_eq!(record.counters.bytes_read, 100);
        assert_eq!(record.counters.bytes_written, 40);
    }

    #[tokio::test]
    async fn test_is_healthy_reflects_resource_pressure() {
        let coordinator = test_coordinator();
        assert!(coordinator.is_healthy());
        coordinator.tracker.allocate(ResourceKind::Connections, 9_001);
        assert!(!coordinator.is_healthy());
    }

    #[tokio::test]
    async fn test_open_connection_emits_resource_exhausted_on_tracker_denial() {
        let registry = Arc::new(ConnectionRegistry::new());
        let tracker = Arc::new(ResourceTracker::new(ResourceLimits {
            connections: 1,
            ..ResourceLimits::default()
        }));
        let events = EventBus::new();
        let lifecycle = Arc::new(LifecycleManager::new());
        let pool = ConnectionPoolManager::new(PoolConfig::default(), registry.clone(), tracker.clone(), events.clone())
            .with_connector(Arc::new(|_h, _p| Box::pin(async { Ok(Box::new(FakeSocket) as Box<dyn Socket>) })));
        let coordinator = NetworkCoordinator::new(pool, registry, tracker.clone(), events.clone(), lifecycle);

        // Saturate the connection quota so the precondition check denies.
        assert!(tracker.allocate(ResourceKind::Connections, 1));

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = seen.clone();
        events.on(EventType::ResourceExhausted, move |_ev| {
            let s = s.clone();
            async move {
                s.lock().push("resource:exhausted");
            }
        });
        let s2 = seen.clone();
        events.on(EventType::ConnectionError, move |_ev| {
            let s = s2.clone();
            async move {
                s.lock().push("connection:error");
            }
        });

        let err = coordinator.open_connection("h", 1).await.unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
        assert_eq!(*seen.lock(), vec!["resource:exhausted"]);
        assert_eq!(coordinator.registry().statistics().total, 0);
    }

    #[tokio::test]
    async fn test_close_connection_unhealthy_removes_not_releases() {
        let coordinator = test_coordinator();
        let conn = coordinator.open_connection("h", 1).await.unwrap();
        let id = conn.id.clone();
        coordinator.close_connection(conn, false).await;
        assert!(coordinator.registry().get(&id).is_none());
    }
}
