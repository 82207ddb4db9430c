//! Process-wide connection registry (spec §2, §4.2).
//!
//! Maps `ConnectionID -> RegisteredConnection`. Cross-references to the
//! live socket and to a pool entry are small ids looked up on demand
//! (spec §9 "cyclic references" remediation) — the registry never owns a
//! socket handle.

use crate::common::metadata::Metadata;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Process-unique connection identifier, format `conn_<seq>_<epoch_ms>`
/// (spec §3). Sequence alone guarantees uniqueness even if the wall clock
/// does not advance between two registrations (invariant 8).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    fn generate() -> Self {
        static SEQ: AtomicU64 = AtomicU64::new(1);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        ConnectionId(format!("conn_{}_{}", seq, now_ms()))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application-level wire protocol of a registered connection (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http10,
    Http11,
    Http2,
    Http3,
    WebSocket,
    Tls,
    Tcp,
}

/// Registry-tracked lifecycle state (spec §3), distinct from the narrower
/// `transport::SocketState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    InUse,
    Draining,
    Closing,
    Closed,
    Error,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionCounters {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub request_count: u64,
    pub error_count: u64,
}

/// A registered connection's full record (spec §3 `RegisteredConnection`).
#[derive(Debug, Clone)]
pub struct RegisteredConnection {
    pub id: ConnectionId,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub state: ConnectionState,
    pub counters: ConnectionCounters,
    pub metadata: Metadata,
    pub created_at: u64,
    pub last_activity_at: u64,
}

/// Query filter for `ConnectionRegistry::query` (spec §4.2); fields are
/// ANDed, and age/idle fields are evaluated against `now`.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<Protocol>,
    pub state: Option<ConnectionState>,
    pub min_age_ms: Option<u64>,
    pub max_age_ms: Option<u64>,
    pub min_idle_ms: Option<u64>,
}

impl QueryFilter {
    fn matches(&self, conn: &RegisteredConnection, now: u64) -> bool {
        if let Some(ref host) = self.host {
            if &conn.host != host {
                return false;
            }
        }
        if let Some(port) = self.port {
            if conn.port != port {
                return false;
            }
        }
        if let Some(protocol) = self.protocol {
            if conn.protocol != protocol {
                return false;
            }
        }
        if let Some(state) = self.state {
            if conn.state != state {
                return false;
            }
        }
        let age = now.saturating_sub(conn.created_at);
        if let Some(min_age) = self.min_age_ms {
            if age < min_age {
                return false;
            }
        }
        if let Some(max_age) = self.max_age_ms {
            if age > max_age {
                return false;
            }
        }
        if let Some(min_idle) = self.min_idle_ms {
            let idle = now.saturating_sub(conn.last_activity_at);
            if idle < min_idle {
                return false;
            }
        }
        true
    }
}

/// Aggregate counts used by `ConnectionRegistry::statistics`.
#[derive(Debug, Clone, Default)]
pub struct RegistryStatistics {
    pub total: usize,
    pub by_state: std::collections::HashMap<&'static str, usize>,
    pub by_protocol: std::collections::HashMap<&'static str, usize>,
}

fn state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Idle => "idle",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::InUse => "in_use",
        ConnectionState::Draining => "draining",
        ConnectionState::Closing => "closing",
        ConnectionState::Closed => "closed",
        ConnectionState::Error => "error",
    }
}

fn protocol_label(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Http10 => "http/1.0",
        Protocol::Http11 => "http/1.1",
        Protocol::Http2 => "http/2",
        Protocol::Http3 => "http/3",
        Protocol::WebSocket => "websocket",
        Protocol::Tls => "tls",
        Protocol::Tcp => "tcp",
    }
}

/// Process-wide table mapping `ConnectionID -> RegisteredConnection`.
/// Sharded concurrent map (`dashmap`) — no `tokio::sync::Mutex` needed
/// since every mutation here is synchronous, between await points.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, RegisteredConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            connections: DashMap::new(),
        }
    }

    /// Registers a new connection in `Connecting` state and returns its id.
    pub fn register(&self, host: impl Into<String>, port: u16, protocol: Protocol, metadata: Metadata) -> ConnectionId {
        let id = ConnectionId::generate();
        let now = now_ms();
        let record = RegisteredConnection {
            id: id.clone(),
            host: host.into(),
            port,
            protocol,
            state: ConnectionState::Connecting,
            counters: ConnectionCounters::default(),
            metadata,
            created_at: now,
            last_activity_at: now,
        };
        self.connections.insert(id.clone(), record);
        id
    }

    pub fn set_state(&self, id: &ConnectionId, state: ConnectionState) {
        if let Some(mut entry) = self.connections.get_mut(id) {
            entry.state = state;
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<RegisteredConnection> {
        self.connections.get(id).map(|e| e.clone())
    }

    /// Records transferred bytes and advances `last_activity_at`.
    pub fn update_activity(&self, id: &ConnectionId, bytes_read: u64, bytes_written: u64) {
        if let Some(mut entry) = self.connections.get_mut(id) {
            entry.counters.bytes_read += bytes_read;
            entry.counters.bytes_written += bytes_written;
            entry.last_activity_at = now_ms();
        }
    }

    pub fn increment_requests(&self, id: &ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(id) {
            entry.counters.request_count += 1;
        }
    }

    pub fn increment_errors(&self, id: &ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(id) {
            entry.counters.error_count += 1;
        }
    }

    pub fn update_metadata(&self, id: &ConnectionId, key: impl Into<String>, value: impl Into<crate::common::metadata::Value>) {
        if let Some(mut entry) = self.connections.get_mut(id) {
            entry.metadata.set(key, value);
        }
    }

    pub fn unregister(&self, id: &ConnectionId) -> Option<RegisteredConnection> {
        self.connections.remove(id).map(|(_, v)| v)
    }

    pub fn query(&self, filter: &QueryFilter) -> Vec<RegisteredConnection> {
        let now = now_ms();
        self.connections
            .iter()
            .filter(|entry| filter.matches(entry.value(), now))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let mut stats = RegistryStatistics {
            total: self.connections.len(),
            ..Default::default()
        };
        for entry in self.connections.iter() {
            *stats.by_state.entry(state_label(entry.state)).or_insert(0) += 1;
            *stats
                .by_protocol
                .entry(protocol_label(entry.protocol))
                .or_insert(0) += 1;
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_starts_connecting() {
        let registry = ConnectionRegistry::new();
        let id = registry.register("example.com", 443, Protocol::Tls, Metadata::new());
        let conn = registry.get(&id).unwrap();
        assert_eq!(conn.state, ConnectionState::Connecting);
        assert_eq!(conn.host, "example.com");
    }

    #[test]
    fn test_unique_ids_for_process_lifetime() {
        let registry = ConnectionRegistry::new();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..1000 {
            let id = registry.register("h", 1, Protocol::Tcp, Metadata::new());
            assert!(ids.insert(id));
        }
    }

    #[test]
    fn test_update_activity_advances_timestamp_and_counters() {
        let registry = ConnectionRegistry::new();
        let id = registry.register("h", 1, Protocol::Tcp, Metadata::new());
        registry.update_activity(&id, 100, 50);
        let conn = registry.get(&id).unwrap();
        assert_eq!(conn.counters.bytes_read, 100);
        assert_eq!(conn.counters.bytes_written, 50);
    }

    #[test]
    fn test_query_filters_are_anded() {
        let registry = ConnectionRegistry::new();
        let id1 = registry.register("a.com", 80, Protocol::Tcp, Metadata::new());
        let _id2 = registry.register("b.com", 80, Protocol::Tcp, Metadata::new());
        registry.set_state(&id1, ConnectionState::InUse);

        let filter = QueryFilter {
            host: Some("a.com".to_string()),
            state: Some(ConnectionState::InUse),
            ..Default::default()
        };
        let results = registry.query(&filter);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id1);
    }

    #[test]
    fn test_unregister_removes_entry() {
        let registry = ConnectionRegistry::new();
        let id = registry.register("h", 1, Protocol::Tcp, Metadata::new());
        assert!(registry.unregister(&id).is_some());
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn test_statistics_by_state_and_protocol() {
        let registry = ConnectionRegistry::new();
        let id1 = registry.register("a", 1, Protocol::Tcp, Metadata::new());
        registry.register("b", 2, Protocol::Tls, Metadata::new());
        registry.set_state(&id1, ConnectionState::InUse);

        let stats = registry.statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_state.get("in_use"), Some(&1));
        assert_eq!(stats.by_protocol.get("tcp"), Some(&1));
        assert_eq!(stats.by_protocol.get("tls"), Some(&1));
    }

    #[test]
    fn test_increment_requests_and_errors() {
        let registry = ConnectionRegistry::new();
        let id = registry.register("h", 1, Protocol::Tcp, Metadata::new());
        registry.increment_requests(&id);
        registry.increment_requests(&id);
        registry.increment_errors(&id);
        let conn = registry.get(&id).unwrap();
        assert_eq!(conn.counters.request_count, 2);
        assert_eq!(conn.counters.error_count, 1);
    }
}
