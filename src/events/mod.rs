//! Typed, queued, ordered pub/sub event bus (spec §2, §4.4, §5).
//!
//! FIFO queue; handlers for a given event type run in subscription order,
//! wildcard handlers after type-specific ones. Processing is cooperative
//! and serialized — no two handler invocations for different events
//! overlap, and a handler that emits an event observes it only after the
//! current drain completes (it is appended to the back of the same
//! queue). A one-shot subscription is removed after its first call
//! whether or not it threw.

use crate::common::metadata::Metadata;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use tracing::{trace, warn};

/// The fixed event taxonomy (spec §2, §3 `NetworkEvent.tag`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    ConnectionOpened,
    ConnectionClosed,
    ConnectionError,
    RequestStarted,
    RequestCompleted,
    ResponseReceived,
    DataRead,
    DataWritten,
    PoolAcquired,
    PoolReleased,
    PoolExhausted,
    HealthCheckPassed,
    HealthCheckFailed,
    CircuitOpened,
    CircuitClosed,
    CircuitHalfOpen,
    ResourceExhausted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ConnectionOpened => "connection:opened",
            EventType::ConnectionClosed => "connection:closed",
            EventType::ConnectionError => "connection:error",
            EventType::RequestStarted => "request:started",
            EventType::RequestCompleted => "request:completed",
            EventType::ResponseReceived => "response:received",
            EventType::DataRead => "data:read",
            EventType::DataWritten => "data:written",
            EventType::PoolAcquired => "pool:acquired",
            EventType::PoolReleased => "pool:released",
            EventType::PoolExhausted => "pool:exhausted",
            EventType::HealthCheckPassed => "health:passed",
            EventType::HealthCheckFailed => "health:failed",
            EventType::CircuitOpened => "circuit:opened",
            EventType::CircuitClosed => "circuit:closed",
            EventType::CircuitHalfOpen => "circuit:half_open",
            EventType::ResourceExhausted => "resource:exhausted",
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A queued, typed network event (spec §3 `NetworkEvent`).
#[derive(Debug, Clone)]
pub struct NetworkEvent {
    pub event_type: EventType,
    pub timestamp: u64,
    pub connection_id: Option<String>,
    pub metadata: Metadata,
}

impl NetworkEvent {
    pub fn new(event_type: EventType) -> Self {
        NetworkEvent {
            event_type,
            timestamp: now_ms(),
            connection_id: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_connection(mut self, id: impl Into<String>) -> Self {
        self.connection_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type HandlerFn = Arc<dyn Fn(NetworkEvent) -> HandlerFuture + Send + Sync>;

struct Subscription {
    id: u64,
    handler: HandlerFn,
    one_shot: bool,
}

#[derive(Default)]
struct Subscribers {
    typed: Vec<Subscription>,
    wildcard: Vec<Subscription>,
}

/// A FIFO, single-drain-at-a-time event bus. Clone cheaply (internally
/// `Arc`-backed) to share across coordinator/pool/circuit-breaker callers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

struct EventBusInner {
    queue: Mutex<VecDeque<NetworkEvent>>,
    subscribers: Mutex<std::collections::HashMap<EventType, Subscribers>>,
    wildcard: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    draining: Mutex<bool>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            inner: Arc::new(EventBusInner {
                queue: Mutex::new(VecDeque::new()),
                subscribers: Mutex::new(std::collections::HashMap::new()),
                wildcard: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                draining: Mutex::new(false),
            }),
        }
    }

    /// Subscribes a handler to a specific event type. Returns a subscriber
    /// id that can be passed to `unsubscribe`.
    pub fn on<F, Fut>(&self, event_type: EventType, handler: F) -> u64
    where
        F: Fn(NetworkEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(Some(event_type), handler, false)
    }

    /// Subscribes a handler to every event type, run after type-specific handlers.
    pub fn on_any<F, Fut>(&self, handler: F) -> u64
    where
        F: Fn(NetworkEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(None, handler, false)
    }

    /// One-shot subscription, automatically removed after its first call.
    pub fn once<F, Fut>(&self, event_type: EventType, handler: F) -> u64
    where
        F: Fn(NetworkEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(Some(event_type), handler, true)
    }

    fn subscribe<F, Fut>(&self, event_type: Option<EventType>, handler: F, one_shot: bool) -> u64
    where
        F: Fn(NetworkEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let wrapped: HandlerFn = Arc::new(move |ev| Box::pin(handler(ev)));
        let sub = Subscription {
            id,
            handler: wrapped,
            one_shot,
        };
        match event_type {
            Some(t) => {
                self.inner
                    .subscribers
                    .lock()
                    .entry(t)
                    .or_default()
                    .typed
                    .push(sub);
            }
            None => self.inner.wildcard.lock().push(sub),
        }
        id
    }

    /// Removes a subscription by id, searched across typed and wildcard lists.
    pub fn unsubscribe(&self, id: u64) {
        let mut subs = self.inner.subscribers.lock();
        for bucket in subs.values_mut() {
            bucket.typed.retain(|s| s.id != id);
        }
        self.inner.wildcard.lock().retain(|s| s.id != id);
    }

    /// Enqueues an event and, if no drain is currently in progress, drains
    /// the queue serially. Emitting from inside a handler only appends —
    /// the handler sees its own emission only after the current drain
    /// finishes, preserving the no-re-entrancy guarantee.
    pub async fn emit(&self, event: NetworkEvent) {
        trace!(event = event.event_type.as_str(), "event enqueued");
        self.inner.queue.lock().push_back(event);
        self.drain_if_idle().await;
    }

    async fn drain_if_idle(&self) {
        {
            let mut draining = self.inner.draining.lock();
            if *draining {
                return;
            }
            *draining = true;
        }

        loop {
            let next = self.inner.queue.lock().pop_front();
            let Some(event) = next else { break };

            let typed_handlers: Vec<HandlerFn> = {
                let subs = self.inner.subscribers.lock();
                subs.get(&event.event_type)
                    .map(|b| b.typed.iter().map(|s| s.handler.clone()).collect())
                    .unwrap_or_default()
            };
            let wildcard_handlers: Vec<HandlerFn> = self
                .inner
                .wildcard
                .lock()
                .iter()
                .map(|s| s.handler.clone())
                .collect();

            for handler in typed_handlers.iter().chain(wildcard_handlers.iter()) {
                handler(event.clone()).await;
            }

            // one-shot cleanup: drop any typed/wildcard subscription that
            // fired for this event type and was marked one_shot
            self.inner
                .subscribers
                .lock()
                .entry(event.event_type)
                .or_default()
                .typed
                .retain(|s| !s.one_shot);
            self.inner.wildcard.lock().retain(|s| !s.one_shot);
        }

        *self.inner.draining.lock() = false;
    }

    /// Resolves on the first queued (or future) event matching `event_type`
    /// and the optional `predicate`, or fails with `Timeout` after `ms`.
    pub async fn wait_for<P>(
        &self,
        event_type: EventType,
        timeout_ms: u64,
        predicate: Option<P>,
    ) -> crate::common::error::Result<NetworkEvent>
    where
        P: Fn(&NetworkEvent) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let predicate = Arc::new(predicate);
        let id = self.subscribe_wait(event_type, predicate, tx);

        let result = tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await;
        self.unsubscribe(id);
        match result {
            Ok(Ok(event)) => Ok(event),
            _ => Err(crate::common::error::Error::timeout(format!(
                "wait_for({:?}) exceeded {} ms",
                event_type, timeout_ms
            ))),
        }
    }

    fn subscribe_wait<P>(
        &self,
        event_type: EventType,
        predicate: Arc<Option<P>>,
        tx: Mutex<Option<oneshot::Sender<NetworkEvent>>>,
    ) -> u64
    where
        P: Fn(&NetworkEvent) -> bool + Send + Sync + 'static,
    {
        let tx = Arc::new(tx);
        self.on(event_type, move |event| {
            let predicate = predicate.clone();
            let tx = tx.clone();
            async move {
                let matches = predicate.as_ref().as_ref().map(|p| p(&event)).unwrap_or(true);
                if matches {
                    if let Some(sender) = tx.lock().take() {
                        let _ = sender.send(event);
                    }
                }
            }
        })
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }
}
