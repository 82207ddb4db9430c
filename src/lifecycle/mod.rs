//! Priority-ordered lifecycle hooks per phase (spec §2, §4.5, §5).
//!
//! Hooks for a phase run sequentially in priority order (high first); a
//! throwing hook is logged and does not prevent subsequent hooks from
//! running. A hook may await.

use crate::common::metadata::Metadata;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Named lifecycle phases (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    BeforeConnect,
    AfterConnect,
    BeforeRequest,
    AfterRequest,
    BeforeResponse,
    AfterResponse,
    BeforeClose,
    AfterClose,
    OnError,
    OnTimeout,
    OnIdle,
}

type HookFuture = Pin<Box<dyn Future<Output = crate::common::error::Result<()>> + Send>>;
type HookFn = Arc<dyn Fn(String, Metadata) -> HookFuture + Send + Sync>;

struct Hook {
    id: u64,
    priority: i32,
    handler: HookFn,
}

/// Registry of priority-sorted hooks, one bucket per lifecycle phase.
#[derive(Default)]
pub struct LifecycleManager {
    hooks: Mutex<HashMap<Phase, Vec<Hook>>>,
    next_id: AtomicU64,
}

impl LifecycleManager {
    pub fn new() -> Self {
        LifecycleManager {
            hooks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a hook for `phase` with `priority` (higher runs first).
    /// Returns a hook id usable with `remove`.
    pub fn register<F, Fut>(&self, phase: Phase, priority: i32, handler: F) -> u64
    where
        F: Fn(String, Metadata) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::common::error::Result<()>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let wrapped: HookFn = Arc::new(move |conn_id, meta| Box::pin(handler(conn_id, meta)));
        let mut hooks = self.hooks.lock();
        let bucket = hooks.entry(phase).or_default();
        bucket.push(Hook {
            id,
            priority,
            handler: wrapped,
        });
        bucket.sort_by(|a, b| b.priority.cmp(&a.priority));
        id
    }

    pub fn remove(&self, phase: Phase, id: u64) {
        if let Some(bucket) = self.hooks.lock().get_mut(&phase) {
            bucket.retain(|h| h.id != id);
        }
    }

    /// Runs every hook registered for `phase`, in priority order,
    /// sequentially. A hook that returns `Err` is logged and does not
    /// abort the remaining hooks.
    pub async fn execute_phase(&self, connection_id: impl Into<String>, phase: Phase, metadata: Metadata) {
        let connection_id = connection_id.into();
        let handlers: Vec<HookFn> = {
            let hooks = self.hooks.lock();
            hooks
                .get(&phase)
                .map(|b| b.iter().map(|h| h.handler.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            if let Err(err) = handler(connection_id.clone(), metadata.clone()).await {
                warn!(?phase, connection_id = %connection_id, error = %err, "lifecycle hook failed");
            }
        }
    }

    pub fn hook_count(&self, phase: Phase) -> usize {
        self.hooks.lock().get(&phase).map(|b| b.len()).unwrap_or(0)
    }
}
