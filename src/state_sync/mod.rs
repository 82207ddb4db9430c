//! Worker-to-worker state replication of pending mutations (spec §2, §4
//! intro, §5, §9 "BroadcastChannel state sync" remediation).
//!
//! Modeled as a pluggable transport implementing `publish`/`on_message`;
//! the default is an in-process `tokio::sync::broadcast` bus, the same
//! "broadcast channel analogue" the spec names.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A single replicated mutation to pending cross-shard state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateMutation {
    pub connection_id: String,
    pub field: String,
    pub value: String,
    pub origin_shard: u32,
}

/// Pluggable transport a `StateSynchronizer` publishes mutations over.
/// Swappable for a real cross-process bus (e.g. a message queue); default
/// is in-process.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn publish(&self, bytes: Vec<u8>);
    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>>;
}

/// Default in-process transport: a `tokio::sync::broadcast` channel.
pub struct InProcessTransport {
    sender: broadcast::Sender<Vec<u8>>,
}

impl InProcessTransport {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        InProcessTransport { sender }
    }
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl SyncTransport for InProcessTransport {
    async fn publish(&self, bytes: Vec<u8>) {
        // No receivers is not an error — mutations simply have no replicas yet.
        let _ = self.sender.send(bytes);
    }

    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.sender.subscribe()
    }
}

/// Replicates pending mutations to other shards/workers over a
/// `SyncTransport`, and applies mutations received from others via a
/// caller-supplied callback.
pub struct StateSynchronizer {
    shard_id: u32,
    transport: std::sync::Arc<dyn SyncTransport>,
    applied_count: Mutex<u64>,
}

impl StateSynchronizer {
    pub fn new(shard_id: u32, transport: std::sync::Arc<dyn SyncTransport>) -> Self {
        StateSynchronizer {
            shard_id,
            transport,
            applied_count: Mutex::new(0),
        }
    }

    /// Publishes a mutation originating on this shard.
    pub async fn publish(&self, mut mutation: StateMutation) {
        mutation.origin_shard = self.shard_id;
        match serde_json::to_vec(&mutation) {
            Ok(bytes) => {
                debug!(connection_id = %mutation.connection_id, field = %mutation.field, "publishing state mutation");
                self.transport.publish(bytes).await;
            }
            Err(err) => warn!(error = %err, "failed to serialize state mutation"),
        }
    }

    /// Spawns a background task applying every mutation received from
    /// other shards (mutations originating on this shard are skipped) by
    /// invoking `apply` with each decoded `StateMutation`.
    pub fn start_applying<F>(self: &std::sync::Arc<Self>, mut apply: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(StateMutation) + Send + 'static,
    {
        let this = self.clone();
        let mut receiver = this.transport.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(bytes) => match serde_json::from_slice::<StateMutation>(&bytes) {
                        Ok(mutation) => {
                            if mutation.origin_shard == this.shard_id {
                                continue;
                            }
                            apply(mutation);
                            *this.applied_count.lock() += 1;
                        }
                        Err(err) => warn!(error = %err, "failed to decode state mutation"),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state sync receiver lagged, mutations dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn applied_count(&self) -> u64 {
        *self.applied_count.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_mutation_replicated_to_other_shard() {
        let transport = Arc::new(InProcessTransport::new(16));
        let shard_a = Arc::new(StateSynchronizer::new(1, transport.clone()));
        let shard_b = Arc::new(StateSynchronizer::new(2, transport.clone()));

        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        let _handle = shard_b.start_applying(move |mutation| {
            r.lock().push(mutation);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        shard_a
            .publish(StateMutation {
                connection_id: "c1".to_string(),
                field: "state".to_string(),
                value: "IN_USE".to_string(),
                origin_shard: 0,
            })
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let got = received.lock();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].connection_id, "c1");
        assert_eq!(shard_b.applied_count(), 1);
    }

    #[tokio::test]
    async fn test_own_mutations_are_not_reapplied() {
        let transport = Arc::new(InProcessTransport::new(16));
        let shard_a = Arc::new(StateSynchronizer::new(1, transport.clone()));

        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        let _handle = shard_a.start_applying(move |mutation| {
            r.lock().push(mutation);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        shard_a
            .publish(StateMutation {
                connection_id: "c1".to_string(),
                field: "state".to_string(),
                value: "IDLE".to_string(),
                origin_shard: 0,
            })
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(received.lock().is_empty());
        assert_eq!(shard_a.applied_count(), 0);
    }
}
