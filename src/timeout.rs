//! Cancellation and deadline primitives (spec §5): `with_timeout` races an
//! operation against a timer; `Deadline` carries a running time budget
//! across sub-operations; `TimeoutManager` tracks named timeouts so a
//! later `clear(id)` releases them.

use crate::common::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Races `op` against a `ms`-millisecond timer, returning `Error::Timeout`
/// if the timer wins.
pub async fn with_timeout<F, T>(ms: u64, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        result = op => result,
        _ = tokio::time::sleep(Duration::from_millis(ms)) => {
            Err(Error::timeout(format!("operation exceeded {} ms", ms)))
        }
    }
}

/// A running time budget carried across a sequence of awaited
/// sub-operations; exceeding it yields a `Timeout` error from
/// `remaining()` or `check()`.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    end_time: Instant,
}

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Deadline {
            end_time: Instant::now() + duration,
        }
    }

    /// Milliseconds left on the budget, or `None` if already exceeded.
    pub fn remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        if now >= self.end_time {
            None
        } else {
            Some(self.end_time - now)
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.end_time
    }

    /// Returns `Err(Timeout)` if the deadline has already passed, else `Ok(remaining)`.
    pub fn check(&self) -> Result<Duration> {
        self.remaining()
            .ok_or_else(|| Error::timeout("deadline exceeded"))
    }

    /// Runs `op`, bounded by whatever remains of this deadline.
    pub async fn run<F, T>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let remaining = self.check()?;
        with_timeout(remaining.as_millis() as u64, op).await
    }
}

/// Tracks named timeout tasks so a later `clear(id)` can cancel one before
/// it fires — the idiomatic replacement for a hand-rolled `setInterval`
/// handle table.
#[derive(Default)]
pub struct TimeoutManager {
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TimeoutManager {
    pub fn new() -> Self {
        TimeoutManager {
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Schedules `callback` to run after `ms` milliseconds under `id`. If a
    /// timeout with the same id is already pending, it is replaced
    /// (the old one aborted).
    pub fn set<F>(&self, id: impl Into<String>, ms: u64, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let id = id.into();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            callback();
        });
        let mut handles = self.handles.lock();
        if let Some(old) = handles.insert(id, handle) {
            old.abort();
        }
    }

    /// Cancels a pending timeout by id. No-op if it already fired or never existed.
    pub fn clear(&self, id: &str) {
        if let Some(handle) = self.handles.lock().remove(id) {
            handle.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.handles.lock().len()
    }
}

impl Drop for TimeoutManager {
    fn drop(&mut self) {
        for (_, handle) in self.handles.lock().drain() {
            handle.abort();
        }
    }
}
