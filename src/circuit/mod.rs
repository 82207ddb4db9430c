//! Three-state circuit breaker per named dependency (spec §2, §4.9, §6, §8).

use crate::common::error::{Error, Result};
use crate::config::CircuitBreakerConfig;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

type Listener = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

struct Inner {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
    failures: Mutex<Vec<Instant>>,
    successes: AtomicU32,
    next_attempt_at: Mutex<Option<Instant>>,
    listeners: Mutex<Vec<Listener>>,
    opens_total: AtomicU64,
}

/// Per-dependency circuit breaker. Clone cheaply (`Arc`-backed) to share
/// across call sites guarding the same named dependency.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                state: Mutex::new(CircuitState::Closed),
                failures: Mutex::new(Vec::new()),
                successes: AtomicU32::new(0),
                next_attempt_at: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                opens_total: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> CircuitState {
        *self.inner.state.lock()
    }

    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().push(Arc::new(listener));
    }

    fn transition(&self, to: CircuitState) {
        let from = {
            let mut state = self.inner.state.lock();
            let from = *state;
            *state = to;
            from
        };
        if from != to {
            if to == CircuitState::Open {
                self.inner.opens_total.fetch_add(1, Ordering::Relaxed);
            }
            info!(breaker = %self.inner.name, ?from, ?to, "circuit breaker transition");
            for listener in self.inner.listeners.lock().iter() {
                listener(&self.inner.name, from, to);
            }
        }
    }

    fn prune_failures(&self, now: Instant) {
        let window = Duration::from_millis(self.inner.config.window_size_ms);
        self.inner
            .failures
            .lock()
            .retain(|&ts| now.duration_since(ts) <= window);
    }

    fn record_failure(&self) {
        let now = Instant::now();
        let count = {
            let mut failures = self.inner.failures.lock();
            failures.push(now);
            drop(failures);
            self.prune_failures(now);
            self.inner.failures.lock().len()
        };
        match self.state() {
            CircuitState::Closed => {
                if count as u32 >= self.inner.config.failure_threshold {
                    *self.inner.next_attempt_at.lock() =
                        Some(now + Duration::from_millis(self.inner.config.timeout_ms));
                    self.transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                *self.inner.next_attempt_at.lock() =
                    Some(now + Duration::from_millis(self.inner.config.timeout_ms));
                self.transition(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.prune_failures(Instant::now());
            }
            CircuitState::HalfOpen => {
                let successes = self.inner.successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.inner.config.success_threshold {
                    self.reset();
                    self.transition(CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Clears failure history and success counters (called on close).
    pub fn reset(&self) {
        self.inner.failures.lock().clear();
        self.inner.successes.store(0, Ordering::SeqCst);
        *self.inner.next_attempt_at.lock() = None;
    }

    pub fn force_open(&self) {
        *self.inner.next_attempt_at.lock() =
            Some(Instant::now() + Duration::from_millis(self.inner.config.timeout_ms));
        self.transition(CircuitState::Open);
    }

    pub fn force_close(&self) {
        self.reset();
        self.transition(CircuitState::Closed);
    }

    fn should_probe(&self) -> bool {
        match *self.inner.next_attempt_at.lock() {
            Some(next) => Instant::now() >= next,
            None => true,
        }
    }

    /// Runs `op` through the breaker: rejects immediately with
    /// `Error::CircuitOpen` while OPEN and before `next_attempt_at`;
    /// otherwise invokes `op` and records the outcome.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.state() == CircuitState::Open {
            if !self.should_probe() {
                return Err(Error::circuit_open(format!(
                    "circuit '{}' is open",
                    self.inner.name
                )));
            }
            self.inner.successes.store(0, Ordering::SeqCst);
            self.transition(CircuitState::HalfOpen);
            debug!(breaker = %self.inner.name, "probing half-open");
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                warn!(breaker = %self.inner.name, error = %err, "circuit-guarded call failed");
                self.record_failure();
                Err(err)
            }
        }
    }

    pub fn opens_total(&self) -> u64 {
        self.inner.opens_total.load(Ordering::Relaxed)
    }
}

/// Process-wide registry of circuit breakers indexed by name; never
/// destroyed during process life.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, CircuitBreaker>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        CircuitBreakerRegistry {
            breakers: DashMap::new(),
            default_config,
        }
    }

    /// Returns the breaker for `name`, creating one with the registry's
    /// default config if it does not yet exist.
    pub fn get_or_create(&self, name: &str) -> CircuitBreaker {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name, self.default_config))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.get(name).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
