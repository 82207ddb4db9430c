//! Pluggable backpressure strategies over a bounded queue (spec §2, §4.7).
//!
//! `pressure = |buffer| / buffer_size` in `[0,1]`. Crossing `pause_threshold`
//! upward invokes `pause()`; crossing `resume_threshold` downward invokes
//! `resume()`. Listeners receive every signal.

use crate::config::{BackpressureConfig, BackpressureStrategyKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A signal emitted to listeners on push/drain/pause/resume transitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Accepted,
    Dropped,
    Rejected,
    Paused,
    Resumed,
}

type Listener = Arc<dyn Fn(Signal) + Send + Sync>;

struct Inner<T> {
    strategy: BackpressureStrategyKind,
    buffer: Mutex<VecDeque<T>>,
    buffer_size: usize,
    pause_threshold: f64,
    resume_threshold: f64,
    throttle_rate_ms: u64,
    paused: AtomicBool,
    listeners: Mutex<Vec<Listener>>,
    resume_notify: Notify,
}

/// Ingress-point backpressure state, parameterized by item type `T`.
#[derive(Clone)]
pub struct BackpressureState<T> {
    inner: Arc<Inner<T>>,
}

impl<T> BackpressureState<T> {
    pub fn new(config: BackpressureConfig) -> Self {
        BackpressureState {
            inner: Arc::new(Inner {
                strategy: config.strategy,
                buffer: Mutex::new(VecDeque::new()),
                buffer_size: config.buffer_size,
                pause_threshold: config.pause_threshold,
                resume_threshold: config.resume_threshold,
                throttle_rate_ms: config.throttle_rate_ms,
                paused: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
                resume_notify: Notify::new(),
            }),
        }
    }

    pub fn on_signal<F>(&self, listener: F)
    where
        F: Fn(Signal) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().push(Arc::new(listener));
    }

    fn emit(&self, signal: Signal) {
        for listener in self.inner.listeners.lock().iter() {
            listener(signal);
        }
    }

    pub fn pressure(&self) -> f64 {
        if self.inner.buffer_size == 0 {
            return 0.0;
        }
        self.inner.buffer.lock().len() as f64 / self.inner.buffer_size as f64
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Explicitly sets the pressure level, clamped to `[0,1]`, triggering
    /// pause/resume transitions as thresholds are crossed. Used by
    /// strategies (drop/throttle/reject) that do not hold items in a queue.
    pub fn set_pressure(&self, level: f64) {
        let level = level.clamp(0.0, 1.0);
        let was_paused = self.is_paused();
        if !was_paused && level > self.inner.pause_threshold {
            self.pause();
        } else if was_paused && level < self.inner.resume_threshold {
            self.resume();
        }
    }

    fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            self.emit(Signal::Paused);
        }
    }

    fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            self.emit(Signal::Resumed);
            self.inner.resume_notify.notify_waiters();
        }
    }

    /// Buffered-queue variant of the threshold check: crossing into
    /// `pressure >= pause_threshold` pauses (spec §8 scenario 6 requires a
    /// `pause` signal at `pressure == pause_threshold` exactly).
    fn check_queue_thresholds(&self) {
        let pressure = self.pressure();
        let was_paused = self.is_paused();
        if !was_paused && pressure >= self.inner.pause_threshold {
            self.pause();
        } else if was_paused && pressure < self.inner.resume_threshold {
            self.resume();
        }
    }

    /// Applies the configured strategy to an incoming item. Returns the
    /// signal describing what happened (`Accepted`/`Dropped`/`Rejected`);
    /// for the `throttle` strategy, the caller-visible delay (if any) is
    /// applied internally before returning `Accepted`.
    pub async fn offer(&self, item: T) -> Signal {
        match self.inner.strategy {
            BackpressureStrategyKind::Drop => {
                if self.pressure() > self.inner.pause_threshold {
                    self.emit(Signal::Dropped);
                    Signal::Dropped
                } else {
                    self.emit(Signal::Accepted);
                    Signal::Accepted
                }
            }
            BackpressureStrategyKind::Reject => {
                if self.pressure() > self.inner.pause_threshold {
                    self.emit(Signal::Rejected);
                    Signal::Rejected
                } else {
                    self.emit(Signal::Accepted);
                    Signal::Accepted
                }
            }
            BackpressureStrategyKind::Throttle => {
                let pressure = self.pressure();
                if pressure > self.inner.pause_threshold {
                    let delay_ms = (self.inner.throttle_rate_ms as f64 * pressure) as u64;
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                self.emit(Signal::Accepted);
                Signal::Accepted
            }
            BackpressureStrategyKind::Pause => {
                if self.is_paused() {
                    self.inner.resume_notify.notified().await;
                }
                self.enqueue(item);
                Signal::Accepted
            }
            BackpressureStrategyKind::Buffer => {
                let mut buffer = self.inner.buffer.lock();
                if buffer.len() >= self.inner.buffer_size {
                    drop(buffer);
                    self.emit(Signal::Rejected);
                    return Signal::Rejected;
                }
                buffer.push_back(item);
                drop(buffer);
                self.check_queue_thresholds();
                self.emit(Signal::Accepted);
                Signal::Accepted
            }
        }
    }

    fn enqueue(&self, item: T) {
        self.inner.buffer.lock().push_back(item);
    }

    /// Dequeues the oldest buffered item, re-checking pause/resume thresholds.
    pub fn next(&self) -> Option<T> {
        let item = self.inner.buffer.lock().pop_front();
        if item.is_some() {
            self.check_queue_thresholds();
        }
        item
    }

    /// Empties the buffer entirely, returning everything in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = self.inner.buffer.lock().drain(..).collect();
        self.check_queue_thresholds();
        drained
    }

    pub fn len(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.buffer.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_config(buffer_size: usize) -> BackpressureConfig {
        BackpressureConfig {
            strategy: BackpressureStrategyKind::Buffer,
            buffer_size,
            pause_threshold: 0.8,
            resume_threshold: 0.5,
            throttle_rate_ms: 100,
        }
    }

    #[tokio::test]
    async fn test_buffer_strategy_pauses_at_threshold_and_rejects_when_full() {
        let state: BackpressureState<u32> = BackpressureState::new(buffer_config(10));
        let signals = Arc::new(Mutex::new(Vec::new()));
        let s = signals.clone();
        state.on_signal(move |sig| s.lock().push(sig));

        for i in 0..8 {
            let signal = state.offer(i).await;
            assert_eq!(signal, Signal::Accepted);
        }
        assert!((state.pressure() - 0.8).abs() < 1e-9);
        assert!(state.is_paused());
        assert!(signals.lock().contains(&Signal::Paused));

        for i in 8..10 {
            assert_eq!(state.offer(i).await, Signal::Accepted);
        }
        assert_eq!(state.offer(99).await, Signal::Rejected);
    }

    #[tokio::test]
    async fn test_drain_empties_and_emits_resume() {
        let state: BackpressureState<u32> = BackpressureState::new(buffer_config(10));
        for i in 0..10u32 {
            state.offer(i).await;
        }
        assert!(state.is_paused());
        let drained = state.drain();
        assert_eq!(drained.len(), 10);
        assert_eq!(state.pressure(), 0.0);
        assert!(!state.is_paused());
    }

    #[tokio::test]
    async fn test_drop_strategy_rejects_above_threshold() {
        let config = BackpressureConfig {
            strategy: BackpressureStrategyKind::Drop,
            ..buffer_config(10)
        };
        let state: BackpressureState<u32> = BackpressureState::new(config);
        state.set_pressure(0.9);
        assert_eq!(state.offer(1).await, Signal::Dropped);
    }

    #[tokio::test]
    async fn test_reject_strategy_distinct_from_drop() {
        let config = BackpressureConfig {
            strategy: BackpressureStrategyKind::Reject,
            ..buffer_config(10)
        };
        let state: BackpressureState<u32> = BackpressureState::new(config);
        state.set_pressure(0.9);
        assert_eq!(state.offer(1).await, Signal::Rejected);
    }

    #[tokio::test]
    async fn test_pause_strategy_blocks_until_resume() {
        let config = BackpressureConfig {
            strategy: BackpressureStrategyKind::Pause,
            ..buffer_config(10)
        };
        let state: BackpressureState<u32> = BackpressureState::new(config);
        state.set_pressure(0.9);
        assert!(state.is_paused());

        let state2 = state.clone();
        let handle = tokio::spawn(async move {
            state2.offer(1).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        state.set_pressure(0.0);
        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("offer should unblock after resume")
            .unwrap();
    }

    #[test]
    fn test_set_pressure_clamps() {
        let state: BackpressureState<u32> = BackpressureState::new(buffer_config(10));
        state.set_pressure(1.5);
        assert!(state.is_paused());
    }
}
