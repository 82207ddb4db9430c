//! Per-stream and per-connection flow control (spec §2, §4.6, §5).
//!
//! `consume_send`/`consume_receive` are atomic: they fail without mutation
//! if the window would be exceeded. `wait_for_send_window` suspends the
//! caller until the window has capacity; `release_send`/`release_receive`
//! wake waiters. The scheduler does not guarantee FIFO fairness, but
//! waiters are never starved: `Notify::notify_waiters` wakes every
//! suspended task on each release, so all of them re-check the window.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

/// A single-direction window: `used <= size` always (invariant 6).
#[derive(Debug, Clone, Copy)]
pub struct FlowWindow {
    pub size: usize,
    pub used: usize,
}

impl FlowWindow {
    pub fn available(&self) -> usize {
        self.size.saturating_sub(self.used)
    }
}

struct Inner {
    send: Mutex<FlowWindow>,
    recv: Mutex<FlowWindow>,
    send_notify: Notify,
    recv_notify: Notify,
    recv_paused: std::sync::atomic::AtomicBool,
}

/// Tracks send/receive byte windows for one logical flow (a connection or
/// a single stream within one).
#[derive(Clone)]
pub struct FlowController {
    inner: Arc<Inner>,
}

impl FlowController {
    pub fn new(send_size: usize, recv_size: usize) -> Self {
        FlowController {
            inner: Arc::new(Inner {
                send: Mutex::new(FlowWindow { size: send_size, used: 0 }),
                recv: Mutex::new(FlowWindow { size: recv_size, used: 0 }),
                send_notify: Notify::new(),
                recv_notify: Notify::new(),
                recv_paused: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    /// Atomically consumes `n` bytes of send window; fails without
    /// mutation if `used + n > size`.
    pub fn consume_send(&self, n: usize) -> bool {
        let mut window = self.inner.send.lock();
        if window.used + n > window.size {
            return false;
        }
        window.used += n;
        true
    }

    /// Suspends until `consume_send(n)` succeeds. Aborting the returned
    /// future (e.g. via `tokio::select!`/cancellation) releases the
    /// waiter without mutating usage — there is no partial consumption.
    pub async fn wait_for_send_window(&self, n: usize) {
        loop {
            if self.consume_send(n) {
                return;
            }
            let notified = self.inner.send_notify.notified();
            if self.consume_send(n) {
                return;
            }
            notified.await;
        }
    }

    /// Releases `n` bytes of send window, flooring at 0, and wakes all waiters.
    pub fn release_send(&self, n: usize) {
        {
            let mut window = self.inner.send.lock();
            window.used = window.used.saturating_sub(n);
        }
        self.inner.send_notify.notify_waiters();
    }

    pub fn update_send_window(&self, new_size: usize) {
        {
            let mut window = self.inner.send.lock();
            window.size = new_size;
        }
        self.inner.send_notify.notify_waiters();
    }

    pub fn send_window(&self) -> FlowWindow {
        *self.inner.send.lock()
    }

    /// Atomically consumes `n` bytes of receive window; fails without
    /// mutation if it would exceed `size`. Crossing `size` pauses reads.
    pub fn consume_receive(&self, n: usize) -> bool {
        let mut window = self.inner.recv.lock();
        if window.used + n > window.size {
            return false;
        }
        window.used += n;
        if window.used >= window.size {
            self.inner.recv_paused.store(true, std::sync::atomic::Ordering::SeqCst);
        }
        true
    }

    /// Releases `n` bytes of receive window, flooring at 0; resumes (and
    /// wakes waiters) when usage drops below `size`.
    pub fn release_receive(&self, n: usize) {
        let below_window = {
            let mut window = self.inner.recv.lock();
            window.used = window.used.saturating_sub(n);
            window.used < window.size
        };
        if below_window {
            let was_paused = self
                .inner
                .recv_paused
                .swap(false, std::sync::atomic::Ordering::SeqCst);
            if was_paused {
                self.inner.recv_notify.notify_waiters();
            }
        }
    }

    pub fn update_receive_window(&self, new_size: usize) {
        let resumed = {
            let mut window = self.inner.recv.lock();
            window.size = new_size;
            window.used < window.size
        };
        if resumed {
            self.inner
                .recv_paused
                .store(false, std::sync::atomic::Ordering::SeqCst);
            self.inner.recv_notify.notify_waiters();
        }
    }

    pub fn receive_window(&self) -> FlowWindow {
        *self.inner.recv.lock()
    }

    pub fn is_receive_paused(&self) -> bool {
        self.inner.recv_paused.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Suspends while receive is paused (over its window).
    pub async fn wait_for_receive_resume(&self) {
        while self.is_receive_paused() {
            let notified = self.inner.recv_notify.notified();
            if !self.is_receive_paused() {
                return;
            }
            notified.await;
        }
    }
}

/// Per-stream flow controller: wraps a `FlowController` with equal
/// send/receive windows, keyed by `stream_id` (spec §3).
pub struct StreamFlowController {
    pub stream_id: u64,
    pub controller: FlowController,
}

impl StreamFlowController {
    pub fn new(stream_id: u64, window_size: usize) -> Self {
        StreamFlowController {
            stream_id,
            controller: FlowController::new(window_size, window_size),
        }
    }
}

/// Owns a connection-scope `FlowController` plus a map of per-stream
/// controllers (spec §3 `ConnectionFlowController`).
pub struct ConnectionFlowController {
    pub connection: FlowController,
    streams: Mutex<HashMap<u64, Arc<StreamFlowController>>>,
    default_stream_window: usize,
}

impl ConnectionFlowController {
    pub fn new(send_size: usize, recv_size: usize, default_stream_window: usize) -> Self {
        ConnectionFlowController {
            connection: FlowController::new(send_size, recv_size),
            streams: Mutex::new(HashMap::new()),
            default_stream_window,
        }
    }

    /// Returns (creating if absent) the flow controller for `stream_id`.
    pub fn stream(&self, stream_id: u64) -> Arc<StreamFlowController> {
        let mut streams = self.streams.lock();
        streams
            .entry(stream_id)
            .or_insert_with(|| Arc::new(StreamFlowController::new(stream_id, self.default_stream_window)))
            .clone()
    }

    pub fn remove_stream(&self, stream_id: u64) {
        self.streams.lock().remove(&stream_id);
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_consume_send_never_exceeds_window() {
        let fc = FlowController::new(100, 100);
        assert!(fc.consume_send(60));
        assert!(!fc.consume_send(60));
        assert_eq!(fc.send_window().used, 60);
    }

    #[test]
    fn test_failed_consume_does_not_mutate() {
        let fc = FlowController::new(10, 10);
        assert!(fc.consume_send(8));
        assert!(!fc.consume_send(5));
        assert_eq!(fc.send_window().used, 8);
    }

    #[tokio::test]
    async fn test_wait_for_send_window_returns_after_release() {
        let fc = FlowController::new(10, 10);
        assert!(fc.consume_send(10));

        let fc2 = fc.clone();
        let waiter = tokio::spawn(async move {
            fc2.wait_for_send_window(5).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        fc.release_send(5);

        tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter should resolve shortly after release")
            .unwrap();
    }

    #[test]
    fn test_receive_pauses_at_window_and_resumes_below() {
        let fc = FlowController::new(10, 10);
        assert!(fc.consume_receive(10));
        assert!(fc.is_receive_paused());
        fc.release_receive(1);
        assert!(!fc.is_receive_paused());
    }

    #[test]
    fn test_update_send_window_can_wake_waiters() {
        let fc = FlowController::new(10, 10);
        assert!(fc.consume_send(10));
        fc.update_send_window(20);
        assert!(fc.consume_send(5));
    }

    #[test]
    fn test_stream_controller_isolated_from_connection() {
        let conn = ConnectionFlowController::new(100, 100, 50);
        let stream1 = conn.stream(1);
        let stream2 = conn.stream(2);
        assert!(stream1.controller.consume_send(50));
        assert!(stream2.controller.consume_send(50));
        assert!(!stream1.controller.consume_send(1));
        assert_eq!(conn.stream_count(), 2);
    }

    #[test]
    fn test_remove_stream() {
        let conn = ConnectionFlowController::new(100, 100, 50);
        conn.stream(1);
        conn.remove_stream(1);
        assert_eq!(conn.stream_count(), 0);
    }
}
