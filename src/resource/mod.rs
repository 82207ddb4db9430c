//! Quota accountant for {connections, memory, bandwidth, file descriptors,
//! buffers} with peak tracking and a sliding 1 s bandwidth window (spec
//! §2, §4.3).

use crate::config::ResourceLimits;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A resource kind tracked by the `ResourceTracker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Connections,
    MemoryBytes,
    FileDescriptors,
    Buffers,
}

struct Quota {
    limit: u64,
    current: u64,
    peak: u64,
}

impl Quota {
    fn new(limit: u64) -> Self {
        Quota {
            limit,
            current: 0,
            peak: 0,
        }
    }

    fn utilization(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            self.current as f64 / self.limit as f64
        }
    }
}

/// One bandwidth sample: `bytes` recorded at `at`.
struct BandwidthSample {
    at: Instant,
    bytes: u64,
}

/// Quota accountant covering connections, memory, file descriptors and
/// buffers, plus a sliding-window bandwidth meter (invariant 4: only
/// entries within the last 1000 ms are retained).
pub struct ResourceTracker {
    quotas: Mutex<HashMap<ResourceKind, Quota>>,
    bandwidth_limit: u64,
    bandwidth_window: Mutex<Vec<BandwidthSample>>,
}

const BANDWIDTH_WINDOW: Duration = Duration::from_millis(1000);

impl ResourceTracker {
    pub fn new(limits: ResourceLimits) -> Self {
        let mut quotas = HashMap::new();
        quotas.insert(ResourceKind::Connections, Quota::new(limits.connections));
        quotas.insert(ResourceKind::MemoryBytes, Quota::new(limits.memory_bytes));
        quotas.insert(
            ResourceKind::FileDescriptors,
            Quota::new(limits.file_descriptors),
        );
        quotas.insert(ResourceKind::Buffers, Quota::new(limits.buffers));
        ResourceTracker {
            quotas: Mutex::new(quotas),
            bandwidth_limit: limits.bandwidth_bytes_per_sec,
            bandwidth_window: Mutex::new(Vec::new()),
        }
    }

    /// Succeeds iff `current + n <= limit`; updates `peak` on success.
    pub fn allocate(&self, kind: ResourceKind, n: u64) -> bool {
        let mut quotas = self.quotas.lock();
        let quota = quotas.get_mut(&kind).expect("resource kind always present");
        if quota.current + n > quota.limit {
            return false;
        }
        quota.current += n;
        quota.peak = quota.peak.max(quota.current);
        true
    }

    /// Releases `n` units, flooring at 0.
    pub fn release(&self, kind: ResourceKind, n: u64) {
        let mut quotas = self.quotas.lock();
        if let Some(quota) = quotas.get_mut(&kind) {
            quota.current = quota.current.saturating_sub(n);
        }
    }

    pub fn current(&self, kind: ResourceKind) -> u64 {
        self.quotas.lock().get(&kind).map(|q| q.current).unwrap_or(0)
    }

    pub fn peak(&self, kind: ResourceKind) -> u64 {
        self.quotas.lock().get(&kind).map(|q| q.peak).unwrap_or(0)
    }

    pub fn limit(&self, kind: ResourceKind) -> u64 {
        self.quotas.lock().get(&kind).map(|q| q.limit).unwrap_or(0)
    }

    fn prune_bandwidth_window(window: &mut Vec<BandwidthSample>, now: Instant) {
        window.retain(|s| now.duration_since(s.at) <= BANDWIDTH_WINDOW);
    }

    /// Appends a bandwidth sample and returns the current (last-1000ms) sum.
    pub fn record_bandwidth(&self, bytes: u64) -> u64 {
        let now = Instant::now();
        let mut window = self.bandwidth_window.lock();
        window.push(BandwidthSample { at: now, bytes });
        Self::prune_bandwidth_window(&mut window, now);
        window.iter().map(|s| s.bytes).sum()
    }

    /// Current bandwidth reading: sum of samples within the last 1000 ms.
    pub fn bandwidth(&self) -> u64 {
        let now = Instant::now();
        let mut window = self.bandwidth_window.lock();
        Self::prune_bandwidth_window(&mut window, now);
        window.iter().map(|s| s.bytes).sum()
    }

    fn bandwidth_utilization(&self) -> f64 {
        if self.bandwidth_limit == 0 {
            0.0
        } else {
            self.bandwidth() as f64 / self.bandwidth_limit as f64
        }
    }

    /// Maximum utilization across all tracked quotas, including bandwidth.
    pub fn get_pressure(&self) -> f64 {
        let quotas = self.quotas.lock();
        let mut max = self.bandwidth_utilization();
        for quota in quotas.values() {
            max = max.max(quota.utilization());
        }
        max
    }

    pub fn is_under_pressure(&self) -> bool {
        self.get_pressure() > 0.8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_tracker() -> ResourceTracker {
        ResourceTracker::new(ResourceLimits {
            connections: 10,
            memory_bytes: 1000,
            bandwidth_bytes_per_sec: 1000,
            file_descriptors: 100,
            buffers: 100,
        })
    }

    #[test]
    fn test_allocate_succeeds_within_limit() {
        let tracker = small_tracker();
        assert!(tracker.allocate(ResourceKind::Connections, 5));
        assert_eq!(tracker.current(ResourceKind::Connections), 5);
    }

    #[test]
    fn test_allocate_fails_over_limit() {
        let tracker = small_tracker();
        assert!(tracker.allocate(ResourceKind::Connections, 10));
        assert!(!tracker.allocate(ResourceKind::Connections, 1));
    }

    #[test]
    fn test_peak_tracks_high_water_mark() {
        let tracker = small_tracker();
        tracker.allocate(ResourceKind::Connections, 8);
        tracker.release(ResourceKind::Connections, 5);
        tracker.allocate(ResourceKind::Connections, 2);
        assert_eq!(tracker.peak(ResourceKind::Connections), 8);
        assert_eq!(tracker.current(ResourceKind::Connections), 5);
    }

    #[test]
    fn test_release_floors_at_zero() {
        let tracker = small_tracker();
        tracker.allocate(ResourceKind::Connections, 2);
        tracker.release(ResourceKind::Connections, 10);
        assert_eq!(tracker.current(ResourceKind::Connections), 0);
    }

    #[test]
    fn test_bandwidth_sums_within_window() {
        let tracker = small_tracker();
        tracker.record_bandwidth(100);
        tracker.record_bandwidth(200);
        assert_eq!(tracker.bandwidth(), 300);
    }

    #[tokio::test]
    async fn test_bandwidth_expires_after_one_second() {
        let tracker = small_tracker();
        tracker.record_bandwidth(500);
        assert_eq!(tracker.bandwidth(), 500);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(tracker.bandwidth(), 0);
    }

    #[test]
    fn test_pressure_is_max_across_kinds() {
        let tracker = small_tracker();
        tracker.allocate(ResourceKind::Connections, 9); // 0.9 utilization
        tracker.allocate(ResourceKind::Buffers, 1); // 0.01 utilization
        assert!((tracker.get_pressure() - 0.9).abs() < 1e-9);
        assert!(tracker.is_under_pressure());
    }

    #[test]
    fn test_not_under_pressure_below_threshold() {
        let tracker = small_tracker();
        tracker.allocate(ResourceKind::Connections, 5);
        assert!(!tracker.is_under_pressure());
    }
}
