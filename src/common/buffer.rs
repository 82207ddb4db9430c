//! Power-of-two reusable byte buffer pool (spec §4.1)

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tracing::trace;

/// Configured pooled size classes, 1K..64K power-of-two.
pub const SIZE_CLASSES: [usize; 7] = [1024, 2048, 4096, 8192, 16384, 32768, 65536];

/// Number of buffers pre-allocated per size class at startup.
const PREALLOC_PER_SIZE: usize = 10;

/// Maximum number of cached buffers retained per size bucket.
const MAX_BUCKET_DEPTH: usize = 100;

/// A pooled (or oversize, unpooled) buffer. `release`d back to its owning pool.
pub struct Buffer {
    data: Vec<u8>,
    /// `None` for an oversize buffer that bypasses the size-class buckets.
    size_class: Option<usize>,
}

impl Buffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// True if every byte is zero (used by tests asserting zero-on-release).
    pub fn is_zeroed(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

fn smallest_class_for(min_size: usize) -> Option<usize> {
    SIZE_CLASSES.iter().copied().find(|&sz| sz >= min_size)
}

#[derive(Default)]
struct Counters {
    allocated: AtomicU64,
    released: AtomicU64,
    in_use: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Statistics snapshot for `BufferPool::stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub allocated: u64,
    pub released: u64,
    pub in_use: u64,
    pub hits: u64,
    pub misses: u64,
}

impl BufferPoolStats {
    /// Hit rate in `[0.0, 1.0]`; `0.0` when no requests have been made yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Process-wide pool of reusable, power-of-two-sized byte buffers.
pub struct BufferPool {
    buckets: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
    counters: Counters,
}

impl BufferPool {
    pub fn new() -> Self {
        let mut buckets = HashMap::new();
        for &size in &SIZE_CLASSES {
            let stack = (0..PREALLOC_PER_SIZE).map(|_| vec![0u8; size]).collect();
            buckets.insert(size, stack);
        }
        // Pre-allocation primes the buckets but is not handed to any caller,
        // so it must not count toward `allocated` (invariant 7:
        // `in_use = allocated - released`).
        BufferPool {
            buckets: Mutex::new(buckets),
            counters: Counters::default(),
        }
    }

    /// Returns a buffer whose capacity is the smallest configured power of
    /// two `>= min_size`. If `min_size` exceeds the largest configured
    /// size, returns a fresh, unpooled oversize buffer (counted as a miss).
    pub fn acquire(&self, min_size: usize) -> Buffer {
        match smallest_class_for(min_size) {
            Some(size) => {
                let mut buckets = self.buckets.lock();
                let bucket = buckets.entry(size).or_default();
                if let Some(data) = bucket.pop() {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    self.counters.allocated.fetch_add(1, Ordering::Relaxed);
                    self.counters.in_use.fetch_add(1, Ordering::Relaxed);
                    trace!(size, "buffer pool hit");
                    Buffer {
                        data,
                        size_class: Some(size),
                    }
                } else {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    self.counters.allocated.fetch_add(1, Ordering::Relaxed);
                    self.counters.in_use.fetch_add(1, Ordering::Relaxed);
                    trace!(size, "buffer pool miss, allocating");
                    Buffer {
                        data: vec![0u8; size],
                        size_class: Some(size),
                    }
                }
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.counters.allocated.fetch_add(1, Ordering::Relaxed);
                self.counters.in_use.fetch_add(1, Ordering::Relaxed);
                trace!(min_size, "buffer pool miss: oversize, unpooled");
                Buffer {
                    data: vec![0u8; min_size],
                    size_class: None,
                }
            }
        }
    }

    /// Zeroes the buffer and returns it to its size bucket if it has one
    /// and the bucket is below the depth cap; otherwise the buffer is
    /// dropped. Always decrements `in_use` and increments `released`.
    pub fn release(&self, mut buf: Buffer) {
        for b in buf.data.iter_mut() {
            *b = 0;
        }
        self.counters.in_use.fetch_sub(1, Ordering::Relaxed);
        self.counters.released.fetch_add(1, Ordering::Relaxed);

        if let Some(size) = buf.size_class {
            let mut buckets = self.buckets.lock();
            let bucket = buckets.entry(size).or_default();
            if bucket.len() < MAX_BUCKET_DEPTH {
                bucket.push(buf.data);
            }
            // else: dropped, bucket at depth cap
        }
        // oversize buffers are always dropped here
    }

    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            allocated: self.counters.allocated.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            in_use: self.counters.in_use.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }

    /// Number of buffers currently cached across all size buckets.
    pub fn cached_count(&self) -> usize {
        self.buckets.lock().values().map(|v| v.len()).sum()
    }

    pub fn bucket_depth(&self, size: usize) -> usize {
        self.buckets.lock().get(&size).map(|v| v.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

static DEFAULT_POOL: OnceLock<BufferPool> = OnceLock::new();

/// The process-wide default buffer pool, lazily initialized on first use.
pub fn default_pool() -> &'static BufferPool {
    DEFAULT_POOL.get_or_init(BufferPool::new)
}
