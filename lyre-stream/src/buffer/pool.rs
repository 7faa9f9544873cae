//! Global byte-buffer pool
//!
//! Buffers are grouped into power-of-two size classes (minimum 1 KiB). A
//! released buffer is kept for reuse when its class lies in the reuse window
//! and the pool stays under its byte cap; otherwise it is dropped.
//!
//! The pool is shared by every pipeline in the process, so all state sits
//! behind one mutex. Critical sections are a HashMap lookup and a Vec push/pop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use tracing::{debug, error};

/// Smallest size class
pub const MIN_CLASS_BYTES: usize = 1024;

/// Largest buffer kept for reuse
pub const MAX_POOLED_BYTES: usize = 10 * 1024 * 1024;

/// Total bytes the global pool may hold
pub const DEFAULT_POOL_CAP_BYTES: usize = 50 * 1024 * 1024;

static GLOBAL_POOL: OnceLock<BufferPool> = OnceLock::new();

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes currently held for reuse
    pub pooled_bytes: usize,
    /// Buffers currently held for reuse
    pub pooled_buffers: usize,
    /// Acquires served from the pool
    pub hits: u64,
    /// Acquires that allocated
    pub misses: u64,
    /// Releases that were dropped instead of pooled
    pub drops: u64,
}

struct PoolInner {
    free: HashMap<usize, Vec<Vec<u8>>>,
    total_bytes: usize,
}

/// Size-classed buffer pool with a total byte cap
pub struct BufferPool {
    inner: Mutex<PoolInner>,
    cap_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    drops: AtomicU64,
}

impl BufferPool {
    /// Create a pool holding at most `cap_bytes`
    pub fn new(cap_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                free: HashMap::new(),
                total_bytes: 0,
            }),
            cap_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            drops: AtomicU64::new(0),
        }
    }

    /// Process-wide pool used by ring buffers
    pub fn global() -> &'static BufferPool {
        GLOBAL_POOL.get_or_init(|| BufferPool::new(DEFAULT_POOL_CAP_BYTES))
    }

    /// Size class for a request: next power of two, at least 1 KiB
    pub fn size_class(size: usize) -> usize {
        size.max(MIN_CLASS_BYTES).next_power_of_two()
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check out a buffer of exactly `size_class(size)` bytes
    ///
    /// Contents of a reused buffer are unspecified.
    pub fn acquire(&self, size: usize) -> Vec<u8> {
        let class = Self::size_class(size);

        let reused = {
            let mut inner = self.lock();
            let buf = inner.free.get_mut(&class).and_then(|list| list.pop());
            if buf.is_some() {
                inner.total_bytes = inner.total_bytes.saturating_sub(class);
            }
            buf
        };

        match reused {
            Some(mut buf) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if buf.len() != class {
                    buf.resize(class, 0);
                }
                buf
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                vec![0u8; class]
            }
        }
    }

    /// Hand a buffer back
    ///
    /// Buffers outside the reuse window, not in a size class, or that would push
    /// the pool over its cap are dropped.
    pub fn release(&self, buf: Vec<u8>) {
        let class = buf.capacity();
        if !(MIN_CLASS_BYTES..=MAX_POOLED_BYTES).contains(&class) || !class.is_power_of_two() {
            self.drops.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut inner = self.lock();
        if inner.total_bytes + class > self.cap_bytes {
            drop(inner);
            self.drops.fetch_add(1, Ordering::Relaxed);
            return;
        }
        inner.total_bytes += class;
        inner.free.entry(class).or_default().push(buf);
    }

    /// Empty the pool if its accounting ever exceeds the cap
    ///
    /// Returns true when a sweep happened. Exceeding the cap means the
    /// release path let something through, so this is logged as an error.
    pub fn sweep(&self) -> bool {
        let mut inner = self.lock();
        if inner.total_bytes <= self.cap_bytes {
            return false;
        }
        error!(
            "Buffer pool over cap ({} > {} bytes), clearing",
            inner.total_bytes, self.cap_bytes
        );
        inner.free.clear();
        inner.total_bytes = 0;
        true
    }

    /// Drop every pooled buffer
    pub fn clear(&self) {
        let mut inner = self.lock();
        debug!("Clearing buffer pool ({} bytes)", inner.total_bytes);
        inner.free.clear();
        inner.total_bytes = 0;
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        PoolStats {
            pooled_bytes: inner.total_bytes,
            pooled_buffers: inner.free.values().map(Vec::len).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn corrupt_total_for_test(&self, total: usize) {
        self.lock().total_bytes = total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_classes() {
        assert_eq!(BufferPool::size_class(0), 1024);
        assert_eq!(BufferPool::size_class(1000), 1024);
        assert_eq!(BufferPool::size_class(1024), 1024);
        assert_eq!(BufferPool::size_class(1025), 2048);
        assert_eq!(BufferPool::size_class(300_000), 524_288);
    }

    #[test]
    fn test_acquire_release_reuse() {
        let pool = BufferPool::new(DEFAULT_POOL_CAP_BYTES);
        let buf = pool.acquire(3000);
        assert_eq!(buf.len(), 4096);
        pool.release(buf);

        let stats = pool.stats();
        assert_eq!(stats.pooled_bytes, 4096);
        assert_eq!(stats.pooled_buffers, 1);

        let again = pool.acquire(4000);
        assert_eq!(again.len(), 4096);
        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.pooled_bytes, 0);
    }

    #[test]
    fn test_release_outside_window_is_dropped() {
        let pool = BufferPool::new(DEFAULT_POOL_CAP_BYTES);
        pool.release(vec![0u8; 512]);
        pool.release(Vec::with_capacity(3000));
        pool.release(vec![0u8; 16 * 1024 * 1024]);
        let stats = pool.stats();
        assert_eq!(stats.pooled_bytes, 0);
        assert_eq!(stats.drops, 3);
    }

    #[test]
    fn test_cap_is_respected() {
        let pool = BufferPool::new(4096);
        pool.release(pool.acquire(2048));
        pool.release(pool.acquire(2048));
        // two distinct 2 KiB buffers would be 4 KiB; acquire reused the first
        let a = pool.acquire(2048);
        let b = pool.acquire(2048);
        let c = pool.acquire(2048);
        pool.release(a);
        pool.release(b);
        pool.release(c);
        let stats = pool.stats();
        assert!(stats.pooled_bytes <= 4096);
        assert_eq!(stats.drops, 1);
    }

    #[test]
    fn test_sweep_only_when_over_cap() {
        let pool = BufferPool::new(8192);
        pool.release(pool.acquire(1024));
        assert!(!pool.sweep());
        assert_eq!(pool.stats().pooled_buffers, 1);

        pool.corrupt_total_for_test(1 << 20);
        assert!(pool.sweep());
        let stats = pool.stats();
        assert_eq!(stats.pooled_bytes, 0);
        assert_eq!(stats.pooled_buffers, 0);
    }
}
