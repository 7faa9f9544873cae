//! Fixed-capacity byte ring with overwrite-oldest semantics
//!
//! Each pipeline stage owns its rings exclusively. Backing storage comes from
//! a [`BufferPool`] and goes back to it exactly once, when the ring is dropped
//! or disposed.

use super::pool::BufferPool;
use tracing::trace;

/// Byte ring buffer backed by pooled storage
///
/// Writing more than the free space overwrites the oldest bytes and moves the
/// read cursor forward, so the ring always holds the most recent `capacity`
/// bytes written.
pub struct RingBuffer {
    storage: Vec<u8>,
    capacity: usize,
    /// Read cursor
    head: usize,
    /// Bytes currently held
    len: usize,
    /// Linear copy of wrapped spans handed out by `get_contiguous`
    scratch: Vec<u8>,
    pool: &'static BufferPool,
}

impl RingBuffer {
    /// Create a ring buffer using the global pool
    ///
    /// # Arguments
    /// * `capacity` - Maximum bytes held (at least 1)
    pub fn new(capacity: usize) -> Self {
        Self::with_pool(capacity, BufferPool::global())
    }

    /// Create a ring buffer whose storage comes from `pool`
    pub fn with_pool(capacity: usize, pool: &'static BufferPool) -> Self {
        let capacity = capacity.max(1);
        let storage = pool.acquire(capacity);
        trace!("Ring buffer created: capacity={} class={}", capacity, storage.len());
        Self {
            storage,
            capacity,
            head: 0,
            len: 0,
            scratch: Vec::new(),
            pool,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free space before a write starts overwriting
    pub fn available(&self) -> usize {
        self.capacity - self.len
    }

    /// Append bytes, overwriting the oldest data on overflow
    ///
    /// # Returns
    /// Number of previously buffered bytes that were overwritten
    pub fn write(&mut self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }

        if data.len() >= self.capacity {
            // Only the newest `capacity` bytes survive
            let overwritten = self.len + data.len() - self.capacity;
            let tail = &data[data.len() - self.capacity..];
            self.storage[..self.capacity].copy_from_slice(tail);
            self.head = 0;
            self.len = self.capacity;
            return overwritten;
        }

        let overwritten = data.len().saturating_sub(self.available());
        if overwritten > 0 {
            self.head = (self.head + overwritten) % self.capacity;
            self.len -= overwritten;
        }

        let tail = (self.head + self.len) % self.capacity;
        let first = data.len().min(self.capacity - tail);
        self.storage[tail..tail + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        if rest > 0 {
            self.storage[..rest].copy_from_slice(&data[first..]);
        }
        self.len += data.len();

        overwritten
    }

    /// Copy up to `n` bytes without consuming them; `None` when empty
    pub fn peek(&self, n: usize) -> Option<Vec<u8>> {
        if self.len == 0 {
            return None;
        }
        let take = n.min(self.len);
        let mut out = vec![0u8; take];
        self.copy_out(&mut out);
        Some(out)
    }

    /// Remove and return up to `n` bytes; `None` when empty
    pub fn read(&mut self, n: usize) -> Option<Vec<u8>> {
        let out = self.peek(n)?;
        self.skip(out.len());
        Some(out)
    }

    /// Fill as much of `dst` as possible, consuming what was copied
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let take = dst.len().min(self.len);
        self.copy_out(&mut dst[..take]);
        self.skip(take);
        take
    }

    /// Discard up to `n` bytes, returning how many were discarded
    pub fn skip(&mut self, n: usize) -> usize {
        let take = n.min(self.len);
        self.head = (self.head + take) % self.capacity;
        self.len -= take;
        if self.len == 0 {
            self.head = 0;
        }
        take
    }

    /// Borrow up to `n` buffered bytes as one linear slice without consuming
    ///
    /// When the span does not wrap this borrows the ring storage directly;
    /// otherwise the bytes are copied into an internal scratch buffer.
    pub fn get_contiguous(&mut self, n: usize) -> Option<&[u8]> {
        if self.len == 0 {
            return None;
        }
        let take = n.min(self.len);
        if self.head + take <= self.capacity {
            return Some(&self.storage[self.head..self.head + take]);
        }

        if self.scratch.len() < take {
            self.scratch.resize(take, 0);
        }
        let first = self.capacity - self.head;
        self.scratch[..first].copy_from_slice(&self.storage[self.head..self.capacity]);
        self.scratch[first..take].copy_from_slice(&self.storage[..take - first]);
        Some(&self.scratch[..take])
    }

    /// Drop all buffered bytes, keeping the storage
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Return the storage to the pool now
    pub fn dispose(self) {
        drop(self);
    }

    fn copy_out(&self, dst: &mut [u8]) {
        let take = dst.len();
        let first = take.min(self.capacity - self.head);
        dst[..first].copy_from_slice(&self.storage[self.head..self.head + first]);
        if take > first {
            dst[first..].copy_from_slice(&self.storage[..take - first]);
        }
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        let storage = std::mem::take(&mut self.storage);
        if storage.capacity() > 0 {
            self.pool.release(storage);
        }
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .field("head", &self.head)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaked_pool() -> &'static BufferPool {
        Box::leak(Box::new(BufferPool::new(1 << 20)))
    }

    #[test]
    fn test_write_read_basic() {
        let mut ring = RingBuffer::with_pool(8, leaked_pool());
        assert_eq!(ring.read(4), None);
        assert_eq!(ring.write(&[1, 2, 3]), 0);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.read(10), Some(vec![1, 2, 3]));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_overflow_keeps_most_recent_bytes() {
        let mut ring = RingBuffer::with_pool(4, leaked_pool());
        ring.write(&[1, 2, 3]);
        let overwritten = ring.write(&[4, 5, 6]);
        assert_eq!(overwritten, 2);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.read(4), Some(vec![3, 4, 5, 6]));
    }

    #[test]
    fn test_write_larger_than_capacity() {
        let mut ring = RingBuffer::with_pool(4, leaked_pool());
        ring.write(&[9, 9]);
        let overwritten = ring.write(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(overwritten, 4);
        assert_eq!(ring.read(8), Some(vec![3, 4, 5, 6]));
    }

    #[test]
    fn test_peek_and_skip() {
        let mut ring = RingBuffer::with_pool(8, leaked_pool());
        ring.write(&[1, 2, 3, 4, 5]);
        assert_eq!(ring.peek(2), Some(vec![1, 2]));
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.skip(3), 3);
        assert_eq!(ring.peek(8), Some(vec![4, 5]));
        assert_eq!(ring.skip(10), 2);
        assert_eq!(ring.peek(1), None);
    }

    #[test]
    fn test_contiguous_across_wrap() {
        let mut ring = RingBuffer::with_pool(6, leaked_pool());
        ring.write(&[0, 0, 0, 0, 0]);
        ring.skip(4);
        ring.write(&[1, 2, 3]);
        ring.skip(1);

        // non-wrapping prefix borrows storage
        assert_eq!(ring.get_contiguous(1), Some(&[1u8][..]));
        // wrapping span is linearized
        assert_eq!(ring.get_contiguous(3), Some(&[1u8, 2, 3][..]));
        // not consumed
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_drop_returns_storage_once() {
        let pool = leaked_pool();
        let ring = RingBuffer::with_pool(3000, pool);
        assert_eq!(pool.stats().pooled_buffers, 0);
        ring.dispose();
        let stats = pool.stats();
        assert_eq!(stats.pooled_buffers, 1);
        assert_eq!(stats.pooled_bytes, 4096);

        let _again = RingBuffer::with_pool(4096, pool);
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn test_read_into() {
        let mut ring = RingBuffer::with_pool(4, leaked_pool());
        ring.write(&[1, 2, 3]);
        ring.skip(2);
        ring.write(&[4, 5, 6]);
        let mut dst = [0u8; 8];
        assert_eq!(ring.read_into(&mut dst), 4);
        assert_eq!(&dst[..4], &[3, 4, 5, 6]);
    }
}
