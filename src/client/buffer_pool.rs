//! Pooled receive buffers for the client (spec §4.5 Buffer pool): up to 8
//! buffers, FIFO acquire preferring the first already-allocated buffer big
//! enough, allocated on demand; release drops the buffer once the pool is
//! at capacity.

use std::collections::VecDeque;
use std::sync::Mutex;

/// `FrameBuffer` (spec §3): an owned byte buffer handed out of the pool for
/// one video-frame receive.
#[derive(Debug)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
}

impl FrameBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
        }
    }
}

const MAX_POOLED_BUFFERS: usize = 8;

/// Bounded pool; `acquire` prefers the first buffer already large enough
/// over allocating, and only allocates when nothing in the pool fits (spec
/// §4.5: "first suitable size ≥ requested, allocated on demand").
pub struct BufferPool {
    free: Mutex<VecDeque<FrameBuffer>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(VecDeque::new()),
        }
    }

    pub fn acquire(&self, min_size: usize) -> FrameBuffer {
        let mut free = self.free.lock().unwrap();
        if let Some(index) = free.iter().position(|b| b.data.len() >= min_size) {
            return free.remove(index).expect("checked index exists");
        }
        FrameBuffer::with_capacity(min_size)
    }

    /// Returns a buffer to the pool, unless the pool is already at capacity
    /// (spec §4.5: "Release returns the buffer to the pool unless the pool
    /// is at capacity, in which case the buffer is dropped").
    pub fn release(&self, buffer: FrameBuffer) {
        let mut free = self.free.lock().unwrap();
        if free.len() < MAX_POOLED_BUFFERS {
            free.push_back(buffer);
        }
    }

    pub fn len(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_allocates_when_pool_empty() {
        let pool = BufferPool::new();
        let buffer = pool.acquire(1024);
        assert_eq!(buffer.data.len(), 1024);
    }

    #[test]
    fn release_then_acquire_reuses_buffer() {
        let pool = BufferPool::new();
        let buffer = pool.acquire(1024);
        pool.release(buffer);
        assert_eq!(pool.len(), 1);
        let reused = pool.acquire(512);
        assert_eq!(reused.data.len(), 1024);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn pool_drops_buffers_beyond_capacity() {
        let pool = BufferPool::new();
        for _ in 0..(MAX_POOLED_BUFFERS + 3) {
            pool.release(FrameBuffer::with_capacity(64));
        }
        assert_eq!(pool.len(), MAX_POOLED_BUFFERS);
    }

    #[test]
    fn acquire_skips_undersized_buffers_in_fifo_order() {
        let pool = BufferPool::new();
        pool.release(FrameBuffer::with_capacity(16));
        pool.release(FrameBuffer::with_capacity(4096));
        let buffer = pool.acquire(2048);
        assert_eq!(buffer.data.len(), 4096);
        assert_eq!(pool.len(), 1);
    }
}
