//! Bounded mirror buffers and the pool they are recycled through
//!
//! A [`MirrorBuffer`] keeps the first `capacity` bytes of a stream and counts
//! everything else. Hitting capacity is a normal truncation, not an error.
//! Buffers are handed out by a [`BufferPool`] wrapped in a [`PooledBuffer`]
//! guard, which resets and returns the buffer when dropped, panics included.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

/// Default number of body bytes kept per request or response (1KB)
pub const DEFAULT_CAPTURE_LIMIT: usize = 1 << 10;

/// Idle buffers kept by a pool before extra ones are freed
const MAX_IDLE_BUFFERS: usize = 1024;

/// Fixed-capacity byte sink that retains a prefix of what it sees
#[derive(Debug)]
pub struct MirrorBuffer {
    buf: Vec<u8>,
    capacity: usize,
    seen: u64,
}

impl MirrorBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            seen: 0,
        }
    }

    /// Append up to the remaining capacity and return how many bytes were kept.
    ///
    /// The rest is discarded, but still counted by [`total_bytes_seen`](Self::total_bytes_seen).
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        self.seen += bytes.len() as u64;
        let room = self.capacity - self.buf.len();
        let take = bytes.len().min(room);
        self.buf.extend_from_slice(&bytes[..take]);
        take
    }

    pub fn captured_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn total_bytes_seen(&self) -> u64 {
        self.seen
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    /// Empty the buffer, keeping its allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.seen = 0;
    }
}

/// Thread-safe pool of [`MirrorBuffer`]s of one capacity
///
/// Cloning is cheap; clones share the same free list.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    free: Mutex<Vec<MirrorBuffer>>,
    buffer_capacity: usize,
    max_idle: usize,
}

impl BufferPool {
    pub fn new(buffer_capacity: usize) -> Self {
        Self::with_max_idle(buffer_capacity, MAX_IDLE_BUFFERS)
    }

    pub fn with_max_idle(buffer_capacity: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                buffer_capacity,
                max_idle,
            }),
        }
    }

    /// Take an empty buffer, allocating a fresh one on a pool miss. Never blocks
    /// beyond the free-list lock.
    pub fn acquire(&self) -> PooledBuffer {
        let recycled = self
            .inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        PooledBuffer {
            buffer: recycled.unwrap_or_else(|| MirrorBuffer::new(self.inner.buffer_capacity)),
            pool: self.clone(),
        }
    }

    pub fn buffer_capacity(&self) -> usize {
        self.inner.buffer_capacity
    }

    /// Number of buffers currently waiting for reuse
    pub fn idle(&self) -> usize {
        self.inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, mut buffer: MirrorBuffer) {
        buffer.reset();
        let mut free = self.inner.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.inner.max_idle {
            free.push(buffer);
        }
    }
}

/// A buffer on loan from a [`BufferPool`]; goes back on drop
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: MirrorBuffer,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = MirrorBuffer;

    fn deref(&self) -> &MirrorBuffer {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut MirrorBuffer {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        // A zero-capacity placeholder does not allocate.
        let buffer = std::mem::replace(&mut self.buffer, MirrorBuffer::new(0));
        self.pool.release(buffer);
    }
}
