use std::{
    fmt::{Debug, Formatter},
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex},
};

use bytes::BytesMut;

/// free buffers kept around for reuse, extra ones are dropped on release
const DEFAULT_MAX_IDLE: usize = 64;

/// A buffer allocator shared by the connections of one dialer chain.
///
/// Buffers are leased with [`BufferPool::acquire`] or
/// [`BufferPool::acquire_empty`] and go back to the pool when the returned
/// [`PooledBuf`] is dropped.
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    max_idle: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Leases a zero-filled buffer of exactly `size` bytes.
    pub fn acquire(self: &Arc<Self>, size: usize) -> PooledBuf {
        let mut buf = self.take(size);
        buf.resize(size, 0);
        PooledBuf {
            buf,
            pool: self.clone(),
        }
    }

    /// Leases an empty, growable buffer.
    pub fn acquire_empty(self: &Arc<Self>) -> PooledBuf {
        PooledBuf {
            buf: self.take(0),
            pool: self.clone(),
        }
    }

    /// Number of buffers currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    fn take(&self, size: usize) -> BytesMut {
        let reused = self.free.lock().ok().and_then(|mut free| {
            free.iter()
                .position(|b| b.capacity() >= size)
                .map(|idx| free.swap_remove(idx))
        });
        reused.unwrap_or_else(|| BytesMut::with_capacity(size))
    }

    fn release(&self, mut buf: BytesMut) {
        buf.clear();
        if let Ok(mut free) = self.free.lock()
            && free.len() < self.max_idle
        {
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for BufferPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.idle())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

/// A leased buffer, returned to its [`BufferPool`] on drop.
pub struct PooledBuf {
    buf: BytesMut,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

impl Debug for PooledBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
