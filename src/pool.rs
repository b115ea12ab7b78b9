//! Fixed-size payload buffers
//!
//! Snapshots handed to subscribers live in blocks borrowed from a
//! [`BufferPool`]. The pool is the only allocator on the delivery path, and
//! acquiring a block is the only place a datastore operation may wait.

use std::{
    fmt,
    sync::{
        Condvar, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tracing::{error, warn};

/// Identifies the pool a payload block was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(pub usize);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// A source of fixed-size byte blocks
pub trait BufferPool: Send + Sync {
    fn id(&self) -> PoolId;

    /// Size in bytes of every block handed out
    fn block_size(&self) -> usize;

    /// Take a block, waiting at most `timeout` for one to come back
    fn alloc(&self, timeout: Duration) -> Option<Vec<u8>>;

    /// Give a block back
    fn free(&self, block: Vec<u8>);
}

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// An in-memory pool of `capacity` preallocated blocks
pub struct MemoryPool {
    id: PoolId,
    block_size: usize,
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
    returned: Condvar,
}

impl MemoryPool {
    /// Preallocate the pool, panicking if memory runs out. See [`MemoryPool::try_new`].
    pub fn new(capacity: usize, block_size: usize) -> Self {
        let blocks = (0..capacity).map(|_| vec![0u8; block_size]).collect();
        MemoryPool::with_blocks(blocks, capacity, block_size)
    }

    /// Preallocate the pool, or `None` if the blocks do not fit in memory
    pub fn try_new(capacity: usize, block_size: usize) -> Option<Self> {
        let mut blocks: Vec<Vec<u8>> = Vec::new();
        if let Err(err) = blocks.try_reserve_exact(capacity) {
            error!("Cannot reserve {capacity} payload blocks: {err}");
            return None;
        }
        for _ in 0..capacity {
            let mut block = Vec::new();
            if let Err(err) = block.try_reserve_exact(block_size) {
                error!("Cannot allocate a {block_size} byte payload block: {err}");
                return None;
            }
            block.resize(block_size, 0u8);
            blocks.push(block);
        }
        Some(MemoryPool::with_blocks(blocks, capacity, block_size))
    }

    fn with_blocks(blocks: Vec<Vec<u8>>, capacity: usize, block_size: usize) -> Self {
        MemoryPool {
            id: PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed)),
            block_size,
            capacity,
            free: Mutex::new(blocks),
            returned: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks currently waiting in the pool
    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Blocks currently lent out
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("id", &self.id)
            .field("block_size", &self.block_size)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl BufferPool for MemoryPool {
    fn id(&self) -> PoolId {
        self.id
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn alloc(&self, timeout: Duration) -> Option<Vec<u8>> {
        let free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut free, _) = self
            .returned
            .wait_timeout_while(free, timeout, |blocks| blocks.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        let block = free.pop();
        if block.is_none() {
            error!("{}: no block returned within {timeout:?}", self.id);
        }
        block
    }

    fn free(&self, block: Vec<u8>) {
        if block.len() != self.block_size {
            warn!(
                "{}: dropping foreign block of {} bytes (expected {})",
                self.id,
                block.len(),
                self.block_size
            );
            return;
        }
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() >= self.capacity {
            warn!("{}: more blocks returned than were lent", self.id);
            return;
        }
        free.push(block);
        drop(free);
        self.returned.notify_one();
    }
}
