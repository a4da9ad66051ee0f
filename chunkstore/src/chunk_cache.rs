//! The chunk cache.

use std::{collections::HashMap, sync::Arc};

use chunkstore_storage::Bucket;
use moka::{policy::EvictionPolicy, sync::CacheBuilder};
use parking_lot::Mutex;

use crate::{chunk_buffer::ChunkBuffer, chunk_id::ChunkId};

type ChunkCacheKey = (Bucket, ChunkId);

/// A size limited LRU cache of decoded chunks.
///
/// The cache also holds a pending write-back table of chunks that were modified but could not be persisted.
/// Pending chunks are not subject to eviction and are persisted before the chunk is next used.
pub struct ChunkCache {
    cache: moka::sync::Cache<ChunkCacheKey, Arc<ChunkBuffer>>,
    capacity: u64,
    pending: Mutex<HashMap<ChunkCacheKey, Arc<ChunkBuffer>>>,
}

impl std::fmt::Debug for ChunkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCache")
            .field("capacity", &self.capacity)
            .field("entries", &self.cache.entry_count())
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl ChunkCache {
    /// Create a new chunk cache with a capacity of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: CacheBuilder::new(capacity)
                .eviction_policy(EvictionPolicy::lru())
                .weigher(|_k: &ChunkCacheKey, v: &Arc<ChunkBuffer>| {
                    u32::try_from(v.size()).unwrap_or(u32::MAX)
                })
                .build(),
            capacity,
            pending: Mutex::default(),
        }
    }

    /// The capacity of the cache in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Get a cached chunk.
    #[must_use]
    pub fn get(&self, bucket: &Bucket, chunk_id: &ChunkId) -> Option<Arc<ChunkBuffer>> {
        self.cache.get(&(bucket.clone(), chunk_id.clone()))
    }

    /// Returns true if the chunk is cached.
    #[must_use]
    pub fn contains(&self, bucket: &Bucket, chunk_id: &ChunkId) -> bool {
        self.cache.contains_key(&(bucket.clone(), chunk_id.clone()))
    }

    /// Cache a chunk.
    pub fn insert(&self, bucket: &Bucket, chunk_id: &ChunkId, buffer: Arc<ChunkBuffer>) {
        self.cache.insert((bucket.clone(), chunk_id.clone()), buffer);
    }

    /// Remove a chunk from the cache and the pending write-back table.
    pub fn remove(&self, bucket: &Bucket, chunk_id: &ChunkId) {
        let key = (bucket.clone(), chunk_id.clone());
        self.pending.lock().remove(&key);
        self.cache.invalidate(&key);
    }

    /// The number of bytes used by cached chunks.
    #[must_use]
    pub fn mem_used(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.weighted_size()
    }

    /// The number of bytes available for cached chunks.
    ///
    /// This is a snapshot and may be stale under concurrent use.
    #[must_use]
    pub fn mem_free(&self) -> u64 {
        self.capacity.saturating_sub(self.mem_used())
    }

    /// Add a chunk to the pending write-back table, replacing any pending version.
    pub fn set_pending(&self, bucket: &Bucket, chunk_id: &ChunkId, buffer: Arc<ChunkBuffer>) {
        self.pending
            .lock()
            .insert((bucket.clone(), chunk_id.clone()), buffer);
    }

    /// Take a chunk from the pending write-back table.
    #[must_use]
    pub fn take_pending(&self, bucket: &Bucket, chunk_id: &ChunkId) -> Option<Arc<ChunkBuffer>> {
        self.pending.lock().remove(&(bucket.clone(), chunk_id.clone()))
    }

    /// Returns true if the chunk is pending write-back.
    #[must_use]
    pub fn is_pending(&self, bucket: &Bucket, chunk_id: &ChunkId) -> bool {
        self.pending
            .lock()
            .contains_key(&(bucket.clone(), chunk_id.clone()))
    }

    /// The number of chunks pending write-back.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}
