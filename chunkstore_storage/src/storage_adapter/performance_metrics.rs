//! A storage adapter which counts store requests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{AsyncChunkStorageTraits, Bucket, Bytes, MaybeBytes, StorageError, StoreKey};

/// A snapshot of the requests seen by a [`PerformanceMetricsStorageAdapter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageMetrics {
    /// Get requests.
    pub reads: usize,
    /// Get requests for objects that do not exist.
    pub read_misses: usize,
    /// Bytes returned by get requests.
    pub bytes_read: usize,
    /// Set requests.
    pub writes: usize,
    /// Bytes passed to set requests, including requests that failed.
    pub bytes_written: usize,
    /// Exists requests.
    pub existence_checks: usize,
    /// Erase requests, including erasure of objects that did not exist.
    pub erasures: usize,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicUsize,
    read_misses: AtomicUsize,
    bytes_read: AtomicUsize,
    writes: AtomicUsize,
    bytes_written: AtomicUsize,
    existence_checks: AtomicUsize,
    erasures: AtomicUsize,
}

impl Counters {
    fn each(&self) -> [&AtomicUsize; 7] {
        [
            &self.reads,
            &self.read_misses,
            &self.bytes_read,
            &self.writes,
            &self.bytes_written,
            &self.existence_checks,
            &self.erasures,
        ]
    }
}

fn bump(counter: &AtomicUsize, n: usize) {
    counter.fetch_add(n, Ordering::Relaxed);
}

/// Wraps a store and counts the requests passed through it.
///
/// Lets tests assert that an operation did, or did not, reach the durable store.
///
/// ### Example
/// ```rust
/// # use std::sync::Arc;
/// # use chunkstore_storage::store::MemoryStore;
/// # use chunkstore_storage::storage_adapter::performance_metrics::{PerformanceMetricsStorageAdapter, StorageMetrics};
/// let store = Arc::new(PerformanceMetricsStorageAdapter::new(Arc::new(MemoryStore::new())));
/// assert_eq!(store.metrics(), StorageMetrics::default());
/// ```
#[derive(Debug)]
pub struct PerformanceMetricsStorageAdapter<TStorage: ?Sized> {
    storage: Arc<TStorage>,
    counters: Counters,
}

impl<TStorage: ?Sized> PerformanceMetricsStorageAdapter<TStorage> {
    /// Wrap `storage`.
    #[must_use]
    pub fn new(storage: Arc<TStorage>) -> Self {
        Self {
            storage,
            counters: Counters::default(),
        }
    }

    /// A snapshot of the counters.
    #[must_use]
    pub fn metrics(&self) -> StorageMetrics {
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        let counters = &self.counters;
        StorageMetrics {
            reads: load(&counters.reads),
            read_misses: load(&counters.read_misses),
            bytes_read: load(&counters.bytes_read),
            writes: load(&counters.writes),
            bytes_written: load(&counters.bytes_written),
            existence_checks: load(&counters.existence_checks),
            erasures: load(&counters.erasures),
        }
    }

    /// Zero the counters.
    pub fn reset(&self) {
        for counter in self.counters.each() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// The number of get requests.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.metrics().reads
    }

    /// The number of set requests.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.metrics().writes
    }
}

#[async_trait::async_trait]
impl<TStorage: ?Sized + AsyncChunkStorageTraits> AsyncChunkStorageTraits
    for PerformanceMetricsStorageAdapter<TStorage>
{
    async fn get(&self, bucket: &Bucket, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        bump(&self.counters.reads, 1);
        let value = self.storage.get(bucket, key).await?;
        match &value {
            Some(bytes) => bump(&self.counters.bytes_read, bytes.len()),
            None => bump(&self.counters.read_misses, 1),
        }
        Ok(value)
    }

    async fn set(&self, bucket: &Bucket, key: &StoreKey, value: Bytes) -> Result<(), StorageError> {
        bump(&self.counters.writes, 1);
        bump(&self.counters.bytes_written, value.len());
        self.storage.set(bucket, key, value).await
    }

    async fn exists(&self, bucket: &Bucket, key: &StoreKey) -> Result<bool, StorageError> {
        bump(&self.counters.existence_checks, 1);
        self.storage.exists(bucket, key).await
    }

    async fn erase(&self, bucket: &Bucket, key: &StoreKey) -> Result<(), StorageError> {
        bump(&self.counters.erasures, 1);
        self.storage.erase(bucket, key).await
    }
}
