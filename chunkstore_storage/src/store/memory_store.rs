//! An asynchronous in-memory store.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::{AsyncChunkStorageTraits, Bucket, Bytes, MaybeBytes, StorageError, StoreKey};

/// An asynchronous in-memory store.
///
/// Values of all buckets are held in one ordered map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data_map: Mutex<BTreeMap<(Bucket, StoreKey), Bytes>>,
}

impl MemoryStore {
    /// Create a new memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the keys in `bucket`.
    #[must_use]
    pub fn keys(&self, bucket: &Bucket) -> Vec<StoreKey> {
        self.data_map
            .lock()
            .keys()
            .filter(|(key_bucket, _)| key_bucket == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Return the number of values in all buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data_map.lock().len()
    }

    /// Returns true if the store holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl AsyncChunkStorageTraits for MemoryStore {
    async fn get(&self, bucket: &Bucket, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        Ok(self
            .data_map
            .lock()
            .get(&(bucket.clone(), key.clone()))
            .cloned())
    }

    async fn set(&self, bucket: &Bucket, key: &StoreKey, value: Bytes) -> Result<(), StorageError> {
        self.data_map
            .lock()
            .insert((bucket.clone(), key.clone()), value);
        Ok(())
    }

    async fn exists(&self, bucket: &Bucket, key: &StoreKey) -> Result<bool, StorageError> {
        Ok(self
            .data_map
            .lock()
            .contains_key(&(bucket.clone(), key.clone())))
    }

    async fn erase(&self, bucket: &Bucket, key: &StoreKey) -> Result<(), StorageError> {
        self.data_map.lock().remove(&(bucket.clone(), key.clone()));
        Ok(())
    }
}
