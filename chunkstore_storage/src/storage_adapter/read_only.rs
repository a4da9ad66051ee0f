//! A storage adapter which can reject writes at runtime.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{AsyncChunkStorageTraits, Bucket, Bytes, MaybeBytes, StorageError, StoreKey};

/// A storage adapter which can be switched to read only.
///
/// While read only, [`set`](AsyncChunkStorageTraits::set) and [`erase`](AsyncChunkStorageTraits::erase) fail with [`StorageError::ReadOnly`].
/// This is useful for exercising write-back failure handling.
#[derive(Debug)]
pub struct ReadOnlyStorageAdapter<TStorage: ?Sized> {
    storage: Arc<TStorage>,
    read_only: AtomicBool,
}

impl<TStorage: ?Sized> ReadOnlyStorageAdapter<TStorage> {
    /// Create a new writable adapter over `storage`.
    #[must_use]
    pub fn new(storage: Arc<TStorage>) -> Self {
        Self {
            storage,
            read_only: AtomicBool::new(false),
        }
    }

    /// Set whether writes are rejected.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }

    /// Returns true if writes are rejected.
    pub fn read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl<TStorage: ?Sized + AsyncChunkStorageTraits> AsyncChunkStorageTraits
    for ReadOnlyStorageAdapter<TStorage>
{
    async fn get(&self, bucket: &Bucket, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        self.storage.get(bucket, key).await
    }

    async fn set(&self, bucket: &Bucket, key: &StoreKey, value: Bytes) -> Result<(), StorageError> {
        if self.read_only() {
            Err(StorageError::ReadOnly)
        } else {
            self.storage.set(bucket, key, value).await
        }
    }

    async fn exists(&self, bucket: &Bucket, key: &StoreKey) -> Result<bool, StorageError> {
        self.storage.exists(bucket, key).await
    }

    async fn erase(&self, bucket: &Bucket, key: &StoreKey) -> Result<(), StorageError> {
        if self.read_only() {
            Err(StorageError::ReadOnly)
        } else {
            self.storage.erase(bucket, key).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn read_only() -> Result<(), Box<dyn std::error::Error>> {
        let store = ReadOnlyStorageAdapter::new(Arc::new(MemoryStore::new()));
        crate::store_test::store_write(&store).await?;
        store.set_read_only(true);
        crate::store_test::store_read(&store).await?;
        assert!(matches!(
            crate::store_test::store_write(&store).await,
            Err(StorageError::ReadOnly)
        ));
        assert!(matches!(
            crate::store_test::store_erase(&store).await,
            Err(StorageError::ReadOnly)
        ));
        store.set_read_only(false);
        crate::store_test::store_erase(&store).await?;
        Ok(())
    }
}
