use auto_impl::auto_impl;

use crate::{Bucket, Bytes, MaybeBytes, StorageError, StoreKey};

/// Async durable object storage traits.
///
/// Values are opaque byte strings addressed by a [`Bucket`] and a [`StoreKey`].
#[async_trait::async_trait]
#[auto_impl(Arc)]
pub trait AsyncChunkStorageTraits: Send + Sync {
    /// Retrieve the value (bytes) associated with `key` in `bucket`.
    ///
    /// Returns [`None`] if the key is not found.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if there is an underlying storage error.
    async fn get(&self, bucket: &Bucket, key: &StoreKey) -> Result<MaybeBytes, StorageError>;

    /// Store `value` at `key` in `bucket`, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] on failure to store.
    async fn set(&self, bucket: &Bucket, key: &StoreKey, value: Bytes) -> Result<(), StorageError>;

    /// Returns true if `key` exists in `bucket`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if there is an underlying storage error.
    async fn exists(&self, bucket: &Bucket, key: &StoreKey) -> Result<bool, StorageError> {
        Ok(self.get(bucket, key).await?.is_some())
    }

    /// Erase `key` from `bucket`.
    ///
    /// Succeeds if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if there is an underlying storage error.
    async fn erase(&self, bucket: &Bucket, key: &StoreKey) -> Result<(), StorageError>;
}
