//! The durable object storage API for the `chunkstore` crate.
//!
//! Chunks and dataset documents are persisted as opaque byte values in a durable object store,
//! addressed by a [`Bucket`] and a [`StoreKey`] within it.
//! For example: an S3 bucket, an Azure container, a POSIX directory, etc.
//!
//! This crate includes an in-memory store ([`store::MemoryStore`]) and storage adapters for testing.
//!
//! ## Licence
//! `chunkstore_storage` is licensed under either of
//! - the Apache License, Version 2.0 [LICENSE-APACHE](https://docs.rs/crate/chunkstore_storage/latest/source/LICENCE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0> or
//! - the MIT license [LICENSE-MIT](https://docs.rs/crate/chunkstore_storage/latest/source/LICENCE-MIT) or <http://opensource.org/licenses/MIT>, at your option.
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod storage_adapter;
mod storage_async;
pub mod store;
mod store_key;


use std::sync::Arc;

use thiserror::Error;

pub use store_key::{Bucket, StoreKey, StoreKeyError};

pub use self::storage_async::AsyncChunkStorageTraits;

/// Shared asynchronous chunk storage.
pub type AsyncChunkStorage = Arc<dyn AsyncChunkStorageTraits>;

/// A stored object value.
pub type Bytes = bytes::Bytes;

/// A stored object value, or [`None`] if no object is stored under the key.
pub type MaybeBytes = Option<Bytes>;

/// A storage error.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The store rejects writes.
    #[error("store is read only")]
    ReadOnly,
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] Arc<std::io::Error>),
    /// An invalid store key.
    #[error("invalid store key {0}")]
    InvalidStoreKey(#[from] StoreKeyError),
    /// The store does not implement the operation.
    #[error("unsupported store operation: {0}")]
    Unsupported(String),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(Arc::new(err))
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_display() {
        assert_eq!(StorageError::ReadOnly.to_string(), "store is read only");
        assert_eq!(
            StorageError::from(std::io::Error::other("disk full")).to_string(),
            "disk full"
        );
        assert_eq!(
            StorageError::from("timeout".to_string()).to_string(),
            "timeout"
        );
    }
}
