//! `chunkstore` is the chunk storage tier of a chunked multidimensional array service.
//!
//! A dataset is split into fixed size rectangular chunks, each independently addressable, cacheable and persisted.
//! Clients request hyperslab, point list or predicate filtered regions of a single chunk,
//! and the [`ChunkCoordinator`] applies them to an in-memory [`ChunkBuffer`] and decides when the buffer is written back to durable storage.
//!
//! The selection algebra lives in [`chunkstore_selection`] and the durable object store API in [`chunkstore_storage`].
//! This crate provides:
//!  - [`ChunkId`], [`DatasetId`] and [`Partition`]: chunk identity and ownership,
//!  - [`DataType`] and [`ChunkBuffer`]: element types and decoded chunks,
//!  - [`ElementCodec`]: the chunk wire encoding,
//!  - [`FilterResolver`]: memoized resolution of dataset filter declarations,
//!  - [`ChunkCache`]: a byte weighted cache of decoded chunks with a pending write-back table,
//!  - [`PredicateCompiler`] and [`ChunkKernels`]: query predicates and per chunk element kernels,
//!  - [`ChunkCoordinator`]: the chunk operations (read, write, query, point access, delete).
//!
//! ## Example
//! ```rust
//! # use std::sync::Arc;
//! # use chunkstore::{ChunkCoordinator, ChunkId, DataType, NumericType, DatasetDescriptor, StoreMetadataSource};
//! # use chunkstore_storage::{store::MemoryStore, Bucket};
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let metadata = Arc::new(StoreMetadataSource::new(store.clone(), 64));
//! let coordinator = ChunkCoordinator::builder(store, metadata.clone()).build();
//!
//! let bucket = Bucket::from("mybucket");
//! let chunk_id = ChunkId::new("c-5ed4a1ba-0c8c-4c82-8b7a-8b3c6a3a5b71_0_0")?;
//! let descriptor = DatasetDescriptor::new(chunk_id.dataset_id(), DataType::integer(NumericType::Int32), vec![4, 4]);
//! metadata.put_dataset(&bucket, &descriptor).await?;
//!
//! let payload: Vec<u8> = (1..=4i32).flat_map(i32::to_le_bytes).collect();
//! coordinator.write(&bucket, chunk_id.as_str(), Some("[1,0:4]"), payload.into(), None, None).await?;
//!
//! let output = coordinator.read(&bucket, chunk_id.as_str(), Some("[0:2,1]"), None).await?;
//! assert_eq!(output.shape, vec![2, 1]);
//! assert_eq!(output.buffer.to_values()?, vec![serde_json::json!(0), serde_json::json!(2)]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//! `chunkstore` logs through the [`log`] facade and does not install a logger.
//! State transitions are logged at the `debug` level, deletions and chunk initialisation at the `info` level, and rejected requests at the `warn` level.
//!
//! ## Licence
//! `chunkstore` is licensed under either of
//!  - the Apache License, Version 2.0 [LICENSE-APACHE](https://docs.rs/crate/chunkstore/latest/source/LICENCE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0> or
//!  - the MIT license [LICENSE-MIT](https://docs.rs/crate/chunkstore/latest/source/LICENCE-MIT) or <http://opensource.org/licenses/MIT>, at your option.
//!
//! Unless you explicitly state otherwise, any contribution intentionally submitted for inclusion in the work by you, as defined in the Apache-2.0 license, shall be dual licensed as above, without any additional terms or conditions.
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod chunk_buffer;
pub mod chunk_cache;
pub mod chunk_id;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod data_type;
pub mod dataset;
pub mod filter;
pub mod kernels;
pub mod predicate;

pub use chunk_buffer::{ChunkBuffer, ChunkBytes};
pub use chunk_cache::ChunkCache;
pub use chunk_id::{ChunkId, ChunkIdError, DatasetId, Partition};
pub use codec::{CodecError, ElementCodec, RawElementCodec};
pub use config::Config;
pub use coordinator::{ChunkCoordinator, ChunkCoordinatorBuilder, QueryOutput, ReadOutput, WriteOutcome};
pub use data_type::{CompoundField, DataType, DataTypeError, NumericType, StringLength};
pub use dataset::{DatasetDescriptor, DatasetMetadataSource, StoreMetadataSource};
pub use filter::{Compressor, FilterDeclaration, FilterOps, FilterResolver, ShuffleMode};
pub use kernels::{ChunkKernels, DefaultChunkKernels, QueryResult};
pub use predicate::{BooleanPredicateCompiler, CompiledPredicate, PredicateCompiler, PredicateError};

pub use chunkstore_selection::{ArrayIndices, ArrayShape, Selection, SelectionError};
pub use chunkstore_storage::{Bucket, StorageError};

use thiserror::Error;

/// A chunk operation error.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ChunkError {
    /// A selection error.
    #[error(transparent)]
    Selection(#[from] SelectionError),
    /// An invalid chunk identity.
    #[error(transparent)]
    InvalidChunkId(#[from] ChunkIdError),
    /// The chunk is owned by another partition.
    #[error("chunk {chunk_id} does not belong to partition {partition}")]
    NotInPartition {
        /// The chunk.
        chunk_id: ChunkId,
        /// The partition of this node.
        partition: Partition,
    },
    /// The dataset does not exist.
    #[error("dataset {0} not found")]
    DatasetNotFound(DatasetId),
    /// The dataset metadata is invalid.
    #[error("invalid metadata for dataset {dataset_id}: {reason}")]
    InvalidDatasetMetadata {
        /// The dataset.
        dataset_id: DatasetId,
        /// What is wrong with it.
        reason: String,
    },
    /// The chunk does not exist and may not be initialised.
    #[error("chunk {0} not found")]
    ChunkNotFound(ChunkId),
    /// A query read matched no rows.
    #[error("no rows of chunk {chunk_id} match {query:?}")]
    NotFound {
        /// The chunk.
        chunk_id: ChunkId,
        /// The query expression.
        query: String,
    },
    /// The chunk cache does not have the capacity to admit the chunk.
    ///
    /// The request may be retried after a delay.
    #[error("chunk cache has {mem_free} bytes free, {min_chunk_size} bytes are required")]
    CapacityExceeded {
        /// The free chunk cache memory in bytes.
        mem_free: u64,
        /// The required free memory in bytes.
        min_chunk_size: u64,
    },
    /// An invalid query predicate.
    #[error(transparent)]
    InvalidPredicate(#[from] PredicateError),
    /// A point coordinate outside of the chunk.
    #[error("point {point:?} is outside of chunk shape {shape:?}")]
    InvalidCoordinate {
        /// The point.
        point: ArrayIndices,
        /// The chunk shape.
        shape: ArrayShape,
    },
    /// The payload size does not match the selection.
    #[error("payload has {actual} bytes, expected {expected} bytes")]
    PayloadSizeMismatch {
        /// The expected size in bytes.
        expected: usize,
        /// The payload size in bytes.
        actual: usize,
    },
    /// The query is not supported by the chunk.
    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),
    /// An invalid query update.
    #[error("invalid query update: {0}")]
    InvalidQueryUpdate(String),
    /// An invalid field selection.
    #[error("invalid field selection: {0}")]
    InvalidFields(DataTypeError),
    /// An element value error.
    #[error(transparent)]
    DataType(#[from] DataTypeError),
    /// A codec error.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A chunk was modified but could not be persisted.
    ///
    /// The chunk is held for write-back and persisting it is reattempted before it is next used.
    #[error("failed to persist chunk {chunk_id}: {source}")]
    PersistFailed {
        /// The chunk.
        chunk_id: ChunkId,
        /// The underlying storage error.
        source: StorageError,
    },
}

impl ChunkError {
    /// Returns true if the request may succeed if retried after a delay.
    ///
    /// Only [`ChunkError::CapacityExceeded`] is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}
