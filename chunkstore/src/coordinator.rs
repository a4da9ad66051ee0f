//! The chunk access coordinator.
//!
//! A [`ChunkCoordinator`] performs one logical operation on one chunk per call:
//!  - resolve the chunk identity, its partition and the descriptor of its dataset,
//!  - normalise the request (selection, payload, points, predicate) so that every request error is detected before the chunk is fetched,
//!  - fetch the chunk from the pending write-back table, the chunk cache, the durable store, or initialise it,
//!  - apply a [`ChunkKernels`] operation to a private copy of the chunk,
//!  - persist the chunk if it was mutated or newly initialised.
//!
//! Callers serialise mutating operations per chunk identity.

use std::sync::Arc;

use bytes::Bytes;
use chunkstore_selection::{broadcast_shape, broadcasts_to, parse, ArrayIndices, ArrayShape, Selection, SelectionError};
use chunkstore_storage::{AsyncChunkStorage, Bucket, StorageError};
use serde_json::{Map, Value};

use crate::{
    chunk_buffer::ChunkBuffer,
    chunk_cache::ChunkCache,
    chunk_id::{ChunkId, ChunkIdError},
    codec::{ElementCodec, RawElementCodec},
    config::Config,
    data_type::{DataType, DataTypeError},
    dataset::{DatasetDescriptor, DatasetMetadataSource},
    filter::{FilterOps, FilterResolver},
    kernels::{ChunkKernels, DefaultChunkKernels, QueryResult},
    predicate::{BooleanPredicateCompiler, CompiledPredicate, PredicateCompiler, PredicateError},
    ChunkError,
};

/// The output of a read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadOutput {
    /// The shape of the selection.
    pub shape: ArrayShape,
    /// The selected elements.
    pub buffer: ChunkBuffer,
}

/// The outcome of a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOutcome {
    /// True if any element changed.
    pub changed: bool,
    /// True if the chunk was persisted.
    pub persisted: bool,
}

/// The output of a query write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryOutput {
    /// The updated rows.
    pub result: QueryResult,
    /// True if the chunk was persisted.
    pub persisted: bool,
}

/// When a missing chunk may be initialised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Initialisation {
    /// Only if the dataset declares an initializer.
    IfInitializer,
    /// Always.
    Always,
}

struct Fetched {
    buffer: ChunkBuffer,
    initialised: bool,
}

/// A [`ChunkCoordinator`] builder.
///
/// Collaborators that are not set take their defaults:
///  - a [`ChunkCache`] with the [chunk cache size](crate::config::Config#chunk-cache-size) of the configuration,
///  - a default [`FilterResolver`],
///  - [`RawElementCodec`], [`BooleanPredicateCompiler`] and [`DefaultChunkKernels`].
pub struct ChunkCoordinatorBuilder {
    config: Config,
    storage: AsyncChunkStorage,
    metadata: Arc<dyn DatasetMetadataSource>,
    chunk_cache: Option<Arc<ChunkCache>>,
    filter_resolver: Option<Arc<FilterResolver>>,
    codec: Arc<dyn ElementCodec>,
    predicate_compiler: Arc<dyn PredicateCompiler>,
    kernels: Arc<dyn ChunkKernels>,
}

impl ChunkCoordinatorBuilder {
    fn new(storage: AsyncChunkStorage, metadata: Arc<dyn DatasetMetadataSource>) -> Self {
        Self {
            config: Config::default(),
            storage,
            metadata,
            chunk_cache: None,
            filter_resolver: None,
            codec: Arc::new(RawElementCodec::new()),
            predicate_compiler: Arc::new(BooleanPredicateCompiler),
            kernels: Arc::new(DefaultChunkKernels),
        }
    }

    /// Set the configuration.
    pub fn config(&mut self, config: Config) -> &mut Self {
        self.config = config;
        self
    }

    /// Set the chunk cache, which may be shared with other coordinators.
    pub fn chunk_cache(&mut self, chunk_cache: Arc<ChunkCache>) -> &mut Self {
        self.chunk_cache = Some(chunk_cache);
        self
    }

    /// Set the filter resolver, which may be shared with other coordinators.
    pub fn filter_resolver(&mut self, filter_resolver: Arc<FilterResolver>) -> &mut Self {
        self.filter_resolver = Some(filter_resolver);
        self
    }

    /// Set the element codec.
    pub fn codec(&mut self, codec: Arc<dyn ElementCodec>) -> &mut Self {
        self.codec = codec;
        self
    }

    /// Set the predicate compiler.
    pub fn predicate_compiler(&mut self, predicate_compiler: Arc<dyn PredicateCompiler>) -> &mut Self {
        self.predicate_compiler = predicate_compiler;
        self
    }

    /// Set the chunk kernels.
    pub fn kernels(&mut self, kernels: Arc<dyn ChunkKernels>) -> &mut Self {
        self.kernels = kernels;
        self
    }

    /// Build into a [`ChunkCoordinator`].
    #[must_use]
    pub fn build(&self) -> ChunkCoordinator {
        ChunkCoordinator {
            chunk_cache: self
                .chunk_cache
                .clone()
                .unwrap_or_else(|| Arc::new(ChunkCache::new(self.config.chunk_cache_size()))),
            filter_resolver: self.filter_resolver.clone().unwrap_or_default(),
            config: self.config.clone(),
            storage: self.storage.clone(),
            metadata: self.metadata.clone(),
            codec: self.codec.clone(),
            predicate_compiler: self.predicate_compiler.clone(),
            kernels: self.kernels.clone(),
        }
    }
}

/// The chunk access coordinator.
///
/// Chunk identities are passed in their wire form `c-<uuid>_<i0>_<i1>...` and selections in the wire grammar `[<dim>,<dim>,...]`.
/// A missing selection selects the full extent of the chunk.
pub struct ChunkCoordinator {
    config: Config,
    storage: AsyncChunkStorage,
    metadata: Arc<dyn DatasetMetadataSource>,
    chunk_cache: Arc<ChunkCache>,
    filter_resolver: Arc<FilterResolver>,
    codec: Arc<dyn ElementCodec>,
    predicate_compiler: Arc<dyn PredicateCompiler>,
    kernels: Arc<dyn ChunkKernels>,
}

impl std::fmt::Debug for ChunkCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCoordinator")
            .field("config", &self.config)
            .field("chunk_cache", &self.chunk_cache)
            .field("filter_resolver", &self.filter_resolver)
            .finish_non_exhaustive()
    }
}

impl ChunkCoordinator {
    /// Create a [`ChunkCoordinatorBuilder`] for chunks persisted in `storage` of datasets described by `metadata`.
    #[must_use]
    pub fn builder(
        storage: AsyncChunkStorage,
        metadata: Arc<dyn DatasetMetadataSource>,
    ) -> ChunkCoordinatorBuilder {
        ChunkCoordinatorBuilder::new(storage, metadata)
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The chunk cache.
    #[must_use]
    pub fn chunk_cache(&self) -> &Arc<ChunkCache> {
        &self.chunk_cache
    }

    /// The filter resolver.
    #[must_use]
    pub fn filter_resolver(&self) -> &Arc<FilterResolver> {
        &self.filter_resolver
    }

    /// Read the elements of a chunk in `selection`.
    ///
    /// If `fields` is supplied, the elements of a compound chunk are projected onto those fields in the given order.
    /// A chunk that does not exist is initialised only if its dataset declares an initializer,
    /// in which case it is persisted regardless of the outcome of the read.
    ///
    /// # Errors
    /// Returns a [`ChunkError`] if the request is invalid, or the chunk does not exist and may not be initialised, or on a storage error.
    pub async fn read(
        &self,
        bucket: &Bucket,
        chunk_id: &str,
        selection: Option<&str>,
        fields: Option<&[String]>,
    ) -> Result<ReadOutput, ChunkError> {
        let (chunk_id, descriptor) = self.resolve(bucket, chunk_id).await?;
        let selection = parse(selection.unwrap_or_default(), descriptor.chunk_shape())?;
        let projection = Projection::new(&descriptor.data_type, fields)?;
        log::debug!("read {selection} of chunk {chunk_id}");

        let Fetched {
            buffer,
            initialised,
        } = self
            .fetch(bucket, &chunk_id, &descriptor, Initialisation::IfInitializer)
            .await?;
        let output = self
            .kernels
            .read_selection(&buffer, &selection)
            .and_then(|read| projection.apply(read));
        if initialised {
            self.persist(bucket, &chunk_id, &descriptor, buffer).await?;
        }
        let buffer = output?;
        Ok(ReadOutput {
            shape: buffer.shape().to_vec(),
            buffer,
        })
    }

    /// Write `payload` to the elements of a chunk in `selection`.
    ///
    /// `payload` holds the concatenated element encodings.
    /// If `element_count` is supplied, the payload holds that many elements arranged by [`broadcast_shape`] and is repeated over the selection.
    /// If `fields` is supplied, the payload elements hold only those fields of a compound chunk, in the given order,
    /// and the other fields of the selected elements are left unchanged.
    /// A chunk that does not exist is initialised.
    /// The chunk is persisted if any element changed, or always if [write zero chunks](crate::config::Config#write-zero-chunks) is enabled.
    ///
    /// # Errors
    /// Returns a [`ChunkError`] if the request is invalid, the chunk cache is full, or on a storage error.
    pub async fn write(
        &self,
        bucket: &Bucket,
        chunk_id: &str,
        selection: Option<&str>,
        payload: Bytes,
        element_count: Option<u64>,
        fields: Option<&[String]>,
    ) -> Result<WriteOutcome, ChunkError> {
        let (chunk_id, descriptor) = self.resolve(bucket, chunk_id).await?;
        let selection = parse(selection.unwrap_or_default(), descriptor.chunk_shape())?;
        let projection = Projection::new(&descriptor.data_type, fields)?;
        let selection_shape = selection.shape()?;
        let data_shape = match element_count {
            Some(element_count) => {
                let data_shape = broadcast_shape(&selection_shape, element_count)?;
                if !broadcasts_to(&data_shape, &selection_shape) {
                    return Err(SelectionError::BroadcastError {
                        shape: selection_shape,
                        element_count,
                    }
                    .into());
                }
                data_shape
            }
            None => selection_shape.clone(),
        };
        let data = self
            .decode_payload(projection.data_type(&descriptor.data_type), &payload, &data_shape)?
            .broadcast_to(&selection_shape)?;
        log::debug!("write {selection} of chunk {chunk_id}");

        self.admit(bucket, &chunk_id)?;
        let Fetched { mut buffer, .. } = self
            .fetch(bucket, &chunk_id, &descriptor, Initialisation::Always)
            .await?;
        let data = if projection.is_identity() {
            data
        } else {
            let existing = self.kernels.read_selection(&buffer, &selection)?;
            projection.merge(&existing, &data)?
        };
        let changed = self
            .kernels
            .write_selection(&mut buffer, &selection, &data)?;
        let persisted = self
            .persist_if_modified(bucket, &chunk_id, &descriptor, buffer)
            .await?;
        Ok(WriteOutcome { changed, persisted })
    }

    /// Find up to `limit` rows of a one dimensional compound chunk in `selection` that satisfy `query`.
    ///
    /// A `limit` of zero is unbounded.
    /// If `fields` is supplied, the rows are projected onto those fields in the given order.
    ///
    /// # Errors
    /// Returns [`ChunkError::NotFound`] if no rows match, or another [`ChunkError`] if the request is invalid, the chunk does not exist, or on a storage error.
    pub async fn query_read(
        &self,
        bucket: &Bucket,
        chunk_id: &str,
        selection: Option<&str>,
        query: &str,
        limit: usize,
        fields: Option<&[String]>,
    ) -> Result<QueryResult, ChunkError> {
        let (chunk_id, descriptor) = self.resolve(bucket, chunk_id).await?;
        let (selection, predicate) = self.prepare_query(&chunk_id, &descriptor, selection, query)?;
        let projection = Projection::new(&descriptor.data_type, fields)?;
        log::debug!("query {query:?} of {selection} of chunk {chunk_id}");

        let Fetched {
            mut buffer,
            initialised,
        } = self
            .fetch(bucket, &chunk_id, &descriptor, Initialisation::IfInitializer)
            .await?;
        let result = self.kernels.query(
            &mut buffer,
            &selection,
            predicate.as_ref(),
            (limit > 0).then_some(limit),
            None,
        );
        if initialised {
            self.persist(bucket, &chunk_id, &descriptor, buffer).await?;
        }
        let mut result = result?;
        if result.is_empty() {
            return Err(ChunkError::NotFound {
                chunk_id,
                query: query.to_string(),
            });
        }
        result.rows = projection.apply(result.rows)?;
        Ok(result)
    }

    /// Replace the fields named in `update` of up to `limit` rows of a one dimensional compound chunk in `selection` that satisfy `query`.
    ///
    /// A `limit` of zero is unbounded.
    /// The chunk is persisted only if a row matched.
    ///
    /// # Errors
    /// Returns [`ChunkError::InvalidQueryUpdate`] if `update` is not a non-empty object of valid field values,
    /// or another [`ChunkError`] if the request is invalid, the chunk cache is full, the chunk does not exist, or on a storage error.
    pub async fn query_write(
        &self,
        bucket: &Bucket,
        chunk_id: &str,
        selection: Option<&str>,
        query: &str,
        limit: usize,
        update: &Value,
    ) -> Result<QueryOutput, ChunkError> {
        let (chunk_id, descriptor) = self.resolve(bucket, chunk_id).await?;
        let (selection, predicate) = self.prepare_query(&chunk_id, &descriptor, selection, query)?;
        let update = validate_update(&descriptor.data_type, update)?;
        log::debug!("query update {query:?} of {selection} of chunk {chunk_id}");

        self.admit(bucket, &chunk_id)?;
        let Fetched { mut buffer, .. } = self
            .fetch(bucket, &chunk_id, &descriptor, Initialisation::IfInitializer)
            .await?;
        let result = self.kernels.query(
            &mut buffer,
            &selection,
            predicate.as_ref(),
            (limit > 0).then_some(limit),
            Some(update),
        )?;
        let persisted = if result.is_empty() {
            log::debug!("query update {query:?} matched no rows of chunk {chunk_id}");
            false
        } else {
            self.persist(bucket, &chunk_id, &descriptor, buffer).await?;
            true
        };
        Ok(QueryOutput { result, persisted })
    }

    /// Read the elements of a chunk at `points`.
    ///
    /// `points` is a flat list of coordinates, with one coordinate per dimension of each point.
    /// One element is returned per point in request order.
    /// If `fields` is supplied, the elements of a compound chunk are projected onto those fields in the given order.
    ///
    /// # Errors
    /// Returns [`ChunkError::InvalidCoordinate`] if a point is outside of the chunk,
    /// or another [`ChunkError`] if the chunk does not exist and may not be initialised, or on a storage error.
    pub async fn read_points(
        &self,
        bucket: &Bucket,
        chunk_id: &str,
        points: &[u64],
        fields: Option<&[String]>,
    ) -> Result<ReadOutput, ChunkError> {
        let (chunk_id, descriptor) = self.resolve(bucket, chunk_id).await?;
        let points = split_points(points, descriptor.chunk_shape())?;
        let projection = Projection::new(&descriptor.data_type, fields)?;
        log::debug!("read {} points of chunk {chunk_id}", points.len());

        let Fetched {
            buffer,
            initialised,
        } = self
            .fetch(bucket, &chunk_id, &descriptor, Initialisation::IfInitializer)
            .await?;
        let output = self
            .kernels
            .read_points(&buffer, &points)
            .and_then(|read| projection.apply(read));
        if initialised {
            self.persist(bucket, &chunk_id, &descriptor, buffer).await?;
        }
        let buffer = output?;
        Ok(ReadOutput {
            shape: buffer.shape().to_vec(),
            buffer,
        })
    }

    /// Write `values`, the concatenated encodings of one element per point, to the elements of a chunk at `points`.
    ///
    /// `points` is a flat list of coordinates, with one coordinate per dimension of each point.
    /// A chunk that does not exist is always initialised.
    ///
    /// # Errors
    /// Returns [`ChunkError::InvalidCoordinate`] if a point is outside of the chunk,
    /// [`ChunkError::PayloadSizeMismatch`] if `values` does not hold one element per point,
    /// or another [`ChunkError`] if the chunk cache is full or on a storage error.
    pub async fn write_points(
        &self,
        bucket: &Bucket,
        chunk_id: &str,
        points: &[u64],
        values: Bytes,
    ) -> Result<WriteOutcome, ChunkError> {
        let (chunk_id, descriptor) = self.resolve(bucket, chunk_id).await?;
        let points = split_points(points, descriptor.chunk_shape())?;
        let values = self.decode_payload(&descriptor.data_type, &values, &[points.len() as u64])?;
        log::debug!("write {} points of chunk {chunk_id}", points.len());

        self.admit(bucket, &chunk_id)?;
        let Fetched { mut buffer, .. } = self
            .fetch(bucket, &chunk_id, &descriptor, Initialisation::Always)
            .await?;
        let changed = self.kernels.write_points(&mut buffer, &points, &values)?;
        let persisted = self
            .persist_if_modified(bucket, &chunk_id, &descriptor, buffer)
            .await?;
        Ok(WriteOutcome { changed, persisted })
    }

    /// Delete a chunk.
    ///
    /// The chunk is removed from the chunk cache and the pending write-back table, the filter resolution of its dataset is forgotten,
    /// and its durable object is erased if it exists.
    ///
    /// # Errors
    /// Returns a [`ChunkError`] if the chunk identity is invalid or not in the partition of this node, or on a storage error.
    pub async fn delete(&self, bucket: &Bucket, chunk_id: &str) -> Result<(), ChunkError> {
        let chunk_id = self.resolve_id(chunk_id)?;
        self.chunk_cache.remove(bucket, &chunk_id);
        self.filter_resolver.invalidate(&chunk_id.dataset_id());
        let key = chunk_id.storage_key().map_err(StorageError::from)?;
        if self.storage.exists(bucket, &key).await? {
            self.storage.erase(bucket, &key).await?;
            log::info!("deleted chunk {chunk_id} of bucket {bucket}");
        } else {
            log::info!("chunk {chunk_id} of bucket {bucket} has no durable object to delete");
        }
        Ok(())
    }

    /// Split `selection` of a chunk into pages of at most [max request size](crate::config::Config#max-request-size) bytes.
    ///
    /// Elements of variable size are counted at their nominal size.
    ///
    /// # Errors
    /// Returns a [`ChunkError`] if the selection is invalid or cannot be paginated.
    pub async fn paginate(
        &self,
        bucket: &Bucket,
        chunk_id: &str,
        selection: Option<&str>,
    ) -> Result<Vec<Selection>, ChunkError> {
        let (_chunk_id, descriptor) = self.resolve(bucket, chunk_id).await?;
        let selection = parse(selection.unwrap_or_default(), descriptor.chunk_shape())?;
        let item_size = descriptor
            .data_type
            .size()
            .unwrap_or_else(|| descriptor.data_type.nominal_size());
        Ok(chunkstore_selection::paginate(
            &selection,
            descriptor.chunk_shape(),
            item_size as u64,
            self.config.max_request_size(),
        )?)
    }

    /// The filter operations of the dataset of a chunk.
    ///
    /// # Errors
    /// Returns a [`ChunkError`] if the chunk identity is invalid or the dataset cannot be resolved.
    pub async fn filter_ops(
        &self,
        bucket: &Bucket,
        chunk_id: &str,
    ) -> Result<Option<Arc<FilterOps>>, ChunkError> {
        let (_chunk_id, descriptor) = self.resolve(bucket, chunk_id).await?;
        Ok(self.resolve_filters(&descriptor))
    }

    fn resolve_id(&self, chunk_id: &str) -> Result<ChunkId, ChunkError> {
        let chunk_id = ChunkId::new(chunk_id)?;
        let partition = self.config.partition();
        if !partition.contains(&chunk_id) {
            log::warn!("chunk {chunk_id} does not belong to partition {partition}");
            return Err(ChunkError::NotInPartition {
                chunk_id,
                partition,
            });
        }
        Ok(chunk_id)
    }

    async fn resolve(
        &self,
        bucket: &Bucket,
        chunk_id: &str,
    ) -> Result<(ChunkId, Arc<DatasetDescriptor>), ChunkError> {
        let chunk_id = self.resolve_id(chunk_id)?;
        let descriptor = self.metadata.dataset(bucket, &chunk_id.dataset_id()).await?;
        if chunk_id.indices().len() != descriptor.chunk_shape().len() {
            return Err(ChunkIdError::new(
                chunk_id.as_str(),
                "the number of chunk indices differs from the dataset rank",
            )
            .into());
        }
        Ok((chunk_id, descriptor))
    }

    fn resolve_filters(&self, descriptor: &DatasetDescriptor) -> Option<Arc<FilterOps>> {
        self.filter_resolver.resolve(
            &descriptor.id,
            descriptor.filters(),
            &descriptor.data_type,
            descriptor.chunk_shape(),
        )
    }

    fn decode_payload(
        &self,
        data_type: &DataType,
        payload: &[u8],
        shape: &[u64],
    ) -> Result<ChunkBuffer, ChunkError> {
        if let Some(size) = data_type.size() {
            let num_elements = usize::try_from(shape.iter().product::<u64>()).unwrap_or(usize::MAX);
            let expected = num_elements.saturating_mul(size);
            if payload.len() != expected {
                return Err(ChunkError::PayloadSizeMismatch {
                    expected,
                    actual: payload.len(),
                });
            }
        }
        Ok(self.codec.decode(payload, data_type, shape, None)?)
    }

    fn prepare_query(
        &self,
        chunk_id: &ChunkId,
        descriptor: &DatasetDescriptor,
        selection: Option<&str>,
        query: &str,
    ) -> Result<(Selection, Arc<dyn CompiledPredicate>), ChunkError> {
        if descriptor.chunk_shape().len() != 1 || !descriptor.data_type.is_compound() {
            log::warn!("rejected query of chunk {chunk_id} of type {}", descriptor.data_type);
            return Err(ChunkError::UnsupportedQuery(format!(
                "queries require a one dimensional compound dataset, dataset {} is {} with chunk shape {:?}",
                descriptor.id,
                descriptor.data_type,
                descriptor.chunk_shape()
            )));
        }
        let selection = parse(selection.unwrap_or_default(), descriptor.chunk_shape())?;
        let condition = strip_where(query)?;
        let predicate = self
            .predicate_compiler
            .compile(condition, &descriptor.data_type)?;
        Ok((selection, predicate))
    }

    fn admit(&self, bucket: &Bucket, chunk_id: &ChunkId) -> Result<(), ChunkError> {
        if self.chunk_cache.contains(bucket, chunk_id) || self.chunk_cache.is_pending(bucket, chunk_id) {
            return Ok(());
        }
        let mem_free = self.chunk_cache.mem_free();
        let min_chunk_size = self.config.min_chunk_size();
        if mem_free < min_chunk_size {
            log::warn!(
                "rejected update of chunk {chunk_id}: chunk cache has {mem_free} bytes free, {min_chunk_size} bytes are required"
            );
            return Err(ChunkError::CapacityExceeded {
                mem_free,
                min_chunk_size,
            });
        }
        Ok(())
    }

    async fn fetch(
        &self,
        bucket: &Bucket,
        chunk_id: &ChunkId,
        descriptor: &DatasetDescriptor,
        initialisation: Initialisation,
    ) -> Result<Fetched, ChunkError> {
        if let Some(pending) = self.chunk_cache.take_pending(bucket, chunk_id) {
            log::debug!("retrying write-back of chunk {chunk_id}");
            let buffer = Arc::unwrap_or_clone(pending);
            let buffer = self.persist(bucket, chunk_id, descriptor, buffer).await?;
            return Ok(Fetched {
                buffer: Arc::unwrap_or_clone(buffer),
                initialised: false,
            });
        }

        if let Some(cached) = self.chunk_cache.get(bucket, chunk_id) {
            log::debug!("chunk {chunk_id} found in the chunk cache");
            return Ok(Fetched {
                buffer: Arc::unwrap_or_clone(cached),
                initialised: false,
            });
        }

        let key = chunk_id.storage_key().map_err(StorageError::from)?;
        if let Some(bytes) = self.storage.get(bucket, &key).await? {
            let filters = self.resolve_filters(descriptor);
            let buffer = self.codec.decode(
                &bytes,
                &descriptor.data_type,
                descriptor.chunk_shape(),
                filters.as_deref(),
            )?;
            log::debug!("chunk {chunk_id} read from the store ({} bytes)", bytes.len());
            self.chunk_cache
                .insert(bucket, chunk_id, Arc::new(buffer.clone()));
            return Ok(Fetched {
                buffer,
                initialised: false,
            });
        }

        let permitted = match initialisation {
            Initialisation::Always => true,
            Initialisation::IfInitializer => descriptor.has_initializer(),
        };
        if !permitted {
            log::warn!("chunk {chunk_id} of bucket {bucket} not found");
            return Err(ChunkError::ChunkNotFound(chunk_id.clone()));
        }
        let fill_value = descriptor.fill_element()?;
        let mut buffer = ChunkBuffer::new_fill_value(
            descriptor.data_type.clone(),
            descriptor.chunk_shape().to_vec(),
            &fill_value,
        )?;
        buffer.set_dirty(true);
        log::info!("initialised chunk {chunk_id} of bucket {bucket}");
        Ok(Fetched {
            buffer,
            initialised: true,
        })
    }

    async fn persist_if_modified(
        &self,
        bucket: &Bucket,
        chunk_id: &ChunkId,
        descriptor: &DatasetDescriptor,
        buffer: ChunkBuffer,
    ) -> Result<bool, ChunkError> {
        if buffer.dirty() || self.config.write_zero_chunks() {
            self.persist(bucket, chunk_id, descriptor, buffer).await?;
            Ok(true)
        } else {
            log::debug!("chunk {chunk_id} unchanged, not persisted");
            Ok(false)
        }
    }

    async fn persist(
        &self,
        bucket: &Bucket,
        chunk_id: &ChunkId,
        descriptor: &DatasetDescriptor,
        mut buffer: ChunkBuffer,
    ) -> Result<Arc<ChunkBuffer>, ChunkError> {
        let filters = self.resolve_filters(descriptor);
        let encoded = self.codec.encode(&buffer, filters.as_deref())?;
        let key = chunk_id.storage_key().map_err(StorageError::from)?;
        let size = encoded.len();
        match self.storage.set(bucket, &key, encoded).await {
            Ok(()) => {
                buffer.set_dirty(false);
                let buffer = Arc::new(buffer);
                self.chunk_cache.insert(bucket, chunk_id, buffer.clone());
                log::debug!("persisted chunk {chunk_id} of bucket {bucket} ({size} bytes)");
                Ok(buffer)
            }
            Err(source) => {
                buffer.set_dirty(true);
                let buffer = Arc::new(buffer);
                self.chunk_cache.insert(bucket, chunk_id, buffer.clone());
                self.chunk_cache.set_pending(bucket, chunk_id, buffer);
                log::warn!("failed to persist chunk {chunk_id} of bucket {bucket}: {source}");
                Err(ChunkError::PersistFailed {
                    chunk_id: chunk_id.clone(),
                    source,
                })
            }
        }
    }
}

/// Projects compound elements onto a subset of their fields.
struct Projection {
    target: Option<(DataType, Vec<usize>)>,
}

impl Projection {
    fn new(data_type: &DataType, fields: Option<&[String]>) -> Result<Self, ChunkError> {
        let target = fields
            .map(|fields| -> Result<_, DataTypeError> {
                let indices = data_type.field_indices(fields)?;
                let sub_type = data_type.sub_type(fields)?;
                Ok((sub_type, indices))
            })
            .transpose()
            .map_err(ChunkError::InvalidFields)?;
        Ok(Self { target })
    }

    fn is_identity(&self) -> bool {
        self.target.is_none()
    }

    /// The type of a projected element.
    fn data_type<'a>(&'a self, data_type: &'a DataType) -> &'a DataType {
        self.target
            .as_ref()
            .map_or(data_type, |(sub_type, _)| sub_type)
    }

    /// Replace the projected fields of each element of `existing` with the corresponding element of `data`.
    fn merge(&self, existing: &ChunkBuffer, data: &ChunkBuffer) -> Result<ChunkBuffer, ChunkError> {
        let Some((sub_type, indices)) = &self.target else {
            return Ok(data.clone());
        };
        let data_type = existing.data_type();
        let elements = existing
            .elements()
            .zip(data.elements())
            .map(|(element, projected)| data_type.merge_projected(element, indices, sub_type, projected))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ChunkBuffer::from_elements(
            data_type.clone(),
            existing.shape().to_vec(),
            elements,
        )?)
    }

    fn apply(&self, buffer: ChunkBuffer) -> Result<ChunkBuffer, ChunkError> {
        let Some((sub_type, indices)) = &self.target else {
            return Ok(buffer);
        };
        let elements = buffer
            .elements()
            .map(|element| buffer.data_type().project(element, indices))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ChunkBuffer::from_elements(
            sub_type.clone(),
            buffer.shape().to_vec(),
            elements,
        )?)
    }
}

/// Strip a trailing `where` clause from a query expression.
///
/// A query that is only a `where` clause has no condition to evaluate and is rejected rather than forwarded.
fn strip_where(query: &str) -> Result<&str, ChunkError> {
    let trimmed = query.trim();
    if trimmed == "where" || trimmed.starts_with("where ") {
        return Err(PredicateError::new(query, "missing condition before where").into());
    }
    Ok(trimmed
        .find(" where ")
        .map_or(trimmed, |position| trimmed[..position].trim_end()))
}

/// Check that `update` is a non-empty object of valid field values.
fn validate_update<'a>(
    data_type: &DataType,
    update: &'a Value,
) -> Result<&'a Map<String, Value>, ChunkError> {
    let update = update
        .as_object()
        .filter(|update| !update.is_empty())
        .ok_or_else(|| ChunkError::InvalidQueryUpdate(format!("expected a non-empty object, got {update}")))?;
    data_type
        .update_fields(&data_type.zero_element(), update)
        .map_err(|err| ChunkError::InvalidQueryUpdate(err.to_string()))?;
    Ok(update)
}

/// Split a flat coordinate list into points of the rank of `shape`, checking that each is inside the chunk.
fn split_points(points: &[u64], shape: &[u64]) -> Result<Vec<ArrayIndices>, ChunkError> {
    let rank = shape.len();
    if rank == 0 || points.len() % rank != 0 {
        return Err(ChunkError::InvalidCoordinate {
            point: points.to_vec(),
            shape: shape.to_vec(),
        });
    }
    points
        .chunks(rank)
        .map(|point| {
            if std::iter::zip(point, shape).all(|(index, extent)| index < extent) {
                Ok(point.to_vec())
            } else {
                Err(ChunkError::InvalidCoordinate {
                    point: point.to_vec(),
                    shape: shape.to_vec(),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_strip_where() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(strip_where("volume > 10")?, "volume > 10");
        assert_eq!(strip_where(" volume > 10 where symbol == 'A' ")?, "volume > 10");
        assert!(matches!(
            strip_where("where volume > 10"),
            Err(ChunkError::InvalidPredicate(_))
        ));
        assert!(matches!(strip_where("where"), Err(ChunkError::InvalidPredicate(_))));
        Ok(())
    }

    #[test]
    fn coordinator_split_points() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(
            split_points(&[0, 1, 2, 3], &[4, 4])?,
            vec![vec![0, 1], vec![2, 3]]
        );
        assert_eq!(split_points(&[3, 0], &[4])?, vec![vec![3], vec![0]]);
        assert!(matches!(
            split_points(&[0, 1, 2], &[4, 4]),
            Err(ChunkError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            split_points(&[0, 4], &[4, 4]),
            Err(ChunkError::InvalidCoordinate { point, .. }) if point == vec![0, 4]
        ));
        Ok(())
    }

    #[test]
    fn coordinator_validate_update() {
        use crate::data_type::{CompoundField, NumericType};
        let data_type = DataType::compound(vec![
            CompoundField::new("symbol", DataType::fixed_string(4)),
            CompoundField::new("volume", DataType::integer(NumericType::UInt32)),
        ]);
        assert!(validate_update(&data_type, &serde_json::json!({"volume": 3})).is_ok());
        for update in [
            serde_json::json!({}),
            serde_json::json!([1]),
            serde_json::json!({"price": 1}),
            serde_json::json!({"volume": -1}),
        ] {
            assert!(matches!(
                validate_update(&data_type, &update),
                Err(ChunkError::InvalidQueryUpdate(_))
            ));
        }
    }
}
