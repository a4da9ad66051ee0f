//! Dataset metadata.
//!
//! The chunk store reads the following members of a dataset document:
//! ```json
//! {
//!     "id": "d-0a6f2b3c-7d41-4c2e-9b1a-5e3f8d2c1b00",
//!     "type": {"class": "H5T_INTEGER", "base": "H5T_STD_I32LE"},
//!     "layout": {"class": "H5D_CHUNKED", "dims": [100, 100]},
//!     "creationProperties": {
//!         "filters": [{"class": "H5Z_FILTER_DEFLATE", "id": 1, "name": "deflate", "level": 5}],
//!         "fillValue": -1
//!     }
//! }
//! ```
//! Other members are ignored.

use std::sync::Arc;

use async_trait::async_trait;
use auto_impl::auto_impl;
use chunkstore_selection::ArrayShape;
use chunkstore_storage::{AsyncChunkStorage, Bucket, Bytes, StorageError, StoreKey};
use moka::{policy::EvictionPolicy, sync::CacheBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    chunk_id::DatasetId,
    data_type::{DataType, DataTypeError},
    filter::FilterDeclaration,
    ChunkError,
};

/// The layout classes of chunked datasets.
pub const CHUNK_LAYOUT_CLASSES: &[&str] = &[
    "H5D_CHUNKED",
    "H5D_CHUNKED_REF",
    "H5D_CHUNKED_REF_INDIRECT",
    "H5D_CONTIGUOUS_REF",
];

fn default_layout_class() -> String {
    "H5D_CHUNKED".to_string()
}

/// The chunk layout of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLayout {
    /// The layout class.
    #[serde(default = "default_layout_class")]
    pub class: String,
    /// The chunk shape.
    pub dims: ArrayShape,
}

/// The creation properties of a dataset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationProperties {
    /// The declared filters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterDeclaration>,
    /// The fill value of uninitialised elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_value: Option<Value>,
    /// The chunk initializer application and its arguments.
    ///
    /// Declaring an initializer permits chunks to be initialised by reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<Vec<String>>,
}

/// The metadata of a dataset needed to access its chunks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// The dataset identity.
    pub id: DatasetId,
    /// The element type.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// The chunk layout.
    pub layout: ChunkLayout,
    /// The creation properties.
    #[serde(rename = "creationProperties", default)]
    pub creation_properties: CreationProperties,
}

impl DatasetDescriptor {
    /// Create a new descriptor of a chunked dataset without creation properties.
    #[must_use]
    pub fn new(id: DatasetId, data_type: DataType, chunk_shape: ArrayShape) -> Self {
        Self {
            id,
            data_type,
            layout: ChunkLayout {
                class: default_layout_class(),
                dims: chunk_shape,
            },
            creation_properties: CreationProperties::default(),
        }
    }

    /// Set the declared filters.
    #[must_use]
    pub fn with_filters(mut self, filters: Vec<FilterDeclaration>) -> Self {
        self.creation_properties.filters = filters;
        self
    }

    /// Set the fill value.
    #[must_use]
    pub fn with_fill_value(mut self, fill_value: Value) -> Self {
        self.creation_properties.fill_value = Some(fill_value);
        self
    }

    /// Set the chunk initializer.
    #[must_use]
    pub fn with_initializer(mut self, initializer: Vec<String>) -> Self {
        self.creation_properties.initializer = Some(initializer);
        self
    }

    /// The chunk shape.
    #[must_use]
    pub fn chunk_shape(&self) -> &[u64] {
        &self.layout.dims
    }

    /// The declared filters.
    #[must_use]
    pub fn filters(&self) -> &[FilterDeclaration] {
        &self.creation_properties.filters
    }

    /// Returns true if the dataset declares a chunk initializer.
    #[must_use]
    pub fn has_initializer(&self) -> bool {
        self.creation_properties
            .initializer
            .as_ref()
            .is_some_and(|initializer| !initializer.is_empty())
    }

    /// The element encoding of the fill value, or the zero element if there is no fill value.
    ///
    /// # Errors
    /// Returns a [`DataTypeError`] if the fill value cannot be represented by the element type.
    pub fn fill_element(&self) -> Result<Vec<u8>, DataTypeError> {
        match &self.creation_properties.fill_value {
            Some(fill_value) => self.data_type.encode_value(fill_value),
            None => Ok(self.data_type.zero_element()),
        }
    }

    /// Check that the descriptor describes a chunked dataset.
    ///
    /// # Errors
    /// Returns [`ChunkError::InvalidDatasetMetadata`] if the layout is not chunked, the chunk shape is empty or has a zero extent, or the fill value is invalid.
    pub fn validate(&self) -> Result<(), ChunkError> {
        let invalid = |reason: String| ChunkError::InvalidDatasetMetadata {
            dataset_id: self.id.clone(),
            reason,
        };
        if !CHUNK_LAYOUT_CLASSES.contains(&self.layout.class.as_str()) {
            return Err(invalid(format!(
                "unexpected layout class {}",
                self.layout.class
            )));
        }
        if self.layout.dims.is_empty() || self.layout.dims.contains(&0) {
            return Err(invalid(format!(
                "invalid chunk shape {:?}",
                self.layout.dims
            )));
        }
        self.fill_element()
            .map_err(|err| invalid(format!("invalid fill value: {err}")))?;
        Ok(())
    }
}

/// A source of dataset metadata.
#[async_trait]
#[auto_impl(Arc)]
pub trait DatasetMetadataSource: Send + Sync {
    /// Retrieve the descriptor of `dataset_id` in `bucket`.
    ///
    /// # Errors
    /// Returns [`ChunkError::DatasetNotFound`] if the dataset does not exist, [`ChunkError::InvalidDatasetMetadata`] if its metadata is invalid,
    /// or [`ChunkError::Storage`] on an underlying storage error.
    async fn dataset(
        &self,
        bucket: &Bucket,
        dataset_id: &DatasetId,
    ) -> Result<Arc<DatasetDescriptor>, ChunkError>;
}

/// A [`DatasetMetadataSource`] reading dataset documents from the durable store.
///
/// The document of dataset `d-<uuid>` is stored at `db/<uuid>/.dataset.json`.
/// Documents are cached after they are first read.
pub struct StoreMetadataSource {
    storage: AsyncChunkStorage,
    cache: moka::sync::Cache<(Bucket, DatasetId), Arc<DatasetDescriptor>>,
}

impl std::fmt::Debug for StoreMetadataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreMetadataSource")
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl StoreMetadataSource {
    /// Create a new metadata source over `storage` caching up to `capacity` documents.
    #[must_use]
    pub fn new(storage: AsyncChunkStorage, capacity: u64) -> Self {
        Self {
            storage,
            cache: CacheBuilder::new(capacity)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
        }
    }

    /// The store key of the document of `dataset_id`.
    ///
    /// # Errors
    /// Returns [`ChunkError::InvalidDatasetMetadata`] if `dataset_id` is not of the form `d-<uuid>`.
    pub fn document_key(dataset_id: &DatasetId) -> Result<StoreKey, ChunkError> {
        let uuid = dataset_id
            .uuid()
            .ok_or_else(|| ChunkError::InvalidDatasetMetadata {
                dataset_id: dataset_id.clone(),
                reason: "invalid dataset id".to_string(),
            })?;
        StoreKey::new(format!("db/{}/.dataset.json", uuid.hyphenated()))
            .map_err(|err| StorageError::from(err).into())
    }

    /// Store the document of a dataset.
    ///
    /// # Errors
    /// Returns a [`ChunkError`] if the descriptor is invalid or cannot be stored.
    pub async fn put_dataset(
        &self,
        bucket: &Bucket,
        descriptor: &DatasetDescriptor,
    ) -> Result<(), ChunkError> {
        descriptor.validate()?;
        let key = Self::document_key(&descriptor.id)?;
        let document = serde_json::to_vec(descriptor).map_err(|err| {
            ChunkError::InvalidDatasetMetadata {
                dataset_id: descriptor.id.clone(),
                reason: err.to_string(),
            }
        })?;
        self.storage.set(bucket, &key, Bytes::from(document)).await?;
        self.invalidate(bucket, &descriptor.id);
        Ok(())
    }

    /// Forget the cached document of `dataset_id`.
    pub fn invalidate(&self, bucket: &Bucket, dataset_id: &DatasetId) {
        self.cache.invalidate(&(bucket.clone(), dataset_id.clone()));
    }
}

#[async_trait]
impl DatasetMetadataSource for StoreMetadataSource {
    async fn dataset(
        &self,
        bucket: &Bucket,
        dataset_id: &DatasetId,
    ) -> Result<Arc<DatasetDescriptor>, ChunkError> {
        let cache_key = (bucket.clone(), dataset_id.clone());
        if let Some(descriptor) = self.cache.get(&cache_key) {
            return Ok(descriptor);
        }
        let key = Self::document_key(dataset_id)?;
        let document = self
            .storage
            .get(bucket, &key)
            .await?
            .ok_or_else(|| ChunkError::DatasetNotFound(dataset_id.clone()))?;
        let invalid = |reason: String| ChunkError::InvalidDatasetMetadata {
            dataset_id: dataset_id.clone(),
            reason,
        };
        let descriptor: DatasetDescriptor =
            serde_json::from_slice(&document).map_err(|err| invalid(err.to_string()))?;
        if &descriptor.id != dataset_id {
            return Err(invalid(format!(
                "the document describes dataset {}",
                descriptor.id
            )));
        }
        descriptor.validate()?;
        log::debug!("loaded the metadata of dataset {dataset_id}");
        let descriptor = Arc::new(descriptor);
        self.cache.insert(cache_key, descriptor.clone());
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use chunkstore_storage::{store::MemoryStore, AsyncChunkStorageTraits};
    use serde_json::json;

    use super::*;
    use crate::data_type::NumericType;

    fn dataset_id() -> DatasetId {
        DatasetId::from_uuid(uuid::Uuid::nil())
    }

    #[test]
    fn dataset_descriptor_deserialize() -> Result<(), Box<dyn std::error::Error>> {
        let descriptor: DatasetDescriptor = serde_json::from_value(json!({
            "id": dataset_id(),
            "type": {"class": "H5T_INTEGER", "base": "H5T_STD_I32LE"},
            "shape": {"class": "H5S_SIMPLE", "dims": [1000]},
            "layout": {"class": "H5D_CHUNKED", "dims": [100]},
            "creationProperties": {
                "filters": [{"class": "H5Z_FILTER_DEFLATE", "id": 1, "name": "deflate", "level": 5}],
                "fillValue": -1,
                "allocTime": "H5D_ALLOC_TIME_INCR"
            }
        }))?;
        descriptor.validate()?;
        assert_eq!(descriptor.chunk_shape(), &[100]);
        assert_eq!(descriptor.filters().len(), 1);
        assert_eq!(descriptor.fill_element()?, (-1i32).to_le_bytes());
        assert!(!descriptor.has_initializer());
        Ok(())
    }

    #[test]
    fn dataset_descriptor_validate() {
        let data_type = DataType::integer(NumericType::UInt8);
        assert!(DatasetDescriptor::new(dataset_id(), data_type.clone(), vec![]).validate().is_err());
        assert!(DatasetDescriptor::new(dataset_id(), data_type.clone(), vec![4, 0]).validate().is_err());
        assert!(DatasetDescriptor::new(dataset_id(), data_type.clone(), vec![4])
            .with_fill_value(json!(-1))
            .validate()
            .is_err());
        let mut descriptor = DatasetDescriptor::new(dataset_id(), data_type, vec![4]);
        descriptor.layout.class = "H5D_CONTIGUOUS".to_string();
        assert!(matches!(
            descriptor.validate(),
            Err(ChunkError::InvalidDatasetMetadata { .. })
        ));
    }

    #[tokio::test]
    async fn store_metadata_source() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(MemoryStore::new());
        let source = StoreMetadataSource::new(store.clone(), 100);
        let bucket = Bucket::from("b");
        assert!(matches!(
            source.dataset(&bucket, &dataset_id()).await,
            Err(ChunkError::DatasetNotFound(_))
        ));

        let descriptor = DatasetDescriptor::new(
            dataset_id(),
            DataType::integer(NumericType::UInt8),
            vec![4, 4],
        )
        .with_initializer(vec!["chunk_initializer".to_string()]);
        source.put_dataset(&bucket, &descriptor).await?;
        assert!(store
            .exists(&bucket, &StoreKey::new("db/00000000-0000-0000-0000-000000000000/.dataset.json")?)
            .await?);
        let loaded = source.dataset(&bucket, &dataset_id()).await?;
        assert_eq!(*loaded, descriptor);
        assert!(loaded.has_initializer());

        let key = StoreMetadataSource::document_key(&dataset_id())?;
        store.set(&bucket, &key, Bytes::from_static(b"{")).await?;
        // served from the cache
        assert!(source.dataset(&bucket, &dataset_id()).await.is_ok());
        source.invalidate(&bucket, &dataset_id());
        assert!(matches!(
            source.dataset(&bucket, &dataset_id()).await,
            Err(ChunkError::InvalidDatasetMetadata { .. })
        ));
        Ok(())
    }
}
