//! Filter resolution.
//!
//! A dataset declares an ordered list of filters in its creation properties, for example
//! ```json
//! [{"class": "H5Z_FILTER_SHUFFLE", "id": 2, "name": "shuffle"},
//!  {"class": "H5Z_FILTER_DEFLATE", "id": 1, "name": "deflate", "level": 9}]
//! ```
//! The [`FilterResolver`] reduces these declarations to the [`FilterOps`] applied to the chunks of the dataset.

use std::sync::Arc;

use chunkstore_selection::ArrayShape;
use serde::{Deserialize, Serialize};

use crate::{chunk_id::DatasetId, data_type::DataType};

/// A filter known to the chunk store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterDefinition {
    /// The filter class, e.g. `H5Z_FILTER_DEFLATE`.
    pub class: &'static str,
    /// The registered filter id.
    pub id: u32,
    /// The filter name.
    pub name: &'static str,
}

/// The filters known to the chunk store.
///
/// Fletcher32, szip, nbit and scaleoffset are recognised but never applied.
pub const FILTER_DEFINITIONS: &[FilterDefinition] = &[
    FilterDefinition::new("H5Z_FILTER_NONE", 0, "none"),
    FilterDefinition::new("H5Z_FILTER_DEFLATE", 1, "gzip"),
    FilterDefinition::new("H5Z_FILTER_SHUFFLE", 2, "shuffle"),
    FilterDefinition::new("H5Z_FILTER_FLETCHER32", 3, "fletcher32"),
    FilterDefinition::new("H5Z_FILTER_SZIP", 4, "szip"),
    FilterDefinition::new("H5Z_FILTER_NBIT", 5, "nbit"),
    FilterDefinition::new("H5Z_FILTER_SCALEOFFSET", 6, "scaleoffset"),
    FilterDefinition::new("H5Z_FILTER_LZF", 32000, "lzf"),
    FilterDefinition::new("H5Z_FILTER_BLOSC", 32001, "blosclz"),
    FilterDefinition::new("H5Z_FILTER_SNAPPY", 32003, "snappy"),
    FilterDefinition::new("H5Z_FILTER_LZ4", 32004, "lz4"),
    FilterDefinition::new("H5Z_FILTER_LZ4HC", 32005, "lz4hc"),
    FilterDefinition::new("H5Z_FILTER_BITSHUFFLE", 32008, "bitshuffle"),
    FilterDefinition::new("H5Z_FILTER_ZSTD", 32015, "zstd"),
];

const COMPRESSION_FILTER_CLASSES: &[&str] = &[
    "H5Z_FILTER_DEFLATE",
    "H5Z_FILTER_SZIP",
    "H5Z_FILTER_SCALEOFFSET",
    "H5Z_FILTER_LZF",
    "H5Z_FILTER_BLOSC",
    "H5Z_FILTER_SNAPPY",
    "H5Z_FILTER_LZ4",
    "H5Z_FILTER_LZ4HC",
    "H5Z_FILTER_ZSTD",
];

const COMPRESSION_FILTER_NAMES: &[&str] = &[
    "gzip", "szip", "lzf", "blosclz", "snappy", "lz4", "lz4hc", "zstd",
];

const SHUFFLE_FILTER_CLASSES: &[&str] = &["H5Z_FILTER_SHUFFLE", "H5Z_FILTER_BITSHUFFLE"];

/// The compressor used for a deflate filter.
pub const DEFLATE_COMPRESSOR: &str = "zlib";

/// The compressor used for a compression filter without a name.
pub const DEFAULT_COMPRESSOR: &str = "lz4";

/// The compression level used for a compression filter without a level.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 5;

impl FilterDefinition {
    const fn new(class: &'static str, id: u32, name: &'static str) -> Self {
        Self { class, id, name }
    }

    /// Look up a filter by class or name.
    ///
    /// `deflate` is an alias of `gzip`.
    #[must_use]
    pub fn lookup(key: &str) -> Option<&'static Self> {
        let key = if key == "deflate" { "gzip" } else { key };
        FILTER_DEFINITIONS
            .iter()
            .find(|definition| definition.class == key || definition.name == key)
    }

    /// Look up a filter by id.
    #[must_use]
    pub fn lookup_id(id: u32) -> Option<&'static Self> {
        FILTER_DEFINITIONS.iter().find(|definition| definition.id == id)
    }
}

/// A filter declared in the creation properties of a dataset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDeclaration {
    /// The filter class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// The filter id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// The filter name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The compression level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
}

impl FilterDeclaration {
    /// Declare a known filter by class or name.
    ///
    /// Returns [`None`] if the filter is unknown.
    #[must_use]
    pub fn known(key: &str) -> Option<Self> {
        FilterDefinition::lookup(key).map(|definition| Self {
            class: Some(definition.class.to_string()),
            id: Some(definition.id),
            name: Some(definition.name.to_string()),
            level: None,
        })
    }

    /// Set the compression level.
    #[must_use]
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    fn is_compression(&self, class: &str) -> bool {
        COMPRESSION_FILTER_CLASSES.contains(&class)
            || (class == "H5Z_FILTER_USER"
                && self
                    .name
                    .as_deref()
                    .is_some_and(|name| COMPRESSION_FILTER_NAMES.contains(&name)))
    }
}

/// The shuffle applied to fixed size elements before compression.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShuffleMode {
    /// No shuffle.
    #[default]
    None,
    /// Byte shuffle.
    Byte,
    /// Bit shuffle.
    Bit,
}

/// A compressor and its level.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Compressor {
    /// The compressor name.
    pub name: String,
    /// The compression level.
    pub level: u32,
}

impl Compressor {
    /// Create a new compressor.
    #[must_use]
    pub fn new(name: impl Into<String>, level: u32) -> Self {
        Self {
            name: name.into(),
            level,
        }
    }
}

/// The filter operations applied to the chunks of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOps {
    /// The dataset the operations were resolved for.
    pub dataset_id: DatasetId,
    /// The shuffle mode.
    pub shuffle: ShuffleMode,
    /// The compressor, if any.
    pub compressor: Option<Compressor>,
    /// The chunk shape at resolution time.
    pub chunk_shape: ArrayShape,
    /// The element type at resolution time.
    pub data_type: DataType,
}

/// Reduce filter declarations to filter operations.
///
/// Returns [`None`] if no shuffle or compression filter applies.
#[must_use]
pub fn filter_ops(
    dataset_id: &DatasetId,
    filters: &[FilterDeclaration],
    data_type: &DataType,
    chunk_shape: &[u64],
) -> Option<FilterOps> {
    let mut shuffle_filter = None;
    let mut compression_filter = None;
    for filter in filters {
        let Some(class) = filter.class.as_deref() else {
            log::warn!("filter {filter:?} of dataset {dataset_id} has no class");
            continue;
        };
        if shuffle_filter.is_none() && SHUFFLE_FILTER_CLASSES.contains(&class) {
            shuffle_filter = Some((class, filter));
        }
        if compression_filter.is_none() && filter.is_compression(class) {
            compression_filter = Some((class, filter));
        }
    }

    let shuffle = match shuffle_filter {
        Some(_) if data_type.is_variable() => {
            log::debug!("ignoring the shuffle filter of dataset {dataset_id} with variable length elements");
            None
        }
        Some((class, filter)) => match filter.name.as_deref() {
            Some("shuffle") => Some(ShuffleMode::Byte),
            Some("bitshuffle") => Some(ShuffleMode::Bit),
            None if class == "H5Z_FILTER_SHUFFLE" => Some(ShuffleMode::Byte),
            None => Some(ShuffleMode::Bit),
            Some(name) => {
                log::warn!("unexpected shuffle filter {name:?} of dataset {dataset_id}");
                None
            }
        },
        None => None,
    };

    let compressor = compression_filter.map(|(class, filter)| {
        let name = if class == "H5Z_FILTER_DEFLATE" {
            DEFLATE_COMPRESSOR
        } else {
            filter.name.as_deref().unwrap_or(DEFAULT_COMPRESSOR)
        };
        Compressor::new(name, filter.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL))
    });

    if shuffle.is_none() && compressor.is_none() {
        return None;
    }
    Some(FilterOps {
        dataset_id: dataset_id.clone(),
        shuffle: shuffle.unwrap_or_default(),
        compressor,
        chunk_shape: chunk_shape.to_vec(),
        data_type: data_type.clone(),
    })
}

/// Resolves and memoizes the [`FilterOps`] of datasets.
///
/// Resolution is memoized per dataset until [`invalidate`](FilterResolver::invalidate) is called on deletion of the dataset.
/// A dataset without filter operations is not memoized, so filters added to it later are resolved.
pub struct FilterResolver {
    cache: moka::sync::Cache<DatasetId, Arc<FilterOps>>,
}

impl std::fmt::Debug for FilterResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterResolver")
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl FilterResolver {
    /// Create a new filter resolver.
    ///
    /// The resolver is unbounded: a resolution is only removed by [`invalidate`](FilterResolver::invalidate).
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: moka::sync::Cache::builder().build(),
        }
    }

    /// Resolve the filter operations of `dataset_id`.
    ///
    /// A memoized resolution is returned regardless of `filters`.
    #[must_use]
    pub fn resolve(
        &self,
        dataset_id: &DatasetId,
        filters: &[FilterDeclaration],
        data_type: &DataType,
        chunk_shape: &[u64],
    ) -> Option<Arc<FilterOps>> {
        self.cache.optionally_get_with(dataset_id.clone(), || {
            log::debug!("resolving filters of dataset {dataset_id}");
            filter_ops(dataset_id, filters, data_type, chunk_shape).map(Arc::new)
        })
    }

    /// Returns true if the resolution of `dataset_id` is memoized.
    #[must_use]
    pub fn contains(&self, dataset_id: &DatasetId) -> bool {
        self.cache.contains_key(dataset_id)
    }

    /// Forget the resolution of `dataset_id`.
    pub fn invalidate(&self, dataset_id: &DatasetId) {
        self.cache.invalidate(dataset_id);
    }
}

impl Default for FilterResolver {
    fn default() -> Self {
        Self::new()
    }
}
