//! Chunk and dataset identities.

use std::fmt::Display;

use chunkstore_selection::ArrayIndices;
use chunkstore_storage::{StoreKey, StoreKeyError};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The identity of a chunk, `c-<uuid>_<i0>_<i1>...`.
///
/// `<uuid>` is the canonical hyphenated identity of the owning dataset and `<i*>` are the indices of the chunk in the chunk grid of the dataset.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChunkId {
    id: String,
    uuid: Uuid,
    indices: ArrayIndices,
}

/// An invalid chunk identity.
#[derive(Clone, Debug, Error)]
#[error("invalid chunk id {id:?}: {reason}")]
pub struct ChunkIdError {
    id: String,
    reason: &'static str,
}

impl ChunkIdError {
    pub(crate) fn new(id: &str, reason: &'static str) -> Self {
        Self {
            id: id.to_string(),
            reason,
        }
    }
}

impl ChunkId {
    /// Parse a chunk identity.
    ///
    /// # Errors
    /// Returns [`ChunkIdError`] if `id` is not of the form `c-<uuid>_<i0>_<i1>...`.
    pub fn new(id: &str) -> Result<Self, ChunkIdError> {
        let body = id
            .strip_prefix("c-")
            .ok_or_else(|| ChunkIdError::new(id, "missing the c- prefix"))?;
        let (uuid, indices) = body
            .split_once('_')
            .ok_or_else(|| ChunkIdError::new(id, "missing chunk indices"))?;
        let uuid = Uuid::try_parse(uuid)
            .ok()
            .filter(|parsed| parsed.hyphenated().to_string() == uuid)
            .ok_or_else(|| ChunkIdError::new(id, "the dataset uuid is not a canonical hyphenated uuid"))?;
        let indices = indices
            .split('_')
            .map(str::parse::<u64>)
            .collect::<Result<ArrayIndices, _>>()
            .map_err(|_| ChunkIdError::new(id, "chunk indices must be non-negative integers"))?;
        Ok(Self {
            id: id.to_string(),
            uuid,
            indices,
        })
    }

    /// Create the identity of the chunk at `indices` of dataset `uuid`.
    ///
    /// # Panics
    /// Panics if `indices` is empty.
    #[must_use]
    pub fn from_parts(uuid: Uuid, indices: &[u64]) -> Self {
        assert!(!indices.is_empty(), "a chunk id requires at least one index");
        let id = format!("c-{}_{}", uuid.hyphenated(), itertools::join(indices, "_"));
        Self {
            id,
            uuid,
            indices: indices.to_vec(),
        }
    }

    /// The chunk identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// The indices of the chunk in the chunk grid.
    #[must_use]
    pub fn indices(&self) -> &[u64] {
        &self.indices
    }

    /// The identity of the owning dataset.
    #[must_use]
    pub fn dataset_id(&self) -> DatasetId {
        DatasetId::from_uuid(self.uuid)
    }

    /// The durable store key of the chunk, `db/<uuid>/<i0>_<i1>...`.
    ///
    /// # Errors
    /// Returns [`StoreKeyError`] if the key is invalid, which cannot happen for a parsed identity.
    pub fn storage_key(&self) -> Result<StoreKey, StoreKeyError> {
        StoreKey::new(format!(
            "db/{}/{}",
            self.uuid.hyphenated(),
            itertools::join(&self.indices, "_")
        ))
    }
}

impl Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl TryFrom<&str> for ChunkId {
    type Error = ChunkIdError;

    fn try_from(id: &str) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

/// The identity of a dataset, `d-<uuid>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    /// Create the identity of the dataset `uuid`.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(format!("d-{}", uuid.hyphenated()))
    }

    /// The dataset identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The uuid part of the identity, if the identity is well formed.
    #[must_use]
    pub fn uuid(&self) -> Option<Uuid> {
        self.0
            .strip_prefix("d-")
            .and_then(|uuid| Uuid::try_parse(uuid).ok())
    }
}

/// The partition of chunks owned by this node.
///
/// A chunk belongs to the node numbered `crc32c(chunk id) % node_count`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// The number of this node.
    pub node_number: u32,
    /// The number of nodes sharing the chunks.
    pub node_count: u32,
}

impl Default for Partition {
    fn default() -> Self {
        Self {
            node_number: 0,
            node_count: 1,
        }
    }
}

impl Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node_number, self.node_count)
    }
}

impl Partition {
    /// Create a new partition.
    #[must_use]
    pub const fn new(node_number: u32, node_count: u32) -> Self {
        Self {
            node_number,
            node_count,
        }
    }

    /// The node number which owns `chunk_id` among `node_count` nodes.
    #[must_use]
    pub fn owner(chunk_id: &ChunkId, node_count: u32) -> u32 {
        if node_count <= 1 {
            0
        } else {
            crc32c::crc32c(chunk_id.as_str().as_bytes()) % node_count
        }
    }

    /// Returns true if `chunk_id` belongs to this partition.
    #[must_use]
    pub fn contains(&self, chunk_id: &ChunkId) -> bool {
        Self::owner(chunk_id, self.node_count) == self.node_number
    }
}
