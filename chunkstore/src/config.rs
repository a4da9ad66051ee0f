//! Chunk store configuration options.

use serde::{Deserialize, Serialize};

use crate::chunk_id::Partition;

/// Configuration options for a [`ChunkCoordinator`](crate::coordinator::ChunkCoordinator).
///
/// The configuration can be deserialised from JSON, with missing options taking their defaults:
/// ```rust
/// # use chunkstore::config::Config;
/// let config: Config = serde_json::from_str(r#"{"write_zero_chunks": true}"#).unwrap();
/// assert!(config.write_zero_chunks());
/// assert_eq!(config.min_chunk_size(), 1024 * 1024);
/// ```
///
/// # Cache Configuration Options
///
/// ## Minimum Chunk Size
/// > default: `1048576` (1 MiB)
///
/// The free chunk cache memory required to admit a mutation of a chunk that is not cached.
/// A mutation is rejected with a retryable [`CapacityExceeded`](crate::ChunkError::CapacityExceeded) error otherwise.
///
/// ## Chunk Cache Size
/// > default: `134217728` (128 MiB)
///
/// The capacity in bytes of the chunk cache created by [`ChunkCoordinator::builder`](crate::coordinator::ChunkCoordinator::builder).
///
/// # Persistence Configuration Options
///
/// ## Write Zero Chunks
/// > default: [`false`]
///
/// If enabled, chunks touched by a write are persisted even if no element changed.
///
/// # Request Configuration Options
///
/// ## Max Request Size
/// > default: `104857600` (100 MiB)
///
/// The byte budget of each page produced by [`ChunkCoordinator::paginate`](crate::coordinator::ChunkCoordinator::paginate).
///
/// ## Partition
/// > default: node `0` of `1`
///
/// The partition of chunks served by this node.
/// Requests for chunks of other partitions are rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    min_chunk_size: u64,
    chunk_cache_size: u64,
    write_zero_chunks: bool,
    max_request_size: u64,
    partition: Partition,
}

#[allow(clippy::derivable_impls)]
impl Default for Config {
    fn default() -> Self {
        Config {
            min_chunk_size: 1024 * 1024,
            chunk_cache_size: 128 * 1024 * 1024,
            write_zero_chunks: false,
            max_request_size: 100 * 1024 * 1024,
            partition: Partition::default(),
        }
    }
}

impl Config {
    /// Get the [minimum chunk size](#minimum-chunk-size) configuration.
    #[must_use]
    pub fn min_chunk_size(&self) -> u64 {
        self.min_chunk_size
    }

    /// Set the [minimum chunk size](#minimum-chunk-size) configuration.
    pub fn set_min_chunk_size(&mut self, min_chunk_size: u64) -> &mut Self {
        self.min_chunk_size = min_chunk_size;
        self
    }

    /// Get the [chunk cache size](#chunk-cache-size) configuration.
    #[must_use]
    pub fn chunk_cache_size(&self) -> u64 {
        self.chunk_cache_size
    }

    /// Set the [chunk cache size](#chunk-cache-size) configuration.
    pub fn set_chunk_cache_size(&mut self, chunk_cache_size: u64) -> &mut Self {
        self.chunk_cache_size = chunk_cache_size;
        self
    }

    /// Get the [write zero chunks](#write-zero-chunks) configuration.
    #[must_use]
    pub fn write_zero_chunks(&self) -> bool {
        self.write_zero_chunks
    }

    /// Set the [write zero chunks](#write-zero-chunks) configuration.
    pub fn set_write_zero_chunks(&mut self, write_zero_chunks: bool) -> &mut Self {
        self.write_zero_chunks = write_zero_chunks;
        self
    }

    /// Get the [max request size](#max-request-size) configuration.
    #[must_use]
    pub fn max_request_size(&self) -> u64 {
        self.max_request_size
    }

    /// Set the [max request size](#max-request-size) configuration.
    pub fn set_max_request_size(&mut self, max_request_size: u64) -> &mut Self {
        self.max_request_size = max_request_size;
        self
    }

    /// Get the [partition](#partition) configuration.
    #[must_use]
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Set the [partition](#partition) configuration.
    pub fn set_partition(&mut self, partition: Partition) -> &mut Self {
        self.partition = partition;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.min_chunk_size(), 1024 * 1024);
        assert_eq!(config.chunk_cache_size(), 128 * 1024 * 1024);
        assert!(!config.write_zero_chunks());
        assert_eq!(config.max_request_size(), 100 * 1024 * 1024);
        assert_eq!(config.partition(), Partition::new(0, 1));
    }

    #[test]
    fn config_deserialize() -> Result<(), Box<dyn std::error::Error>> {
        let config: Config = serde_json::from_str(
            r#"{"min_chunk_size": 16, "partition": {"node_number": 2, "node_count": 4}}"#,
        )?;
        assert_eq!(config.min_chunk_size(), 16);
        assert_eq!(config.partition(), Partition::new(2, 4));
        assert_eq!(config.max_request_size(), Config::default().max_request_size());

        let mut expected = Config::default();
        expected
            .set_min_chunk_size(16)
            .set_partition(Partition::new(2, 4));
        assert_eq!(config, expected);
        Ok(())
    }
}
