//! Chunk kernels.
//!
//! Kernels apply a normalised request to a decoded chunk: selection reads and writes, point gathers and scatters, and queries.
//! Requests are validated by the [`ChunkCoordinator`](crate::coordinator::ChunkCoordinator) before a kernel is invoked,
//! and a kernel only mutates the buffer it is given.

use chunkstore_selection::{ArrayIndices, Selection, SelectionError};
use serde_json::{Map, Value};

use crate::{
    chunk_buffer::ChunkBuffer, codec::CodecError, predicate::CompiledPredicate, ChunkError,
};

/// The rows of a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryResult {
    /// The index of each matching row within the chunk.
    pub indices: Vec<u64>,
    /// The matching rows, after any update.
    pub rows: ChunkBuffer,
    /// True if an update changed any row.
    pub changed: bool,
}

impl QueryResult {
    /// The number of matching rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if no rows matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Chunk kernels.
pub trait ChunkKernels: Send + Sync {
    /// Gather the elements of `chunk` in `selection` into a buffer with the selection shape.
    ///
    /// # Errors
    /// Returns a [`ChunkError`] if the selection does not fit the chunk.
    fn read_selection(&self, chunk: &ChunkBuffer, selection: &Selection) -> Result<ChunkBuffer, ChunkError>;

    /// Scatter `data`, which has the selection shape, into the elements of `chunk` in `selection`.
    ///
    /// Returns true if any element changed.
    ///
    /// # Errors
    /// Returns a [`ChunkError`] if the selection does not fit the chunk or `data` does not fit the selection.
    fn write_selection(
        &self,
        chunk: &mut ChunkBuffer,
        selection: &Selection,
        data: &ChunkBuffer,
    ) -> Result<bool, ChunkError>;

    /// Gather the elements of `chunk` at `points` in order.
    ///
    /// # Errors
    /// Returns [`ChunkError::InvalidCoordinate`] if a point is outside of the chunk.
    fn read_points(&self, chunk: &ChunkBuffer, points: &[ArrayIndices]) -> Result<ChunkBuffer, ChunkError>;

    /// Scatter `values`, one per point, into the elements of `chunk` at `points`.
    ///
    /// Returns true if any element changed.
    ///
    /// # Errors
    /// Returns [`ChunkError::InvalidCoordinate`] if a point is outside of the chunk.
    fn write_points(
        &self,
        chunk: &mut ChunkBuffer,
        points: &[ArrayIndices],
        values: &ChunkBuffer,
    ) -> Result<bool, ChunkError>;

    /// Find up to `limit` rows of the one dimensional compound `chunk` in `selection` satisfying `predicate`.
    ///
    /// If `update` is supplied, its fields replace those of each matching row.
    ///
    /// # Errors
    /// Returns a [`ChunkError`] if the chunk is not a one dimensional compound chunk or the update is invalid.
    fn query(
        &self,
        chunk: &mut ChunkBuffer,
        selection: &Selection,
        predicate: &dyn CompiledPredicate,
        limit: Option<usize>,
        update: Option<&Map<String, Value>>,
    ) -> Result<QueryResult, ChunkError>;
}

/// The default [`ChunkKernels`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultChunkKernels;

fn linear_indices(chunk: &ChunkBuffer, selection: &Selection) -> Result<Vec<usize>, ChunkError> {
    let indices = selection.indices()?;
    let linearised = indices.linearised(chunk.shape()).ok_or_else(|| {
        ChunkError::from(SelectionError::RankMismatch {
            got: selection.dimensionality(),
            expected: chunk.shape().len(),
        })
    })?;
    linearised
        .map(|index| {
            usize::try_from(index)
                .map_err(|_| CodecError::Other(format!("index {index} is too large")).into())
        })
        .collect()
}

fn point_index(chunk: &ChunkBuffer, point: &[u64]) -> Result<usize, ChunkError> {
    let shape = chunk.shape();
    if point.len() != shape.len() || std::iter::zip(point, shape).any(|(index, extent)| index >= extent) {
        return Err(ChunkError::InvalidCoordinate {
            point: point.to_vec(),
            shape: shape.to_vec(),
        });
    }
    let index = std::iter::zip(point, shape).fold(0, |linear, (index, extent)| linear * extent + index);
    usize::try_from(index).map_err(|_| ChunkError::InvalidCoordinate {
        point: point.to_vec(),
        shape: shape.to_vec(),
    })
}

fn gather(chunk: &ChunkBuffer, indices: &[usize], shape: Vec<u64>) -> Result<ChunkBuffer, ChunkError> {
    let elements = indices
        .iter()
        .map(|&index| chunk.element(index).map(<[u8]>::to_vec))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ChunkError::from(SelectionError::ShapeMismatch(indices.len(), chunk.num_elements())))?;
    Ok(ChunkBuffer::from_elements(chunk.data_type().clone(), shape, elements)?)
}

fn scatter(chunk: &mut ChunkBuffer, indices: &[usize], data: &ChunkBuffer) -> Result<bool, ChunkError> {
    if data.data_type() != chunk.data_type() {
        return Err(ChunkError::PayloadSizeMismatch {
            expected: chunk.data_type().size().unwrap_or_default(),
            actual: data.data_type().size().unwrap_or_default(),
        });
    }
    if data.num_elements() != indices.len() {
        return Err(SelectionError::ShapeMismatch(indices.len(), data.num_elements()).into());
    }
    let mut changed = false;
    for (&index, element) in std::iter::zip(indices, data.elements()) {
        changed |= chunk.set_element(index, element);
    }
    if changed {
        chunk.set_dirty(true);
    }
    Ok(changed)
}

impl ChunkKernels for DefaultChunkKernels {
    fn read_selection(&self, chunk: &ChunkBuffer, selection: &Selection) -> Result<ChunkBuffer, ChunkError> {
        let indices = linear_indices(chunk, selection)?;
        gather(chunk, &indices, selection.shape()?)
    }

    fn write_selection(
        &self,
        chunk: &mut ChunkBuffer,
        selection: &Selection,
        data: &ChunkBuffer,
    ) -> Result<bool, ChunkError> {
        let indices = linear_indices(chunk, selection)?;
        scatter(chunk, &indices, data)
    }

    fn read_points(&self, chunk: &ChunkBuffer, points: &[ArrayIndices]) -> Result<ChunkBuffer, ChunkError> {
        let indices = points
            .iter()
            .map(|point| point_index(chunk, point))
            .collect::<Result<Vec<_>, _>>()?;
        gather(chunk, &indices, vec![points.len() as u64])
    }

    fn write_points(
        &self,
        chunk: &mut ChunkBuffer,
        points: &[ArrayIndices],
        values: &ChunkBuffer,
    ) -> Result<bool, ChunkError> {
        let indices = points
            .iter()
            .map(|point| point_index(chunk, point))
            .collect::<Result<Vec<_>, _>>()?;
        scatter(chunk, &indices, values)
    }

    fn query(
        &self,
        chunk: &mut ChunkBuffer,
        selection: &Selection,
        predicate: &dyn CompiledPredicate,
        limit: Option<usize>,
        update: Option<&Map<String, Value>>,
    ) -> Result<QueryResult, ChunkError> {
        let data_type = chunk.data_type().clone();
        if chunk.shape().len() != 1 || !data_type.is_compound() {
            return Err(ChunkError::UnsupportedQuery(format!(
                "queries require a one dimensional compound chunk, found {data_type} with shape {:?}",
                chunk.shape()
            )));
        }
        let mut indices = Vec::new();
        let mut rows = Vec::new();
        let mut changed = false;
        for index in linear_indices(chunk, selection)? {
            if limit.is_some_and(|limit| indices.len() >= limit) {
                break;
            }
            let Some(element) = chunk.element(index) else {
                continue;
            };
            let record = data_type.decode_record(element)?;
            if !predicate.matches(&record) {
                continue;
            }
            let row = match update {
                Some(update) => {
                    let updated = data_type
                        .update_fields(element, update)
                        .map_err(|err| ChunkError::InvalidQueryUpdate(err.to_string()))?;
                    changed |= chunk.set_element(index, &updated);
                    updated
                }
                None => element.to_vec(),
            };
            indices.push(index as u64);
            rows.push(row);
        }
        if changed {
            chunk.set_dirty(true);
        }
        let rows = ChunkBuffer::from_elements(data_type, vec![rows.len() as u64], rows)?;
        Ok(QueryResult {
            indices,
            rows,
            changed,
        })
    }
}
