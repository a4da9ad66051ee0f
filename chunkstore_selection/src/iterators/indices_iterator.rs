use std::{iter::FusedIterator, sync::Arc};

use rayon::iter::plumbing::{bridge, Consumer, Producer, ProducerCallback, UnindexedConsumer};
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

use crate::{
    selection::OutputAxis, u64_to_usize, ArrayIndicesTinyVec, ArrayShape, Selection,
    SelectionError,
};

use super::LinearisedIndices;

/// The output axes of a selection, shared between the halves of a split iterator.
#[derive(Debug)]
struct IndicesLayout {
    selection: Selection,
    axes: Vec<OutputAxis>,
    shape: ArrayShape,
}

impl IndicesLayout {
    /// Return the chunk indices of the element at linear position `index` of the output.
    fn indices(&self, mut index: u64) -> ArrayIndicesTinyVec {
        let mut indices = ArrayIndicesTinyVec::with_capacity(self.selection.dimensionality());
        indices.resize(self.selection.dimensionality(), 0);
        for (axis, &len) in std::iter::zip(&self.axes, &self.shape).rev() {
            let position = index % len;
            index /= len;
            match axis {
                OutputAxis::Range { dim, .. } => {
                    indices[*dim] = self.selection[*dim].coordinate(position);
                }
                OutputAxis::Coords { dims, .. } => {
                    for dim in dims {
                        indices[*dim] = self.selection[*dim].coordinate(position);
                    }
                }
            }
        }
        indices
    }
}

/// An iterator over the chunk indices of the elements in a selection.
///
/// Iterates over the last output dimension fastest (i.e. C-contiguous order).
/// For example, the selection `[1:4, 0:3:2]` of a 4x3 chunk with element indices
/// ```text
/// (0, 0)  (0, 1)  (0, 2)
/// (1, 0)  (1, 1)  (1, 2)
/// (2, 0)  (2, 1)  (2, 2)
/// (3, 0)  (3, 1)  (3, 2)
/// ```
/// will produce `[(1, 0), (1, 2), (2, 0), (2, 2), (3, 0), (3, 2)]`.
///
/// Zipped coordinate lists advance together as one output dimension.
/// The iterator consumes the [`Indices`], so it cannot be restarted.
#[derive(Clone)]
pub struct Indices {
    layout: Arc<IndicesLayout>,
    range: std::ops::Range<usize>,
}

impl Indices {
    /// Create a new indices struct.
    ///
    /// # Errors
    /// Returns [`SelectionError::ShapeMismatch`] if the coordinate lists of `selection` have different lengths.
    pub fn new(selection: Selection) -> Result<Self, SelectionError> {
        let axes = selection.output_axes()?;
        let shape: ArrayShape = axes.iter().map(OutputAxis::len).collect();
        let length = u64_to_usize(shape.iter().product());
        Ok(Self {
            layout: Arc::new(IndicesLayout {
                selection,
                axes,
                shape,
            }),
            range: 0..length,
        })
    }

    /// Return the number of indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.range.end.saturating_sub(self.range.start)
    }

    /// Returns true if the number of indices is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the output shape of the selection.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.layout.shape
    }

    /// Convert to an iterator of bare indices.
    ///
    /// Returns [`None`] if the selection is not one dimensional.
    #[must_use]
    pub fn scalars(self) -> Option<ScalarIndices> {
        (self.layout.selection.dimensionality() == 1).then(|| ScalarIndices {
            inner: self.into_iter(),
        })
    }

    /// Convert to an iterator of linearised indices within a chunk of shape `chunk_shape`.
    ///
    /// Returns [`None`] if the dimensionality of `chunk_shape` does not match the selection.
    #[must_use]
    pub fn linearised(self, chunk_shape: &[u64]) -> Option<LinearisedIndices> {
        (self.layout.selection.dimensionality() == chunk_shape.len())
            .then(|| LinearisedIndices::new(self.into_iter(), chunk_shape.to_vec()))
    }
}

impl IntoIterator for Indices {
    type Item = ArrayIndicesTinyVec;
    type IntoIter = IndicesIntoIterator;

    fn into_iter(self) -> Self::IntoIter {
        IndicesIntoIterator {
            layout: self.layout,
            range: self.range,
        }
    }
}

impl IntoParallelIterator for Indices {
    type Item = ArrayIndicesTinyVec;
    type Iter = ParIndicesIntoIterator;

    fn into_par_iter(self) -> Self::Iter {
        ParIndicesIntoIterator {
            layout: self.layout,
            range: self.range,
        }
    }
}

/// Serial indices iterator.
///
/// See [`Indices`].
#[derive(Clone)]
pub struct IndicesIntoIterator {
    layout: Arc<IndicesLayout>,
    range: std::ops::Range<usize>,
}

impl Iterator for IndicesIntoIterator {
    type Item = ArrayIndicesTinyVec;

    fn next(&mut self) -> Option<Self::Item> {
        if self.range.start >= self.range.end {
            return None;
        }
        let index = self.range.start as u64;
        self.range.start += 1;
        Some(self.layout.indices(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let length = self.range.end.saturating_sub(self.range.start);
        (length, Some(length))
    }
}

impl DoubleEndedIterator for IndicesIntoIterator {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.range.end > self.range.start {
            self.range.end -= 1;
            Some(self.layout.indices(self.range.end as u64))
        } else {
            None
        }
    }
}

impl ExactSizeIterator for IndicesIntoIterator {}

impl FusedIterator for IndicesIntoIterator {}

/// An iterator over the indices of a one dimensional selection.
///
/// See [`Indices::scalars`].
#[derive(Clone)]
pub struct ScalarIndices {
    inner: IndicesIntoIterator,
}

impl Iterator for ScalarIndices {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|indices| indices[0])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for ScalarIndices {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|indices| indices[0])
    }
}

impl ExactSizeIterator for ScalarIndices {}

impl FusedIterator for ScalarIndices {}

/// Parallel indices iterator.
///
/// See [`Indices`].
pub struct ParIndicesIntoIterator {
    layout: Arc<IndicesLayout>,
    range: std::ops::Range<usize>,
}

impl ParallelIterator for ParIndicesIntoIterator {
    type Item = ArrayIndicesTinyVec;

    fn drive_unindexed<C>(self, consumer: C) -> C::Result
    where
        C: UnindexedConsumer<Self::Item>,
    {
        bridge(self, consumer)
    }

    fn opt_len(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl IndexedParallelIterator for ParIndicesIntoIterator {
    fn with_producer<CB: ProducerCallback<Self::Item>>(self, callback: CB) -> CB::Output {
        callback.callback(self)
    }

    fn drive<C: Consumer<Self::Item>>(self, consumer: C) -> C::Result {
        bridge(self, consumer)
    }

    fn len(&self) -> usize {
        self.range.end.saturating_sub(self.range.start)
    }
}

impl Producer for ParIndicesIntoIterator {
    type Item = ArrayIndicesTinyVec;
    type IntoIter = IndicesIntoIterator;

    fn into_iter(self) -> Self::IntoIter {
        IndicesIntoIterator {
            layout: self.layout,
            range: self.range,
        }
    }

    fn split_at(self, index: usize) -> (Self, Self) {
        let left = ParIndicesIntoIterator {
            layout: self.layout.clone(),
            range: self.range.start..self.range.start + index,
        };
        let right = ParIndicesIntoIterator {
            layout: self.layout,
            range: (self.range.start + index)..self.range.end,
        };
        (left, right)
    }
}
