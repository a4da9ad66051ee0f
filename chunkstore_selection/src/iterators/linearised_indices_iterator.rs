use std::iter::FusedIterator;

use crate::ArrayShape;

use super::IndicesIntoIterator;

/// An iterator over the linearised (C order) indices of the elements of a selection within a chunk.
///
/// See [`Indices::linearised`](super::Indices::linearised).
#[derive(Clone)]
pub struct LinearisedIndices {
    inner: IndicesIntoIterator,
    chunk_shape: ArrayShape,
}

impl LinearisedIndices {
    pub(super) fn new(inner: IndicesIntoIterator, chunk_shape: ArrayShape) -> Self {
        Self { inner, chunk_shape }
    }

    fn ravel(&self, indices: &[u64]) -> u64 {
        std::iter::zip(indices, &self.chunk_shape)
            .fold(0, |linear, (index, extent)| linear * extent + index)
    }
}

impl Iterator for LinearisedIndices {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.inner.next()?;
        Some(self.ravel(&indices))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for LinearisedIndices {
    fn next_back(&mut self) -> Option<Self::Item> {
        let indices = self.inner.next_back()?;
        Some(self.ravel(&indices))
    }
}

impl ExactSizeIterator for LinearisedIndices {}

impl FusedIterator for LinearisedIndices {}
