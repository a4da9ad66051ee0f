//! Decoded chunk buffers.

use chunkstore_selection::{ArrayShape, Selection, SelectionError};

use crate::{codec::CodecError, data_type::DataType};

/// The elements of a [`ChunkBuffer`] in C order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkBytes {
    /// Contiguous elements of a fixed size.
    Fixed(Vec<u8>),
    /// One element encoding per element.
    Variable(Vec<Vec<u8>>),
}

/// A decoded chunk, or the elements produced by or supplied to a chunk operation.
///
/// A buffer is dirty if it was mutated or newly initialised since it was last persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkBuffer {
    data_type: DataType,
    shape: ArrayShape,
    bytes: ChunkBytes,
    num_elements: usize,
    dirty: bool,
}

fn num_elements(shape: &[u64]) -> Result<usize, CodecError> {
    usize::try_from(shape.iter().product::<u64>())
        .map_err(|_| CodecError::Other(format!("shape {shape:?} is too large")))
}

impl ChunkBuffer {
    /// Create a new clean chunk buffer.
    ///
    /// # Errors
    /// Returns [`CodecError::UnexpectedSize`] if `bytes` does not hold one element of `data_type` for each element of `shape`.
    pub fn new(data_type: DataType, shape: ArrayShape, bytes: ChunkBytes) -> Result<Self, CodecError> {
        let num_elements = num_elements(&shape)?;
        match (&bytes, data_type.size()) {
            (ChunkBytes::Fixed(bytes), Some(size)) => {
                if bytes.len() != num_elements * size {
                    return Err(CodecError::UnexpectedSize {
                        expected: num_elements * size,
                        actual: bytes.len(),
                    });
                }
            }
            (ChunkBytes::Variable(elements), None) => {
                if elements.len() != num_elements {
                    return Err(CodecError::UnexpectedElementCount {
                        expected: num_elements,
                        actual: elements.len(),
                    });
                }
            }
            _ => {
                return Err(CodecError::Other(format!(
                    "chunk bytes do not match the layout of {data_type}"
                )))
            }
        }
        Ok(Self {
            data_type,
            shape,
            bytes,
            num_elements,
            dirty: false,
        })
    }

    /// Create a clean chunk buffer from element encodings.
    ///
    /// # Errors
    /// Returns a [`CodecError`] if the number or size of `elements` does not match `data_type` and `shape`.
    pub fn from_elements(
        data_type: DataType,
        shape: ArrayShape,
        elements: Vec<Vec<u8>>,
    ) -> Result<Self, CodecError> {
        let bytes = if data_type.size().is_some() {
            ChunkBytes::Fixed(elements.concat())
        } else {
            ChunkBytes::Variable(elements)
        };
        Self::new(data_type, shape, bytes)
    }

    /// Create a chunk buffer with every element set to the `fill_value` element encoding.
    ///
    /// # Errors
    /// Returns [`CodecError::UnexpectedSize`] if `fill_value` is not one element of `data_type`.
    pub fn new_fill_value(
        data_type: DataType,
        shape: ArrayShape,
        fill_value: &[u8],
    ) -> Result<Self, CodecError> {
        let encoded_len = data_type.encoded_len(fill_value)?;
        if encoded_len != fill_value.len() {
            return Err(CodecError::UnexpectedSize {
                expected: encoded_len,
                actual: fill_value.len(),
            });
        }
        let num_elements = num_elements(&shape)?;
        let bytes = if data_type.size().is_some() {
            ChunkBytes::Fixed(fill_value.repeat(num_elements))
        } else {
            ChunkBytes::Variable(vec![fill_value.to_vec(); num_elements])
        };
        Self::new(data_type, shape, bytes)
    }

    /// The element type.
    #[must_use]
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// The shape.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The elements.
    #[must_use]
    pub fn bytes(&self) -> &ChunkBytes {
        &self.bytes
    }

    /// The number of elements.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    /// The approximate memory footprint in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.bytes {
            ChunkBytes::Fixed(bytes) => bytes.len(),
            ChunkBytes::Variable(elements) => elements
                .iter()
                .map(|element| element.len() + size_of::<Vec<u8>>())
                .sum(),
        }
    }

    /// Returns true if the buffer has changes that are not yet persisted.
    #[must_use]
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Set the dirty flag.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// The encoding of the element at linear index `index`, or [`None`] if out of bounds.
    #[must_use]
    pub fn element(&self, index: usize) -> Option<&[u8]> {
        match &self.bytes {
            ChunkBytes::Fixed(bytes) => {
                let size = self.data_type.size()?;
                bytes.get(index * size..(index + 1) * size)
            }
            ChunkBytes::Variable(elements) => elements.get(index).map(Vec::as_slice),
        }
    }

    /// An iterator over the element encodings.
    pub fn elements(&self) -> impl Iterator<Item = &[u8]> {
        (0..self.num_elements()).filter_map(|index| self.element(index))
    }

    /// Decode the elements to JSON values in C order.
    ///
    /// # Errors
    /// Returns a [`DataTypeError`](crate::data_type::DataTypeError) if an element encoding is invalid.
    pub fn to_values(&self) -> Result<Vec<serde_json::Value>, crate::data_type::DataTypeError> {
        self.elements()
            .map(|element| self.data_type.decode_value(element))
            .collect()
    }

    /// Replace the element at linear index `index` with the `element` encoding.
    ///
    /// Returns true if the element changed.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds, or if `element` is not the size of a fixed size element.
    pub fn set_element(&mut self, index: usize, element: &[u8]) -> bool {
        let changed = self.element(index) != Some(element);
        if changed {
            match &mut self.bytes {
                ChunkBytes::Fixed(bytes) => {
                    let size = element.len();
                    bytes[index * size..(index + 1) * size].copy_from_slice(element);
                }
                ChunkBytes::Variable(elements) => elements[index] = element.to_vec(),
            }
        }
        changed
    }

    /// Repeat the buffer to `shape` with numpy broadcasting rules.
    ///
    /// # Errors
    /// Returns a [`SelectionError::BroadcastError`] if the buffer shape does not broadcast to `shape`.
    pub fn broadcast_to(&self, shape: &[u64]) -> Result<ChunkBuffer, CodecError> {
        if self.shape == shape {
            return Ok(self.clone());
        }
        if !chunkstore_selection::broadcasts_to(&self.shape, shape) {
            return Err(SelectionError::BroadcastError {
                shape: shape.to_vec(),
                element_count: self.shape.iter().product(),
            }
            .into());
        }
        let offset = shape.len() - self.shape.len();
        let elements = Selection::full_extent(shape)
            .indices()?
            .into_iter()
            .map(|indices| {
                let index = std::iter::zip(&indices[offset..], &self.shape).fold(
                    0,
                    |linear, (&index, &extent)| {
                        linear * extent + if extent == 1 { 0 } else { index }
                    },
                );
                usize::try_from(index)
                    .ok()
                    .and_then(|index| self.element(index))
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| CodecError::Other("broadcast index out of bounds".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_elements(self.data_type.clone(), shape.to_vec(), elements)
    }
}
