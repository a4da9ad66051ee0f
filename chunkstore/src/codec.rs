//! Element codecs.
//!
//! An [`ElementCodec`] converts between the stored bytes of a chunk and a [`ChunkBuffer`].
//! The resolved [`FilterOps`] of the owning dataset, if any, are supplied to both directions.
//!
//! [`RawElementCodec`] stores the concatenated element encodings (see [`data_type`](crate::data_type)).
//! It applies the shuffle filters of [`FilterOps`] to fixed size elements and does not execute compressors.

use bytes::Bytes;
use chunkstore_selection::SelectionError;
use thiserror::Error;

use crate::{
    chunk_buffer::{ChunkBuffer, ChunkBytes},
    data_type::{DataType, DataTypeError},
    filter::{FilterOps, ShuffleMode},
};

/// A codec error.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The number of bytes differs from what the layout requires.
    #[error("expected {expected} bytes, got {actual}")]
    UnexpectedSize {
        /// The expected size.
        expected: usize,
        /// The actual size.
        actual: usize,
    },
    /// The number of elements differs from what the layout requires.
    #[error("expected {expected} elements, got {actual}")]
    UnexpectedElementCount {
        /// The expected number of elements.
        expected: usize,
        /// The actual number of elements.
        actual: usize,
    },
    /// An element encoding is invalid.
    #[error(transparent)]
    DataType(#[from] DataTypeError),
    /// A shape error.
    #[error(transparent)]
    Selection(#[from] SelectionError),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

/// Converts between stored chunk bytes and chunk buffers.
pub trait ElementCodec: Send + Sync {
    /// Decode `bytes` into a buffer of `data_type` elements with `shape`.
    ///
    /// # Errors
    /// Returns a [`CodecError`] if `bytes` is not a valid encoding of exactly that many elements.
    fn decode(
        &self,
        bytes: &[u8],
        data_type: &DataType,
        shape: &[u64],
        filters: Option<&FilterOps>,
    ) -> Result<ChunkBuffer, CodecError>;

    /// Encode `buffer`.
    ///
    /// # Errors
    /// Returns a [`CodecError`] if encoding fails.
    fn encode(&self, buffer: &ChunkBuffer, filters: Option<&FilterOps>) -> Result<Bytes, CodecError>;
}

/// The raw element codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawElementCodec;

impl RawElementCodec {
    /// Create a new raw element codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn shuffle_mode(filters: Option<&FilterOps>) -> ShuffleMode {
    filters.map_or(ShuffleMode::None, |filters| filters.shuffle)
}

impl ElementCodec for RawElementCodec {
    fn decode(
        &self,
        bytes: &[u8],
        data_type: &DataType,
        shape: &[u64],
        filters: Option<&FilterOps>,
    ) -> Result<ChunkBuffer, CodecError> {
        let chunk_bytes = match data_type.size() {
            Some(size) => {
                let bytes = match shuffle_mode(filters) {
                    ShuffleMode::None => bytes.to_vec(),
                    ShuffleMode::Byte => byte_unshuffle(bytes, size),
                    ShuffleMode::Bit => bit_unshuffle(bytes, size),
                };
                ChunkBytes::Fixed(bytes)
            }
            None => {
                let num_elements = usize::try_from(shape.iter().product::<u64>())
                    .map_err(|_| CodecError::Other(format!("shape {shape:?} is too large")))?;
                let mut elements = Vec::with_capacity(num_elements);
                let mut rest = bytes;
                while !rest.is_empty() {
                    let len = data_type.encoded_len(rest)?;
                    elements.push(rest[..len].to_vec());
                    rest = &rest[len..];
                }
                ChunkBytes::Variable(elements)
            }
        };
        ChunkBuffer::new(data_type.clone(), shape.to_vec(), chunk_bytes)
    }

    fn encode(&self, buffer: &ChunkBuffer, filters: Option<&FilterOps>) -> Result<Bytes, CodecError> {
        Ok(match buffer.bytes() {
            ChunkBytes::Fixed(bytes) => {
                let size = buffer.data_type().size().unwrap_or_default();
                match shuffle_mode(filters) {
                    ShuffleMode::None => Bytes::copy_from_slice(bytes),
                    ShuffleMode::Byte => byte_shuffle(bytes, size).into(),
                    ShuffleMode::Bit => bit_shuffle(bytes, size).into(),
                }
            }
            ChunkBytes::Variable(elements) => elements.concat().into(),
        })
    }
}

/// Group byte `b` of every element together.
fn byte_shuffle(bytes: &[u8], size: usize) -> Vec<u8> {
    if size <= 1 {
        return bytes.to_vec();
    }
    let count = bytes.len() / size;
    let mut shuffled = vec![0; bytes.len()];
    for (i, element) in bytes.chunks_exact(size).enumerate() {
        for (b, byte) in element.iter().enumerate() {
            shuffled[b * count + i] = *byte;
        }
    }
    shuffled
}

fn byte_unshuffle(bytes: &[u8], size: usize) -> Vec<u8> {
    if size <= 1 {
        return bytes.to_vec();
    }
    let count = bytes.len() / size;
    let mut unshuffled = vec![0; bytes.len()];
    for (i, element) in unshuffled.chunks_exact_mut(size).enumerate() {
        for (b, byte) in element.iter_mut().enumerate() {
            *byte = bytes[b * count + i];
        }
    }
    unshuffled
}

/// Group bit `k` of every element together.
fn bit_shuffle(bytes: &[u8], size: usize) -> Vec<u8> {
    let bits = size * 8;
    let count = bytes.len().checked_div(size).unwrap_or_default();
    let mut shuffled = vec![0; bytes.len()];
    for i in 0..count {
        for k in 0..bits {
            let source = i * bits + k;
            if (bytes[source / 8] >> (source % 8)) & 1 == 1 {
                let target = k * count + i;
                shuffled[target / 8] |= 1 << (target % 8);
            }
        }
    }
    shuffled
}

fn bit_unshuffle(bytes: &[u8], size: usize) -> Vec<u8> {
    let bits = size * 8;
    let count = bytes.len().checked_div(size).unwrap_or_default();
    let mut unshuffled = vec![0; bytes.len()];
    for i in 0..count {
        for k in 0..bits {
            let source = k * count + i;
            if (bytes[source / 8] >> (source % 8)) & 1 == 1 {
                let target = i * bits + k;
                unshuffled[target / 8] |= 1 << (target % 8);
            }
        }
    }
    unshuffled
}
