//! The selection algebra for the `chunkstore` crate.
//!
//! A [`Selection`] picks elements out of a chunk with one [`DimSelection`] per dimension.
//! Each dimension is either a strided range (a hyperslab) or an explicit coordinate list.
//! Coordinate lists in different dimensions are indexed together, so they must share a length.
//!
//! This crate provides:
//!  - [`parse`]: the wire grammar `[<dim>,<dim>,...]` and its structured [`SelectionRequest`] equivalent,
//!  - [`shape_of`], [`is_full_extent`] and [`broadcast_shape`]: selection geometry,
//!  - [`paginate`]: splitting a selection into pages that fit a byte budget,
//!  - [`iterators::Indices`]: row-major iteration over the coordinates of a selection.
//!
//! ## Licence
//! `chunkstore_selection` is licensed under either of
//!  - the Apache License, Version 2.0 [LICENSE-APACHE](https://docs.rs/crate/chunkstore_selection/latest/source/LICENCE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0> or
//!  - the MIT license [LICENSE-MIT](https://docs.rs/crate/chunkstore_selection/latest/source/LICENCE-MIT) or <http://opensource.org/licenses/MIT>, at your option.
//!
//! Unless you explicitly state otherwise, any contribution intentionally submitted for inclusion in the work by you, as defined in the Apache-2.0 license, shall be dual licensed as above, without any additional terms or conditions.

mod dim_selection;
pub use dim_selection::DimSelection;

mod selection;
pub use selection::{is_full_extent, shape_of, Selection};

mod parser;
pub use parser::{parse, HyperslabRequest, ScalarOrList, SelectionRequest};

mod broadcast;
pub use broadcast::{broadcast_shape, broadcasts_to};

mod pagination;
pub use pagination::paginate;

pub mod iterators;

use thiserror::Error;

/// The shape of an array or selection.
pub type ArrayShape = Vec<u64>;

/// An ND index to an element in an array or chunk.
pub type ArrayIndices = Vec<u64>;

/// An ND index to an element in an array or chunk.
/// Uses [`TinyVec`](tinyvec::TinyVec) for stack allocation up to 4 dimensions.
pub type ArrayIndicesTinyVec = tinyvec::TinyVec<[u64; 4]>;

/// A selection error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SelectionError {
    /// The selection expression or request is structurally invalid.
    #[error("malformed selection {expression:?}: {reason}")]
    MalformedSelection {
        /// The offending expression.
        expression: String,
        /// What is wrong with it.
        reason: String,
    },
    /// The selection dimensionality differs from the chunk dimensionality.
    #[error("selection has rank {got}, expected rank {expected}")]
    RankMismatch {
        /// The selection rank.
        got: usize,
        /// The chunk rank.
        expected: usize,
    },
    /// A bound or coordinate lies outside of the dimension extent.
    #[error("value {value} is out of range for dimension {dim} with extent {extent}")]
    OutOfRange {
        /// The dimension index.
        dim: usize,
        /// The offending bound or coordinate.
        value: i64,
        /// The dimension extent.
        extent: u64,
    },
    /// Coordinate lists in different dimensions have different lengths.
    #[error("coordinate lists with lengths {0} and {1} cannot be broadcast together")]
    BroadcastMismatch(usize, usize),
    /// An element count cannot be arranged against a shape.
    #[error("{element_count} elements cannot be broadcast against shape {shape:?}")]
    BroadcastError {
        /// The target shape.
        shape: ArrayShape,
        /// The supplied element count.
        element_count: u64,
    },
    /// Geometry found coordinate lists with disagreeing lengths.
    #[error("shape mismatch: indexing arrays could not be broadcast together with shapes ({0},) ({1},)")]
    ShapeMismatch(usize, usize),
    /// The selection exceeds the byte budget and has no dimension to split.
    #[error("selection {selection} of {bytes} bytes cannot be paginated to {max_bytes} bytes")]
    NotPaginatable {
        /// The selection, in wire form.
        selection: String,
        /// The byte size of the selection, saturated at [`u64::MAX`].
        bytes: u64,
        /// The byte budget.
        max_bytes: u64,
    },
}

impl SelectionError {
    /// Create a new malformed selection error.
    #[must_use]
    pub fn malformed(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedSelection {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Create a new rank mismatch error.
    #[must_use]
    pub const fn rank_mismatch(got: usize, expected: usize) -> Self {
        Self::RankMismatch { got, expected }
    }
}

/// Convert a `u64` to a `usize`, saturating on 32-bit targets.
pub(crate) fn u64_to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}
