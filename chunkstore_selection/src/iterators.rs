//! Selection iterators.
//!
//! The iterators are:
//!  - [`Indices`]: iterate over the multidimensional indices of the elements in a selection.
//!  - [`ScalarIndices`]: iterate over the indices of a one dimensional selection as bare integers.
//!  - [`LinearisedIndices`]: iterate over the linearised indices of the elements in a selection within a chunk.
//!
//! These can be created with [`Selection::indices`](crate::Selection::indices) or [`Indices::new`].
//!
//! [`Indices`] supports [`into_iter()`](IntoIterator::into_iter) ([`IntoIterator`]) and
//! [`rayon`]'s [`into_par_iter()`](rayon::iter::IntoParallelIterator::into_par_iter) ([`IntoParallelIterator`](rayon::iter::IntoParallelIterator)).

mod indices_iterator;
mod linearised_indices_iterator;

pub use indices_iterator::{Indices, IndicesIntoIterator, ParIndicesIntoIterator, ScalarIndices};
pub use linearised_indices_iterator::LinearisedIndices;
