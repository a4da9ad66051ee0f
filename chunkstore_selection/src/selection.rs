use std::fmt::Display;

use derive_more::Deref;
use itertools::Itertools;

use crate::{
    iterators::Indices, u64_to_usize, ArrayShape, DimSelection, SelectionError,
};

/// A selection of elements in a chunk, one [`DimSelection`] per dimension.
///
/// Coordinate list dimensions are indexed together (zipped) rather than forming an outer product.
/// They contribute a single dimension to the output shape, positioned at the first coordinate list dimension.
/// For example, `[0:2, [1,3,5], 4:8, [0,0,2]]` has the output shape `[2, 3, 4]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deref)]
pub struct Selection(Vec<DimSelection>);

/// One dimension of the output of a selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum OutputAxis {
    /// A range in chunk dimension `dim`.
    Range { dim: usize, len: u64 },
    /// The zipped coordinate lists of chunk dimensions `dims`.
    Coords { dims: Vec<usize>, len: u64 },
}

impl OutputAxis {
    pub(crate) const fn len(&self) -> u64 {
        match self {
            Self::Range { len, .. } | Self::Coords { len, .. } => *len,
        }
    }
}

impl Selection {
    /// Create a selection from per-dimension selections without validation.
    #[must_use]
    pub fn new(dims: Vec<DimSelection>) -> Self {
        Self(dims)
    }

    /// Create a selection from per-dimension selections validated against the chunk `dims`.
    ///
    /// # Errors
    /// Returns [`SelectionError::RankMismatch`] if the dimensionality does not match `dims`,
    /// [`SelectionError::OutOfRange`] if a bound or coordinate is outside of its extent,
    /// or [`SelectionError::BroadcastMismatch`] if coordinate lists have different lengths.
    pub fn new_with_dims(
        selection: Vec<DimSelection>,
        dims: &[u64],
    ) -> Result<Self, SelectionError> {
        if selection.len() != dims.len() {
            return Err(SelectionError::rank_mismatch(selection.len(), dims.len()));
        }
        for (dim, (dim_selection, extent)) in std::iter::zip(&selection, dims).enumerate() {
            dim_selection.validate(dim, *extent)?;
        }
        let mut coord_lens = selection.iter().filter_map(|dim_selection| match dim_selection {
            DimSelection::Coords(coords) => Some(coords.len()),
            DimSelection::Range { .. } => None,
        });
        if let Some(first) = coord_lens.next() {
            if let Some(other) = coord_lens.find(|len| *len != first) {
                return Err(SelectionError::BroadcastMismatch(first, other));
            }
        }
        Ok(Self(selection))
    }

    /// Create a selection of every element of a chunk with shape `dims`.
    #[must_use]
    pub fn full_extent(dims: &[u64]) -> Self {
        Self(dims.iter().copied().map(DimSelection::full).collect())
    }

    /// Create a hyperslab selection from optional `start`, `stop` and `step` lists.
    ///
    /// Missing lists default to `0`, the dimension extent and `1` respectively.
    ///
    /// # Errors
    /// Returns [`SelectionError::RankMismatch`] if a list does not match the dimensionality of `dims`.
    /// Returns [`SelectionError::OutOfRange`] if `start` is not in `0..extent`, `stop` is not in `start+1..=extent`, or `step` is not in `1..=extent`.
    pub fn hyperslab(
        dims: &[u64],
        start: Option<&[u64]>,
        stop: Option<&[u64]>,
        step: Option<&[u64]>,
    ) -> Result<Self, SelectionError> {
        for list in [start, stop, step].into_iter().flatten() {
            if list.len() != dims.len() {
                return Err(SelectionError::rank_mismatch(list.len(), dims.len()));
            }
        }
        let mut selection = Vec::with_capacity(dims.len());
        for (dim, &extent) in dims.iter().enumerate() {
            let start = start.map_or(0, |start| start[dim]);
            let stop = stop.map_or(extent, |stop| stop[dim]);
            let step = step.map_or(1, |step| step[dim]);
            if step == 0 || step > extent {
                return Err(SelectionError::OutOfRange {
                    dim,
                    value: i64::try_from(step).unwrap_or(i64::MAX),
                    extent,
                });
            }
            let dim_selection = DimSelection::range(start, stop, step);
            dim_selection.validate(dim, extent)?;
            selection.push(dim_selection);
        }
        Ok(Self(selection))
    }

    /// Return the dimensionality of the selection.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.0.len()
    }

    /// Return the per-dimension selections.
    #[must_use]
    pub fn dims(&self) -> &[DimSelection] {
        &self.0
    }

    /// Consume the selection and return the per-dimension selections.
    #[must_use]
    pub fn into_dims(self) -> Vec<DimSelection> {
        self.0
    }

    /// Return the common length of the coordinate lists, if there are any.
    ///
    /// # Errors
    /// Returns [`SelectionError::ShapeMismatch`] if the coordinate lists have different lengths.
    pub fn coordinate_len(&self) -> Result<Option<usize>, SelectionError> {
        let mut coordinate_len = None;
        for dim_selection in &self.0 {
            if let DimSelection::Coords(coords) = dim_selection {
                match coordinate_len {
                    None => coordinate_len = Some(coords.len()),
                    Some(len) if len != coords.len() => {
                        return Err(SelectionError::ShapeMismatch(len, coords.len()));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(coordinate_len)
    }

    /// Return the output dimensions of the selection.
    pub(crate) fn output_axes(&self) -> Result<Vec<OutputAxis>, SelectionError> {
        let coordinate_len = self.coordinate_len()?;
        let coordinate_dims = self
            .0
            .iter()
            .positions(DimSelection::is_coords)
            .collect::<Vec<_>>();
        let mut axes = Vec::with_capacity(self.0.len());
        for (dim, dim_selection) in self.0.iter().enumerate() {
            match dim_selection {
                DimSelection::Range { .. } => axes.push(OutputAxis::Range {
                    dim,
                    len: dim_selection.len(),
                }),
                DimSelection::Coords(_) if Some(&dim) == coordinate_dims.first() => {
                    axes.push(OutputAxis::Coords {
                        dims: coordinate_dims.clone(),
                        len: coordinate_len.unwrap_or_default() as u64,
                    });
                }
                DimSelection::Coords(_) => {}
            }
        }
        Ok(axes)
    }

    /// Return the shape of the selected elements.
    ///
    /// See [`shape_of`].
    ///
    /// # Errors
    /// Returns [`SelectionError::ShapeMismatch`] if the coordinate lists have different lengths.
    pub fn shape(&self) -> Result<ArrayShape, SelectionError> {
        Ok(self.output_axes()?.iter().map(OutputAxis::len).collect())
    }

    /// Return the number of selected elements.
    ///
    /// # Errors
    /// Returns [`SelectionError::ShapeMismatch`] if the coordinate lists have different lengths.
    pub fn num_elements(&self) -> Result<u64, SelectionError> {
        Ok(self.shape()?.iter().product())
    }

    /// Return the number of selected elements as a `usize`.
    ///
    /// # Errors
    /// Returns [`SelectionError::ShapeMismatch`] if the coordinate lists have different lengths.
    pub fn num_elements_usize(&self) -> Result<usize, SelectionError> {
        self.num_elements().map(u64_to_usize)
    }

    /// Returns true if the selection is every element of a chunk with shape `dims`.
    ///
    /// See [`is_full_extent`].
    #[must_use]
    pub fn is_full_extent(&self, dims: &[u64]) -> bool {
        self.0.len() == dims.len()
            && std::iter::zip(&self.0, dims).all(|(dim_selection, extent)| dim_selection.is_full(*extent))
    }

    /// Return the indices of the selected elements.
    ///
    /// # Errors
    /// Returns [`SelectionError::ShapeMismatch`] if the coordinate lists have different lengths.
    pub fn indices(&self) -> Result<Indices, SelectionError> {
        Indices::new(self.clone())
    }
}

impl From<Vec<DimSelection>> for Selection {
    fn from(dims: Vec<DimSelection>) -> Self {
        Self(dims)
    }
}

impl Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.iter().join(","))
    }
}

/// Return the logical output shape of `selection`.
///
/// A range contributes `ceil((stop - start) / stride)`.
/// All coordinate lists together contribute their common length once, at the position of the first coordinate list.
///
/// # Errors
/// Returns [`SelectionError::ShapeMismatch`] if the coordinate lists have different lengths.
pub fn shape_of(selection: &Selection) -> Result<ArrayShape, SelectionError> {
    selection.shape()
}

/// Returns true if every dimension of `selection` is a unit stride range covering exactly `0..extent` of `dims`.
#[must_use]
pub fn is_full_extent(selection: &Selection, dims: &[u64]) -> bool {
    selection.is_full_extent(dims)
}
