use std::fmt::Display;

use itertools::Itertools;

use crate::{u64_to_usize, SelectionError};

/// The selection along one dimension of a chunk.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DimSelection {
    /// The elements `start, start + stride, ...` that are less than `stop`.
    Range {
        /// The first selected index.
        start: u64,
        /// The exclusive upper bound.
        stop: u64,
        /// The step between selected indices.
        stride: u64,
    },
    /// An explicit, possibly unordered, list of indices.
    Coords(Vec<u64>),
}

impl DimSelection {
    /// Create a unit stride range covering `0..extent`.
    #[must_use]
    pub const fn full(extent: u64) -> Self {
        Self::Range {
            start: 0,
            stop: extent,
            stride: 1,
        }
    }

    /// Create a range. The bounds are not validated.
    #[must_use]
    pub const fn range(start: u64, stop: u64, stride: u64) -> Self {
        Self::Range {
            start,
            stop,
            stride,
        }
    }

    /// Create a length one range selecting `index`.
    #[must_use]
    pub const fn index(index: u64) -> Self {
        Self::range(index, index + 1, 1)
    }

    /// Returns true if this is a coordinate list.
    #[must_use]
    pub const fn is_coords(&self) -> bool {
        matches!(self, Self::Coords(_))
    }

    /// Return the number of selected indices.
    ///
    /// A range selects `ceil((stop - start) / stride)` indices.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Range {
                start,
                stop,
                stride,
            } => stop.saturating_sub(*start).div_ceil((*stride).max(1)),
            Self::Coords(coords) => coords.len() as u64,
        }
    }

    /// Returns true if no index is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the span of the selection: `stop - start` for a range or the list length for coordinates.
    #[must_use]
    pub fn span(&self) -> u64 {
        match self {
            Self::Range { start, stop, .. } => stop.saturating_sub(*start),
            Self::Coords(coords) => coords.len() as u64,
        }
    }

    /// Return the index selected at `position`.
    ///
    /// `position` must be less than [`len`](Self::len).
    #[must_use]
    pub fn coordinate(&self, position: u64) -> u64 {
        match self {
            Self::Range { start, stride, .. } => start + position * stride,
            Self::Coords(coords) => coords[u64_to_usize(position)],
        }
    }

    /// Returns true if this is a unit stride range covering exactly `0..extent`.
    #[must_use]
    pub fn is_full(&self, extent: u64) -> bool {
        matches!(self, Self::Range { start: 0, stop, stride: 1 } if *stop == extent)
    }

    /// Validate the selection against a dimension `extent`.
    ///
    /// # Errors
    /// Returns [`SelectionError::OutOfRange`] if `start` is not in `0..extent`, `stop` is not in `start+1..=extent`, or a coordinate is not in `0..extent`.
    /// Returns [`SelectionError::MalformedSelection`] if the stride is zero.
    pub fn validate(&self, dim: usize, extent: u64) -> Result<(), SelectionError> {
        let out_of_range = |value: u64| SelectionError::OutOfRange {
            dim,
            value: i64::try_from(value).unwrap_or(i64::MAX),
            extent,
        };
        match self {
            Self::Range {
                start,
                stop,
                stride,
            } => {
                if *start >= extent {
                    Err(out_of_range(*start))
                } else if *stop <= *start || *stop > extent {
                    Err(out_of_range(*stop))
                } else if *stride == 0 {
                    Err(SelectionError::malformed(
                        self.to_string(),
                        format!("stride for dimension {dim} must be positive"),
                    ))
                } else {
                    Ok(())
                }
            }
            Self::Coords(coords) => match coords.iter().find(|&&c| c >= extent) {
                Some(coord) => Err(out_of_range(*coord)),
                None => Ok(()),
            },
        }
    }
}

impl Display for DimSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Range {
                start,
                stop,
                stride: 1,
            } => write!(f, "{start}:{stop}"),
            Self::Range {
                start,
                stop,
                stride,
            } => write!(f, "{start}:{stop}:{stride}"),
            Self::Coords(coords) => write!(f, "[{}]", coords.iter().join(",")),
        }
    }
}
