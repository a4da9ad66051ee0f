//! The selection wire grammar.
//!
//! ```text
//! selection := "[" dim ("," dim)* "]"     (the brackets may be omitted for one dimension)
//! dim       := ":" | start ":" stop | start ":" stop ":" stride | index | "[" coord ("," coord)* "]"
//! ```
//! Empty `start`, `stop` or `stride` fields default to `0`, the dimension extent and `1`.

use serde::{Deserialize, Serialize};

use crate::{DimSelection, Selection, SelectionError};

/// Parse a selection expression against a chunk with shape `dims`.
///
/// An empty (or whitespace only) expression selects the full extent.
/// Whitespace is ignored.
///
/// # Errors
/// Returns [`SelectionError::MalformedSelection`] on a structural error such as an empty dimension, nested or unbalanced brackets, a range inside a coordinate list, or a non-integer field.
/// Returns [`SelectionError::RankMismatch`] if the number of dimensions differs from `dims`.
/// Returns [`SelectionError::OutOfRange`] if a bound or coordinate is outside of `0..extent`.
/// Returns [`SelectionError::BroadcastMismatch`] if coordinate lists have different lengths.
pub fn parse(expr: &str, dims: &[u64]) -> Result<Selection, SelectionError> {
    let expr: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
    if expr.is_empty() {
        return Ok(Selection::full_extent(dims));
    }
    let elements = split_dims(&expr)?;
    if elements.len() != dims.len() {
        return Err(SelectionError::rank_mismatch(elements.len(), dims.len()));
    }
    let selection = std::iter::zip(elements, dims)
        .enumerate()
        .map(|(dim, (element, extent))| parse_dim(&expr, element, dim, *extent))
        .collect::<Result<Vec<_>, _>>()?;
    Selection::new_with_dims(selection, dims)
}

/// Split a whitespace free expression into per-dimension elements.
fn split_dims(expr: &str) -> Result<Vec<&str>, SelectionError> {
    let inner = match (expr.strip_prefix('['), expr.strip_suffix(']')) {
        (Some(_), Some(_)) if expr.len() >= 2 => &expr[1..expr.len() - 1],
        (None, None) => expr,
        _ => return Err(SelectionError::malformed(expr, "unbalanced brackets")),
    };

    let mut elements = Vec::new();
    let mut element_start = 0;
    let mut in_coords = false;
    for (i, ch) in inner.char_indices() {
        match ch {
            ',' if !in_coords => {
                if i == element_start {
                    return Err(SelectionError::malformed(expr, "empty dimension"));
                }
                elements.push(&inner[element_start..i]);
                element_start = i + 1;
            }
            '[' if in_coords => {
                return Err(SelectionError::malformed(expr, "nested coordinate list"));
            }
            '[' => in_coords = true,
            ']' if !in_coords => {
                return Err(SelectionError::malformed(expr, "close bracket with no open"));
            }
            ']' => in_coords = false,
            ':' if in_coords => {
                return Err(SelectionError::malformed(
                    expr,
                    "range not allowed in a coordinate list",
                ));
            }
            _ => {}
        }
    }
    if in_coords {
        return Err(SelectionError::malformed(expr, "unterminated coordinate list"));
    }
    if element_start == inner.len() {
        return Err(SelectionError::malformed(expr, "empty dimension"));
    }
    elements.push(&inner[element_start..]);
    Ok(elements)
}

fn parse_int(expr: &str, field: &str, dim: usize, what: &str) -> Result<i64, SelectionError> {
    field.parse::<i64>().map_err(|_| {
        SelectionError::malformed(expr, format!("invalid {what} value {field:?} for dimension {dim}"))
    })
}

/// Convert a signed bound to an index, mapping negative values to [`SelectionError::OutOfRange`].
fn non_negative(value: i64, dim: usize, extent: u64) -> Result<u64, SelectionError> {
    u64::try_from(value).map_err(|_| SelectionError::OutOfRange { dim, value, extent })
}

fn parse_dim(
    expr: &str,
    element: &str,
    dim: usize,
    extent: u64,
) -> Result<DimSelection, SelectionError> {
    if let Some(coords) = element.strip_prefix('[') {
        let Some(coords) = coords.strip_suffix(']') else {
            return Err(SelectionError::malformed(
                expr,
                format!("unexpected characters after coordinate list for dimension {dim}"),
            ));
        };
        let coords = coords
            .split(',')
            .map(|field| {
                let coord = parse_int(expr, field, dim, "coordinate")?;
                non_negative(coord, dim, extent)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let dim_selection = DimSelection::Coords(coords);
        dim_selection.validate(dim, extent)?;
        return Ok(dim_selection);
    }

    if element.contains(['[', ']']) {
        return Err(SelectionError::malformed(
            expr,
            format!("misplaced bracket for dimension {dim}"),
        ));
    }

    let fields: Vec<&str> = element.split(':').collect();
    let bound = |field: &str, what: &str| -> Result<Option<u64>, SelectionError> {
        if field.is_empty() {
            Ok(None)
        } else {
            non_negative(parse_int(expr, field, dim, what)?, dim, extent).map(Some)
        }
    };
    match fields[..] {
        [index] => {
            let index = non_negative(parse_int(expr, index, dim, "index")?, dim, extent)?;
            let dim_selection = DimSelection::index(index);
            dim_selection.validate(dim, extent)?;
            Ok(dim_selection)
        }
        [start, stop] => range_dim(
            dim,
            extent,
            bound(start, "start")?,
            bound(stop, "stop")?,
            None,
        ),
        [start, stop, stride] => range_dim(
            dim,
            extent,
            bound(start, "start")?,
            bound(stop, "stop")?,
            bound(stride, "stride")?,
        ),
        _ => Err(SelectionError::malformed(
            expr,
            format!("too many fields for dimension {dim}"),
        )),
    }
}

/// Build a validated range from optional bounds.
fn range_dim(
    dim: usize,
    extent: u64,
    start: Option<u64>,
    stop: Option<u64>,
    stride: Option<u64>,
) -> Result<DimSelection, SelectionError> {
    let dim_selection = DimSelection::range(
        start.unwrap_or(0),
        stop.unwrap_or(extent),
        stride.unwrap_or(1),
    );
    dim_selection.validate(dim, extent)?;
    Ok(dim_selection)
}

/// A scalar or a list of integers, as accepted by [`HyperslabRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarOrList {
    /// A single value, for a one dimensional selection.
    Scalar(i64),
    /// One value per dimension.
    List(Vec<i64>),
}

impl ScalarOrList {
    fn to_vec(&self) -> Vec<i64> {
        match self {
            Self::Scalar(value) => vec![*value],
            Self::List(values) => values.clone(),
        }
    }
}

/// A pre-decomposed hyperslab selection.
///
/// ```json
/// {"start": [0, 4], "stop": [10, 8], "step": [2, 1]}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HyperslabRequest {
    /// The start of each dimension.
    pub start: ScalarOrList,
    /// The exclusive stop of each dimension.
    pub stop: ScalarOrList,
    /// The optional step of each dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<ScalarOrList>,
}

impl HyperslabRequest {
    /// Convert the request to the equivalent selection expression.
    ///
    /// # Errors
    /// Returns [`SelectionError::MalformedSelection`] if `start`, `stop` and `step` have different lengths.
    pub fn to_expression(&self) -> Result<String, SelectionError> {
        let start = self.start.to_vec();
        let stop = self.stop.to_vec();
        let step = self.step.as_ref().map(ScalarOrList::to_vec);
        let malformed = |reason: &str| {
            SelectionError::malformed(format!("{self:?}"), reason)
        };
        if stop.len() != start.len() {
            return Err(malformed("start and stop values have different ranks"));
        }
        if step.as_ref().is_some_and(|step| step.len() != start.len()) {
            return Err(malformed("step values have a different rank from start and stop"));
        }
        let dims = (0..start.len()).map(|i| match &step {
            Some(step) => format!("{}:{}:{}", start[i], stop[i], step[i]),
            None => format!("{}:{}", start[i], stop[i]),
        });
        Ok(format!("[{}]", itertools::join(dims, ",")))
    }
}

/// A selection request in either wire or structured form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectionRequest {
    /// A selection expression, see [`parse`].
    Expression(String),
    /// A structured hyperslab.
    Hyperslab(HyperslabRequest),
}

impl SelectionRequest {
    /// Resolve the request against a chunk with shape `dims`.
    ///
    /// A structured request produces the same selection as the equivalent expression.
    ///
    /// # Errors
    /// Returns a [`SelectionError`] if the request is malformed or does not fit `dims`.
    pub fn to_selection(&self, dims: &[u64]) -> Result<Selection, SelectionError> {
        match self {
            Self::Expression(expr) => parse(expr, dims),
            Self::Hyperslab(hyperslab) => parse(&hyperslab.to_expression()?, dims),
        }
    }
}

impl From<&str> for SelectionRequest {
    fn from(expr: &str) -> Self {
        Self::Expression(expr.to_string())
    }
}

impl From<HyperslabRequest> for SelectionRequest {
    fn from(hyperslab: HyperslabRequest) -> Self {
        Self::Hyperslab(hyperslab)
    }
}
