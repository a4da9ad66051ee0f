use crate::{ArrayShape, SelectionError};

/// Return a shape with `element_count` elements that lines up with the trailing dimensions of `shape`.
///
/// This is used when a client supplies a flat element count rather than describing the arrangement of its data.
///  - If `element_count` is the number of elements in `shape`, `shape` is returned.
///  - If `element_count` is a multiple of the number of elements in `shape`, a leading dimension is prepended.
///  - If `element_count` is less, the shortest trailing part of `shape` with `element_count` elements is returned, so the data can be repeated over the leading dimensions.
///
/// ```
/// # use chunkstore_selection::broadcast_shape;
/// assert_eq!(broadcast_shape(&[3, 4], 12).unwrap(), vec![3, 4]);
/// assert_eq!(broadcast_shape(&[4], 12).unwrap(), vec![3, 4]);
/// assert_eq!(broadcast_shape(&[3, 4], 4).unwrap(), vec![4]);
/// assert!(broadcast_shape(&[5], 12).is_err());
/// ```
///
/// # Errors
/// Returns [`SelectionError::BroadcastError`] if no such shape exists.
pub fn broadcast_shape(shape: &[u64], element_count: u64) -> Result<ArrayShape, SelectionError> {
    let num_elements: u64 = shape.iter().product();
    let broadcast_error = || SelectionError::BroadcastError {
        shape: shape.to_vec(),
        element_count,
    };

    if element_count == num_elements {
        Ok(shape.to_vec())
    } else if element_count > num_elements {
        if num_elements == 0 || element_count % num_elements != 0 {
            return Err(broadcast_error());
        }
        let mut broadcast = Vec::with_capacity(shape.len() + 1);
        broadcast.push(element_count / num_elements);
        broadcast.extend_from_slice(shape);
        Ok(broadcast)
    } else if element_count == 1 {
        Ok(vec![1])
    } else {
        (1..shape.len())
            .map(|leading| &shape[leading..])
            .rev()
            .find(|trailing| trailing.iter().product::<u64>() == element_count)
            .map(<[u64]>::to_vec)
            .ok_or_else(broadcast_error)
    }
}

/// Returns true if an array with shape `source` can be broadcast to `target`.
///
/// Shapes are aligned on their trailing dimensions, and each `source` dimension must equal the `target` dimension or be 1.
#[must_use]
pub fn broadcasts_to(source: &[u64], target: &[u64]) -> bool {
    source.len() <= target.len()
        && std::iter::zip(source.iter().rev(), target.iter().rev())
            .all(|(source, target)| source == target || *source == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_shape_examples() {
        assert_eq!(broadcast_shape(&[3, 4], 12), Ok(vec![3, 4]));
        assert_eq!(broadcast_shape(&[4], 12), Ok(vec![3, 4]));
        assert_eq!(
            broadcast_shape(&[5], 12),
            Err(SelectionError::BroadcastError {
                shape: vec![5],
                element_count: 12
            })
        );
    }

    #[test]
    fn broadcast_shape_smaller() {
        assert_eq!(broadcast_shape(&[2, 3, 4], 12), Ok(vec![3, 4]));
        assert_eq!(broadcast_shape(&[2, 3, 4], 4), Ok(vec![4]));
        assert_eq!(broadcast_shape(&[2, 3, 4], 1), Ok(vec![1]));
        assert!(broadcast_shape(&[2, 3, 4], 6).is_err());
        assert!(broadcast_shape(&[0], 3).is_err());
    }

    #[test]
    fn broadcasts_to_shapes() {
        assert!(broadcasts_to(&[4], &[3, 4]));
        assert!(broadcasts_to(&[1], &[3, 4]));
        assert!(broadcasts_to(&[1, 4], &[3, 4]));
        assert!(broadcasts_to(&[3, 4], &[3, 4]));
        assert!(!broadcasts_to(&[3, 4], &[4]));
        assert!(!broadcasts_to(&[3], &[3, 4]));
    }
}
