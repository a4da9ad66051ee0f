use crate::{selection::OutputAxis, DimSelection, Selection, SelectionError};

/// Split `selection` into pages of at most `max_bytes` bytes, where each element has `item_size` bytes.
///
/// A selection within the budget is returned unchanged as a single page.
/// Otherwise the first output dimension that selects more than one element is split into
/// `floor(bytes / max_bytes) + 1` pages of `max(1, floor(span / page_count))` indices each.
/// Page boundaries of a strided range are aligned to the stride relative to the range start, and the last page is clipped to the range stop.
/// Zipped coordinate lists are sliced together into contiguous sub-lists.
/// All other dimensions are reused unchanged.
///
/// Concatenating the coordinates of each page, in page order, reproduces the coordinates of `selection`.
///
/// # Errors
/// Returns [`SelectionError::RankMismatch`] if the selection rank does not match `dims`.
/// Returns [`SelectionError::ShapeMismatch`] if the coordinate lists have different lengths.
/// Returns [`SelectionError::NotPaginatable`] if the selection exceeds the budget but no dimension selects more than one element, the budget is zero,
/// or the byte size of the selection overflows a `u64`.
pub fn paginate(
    selection: &Selection,
    dims: &[u64],
    item_size: u64,
    max_bytes: u64,
) -> Result<Vec<Selection>, SelectionError> {
    if selection.dimensionality() != dims.len() {
        return Err(SelectionError::rank_mismatch(
            selection.dimensionality(),
            dims.len(),
        ));
    }
    let axes = selection.output_axes()?;
    let Some(bytes) = axes
        .iter()
        .map(OutputAxis::len)
        .try_fold(item_size, u64::checked_mul)
    else {
        return Err(SelectionError::NotPaginatable {
            selection: selection.to_string(),
            bytes: u64::MAX,
            max_bytes,
        });
    };
    if bytes <= max_bytes {
        log::debug!("paginate: {selection} is {bytes} bytes, pagination not needed");
        return Ok(vec![selection.clone()]);
    }

    let not_paginatable = || SelectionError::NotPaginatable {
        selection: selection.to_string(),
        bytes,
        max_bytes,
    };
    if max_bytes == 0 {
        return Err(not_paginatable());
    }
    let axis = axes
        .into_iter()
        .find(|axis| axis.len() > 1)
        .ok_or_else(not_paginatable)?;

    let page_count = bytes / max_bytes + 1;
    let pages = match axis {
        OutputAxis::Range { dim, .. } => {
            let DimSelection::Range {
                start,
                stop,
                stride,
            } = selection[dim]
            else {
                return Err(axis_mismatch(selection, dim));
            };
            let page_extent = ((stop - start) / page_count).max(1);
            log::debug!(
                "paginate: dimension {dim} into {page_count} pages with extent {page_extent}"
            );
            range_pages(start, stop, stride, page_extent)
                .map(|page| with_dims(selection, &[dim], |_| page.clone()))
                .collect()
        }
        OutputAxis::Coords { dims: coordinate_dims, len } => {
            if let Some(&dim) = coordinate_dims
                .iter()
                .find(|&&dim| !matches!(selection[dim], DimSelection::Coords(_)))
            {
                return Err(axis_mismatch(selection, dim));
            }
            let page_extent = (len / page_count).max(1);
            log::debug!(
                "paginate: coordinate dimensions {coordinate_dims:?} into {page_count} pages with extent {page_extent}"
            );
            (0..len)
                .step_by(crate::u64_to_usize(page_extent))
                .map(|page_start| {
                    let page_stop = (page_start + page_extent).min(len);
                    with_dims(selection, &coordinate_dims, |dim_selection| match dim_selection {
                        DimSelection::Coords(coords) => DimSelection::Coords(
                            coords[crate::u64_to_usize(page_start)..crate::u64_to_usize(page_stop)]
                                .to_vec(),
                        ),
                        DimSelection::Range { .. } => dim_selection.clone(),
                    })
                })
                .collect()
        }
    };
    Ok(pages)
}

fn axis_mismatch(selection: &Selection, dim: usize) -> SelectionError {
    SelectionError::malformed(
        selection.to_string(),
        format!("output axis does not match the selection of dimension {dim}"),
    )
}

/// Return the stride aligned pages of a range.
fn range_pages(
    start: u64,
    stop: u64,
    stride: u64,
    page_extent: u64,
) -> impl Iterator<Item = DimSelection> {
    let mut page_start = start;
    std::iter::from_fn(move || {
        if page_start >= stop {
            return None;
        }
        let page_stop = (page_start + page_extent - start)
            .next_multiple_of(stride)
            .saturating_add(start)
            .min(stop);
        let page = DimSelection::range(page_start, page_stop, stride);
        page_start = page_stop;
        Some(page)
    })
}

/// Copy `selection`, replacing the dimensions in `dims` with `f(dim_selection)`.
fn with_dims(
    selection: &Selection,
    dims: &[usize],
    f: impl Fn(&DimSelection) -> DimSelection,
) -> Selection {
    Selection::new(
        selection
            .iter()
            .enumerate()
            .map(|(dim, dim_selection)| {
                if dims.contains(&dim) {
                    f(dim_selection)
                } else {
                    dim_selection.clone()
                }
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn coordinates(selection: &Selection) -> Vec<Vec<u64>> {
        selection
            .indices()
            .unwrap()
            .into_iter()
            .map(|indices| indices.to_vec())
            .collect()
    }

    fn assert_round_trip(selection: &Selection, dims: &[u64], item_size: u64, max_bytes: u64) {
        let pages = paginate(selection, dims, item_size, max_bytes).unwrap();
        let paged = pages.iter().flat_map(coordinates).collect::<Vec<_>>();
        assert_eq!(paged, coordinates(selection), "{selection} {max_bytes}");
    }

    #[test]
    fn paginate_not_needed() {
        let dims = [100, 100];
        let selection = parse("[0:10, 0:10]", &dims).unwrap();
        assert_eq!(
            paginate(&selection, &dims, 8, 800).unwrap(),
            vec![selection.clone()]
        );
        assert_eq!(
            paginate(&selection, &dims, 8, u64::MAX).unwrap(),
            vec![selection]
        );
    }

    #[test]
    fn paginate_range() {
        let dims = [100, 10];
        let selection = parse("[0:100, 0:10]", &dims).unwrap();
        // 8000 bytes into 4000 byte pages: page_count 3, page_extent 33
        let pages = paginate(&selection, &dims, 8, 4000).unwrap();
        assert_eq!(
            pages.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["[0:33,0:10]", "[33:66,0:10]", "[66:99,0:10]", "[99:100,0:10]"]
        );
        assert_round_trip(&selection, &dims, 8, 4000);
    }

    #[test]
    fn paginate_strided_range() {
        let dims = [100];
        let selection = parse("[3:50:4]", &dims).unwrap();
        let pages = paginate(&selection, &dims, 1, 5).unwrap();
        for page in &pages {
            let DimSelection::Range { start, stride, .. } = page[0] else {
                panic!()
            };
            assert_eq!((start - 3) % 4, 0);
            assert_eq!(stride, 4);
        }
        assert_eq!(
            pages,
            vec![
                parse("[3:19:4]", &dims).unwrap(),
                parse("[19:35:4]", &dims).unwrap(),
                parse("[35:50:4]", &dims).unwrap(),
            ]
        );
        assert_round_trip(&selection, &dims, 1, 5);
    }

    #[test]
    fn paginate_skips_length_one_dimensions() {
        let dims = [10, 100];
        let selection = parse("[4, 0:100]", &dims).unwrap();
        let pages = paginate(&selection, &dims, 4, 100).unwrap();
        assert!(pages.len() > 1);
        assert!(pages.iter().all(|page| page[0] == DimSelection::index(4)));
        assert_round_trip(&selection, &dims, 4, 100);
    }

    #[test]
    fn paginate_coordinates() {
        let dims = [10, 10, 10];
        let selection = parse("[[9,1,5,3,7], 2:4, [0,1,2,3,4]]", &dims).unwrap();
        // 80 bytes into 50 byte pages: page_count 2, page_extent 2
        let pages = paginate(&selection, &dims, 8, 50).unwrap();
        assert_eq!(
            pages.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec![
                "[[9,1],2:4,[0,1]]",
                "[[5,3],2:4,[2,3]]",
                "[[7],2:4,[4]]"
            ]
        );
        assert_round_trip(&selection, &dims, 8, 50);
        assert_round_trip(&selection, &dims, 8, 40);
    }

    #[test]
    fn paginate_round_trip_budgets() {
        let dims = [20, 30, 5];
        for expr in ["[0:20, 1:30:3, :]", "[2, [4,8,15,16,23,29], 1:5:2]", "[5:17:5, 0:30:7, [0,4]]"] {
            let selection = parse(expr, &dims).unwrap();
            let bytes = selection.num_elements().unwrap() * 2;
            for max_bytes in [2, 3, 16, 100, bytes - 1, bytes] {
                assert_round_trip(&selection, &dims, 2, max_bytes);
            }
        }
    }

    #[test]
    fn paginate_errors() {
        let dims = [10, 10];
        let selection = parse("[1, 2]", &dims).unwrap();
        assert!(matches!(
            paginate(&selection, &dims, 16, 8),
            Err(SelectionError::NotPaginatable { .. })
        ));
        let selection = parse("[:, :]", &dims).unwrap();
        assert!(matches!(
            paginate(&selection, &dims, 1, 0),
            Err(SelectionError::NotPaginatable { .. })
        ));
        assert_eq!(
            paginate(&selection, &[10], 1, 10),
            Err(SelectionError::rank_mismatch(2, 1))
        );
    }

    #[test]
    fn paginate_byte_count_overflow() -> Result<(), Box<dyn std::error::Error>> {
        let dims = [u64::MAX / 2, 4];
        let selection = Selection::full_extent(&dims);
        assert!(matches!(
            paginate(&selection, &dims, 8, 1024),
            Err(SelectionError::NotPaginatable { bytes: u64::MAX, .. })
        ));
        let dims = [4];
        let selection = Selection::full_extent(&dims);
        assert!(matches!(
            paginate(&selection, &dims, u64::MAX, 1024),
            Err(SelectionError::NotPaginatable { bytes: u64::MAX, .. })
        ));
        Ok(())
    }
}
