#![allow(missing_docs)]

use chunkstore_selection::{
    broadcast_shape, is_full_extent, paginate, parse, shape_of, DimSelection, Selection,
    SelectionError, SelectionRequest,
};

/// Compute the shape of a range-only expression by hand.
fn hand_shape(bounds: &[(u64, u64, u64)]) -> Vec<u64> {
    bounds
        .iter()
        .map(|(start, stop, stride)| (stop - start + stride - 1) / stride)
        .collect()
}

#[test]
fn parse_then_shape_matches_hand_computed() -> Result<(), Box<dyn std::error::Error>> {
    let dims = [60, 60];
    for &(a, b) in &[
        ((0, 60, 1), (0, 60, 1)),
        ((3, 7, 1), (3, 7, 3)),
        ((44, 52, 1), (48, 52, 1)),
        ((1, 60, 7), (59, 60, 1)),
        ((0, 1, 1), (5, 55, 10)),
    ] {
        let expr = format!("[{}:{}:{}, {}:{}:{}]", a.0, a.1, a.2, b.0, b.1, b.2);
        let selection = parse(&expr, &dims)?;
        assert_eq!(shape_of(&selection)?, hand_shape(&[a, b]), "{expr}");
    }
    Ok(())
}

#[test]
fn shape_of_examples() {
    #[rustfmt::skip]
    let cases = [
        (vec![DimSelection::range(3, 7, 1)], vec![4]),
        (vec![DimSelection::range(3, 7, 3)], vec![2]),
        (vec![DimSelection::range(44, 52, 1), DimSelection::range(48, 52, 1)], vec![8, 4]),
        (vec![DimSelection::Coords(vec![1, 2, 7])], vec![3]),
    ];
    for (selection, shape) in cases {
        assert_eq!(shape_of(&Selection::new(selection)).unwrap(), shape);
    }
}

#[test]
fn broadcast_shape_examples() {
    assert_eq!(broadcast_shape(&[3, 4], 12).unwrap(), vec![3, 4]);
    assert_eq!(broadcast_shape(&[4], 12).unwrap(), vec![3, 4]);
    assert!(matches!(
        broadcast_shape(&[5], 12),
        Err(SelectionError::BroadcastError { .. })
    ));
}

#[test]
fn full_extent_detection() -> Result<(), Box<dyn std::error::Error>> {
    let dims = [8, 8];
    assert!(is_full_extent(&parse("", &dims)?, &dims));
    assert!(is_full_extent(&parse("[:, 0:8]", &dims)?, &dims));
    assert!(!is_full_extent(&parse("[:, 0:8:2]", &dims)?, &dims));
    assert!(!is_full_extent(&parse("[[0,1,2,3,4,5,6,7], :]", &dims)?, &dims));
    Ok(())
}

#[test]
fn pagination_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let dims = [40, 12, 6];
    let item_size = 4;
    for expr in [
        "[:, :, :]",
        "[5:37:3, 2:11:4, 1]",
        "[7, [0,3,5,11,2], [5,4,3,2,1]]",
        "[[39,0,20], 0:12:5, :]",
    ] {
        let selection = parse(expr, &dims)?;
        let expected: Vec<Vec<u64>> = selection
            .indices()?
            .into_iter()
            .map(|indices| indices.to_vec())
            .collect();
        let bytes = expected.len() as u64 * item_size;
        for budget in [item_size, item_size + 1, 64, 333, bytes / 2, bytes] {
            let pages = paginate(&selection, &dims, item_size, budget)?;
            let mut paged = Vec::new();
            for page in &pages {
                assert_eq!(page.dimensionality(), selection.dimensionality());
                paged.extend(page.indices()?.into_iter().map(|indices| indices.to_vec()));
            }
            assert_eq!(paged, expected, "{expr} with budget {budget}");
        }
    }
    Ok(())
}

#[test]
fn pagination_idempotent_with_large_budget() -> Result<(), Box<dyn std::error::Error>> {
    let dims = [40, 12];
    let selection = parse("[1:39:2, [3,1,4,1,5]]", &dims)?;
    let bytes = selection.num_elements()? * 8;
    assert_eq!(paginate(&selection, &dims, 8, bytes)?, vec![selection.clone()]);
    assert_eq!(
        paginate(&selection, &dims, 8, bytes * 10)?,
        vec![selection]
    );
    Ok(())
}

#[test]
fn iterator_order() -> Result<(), Box<dyn std::error::Error>> {
    let selection = parse("[0:3, 0:2]", &[3, 2])?;
    let indices: Vec<(u64, u64)> = selection
        .indices()?
        .into_iter()
        .map(|indices| (indices[0], indices[1]))
        .collect();
    assert_eq!(indices, vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]);
    Ok(())
}

#[test]
fn wire_form_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let dims = [10, 20, 30];
    for expr in ["[0:10,[1,3],2:8:2]", "[4:5,0:20,[29,0]]", "[1:9:4,3:4,0:30:29]"] {
        let selection = parse(expr, &dims)?;
        assert_eq!(selection.to_string(), expr);
        assert_eq!(parse(&selection.to_string(), &dims)?, selection);
    }
    Ok(())
}

#[test]
fn structured_request_equivalence() -> Result<(), Box<dyn std::error::Error>> {
    let dims = [10, 10];
    let structured: SelectionRequest =
        serde_json::from_str(r#"{"start": [0, 2], "stop": [10, 9], "step": [3, 1]}"#)?;
    let expression: SelectionRequest = serde_json::from_str(r#""[0:10:3, 2:9]""#)?;
    assert_eq!(
        structured.to_selection(&dims)?,
        expression.to_selection(&dims)?
    );
    Ok(())
}
