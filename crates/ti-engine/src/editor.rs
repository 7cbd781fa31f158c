use ti_tensor::{parse_value, Shape, Tensor};

use crate::error::{EditFailure, EngineError, Result};
use crate::types::EditRequest;

/// Row-major element addressed by `(row, col)`.
///
/// Scalars only accept `(0, 0)`. Vectors use `row` and ignore `col`.
/// Matrices check both axes. Higher ranks address the flattened position
/// `row * last_dim + col`, which is not a true multi-axis address.
pub fn resolve_index(shape: &Shape, row: usize, col: usize) -> Option<usize> {
    let numel = shape.numel();
    match shape.dims() {
        [] => (row == 0 && col == 0).then_some(0),
        [n] => (row < *n).then_some(row),
        [rows, cols] => (row < *rows && col < *cols).then(|| row * cols + col),
        _ => {
            let last = shape.last_dim()?;
            let index = row.checked_mul(last)?.checked_add(col)?;
            (index < numel).then_some(index)
        }
    }
}

/// Apply `edits` in order to a copy of `tensor`.
///
/// The first edit whose value does not convert or whose position is out of
/// range aborts the batch; the error carries its 1-based index and position.
/// `tensor` itself is never modified.
pub fn apply_edits(tensor: &Tensor, edits: &[EditRequest]) -> Result<Tensor> {
    let mut edited = tensor.clone();
    let dtype = tensor.dtype();
    for (i, edit) in edits.iter().enumerate() {
        let fail = |reason: EditFailure| EngineError::Edit {
            index: i + 1,
            row: edit.row,
            col: edit.col,
            reason,
        };
        let value = parse_value(&edit.value, dtype).map_err(|e| fail(e.into()))?;
        let index = resolve_index(tensor.shape(), edit.row, edit.col).ok_or_else(|| {
            fail(EditFailure::OutOfRange {
                shape: tensor.shape().display_dims(),
            })
        })?;
        edited.set(index, &value)?;
    }
    Ok(edited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fixtures::tensor;
    use approx::assert_relative_eq;
    use ti_tensor::{ConversionKind, CpuStorage, DType, Element};

    #[test]
    fn test_resolve_index_by_rank() {
        let scalar = Shape::new(vec![]);
        assert_eq!(resolve_index(&scalar, 0, 0), Some(0));
        assert_eq!(resolve_index(&scalar, 0, 1), None);

        let vector = Shape::new(vec![5]);
        assert_eq!(resolve_index(&vector, 4, 99), Some(4));
        assert_eq!(resolve_index(&vector, 5, 0), None);

        let matrix = Shape::new(vec![2, 3]);
        assert_eq!(resolve_index(&matrix, 1, 2), Some(5));
        assert_eq!(resolve_index(&matrix, 0, 3), None);

        let cube = Shape::new(vec![2, 3, 4]);
        assert_eq!(resolve_index(&cube, 1, 2), Some(6));
        // col may run past the last axis as long as the flat index is valid
        assert_eq!(resolve_index(&cube, 0, 10), Some(10));
        assert_eq!(resolve_index(&cube, 5, 4), None);
        assert_eq!(resolve_index(&cube, usize::MAX, 1), None);
    }

    #[test]
    fn test_apply_edits_typed() {
        let t = tensor(CpuStorage::F32(vec![0.0; 6]), &[2, 3], DType::F32);
        let edited = apply_edits(
            &t,
            &[EditRequest::new(0, 1, "1.5"), EditRequest::new(1, 2, "-2e3")],
        )
        .unwrap();
        assert_relative_eq!(edited.element(1).unwrap().as_f64().unwrap(), 1.5);
        assert_relative_eq!(edited.element(5).unwrap().as_f64().unwrap(), -2000.0);
        assert_eq!(t.element(1), Some(Element::Float(0.0)));
    }

    #[test]
    fn test_decimal_point_into_int32() {
        let t = tensor(CpuStorage::I32(vec![1, 2, 3]), &[3], DType::I32);
        let err = apply_edits(&t, &[EditRequest::new(0, 0, "3.14")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueConversionError);
        assert_eq!(err.conversion_kind(), Some(ConversionKind::Precision));
        assert!(err.to_string().contains("decimal point"));
    }

    #[test]
    fn test_second_edit_failure_reports_position() {
        let t = tensor(CpuStorage::U8(vec![0; 4]), &[2, 2], DType::U8);
        let err = apply_edits(
            &t,
            &[EditRequest::new(0, 0, "7"), EditRequest::new(1, 1, "300")],
        )
        .unwrap_err();
        match &err {
            EngineError::Edit { index, row, col, .. } => {
                assert_eq!((*index, *row, *col), (2, 1, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err.conversion_kind(), Some(ConversionKind::Range));
        assert!(err.to_string().contains("255"));
    }

    #[test]
    fn test_out_of_range_position() {
        let t = tensor(CpuStorage::Bool(vec![false; 3]), &[3], DType::Bool);
        let err = apply_edits(&t, &[EditRequest::new(3, 0, "yes")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
        assert!(err.to_string().contains("3"));
    }

    #[test]
    fn test_bool_vocabulary_and_strings() {
        let t = tensor(CpuStorage::Bool(vec![false; 2]), &[2], DType::Bool);
        let edited = apply_edits(&t, &[EditRequest::new(1, 0, "Y")]).unwrap();
        assert_eq!(edited.element(1), Some(Element::Bool(true)));
        let err = apply_edits(&t, &[EditRequest::new(0, 0, "maybe")]).unwrap_err();
        assert_eq!(err.conversion_kind(), Some(ConversionKind::Vocabulary));

        let s = Tensor::from_bytes(
            DType::Unicode(3),
            Shape::new(vec![1]),
            &[0u8; 12],
            ti_tensor::ByteOrder::Little,
        )
        .unwrap();
        let edited = apply_edits(&s, &[EditRequest::new(0, 0, "abc")]).unwrap();
        assert_eq!(edited.element(0), Some(Element::Text("abc".into())));
    }
}
