use ti_tensor::Tensor;

use crate::error::{EngineError, Result};
use crate::types::{PlotSeries, PlotType};

/// Largest `s` with `s * s <= n`.
fn isqrt(n: usize) -> usize {
    let mut s = (n as f64).sqrt() as usize;
    while s > 0 && s.saturating_mul(s) > n {
        s -= 1;
    }
    while (s + 1).saturating_mul(s + 1) <= n {
        s += 1;
    }
    s
}

fn plot_value(tensor: &Tensor, index: usize) -> f64 {
    tensor
        .element(index)
        .and_then(|e| e.plot_value())
        .unwrap_or(f64::NAN)
}

/// Rows and columns of the matrix a tensor is drawn as.
///
/// Vectors become one row for heatmaps and the largest square that fits
/// for images. Rank > 2 folds into `(shape[0], rest)`.
fn matrix_dims(tensor: &Tensor, plot_type: PlotType) -> (usize, usize) {
    match tensor.shape().dims() {
        [n] if plot_type == PlotType::Image => {
            let side = isqrt(*n);
            (side, side)
        }
        [n] => (1, *n),
        _ => tensor.shape().fold_first(),
    }
}

/// Build one plot series from `tensor`.
///
/// Line, bar, scatter and histogram series carry the first `max_points`
/// flattened values against their positions. Heatmap and image series carry
/// the top-left `max_side` × `max_side` block. Bools plot as 0/1 and complex
/// values as their magnitude.
pub fn build_series(
    tensor: &Tensor,
    name: &str,
    plot_type: PlotType,
    max_points: usize,
    max_side: usize,
) -> Result<PlotSeries> {
    let dtype = tensor.dtype();
    if dtype.is_opaque() {
        return Err(EngineError::InvalidArgument(format!(
            "cannot plot '{}': {} is not a numeric dtype",
            name, dtype
        )));
    }

    if !plot_type.is_matrix() {
        let n = tensor.numel().min(max_points);
        return Ok(PlotSeries::Xy {
            name: name.to_string(),
            x: (0..n).collect(),
            y: (0..n).map(|i| plot_value(tensor, i)).collect(),
        });
    }

    let (rows, cols) = matrix_dims(tensor, plot_type);
    let z = (0..rows.min(max_side))
        .map(|r| {
            (0..cols.min(max_side))
                .map(|c| plot_value(tensor, r * cols + c))
                .collect()
        })
        .collect();
    Ok(PlotSeries::Matrix {
        name: name.to_string(),
        z,
    })
}

/// `"Heatmap - a, b"`.
pub fn default_title(plot_type: PlotType, keys: &[&str]) -> String {
    let name = plot_type.as_str();
    let mut chars = name.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    };
    format!("{} - {}", capitalized, keys.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::tensor;
    use approx::assert_relative_eq;
    use ti_tensor::{CpuStorage, DType};

    fn z_of(series: PlotSeries) -> Vec<Vec<f64>> {
        match series {
            PlotSeries::Matrix { z, .. } => z,
            other => panic!("expected a matrix, got {:?}", other),
        }
    }

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(10_000), 100);
    }

    #[test]
    fn test_line_is_bounded() {
        let t = tensor(CpuStorage::F32(vec![1.0; 25_000]), &[5, 5000], DType::F32);
        match build_series(&t, "w", PlotType::Line, 10_000, 100).unwrap() {
            PlotSeries::Xy { x, y, .. } => {
                assert_eq!(x.len(), 10_000);
                assert_eq!(y.len(), 10_000);
                assert_eq!(x[9_999], 9_999);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_heatmap_folds_and_clips() {
        let t = tensor(
            CpuStorage::I64((0..2 * 3 * 200).collect()),
            &[2, 3, 200],
            DType::I64,
        );
        let z = z_of(build_series(&t, "cube", PlotType::Heatmap, 10_000, 100).unwrap());
        assert_eq!(z.len(), 2);
        assert_eq!(z[0].len(), 100);
        assert_relative_eq!(z[1][0], 600.0);

        let v = tensor(CpuStorage::F64(vec![1.0, 2.0, 3.0]), &[3], DType::F64);
        let z = z_of(build_series(&v, "v", PlotType::Heatmap, 10_000, 100).unwrap());
        assert_eq!(z, vec![vec![1.0, 2.0, 3.0]]);
    }

    #[test]
    fn test_image_from_vector_uses_largest_square() {
        let v = tensor(CpuStorage::U8((0..10).collect()), &[10], DType::U8);
        let z = z_of(build_series(&v, "v", PlotType::Image, 10_000, 100).unwrap());
        assert_eq!(z, vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0], vec![6.0, 7.0, 8.0]]);
    }

    #[test]
    fn test_bool_and_complex_values() {
        let b = tensor(CpuStorage::Bool(vec![true, false]), &[2], DType::Bool);
        match build_series(&b, "b", PlotType::Bar, 10, 10).unwrap() {
            PlotSeries::Xy { y, .. } => assert_eq!(y, vec![1.0, 0.0]),
            other => panic!("unexpected {:?}", other),
        }
        let c = Tensor::from_bytes(
            DType::C128,
            ti_tensor::Shape::new(vec![1]),
            &[3.0f64.to_le_bytes(), 4.0f64.to_le_bytes()].concat(),
            ti_tensor::ByteOrder::Little,
        )
        .unwrap();
        match build_series(&c, "c", PlotType::Scatter, 10, 10).unwrap() {
            PlotSeries::Xy { y, .. } => assert_relative_eq!(y[0], 5.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_strings_are_rejected() {
        let s = Tensor::from_bytes(
            DType::Bytes(2),
            ti_tensor::Shape::new(vec![1]),
            b"ab",
            ti_tensor::ByteOrder::Little,
        )
        .unwrap();
        assert!(build_series(&s, "s", PlotType::Line, 10, 10).is_err());
    }

    #[test]
    fn test_default_title() {
        assert_eq!(default_title(PlotType::Histogram, &["a", "b"]), "Histogram - a, b");
    }
}
