//! Bounded nested-list previews of tensors.
//!
//! Rank >= 3 tensors are viewed as `(prod(leading dims), last dim)` before the
//! rank-2 rule applies. That projection keeps row-major order but does not
//! show the true multi-axis structure beyond the first two effective axes.

use crate::element::Nested;
use crate::tensor::Tensor;

pub const DEFAULT_MAX_ROWS: usize = 100;
pub const DEFAULT_MAX_COLS: usize = 20;

/// Render the leading `max_rows` x `max_cols` corner of `tensor`.
///
/// - rank 0: `[[scalar]]`
/// - rank 1: the first `max_rows` elements
/// - rank 2 and up: the first `max_rows` rows, each cut to `max_cols`
///
/// Never fails: if an element cannot be read the preview is empty.
pub fn preview(tensor: &Tensor, max_rows: usize, max_cols: usize) -> Nested {
    try_preview(tensor, max_rows, max_cols).unwrap_or_else(Nested::empty)
}

fn try_preview(tensor: &Tensor, max_rows: usize, max_cols: usize) -> Option<Nested> {
    let dims = tensor.shape().dims();
    match dims.len() {
        0 => {
            let scalar = tensor.element(0)?;
            Some(Nested::List(vec![Nested::List(vec![Nested::Scalar(scalar)])]))
        }
        1 => {
            let n = dims[0].min(max_rows);
            let row = leaf_row(tensor, 0, n)?;
            Some(Nested::List(row))
        }
        _ => {
            let (rows, cols) = tensor.shape().fold_last();
            let shown = cols.min(max_cols);
            let mut out = Vec::with_capacity(rows.min(max_rows));
            for r in 0..rows.min(max_rows) {
                out.push(Nested::List(leaf_row(tensor, r * cols, shown)?));
            }
            Some(Nested::List(out))
        }
    }
}

fn leaf_row(tensor: &Tensor, start: usize, len: usize) -> Option<Vec<Nested>> {
    (start..start + len)
        .map(|i| tensor.element(i).map(Nested::Scalar))
        .collect::<Option<Vec<_>>>()
}
