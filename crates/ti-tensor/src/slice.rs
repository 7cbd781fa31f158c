//! Multi-axis slice expressions such as `0,1,:5` or `:,:,0`.
//!
//! Only three selector forms exist: an integer index (negative counts from the
//! end), a `start:stop` range with either bound optional, and an empty
//! selector for the whole axis. Nothing else is evaluated.

use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::tensor::{cartesian_offsets, Tensor};

const SYNTAX_EXAMPLES: &str = "accepted forms:\n\
- single index: 0\n\
- several axes: 0,1,2\n\
- ranges: :10 or 5: or 2:8\n\
- combined: 0,1,:5";

const RANGE_EXAMPLES: &str = "examples:\n\
- one axis: 0 or 1\n\
- several axes: 0,1 or 0,1,:5\n\
- whole axis: use :, e.g. :,:,0";

/// Selection along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// A single position; the axis is dropped from the result.
    Index(i64),
    /// A half-open range; bounds clamp like Python slices.
    Range { start: Option<i64>, stop: Option<i64> },
    /// The whole axis.
    Full,
}

/// A parsed slice expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceSpec {
    selectors: Vec<Selector>,
}

impl SliceSpec {
    /// Parse a comma-separated list of selectors.
    pub fn parse(spec: &str) -> Result<SliceSpec> {
        if spec.trim().is_empty() {
            return Err(syntax_error(spec));
        }
        let selectors = spec
            .split(',')
            .map(|part| parse_selector(part.trim()).ok_or_else(|| syntax_error(spec)))
            .collect::<Result<Vec<_>>>()?;
        Ok(SliceSpec { selectors })
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    /// Apply the selection. Axes beyond the expression are selected whole.
    ///
    /// # Errors
    /// `SliceRange` when there are more selectors than axes or an index falls
    /// outside its axis. The message carries the tensor's shape.
    pub fn apply(&self, tensor: &Tensor) -> Result<Tensor> {
        let shape = tensor.shape();
        if self.selectors.len() > shape.ndim() {
            return Err(range_error(
                shape,
                &format!(
                    "{} indices given but the array has {} dimension(s)",
                    self.selectors.len(),
                    shape.ndim()
                ),
            ));
        }

        let mut axes = Vec::with_capacity(shape.ndim());
        let mut out_dims = Vec::with_capacity(shape.ndim());
        for (axis, &dim) in shape.dims().iter().enumerate() {
            let selector = self.selectors.get(axis).copied().unwrap_or(Selector::Full);
            match selector {
                Selector::Index(i) => {
                    let resolved = resolve_index(i, dim).ok_or_else(|| {
                        range_error(
                            shape,
                            &format!(
                                "index {} is out of bounds for axis {} with size {}",
                                i, axis, dim
                            ),
                        )
                    })?;
                    axes.push(vec![resolved]);
                }
                Selector::Range { start, stop } => {
                    let (lo, hi) = clamp_range(start, stop, dim);
                    axes.push((lo..hi).collect());
                    out_dims.push(hi - lo);
                }
                Selector::Full => {
                    axes.push((0..dim).collect());
                    out_dims.push(dim);
                }
            }
        }

        let lens: Vec<usize> = axes.iter().map(|a| a.len()).collect();
        let indices = cartesian_offsets(&lens, |axis, p| axes[axis][p], &shape.strides(), 0)?;
        tensor.select(&indices, Shape::new(out_dims))
    }
}

fn parse_selector(part: &str) -> Option<Selector> {
    if part.is_empty() {
        return Some(Selector::Full);
    }
    match part.split_once(':') {
        None => parse_int(part).map(Selector::Index),
        Some((start, stop)) => {
            if stop.contains(':') {
                return None;
            }
            let bound = |s: &str| -> Option<Option<i64>> {
                let s = s.trim();
                if s.is_empty() {
                    Some(None)
                } else {
                    parse_int(s).map(Some)
                }
            };
            let start = bound(start)?;
            let stop = bound(stop)?;
            if start.is_none() && stop.is_none() {
                Some(Selector::Full)
            } else {
                Some(Selector::Range { start, stop })
            }
        }
    }
}

fn parse_int(s: &str) -> Option<i64> {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn resolve_index(i: i64, dim: usize) -> Option<usize> {
    let dim = i64::try_from(dim).ok()?;
    let resolved = if i < 0 { i + dim } else { i };
    if (0..dim).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

fn clamp_range(start: Option<i64>, stop: Option<i64>, dim: usize) -> (usize, usize) {
    let len = i64::try_from(dim).unwrap_or(i64::MAX);
    let clamp = |b: i64| -> usize {
        let b = if b < 0 { b.saturating_add(len) } else { b };
        b.clamp(0, len) as usize
    };
    let lo = start.map_or(0, clamp);
    let hi = stop.map_or(dim, clamp);
    (lo, hi.max(lo))
}

fn syntax_error(spec: &str) -> TensorError {
    TensorError::SliceSyntax(format!(
        "slice syntax error: '{}'\n\n{}",
        spec, SYNTAX_EXAMPLES
    ))
}

fn range_error(shape: &Shape, reason: &str) -> TensorError {
    TensorError::SliceRange(format!(
        "slice index error: {}\n\narray shape: {}\n{}",
        reason,
        shape.display_dims(),
        RANGE_EXAMPLES
    ))
}
