use serde::Serialize;

use crate::dtype::DType;
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Summary statistics of a numeric tensor, computed in `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation (ddof = 0).
    pub std: f64,
}

/// Canonical, format-independent description of one tensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TensorDescriptor {
    pub key: String,
    pub shape: Vec<usize>,
    pub dtype: String,
    pub element_count: usize,
    pub byte_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
}

impl TensorDescriptor {
    /// Descriptor built from header metadata alone; never carries stats.
    pub fn metadata_only(key: &str, shape: &Shape, dtype: DType) -> Self {
        TensorDescriptor {
            key: key.to_string(),
            shape: shape.dims().to_vec(),
            dtype: dtype.to_string(),
            element_count: shape.numel(),
            byte_size: shape.numel().saturating_mul(dtype.size_in_bytes()),
            stats: None,
        }
    }
}

/// Describe a materialized tensor.
///
/// Shape, dtype and sizes come from the tensor's own metadata. Stats are
/// attempted for integer and float dtypes only and are `None` for empty
/// tensors.
pub fn describe(tensor: &Tensor, key: &str) -> TensorDescriptor {
    let mut desc = TensorDescriptor::metadata_only(key, tensor.shape(), tensor.dtype());
    desc.stats = compute_stats(tensor);
    desc
}

/// NaN-propagating min/max, IEEE mean and population std.
pub fn compute_stats(tensor: &Tensor) -> Option<Stats> {
    if !tensor.dtype().is_numeric() || tensor.numel() == 0 {
        return None;
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0f64;
    let mut count = 0usize;
    let numeric = tensor.storage().for_each_f64(|_, x| {
        if x.is_nan() || min.is_nan() {
            min = f64::NAN;
            max = f64::NAN;
        } else {
            min = min.min(x);
            max = max.max(x);
        }
        sum += x;
        count += 1;
    });
    if !numeric || count == 0 {
        return None;
    }
    let mean = sum / count as f64;

    let mut sq = 0.0f64;
    tensor.storage().for_each_f64(|_, x| {
        let d = x - mean;
        sq += d * d;
    });
    let std = (sq / count as f64).sqrt();

    Some(Stats {
        min,
        max,
        mean,
        std,
    })
}
