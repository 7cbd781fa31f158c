use ti_format::TensorEntry;
use ti_tensor::DType;

use crate::types::TensorFilter;

impl TensorFilter {
    /// Whether `entry` passes every predicate that is set.
    ///
    /// `key` is a case-insensitive substring. `shape` must be equal.
    /// `dtype` is an exact match when it names a dtype (`float32`), and a
    /// case-insensitive substring otherwise (`float`, `int`).
    ///
    /// An empty key, shape or dtype is no constraint, so an empty shape does
    /// not select scalars.
    pub fn matches(&self, entry: &TensorEntry) -> bool {
        if let Some(key) = self.key.as_deref().filter(|k| !k.is_empty()) {
            if !entry.key.to_lowercase().contains(&key.to_lowercase()) {
                return false;
            }
        }
        if let Some(shape) = self.shape.as_ref().filter(|s| !s.is_empty()) {
            if entry.shape.dims() != shape.as_slice() {
                return false;
            }
        }
        if let Some(dtype) = self.dtype.as_deref().filter(|d| !d.is_empty()) {
            let passes = match DType::from_name(dtype) {
                Some(wanted) => entry.dtype == wanted,
                None => entry
                    .dtype
                    .to_string()
                    .to_lowercase()
                    .contains(&dtype.trim().to_lowercase()),
            };
            if !passes {
                return false;
            }
        }
        true
    }
}
