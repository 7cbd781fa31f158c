use thiserror::Error;

use crate::convert::ConversionError;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("storage holds {got} elements but shape {shape:?} needs {expected}")]
    StorageLength {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: String, got: String },
    #[error("element index {index} out of range for tensor with {numel} elements")]
    IndexOutOfRange { index: usize, numel: usize },
    #[error("{0}")]
    SliceSyntax(String),
    #[error("{0}")]
    SliceRange(String),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("out of memory: cannot allocate {elements} elements of {dtype}")]
    OutOfMemory { dtype: String, elements: usize },
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
