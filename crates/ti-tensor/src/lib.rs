//! `ti-tensor` - Canonical tensor model for tensor-inspector.
//!
//! This crate provides:
//! - A closed `DType` enumeration covering numpy and PyTorch element types
//! - A `Tensor` type backed by typed CPU storage
//! - `describe`, which turns a tensor into a `TensorDescriptor` with stats
//! - Bounded previews and a small slice-expression language
//! - Checked conversion of user-supplied literals into typed elements

pub mod convert;
pub mod dtype;
pub mod element;
pub mod error;
pub mod preview;
pub mod shape;
pub mod slice;
pub mod stats;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use convert::{parse_value, ConversionError, ConversionKind};
pub use dtype::{ByteOrder, DType};
pub use element::{Element, Nested};
pub use error::{Result, TensorError};
pub use preview::preview;
pub use shape::Shape;
pub use slice::{SliceSpec, Selector};
pub use stats::{describe, Stats, TensorDescriptor};
pub use storage::CpuStorage;
pub use tensor::Tensor;
