use serde::Serialize;
use thiserror::Error;

use ti_format::FormatError;
use ti_tensor::{ConversionError, ConversionKind, TensorError};

/// Why a single edit of a batch could not be applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditFailure {
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("position is outside the array of shape {shape}")]
    OutOfRange { shape: String },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("edit {index} at [{row}, {col}] failed: {reason}")]
    Edit {
        /// 1-based position in the request.
        index: usize,
        row: usize,
        col: usize,
        reason: EditFailure,
    },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} export is rendered outside the engine")]
    ExternalExport(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Stable tag identifying the class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    #[serde(rename = "IOError")]
    IoError,
    KeyNotFound,
    KeyCollision,
    SliceSyntaxError,
    SliceRangeError,
    ValueConversionError,
    IndexOutOfRange,
    UnsupportedWrite,
    OutOfMemory,
    InvalidFile,
    InvalidQuery,
    InvalidArgument,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::IoError => "IOError",
            ErrorKind::KeyNotFound => "KeyNotFound",
            ErrorKind::KeyCollision => "KeyCollision",
            ErrorKind::SliceSyntaxError => "SliceSyntaxError",
            ErrorKind::SliceRangeError => "SliceRangeError",
            ErrorKind::ValueConversionError => "ValueConversionError",
            ErrorKind::IndexOutOfRange => "IndexOutOfRange",
            ErrorKind::UnsupportedWrite => "UnsupportedWrite",
            ErrorKind::OutOfMemory => "OutOfMemory",
            ErrorKind::InvalidFile => "InvalidFile",
            ErrorKind::InvalidQuery => "InvalidQuery",
            ErrorKind::InvalidArgument => "InvalidArgument",
        }
    }
}

/// Structured failure handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub kind: ErrorKind,
    /// Sub-kind of a `ValueConversionError`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion: Option<ConversionKind>,
    pub message: String,
}

fn tensor_kind(e: &TensorError) -> ErrorKind {
    match e {
        TensorError::SliceSyntax(_) => ErrorKind::SliceSyntaxError,
        TensorError::SliceRange(_) => ErrorKind::SliceRangeError,
        TensorError::Conversion(_) => ErrorKind::ValueConversionError,
        TensorError::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
        TensorError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
        TensorError::UnsupportedDType(_) => ErrorKind::UnsupportedFormat,
        TensorError::StorageLength { .. } => ErrorKind::InvalidFile,
        TensorError::ShapeMismatch { .. }
        | TensorError::DTypeMismatch { .. }
        | TensorError::Other(_) => ErrorKind::InvalidArgument,
    }
}

fn format_kind(e: &FormatError) -> ErrorKind {
    match e {
        e if e.is_io() => ErrorKind::IoError,
        FormatError::UnsupportedFormat(_) | FormatError::UnsupportedDType(_) => {
            ErrorKind::UnsupportedFormat
        }
        FormatError::UnsupportedWrite(_) => ErrorKind::UnsupportedWrite,
        FormatError::KeyCollision(_) => ErrorKind::KeyCollision,
        FormatError::KeyNotFound(_) => ErrorKind::KeyNotFound,
        FormatError::OutOfMemory(_) => ErrorKind::OutOfMemory,
        FormatError::Io(_)
        | FormatError::InvalidMagic(_)
        | FormatError::InvalidHeader(_)
        | FormatError::Pickle(_)
        | FormatError::Zip(_) => ErrorKind::InvalidFile,
        FormatError::Tensor(t) => tensor_kind(t),
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Format(e) => format_kind(e),
            EngineError::Tensor(e) => tensor_kind(e),
            EngineError::Edit { reason, .. } => match reason {
                EditFailure::Conversion(_) => ErrorKind::ValueConversionError,
                EditFailure::OutOfRange { .. } => ErrorKind::IndexOutOfRange,
            },
            EngineError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            EngineError::InvalidArgument(_) | EngineError::Json(_) => ErrorKind::InvalidArgument,
            EngineError::ExternalExport(_) => ErrorKind::UnsupportedFormat,
        }
    }

    /// Sub-kind for value conversion failures.
    pub fn conversion_kind(&self) -> Option<ConversionKind> {
        match self {
            EngineError::Edit {
                reason: EditFailure::Conversion(c),
                ..
            }
            | EngineError::Tensor(TensorError::Conversion(c))
            | EngineError::Format(FormatError::Tensor(TensorError::Conversion(c))) => Some(c.kind()),
            _ => None,
        }
    }

    pub fn to_failure(&self) -> Failure {
        Failure {
            kind: self.kind(),
            conversion: self.conversion_kind(),
            message: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        let e = EngineError::from(FormatError::UnsupportedWrite("pytorch".into()));
        assert_eq!(e.kind(), ErrorKind::UnsupportedWrite);
        let e = EngineError::from(FormatError::Tensor(TensorError::SliceRange("x".into())));
        assert_eq!(e.kind(), ErrorKind::SliceRangeError);
        let e = EngineError::from(FormatError::Io(std::io::Error::other("disk")));
        assert_eq!(e.kind().as_str(), "IOError");
    }

    #[test]
    fn test_edit_failure_serializes_with_subkind() {
        let e = EngineError::Edit {
            index: 2,
            row: 0,
            col: 1,
            reason: EditFailure::Conversion(ConversionError::Precision {
                value: "3.14".into(),
                dtype: "int32".into(),
            }),
        };
        let failure = e.to_failure();
        assert_eq!(failure.kind, ErrorKind::ValueConversionError);
        assert!(failure.message.starts_with("edit 2 at [0, 1] failed"));
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "ValueConversionError");
        assert_eq!(json["conversion"], "precision");
    }

    #[test]
    fn test_failure_omits_missing_subkind() {
        let json = serde_json::to_value(EngineError::InvalidQuery("(".into()).to_failure()).unwrap();
        assert_eq!(json["kind"], "InvalidQuery");
        assert!(json.get("conversion").is_none());
    }
}
