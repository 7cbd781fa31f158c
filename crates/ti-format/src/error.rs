use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid npy magic: expected '\\x93NUMPY', got {0:?}")]
    InvalidMagic([u8; 6]),
    #[error("invalid npy header: {0}")]
    InvalidHeader(String),
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("{0} files are read-only")]
    UnsupportedWrite(String),
    #[error("duplicate tensor key after flattening: {0}")]
    KeyCollision(String),
    #[error("tensor not found: {0}")]
    KeyNotFound(String),
    #[error("pickle error: {0}")]
    Pickle(String),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("tensor error: {0}")]
    Tensor(#[from] ti_tensor::TensorError),
}

pub type Result<T> = std::result::Result<T, FormatError>;

impl FormatError {
    /// The failure came from the filesystem rather than from file contents.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            FormatError::Io(_) | FormatError::Zip(zip::result::ZipError::Io(_))
        )
    }
}
