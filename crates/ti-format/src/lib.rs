pub mod atomic;
pub mod container;
pub mod error;
pub mod format;
pub mod npy;
pub mod npz;
pub mod torch;

pub use atomic::{write_atomic, write_bytes_atomic, EditLock};
pub use container::{write_npy, Container, TensorEntry};
pub use error::{FormatError, Result};
pub use format::{detect, extension, FormatTag};
pub use npy::{NpyFile, NpyHeader};
