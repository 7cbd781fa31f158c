pub mod header;
pub mod reader;

pub use header::{NpyHeader, NPY_HEADER_ALIGNMENT, NPY_MAGIC};
pub use reader::{decode_tensor, encode_npy, read_npy_bytes, NpyFile};
