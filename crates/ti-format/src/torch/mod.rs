//! Zip-based PyTorch checkpoints (`torch.save` since 1.6).

pub mod pickle;
pub mod reader;

pub use pickle::{StorageRef, TensorRef, Value};
pub use reader::{read_tensor, TorchArchive, TorchEntry};
