use std::fmt;
use std::path::Path;

use crate::error::{FormatError, Result};

/// Kind of container a file holds, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    /// Single dense array (`.npy`).
    Npy,
    /// Zip archive of `.npy` members, stored or deflated (`.npz`).
    Npz,
    /// Zip-based PyTorch serialization (`.pt`, `.pth`).
    Torch,
}

impl FormatTag {
    /// Whether `Container::save` can rewrite this format.
    pub fn is_writable(&self) -> bool {
        !matches!(self, FormatTag::Torch)
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatTag::Npy => write!(f, "npy"),
            FormatTag::Npz => write!(f, "npz"),
            FormatTag::Torch => write!(f, "pytorch"),
        }
    }
}

/// Lowercased extension of `path` without the dot, or an empty string.
pub fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Map a path to its container format.
///
/// # Errors
/// `UnsupportedFormat` for anything other than `.npy`, `.npz`, `.pt` and
/// `.pth` (matched case-insensitively).
pub fn detect(path: &Path) -> Result<FormatTag> {
    match extension(path).as_str() {
        "npy" => Ok(FormatTag::Npy),
        "npz" => Ok(FormatTag::Npz),
        "pt" | "pth" => Ok(FormatTag::Torch),
        "" => Err(FormatError::UnsupportedFormat(format!(
            "{} has no file extension",
            path.display()
        ))),
        other => Err(FormatError::UnsupportedFormat(format!(".{}", other))),
    }
}
