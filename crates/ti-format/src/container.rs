use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ti_tensor::{DType, Shape, Tensor, TensorDescriptor, TensorError};

use crate::atomic::write_atomic;
use crate::error::{FormatError, Result};
use crate::format::{detect, FormatTag};
use crate::npy::{encode_npy, NpyFile};
use crate::npz;
use crate::torch::{self, TensorRef, TorchArchive};

/// Where a tensor's bytes live inside its file.
#[derive(Debug, Clone)]
enum TensorSource {
    Npy,
    NpzMember { member: String, compressed: bool },
    Torch(TensorRef),
}

/// One tensor of a container, known from metadata alone.
#[derive(Debug, Clone)]
pub struct TensorEntry {
    pub key: String,
    pub shape: Shape,
    pub dtype: DType,
    source: TensorSource,
}

impl TensorEntry {
    /// Metadata-only descriptor (no stats).
    pub fn descriptor(&self) -> TensorDescriptor {
        TensorDescriptor::metadata_only(&self.key, &self.shape, self.dtype)
    }

    /// The member is deflate-compressed inside an `.npz`.
    pub fn is_compressed(&self) -> bool {
        matches!(
            self.source,
            TensorSource::NpzMember {
                compressed: true,
                ..
            }
        )
    }
}

/// A loaded file: its format and an ordered index of the tensors it holds.
///
/// Opening reads headers only. Tensor data is fetched one key at a time with
/// [`Container::read_tensor`].
#[derive(Debug, Clone)]
pub struct Container {
    path: PathBuf,
    format: FormatTag,
    entries: Vec<TensorEntry>,
    /// Any key resolves to the sole tensor (`.npy`, or a checkpoint whose root
    /// is a bare tensor).
    single_tensor: bool,
    torch: Option<TorchArchive>,
}

impl Container {
    /// Detect the format of `path` and index its tensors.
    pub fn open(path: &Path) -> Result<Container> {
        let format = detect(path)?;
        let mut torch_archive = None;
        let mut single_tensor = false;

        let entries = match format {
            FormatTag::Npy => {
                let npy = NpyFile::open(path)?;
                single_tensor = true;
                vec![TensorEntry {
                    key: "data".to_string(),
                    shape: npy.header.shape.clone(),
                    dtype: npy.header.dtype,
                    source: TensorSource::Npy,
                }]
            }
            FormatTag::Npz => npz::read_index(path)?
                .into_iter()
                .map(|m| TensorEntry {
                    key: m.key,
                    shape: m.header.shape,
                    dtype: m.header.dtype,
                    source: TensorSource::NpzMember {
                        member: m.name,
                        compressed: m.compressed,
                    },
                })
                .collect(),
            FormatTag::Torch => {
                let archive = TorchArchive::open(path)?;
                single_tensor = archive.root_is_tensor;
                let entries = archive
                    .entries
                    .iter()
                    .map(|e| TensorEntry {
                        key: e.key.clone(),
                        shape: Shape::from_slice(&e.tensor.shape),
                        dtype: e.tensor.storage.dtype,
                        source: TensorSource::Torch(e.tensor.clone()),
                    })
                    .collect();
                torch_archive = Some(archive);
                entries
            }
        };

        tracing::info!(
            "opened {} ({}): {} tensors",
            path.display(),
            format,
            entries.len()
        );

        Ok(Container {
            path: path.to_path_buf(),
            format,
            entries,
            single_tensor,
            torch: torch_archive,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FormatTag {
        self.format
    }

    /// Entries in discovery order.
    pub fn entries(&self) -> &[TensorEntry] {
        &self.entries
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// Total bytes of all tensors (`sum of numel * width`).
    pub fn total_size(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.shape.numel().saturating_mul(e.dtype.size_in_bytes()))
            .fold(0usize, usize::saturating_add)
    }

    /// Look up an entry by key.
    ///
    /// Single-tensor containers resolve every key to their only tensor.
    pub fn resolve(&self, key: &str) -> Result<&TensorEntry> {
        if let Some(entry) = self.entries.iter().find(|e| e.key == key) {
            return Ok(entry);
        }
        match (self.single_tensor, self.entries.as_slice()) {
            (true, [only]) => Ok(only),
            _ => Err(FormatError::KeyNotFound(key.to_string())),
        }
    }

    /// Materialize the tensor stored under `key`.
    pub fn read_tensor(&self, key: &str) -> Result<Tensor> {
        let entry = self.resolve(key)?;
        tracing::debug!(
            "materializing {} {} {} from {}",
            entry.key,
            entry.dtype,
            entry.shape,
            self.path.display()
        );
        let tensor = match &entry.source {
            TensorSource::Npy => NpyFile::open(&self.path)?.read_tensor()?,
            TensorSource::NpzMember { member, .. } => npz::read_member_tensor(&self.path, member)?,
            TensorSource::Torch(tensor_ref) => {
                let archive = self.torch.as_ref().ok_or_else(|| {
                    FormatError::Pickle("checkpoint index is missing".to_string())
                })?;
                torch::read_tensor(&self.path, archive, tensor_ref)?
            }
        };
        Ok(tensor)
    }

    /// Rewrite the container at its own path, replacing the tensors named in
    /// `overrides` and keeping every other tensor as it is.
    ///
    /// The replacement must keep the entry's shape and dtype. The file is
    /// replaced atomically.
    ///
    /// # Errors
    /// `UnsupportedWrite` for PyTorch checkpoints, before anything is read.
    pub fn save(&self, overrides: &[(&str, &Tensor)]) -> Result<()> {
        if !self.format.is_writable() {
            return Err(FormatError::UnsupportedWrite(self.format.to_string()));
        }

        let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();
        let mut npy_image = None;
        for (key, tensor) in overrides {
            let entry = self.resolve(key)?;
            if tensor.shape() != &entry.shape {
                return Err(TensorError::ShapeMismatch {
                    expected: entry.shape.dims().to_vec(),
                    got: tensor.shape().dims().to_vec(),
                }
                .into());
            }
            if tensor.dtype() != entry.dtype {
                return Err(TensorError::DTypeMismatch {
                    expected: entry.dtype.to_string(),
                    got: tensor.dtype().to_string(),
                }
                .into());
            }
            let image = encode_npy(tensor)?;
            match &entry.source {
                TensorSource::Npy => npy_image = Some(image),
                TensorSource::NpzMember { member, .. } => {
                    replacements.insert(member.clone(), image);
                }
                TensorSource::Torch(_) => {
                    return Err(FormatError::UnsupportedWrite(self.format.to_string()))
                }
            }
        }

        match self.format {
            FormatTag::Npy => {
                if let Some(image) = npy_image {
                    write_atomic(&self.path, |f| Ok(f.write_all(&image)?))?;
                }
            }
            FormatTag::Npz => {
                write_atomic(&self.path, |f| {
                    let mut out = npz::rewrite(&self.path, &replacements, BufWriter::new(f))?;
                    out.flush()?;
                    Ok(())
                })?;
            }
            FormatTag::Torch => {
                return Err(FormatError::UnsupportedWrite(self.format.to_string()))
            }
        }

        tracing::info!(
            "saved {} ({} tensor(s) replaced)",
            self.path.display(),
            overrides.len()
        );
        Ok(())
    }
}

/// Write a single tensor as a `.npy` file, atomically.
pub fn write_npy(path: &Path, tensor: &Tensor) -> Result<()> {
    let image = encode_npy(tensor)?;
    write_atomic(path, |f| Ok(f.write_all(&image)?))
}
