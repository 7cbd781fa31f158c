use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use ti_tensor::{ByteOrder, CpuStorage, Shape, Tensor};

use super::pickle::{self, TensorRef, Value};
use crate::error::{FormatError, Result};
use crate::npz::{open_archive, read_member};

const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

/// A tensor found in a checkpoint, addressed by its flattened key.
#[derive(Debug, Clone, PartialEq)]
pub struct TorchEntry {
    pub key: String,
    pub tensor: TensorRef,
}

/// Index of a zip-based PyTorch checkpoint.
#[derive(Debug, Clone)]
pub struct TorchArchive {
    /// Directory prefix of the records inside the zip, e.g. `archive/`.
    pub prefix: String,
    /// Byte order of storage records.
    pub order: ByteOrder,
    pub entries: Vec<TorchEntry>,
    /// The pickled root object was a bare tensor.
    pub root_is_tensor: bool,
}

impl TorchArchive {
    /// Open a checkpoint and index its tensors without reading storages.
    ///
    /// Top-level tensors keep their key; tensors inside a top-level mapping
    /// become `outer.inner`; a bare root tensor is keyed `data`. Everything
    /// else is ignored.
    pub fn open(path: &Path) -> Result<TorchArchive> {
        let mut magic = [0u8; 4];
        let n = File::open(path)?.read(&mut magic)?;
        if n < 4 || magic != ZIP_MAGIC {
            return Err(FormatError::UnsupportedFormat(format!(
                "{} uses the legacy (pre-zip) PyTorch serialization",
                path.display()
            )));
        }

        let mut archive = open_archive(path)?;
        let pkl_name = archive
            .file_names()
            .filter(|n| n.ends_with("data.pkl"))
            .min_by_key(|n| n.len())
            .map(str::to_string)
            .ok_or_else(|| FormatError::Pickle("archive has no data.pkl record".to_string()))?;
        let prefix = pkl_name[..pkl_name.len() - "data.pkl".len()].to_string();

        let order = match read_member(&mut archive, &format!("{}byteorder", prefix)) {
            Ok(bytes) if String::from_utf8_lossy(&bytes).trim() == "big" => ByteOrder::Big,
            Ok(_) | Err(FormatError::KeyNotFound(_)) => ByteOrder::Little,
            Err(e) => return Err(e),
        };

        let pkl = read_member(&mut archive, &pkl_name)?;
        let root = pickle::load(&pkl)?;
        let root_is_tensor = matches!(root, Value::Tensor(_));
        let entries = flatten(root)?;
        tracing::debug!(
            "indexed {} tensors under '{}' ({:?} byte order)",
            entries.len(),
            prefix,
            order
        );

        Ok(TorchArchive {
            prefix,
            order,
            entries,
            root_is_tensor,
        })
    }

    /// Archive member holding a storage.
    pub fn storage_member(&self, key: &str) -> String {
        format!("{}data/{}", self.prefix, key)
    }
}

fn key_string(v: &Value) -> Option<String> {
    match v {
        Value::Str(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

fn push_unique(
    entries: &mut Vec<TorchEntry>,
    seen: &mut HashSet<String>,
    key: String,
    tensor: TensorRef,
) -> Result<()> {
    if !seen.insert(key.clone()) {
        return Err(FormatError::KeyCollision(key));
    }
    entries.push(TorchEntry { key, tensor });
    Ok(())
}

/// Flatten the root object one level deep.
fn flatten(root: Value) -> Result<Vec<TorchEntry>> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    match root {
        Value::Tensor(t) => entries.push(TorchEntry {
            key: "data".to_string(),
            tensor: t,
        }),
        Value::Dict(items) => {
            for (k, v) in items {
                let Some(outer) = key_string(&k) else {
                    continue;
                };
                match v {
                    Value::Tensor(t) => push_unique(&mut entries, &mut seen, outer, t)?,
                    Value::Dict(inner) => {
                        for (k2, v2) in inner {
                            if let (Some(inner_key), Value::Tensor(t)) = (key_string(&k2), v2) {
                                let key = format!("{}.{}", outer, inner_key);
                                push_unique(&mut entries, &mut seen, key, t)?;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    Ok(entries)
}

/// Read a tensor's storage record and gather its strided view.
pub fn read_tensor(path: &Path, archive: &TorchArchive, tensor: &TensorRef) -> Result<Tensor> {
    let storage = &tensor.storage;
    let mut zip = open_archive(path)?;
    let bytes = read_member(&mut zip, &archive.storage_member(&storage.key))?;
    let width = storage.dtype.size_in_bytes();
    let available = if width == 0 { 0 } else { bytes.len() / width };
    if available < storage.numel {
        return Err(FormatError::Pickle(format!(
            "storage {} holds {} elements, expected {}",
            storage.key, available, storage.numel
        )));
    }
    let data = CpuStorage::from_bytes(storage.dtype, &bytes, storage.numel, archive.order)?;
    drop(bytes);
    let tensor = Tensor::from_strided(
        data,
        storage.dtype,
        Shape::new(tensor.shape.clone()),
        tensor.offset,
        &tensor.stride,
    )?;
    Ok(tensor)
}
