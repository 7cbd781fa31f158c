use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use ti_tensor::Tensor;

use crate::error::{FormatError, Result};
use crate::npy::{read_npy_bytes, NpyHeader};

/// One `.npy` member of an `.npz` archive, described from its header.
#[derive(Debug, Clone)]
pub struct NpzMember {
    /// Archive member name, e.g. `weights.npy`.
    pub name: String,
    /// Key exposed to callers: the member name without `.npy`.
    pub key: String,
    pub header: NpyHeader,
    pub compressed: bool,
}

pub(crate) fn open_archive(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(ZipArchive::new(BufReader::new(file))?)
}

/// Read a whole archive member into memory.
pub(crate) fn read_member<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut file = archive.by_name(name).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => FormatError::KeyNotFound(name.to_string()),
        other => FormatError::Zip(other),
    })?;
    let size = usize::try_from(file.size())
        .map_err(|_| FormatError::OutOfMemory(format!("member {} is too large", name)))?;
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(size)
        .map_err(|_| FormatError::OutOfMemory(format!("{} bytes for member {}", size, name)))?;
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// List the `.npy` members of an archive in central-directory order, parsing
/// only their headers.
///
/// Members that are not `.npy` files, or whose dtype cannot be represented
/// (structured or object arrays), are skipped with a warning; they are still
/// carried over unchanged when the archive is rewritten.
pub fn read_index(path: &Path) -> Result<Vec<NpzMember>> {
    let mut archive = open_archive(path)?;
    let mut members = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let Some(key) = name.strip_suffix(".npy") else {
            tracing::warn!("skipping non-array member {} in {}", name, path.display());
            continue;
        };
        let header = match NpyHeader::parse(&mut file) {
            Ok(h) => h,
            Err(FormatError::UnsupportedDType(d)) => {
                tracing::warn!("skipping member {} with unsupported dtype {}", name, d);
                continue;
            }
            Err(e) => return Err(e),
        };
        members.push(NpzMember {
            key: key.to_string(),
            compressed: file.compression() != CompressionMethod::Stored,
            name,
            header,
        });
    }
    Ok(members)
}

/// Decode one member into a tensor.
pub fn read_member_tensor(path: &Path, member: &str) -> Result<Tensor> {
    let mut archive = open_archive(path)?;
    let bytes = read_member(&mut archive, member)?;
    let (_, tensor) = read_npy_bytes(&bytes)?;
    Ok(tensor)
}

/// Copy the archive at `source` into `dest`, replacing the members named in
/// `replacements` with new `.npy` images.
///
/// Untouched members are copied raw, without decompressing. A replaced member
/// keeps its original compression method.
pub fn rewrite<W: Write + Seek>(
    source: &Path,
    replacements: &HashMap<String, Vec<u8>>,
    dest: W,
) -> Result<W> {
    let mut archive = open_archive(source)?;
    let mut writer = ZipWriter::new(dest);
    let mut replaced = 0usize;
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i)?;
        let name = file.name().to_string();
        match replacements.get(&name) {
            Some(image) => {
                let method = file.compression();
                drop(file);
                let options = SimpleFileOptions::default()
                    .compression_method(method)
                    .large_file(image.len() as u64 >= u32::MAX as u64);
                writer.start_file(name.as_str(), options)?;
                writer.write_all(image)?;
                replaced += 1;
            }
            None => writer.raw_copy_file(file)?,
        }
    }
    if replaced != replacements.len() {
        let missing = replacements
            .keys()
            .find(|k| archive.index_for_name(k).is_none())
            .cloned()
            .unwrap_or_default();
        return Err(FormatError::KeyNotFound(missing));
    }
    Ok(writer.finish()?)
}

/// Write a fresh archive from `(key, tensor)` pairs; `compress` selects
/// deflate over stored members.
pub fn write_archive<W: Write + Seek>(
    dest: W,
    tensors: &[(&str, &Tensor)],
    compress: bool,
) -> Result<W> {
    let method = if compress {
        CompressionMethod::Deflated
    } else {
        CompressionMethod::Stored
    };
    let mut writer = ZipWriter::new(dest);
    for (key, tensor) in tensors {
        let image = crate::npy::encode_npy(tensor)?;
        let options = SimpleFileOptions::default()
            .compression_method(method)
            .large_file(image.len() as u64 >= u32::MAX as u64);
        writer.start_file(format!("{}.npy", key), options)?;
        writer.write_all(&image)?;
    }
    Ok(writer.finish()?)
}
