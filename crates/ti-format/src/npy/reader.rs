use std::io::{BufReader, Cursor, Seek};
use std::path::Path;

use memmap2::Mmap;

use ti_tensor::{CpuStorage, Tensor};

use super::header::NpyHeader;
use crate::error::{FormatError, Result};

/// A `.npy` file whose header has been parsed and whose contents are
/// memory-mapped.
pub struct NpyFile {
    pub header: NpyHeader,
    /// Memory-mapped file contents.
    mmap: Mmap,
    /// Byte offset within the file where array data begins.
    data_offset: usize,
}

impl NpyFile {
    /// Open a `.npy` file, parse its header and map the file.
    pub fn open(path: &Path) -> Result<NpyFile> {
        let file = std::fs::File::open(path)?;
        let mut reader = BufReader::new(&file);
        let header = NpyHeader::parse(&mut reader)?;
        let data_offset = reader.stream_position()? as usize;

        let mmap = unsafe { Mmap::map(&file)? };

        Ok(NpyFile {
            header,
            mmap,
            data_offset,
        })
    }

    /// Raw bytes of the array data.
    pub fn data(&self) -> &[u8] {
        self.mmap.get(self.data_offset..).unwrap_or(&[])
    }

    /// Decode the array into a row-major tensor.
    pub fn read_tensor(&self) -> Result<Tensor> {
        decode_tensor(&self.header, self.data())
    }
}

/// Parse a complete in-memory `.npy` image (an `.npz` member, say).
pub fn read_npy_bytes(bytes: &[u8]) -> Result<(NpyHeader, Tensor)> {
    let mut cursor = Cursor::new(bytes);
    let header = NpyHeader::parse(&mut cursor)?;
    let offset = cursor.position() as usize;
    let tensor = decode_tensor(&header, &bytes[offset..])?;
    Ok((header, tensor))
}

/// Decode the data section described by `header`.
///
/// Column-major data is gathered into row-major order; big-endian data is
/// byte-swapped.
pub fn decode_tensor(header: &NpyHeader, data: &[u8]) -> Result<Tensor> {
    let shape = header.shape.clone();
    let numel = shape.numel();
    let needed = numel * header.dtype.size_in_bytes();
    if data.len() < needed {
        return Err(FormatError::InvalidHeader(format!(
            "data section holds {} bytes but shape {} of {} needs {}",
            data.len(),
            shape,
            header.dtype,
            needed
        )));
    }

    let storage = CpuStorage::from_bytes(header.dtype, data, numel, header.order)?;
    let tensor = if header.fortran_order && shape.ndim() > 1 {
        let strides = shape.fortran_strides();
        Tensor::from_strided(storage, header.dtype, shape, 0, &strides)?
    } else {
        Tensor::new(storage, shape, header.dtype)?
    };
    Ok(tensor)
}

/// Serialize `tensor` as a complete `.npy` image (version 1.0 unless the
/// header is too long, little-endian, C order).
pub fn encode_npy(tensor: &Tensor) -> Result<Vec<u8>> {
    let header = NpyHeader::new(tensor.dtype(), tensor.shape().clone()).to_bytes()?;
    let data = tensor.to_le_bytes()?;
    let mut out = Vec::new();
    out.try_reserve_exact(header.len() + data.len())
        .map_err(|_| FormatError::OutOfMemory(format!("{} bytes for .npy image", data.len())))?;
    out.extend_from_slice(&header);
    out.extend_from_slice(&data);
    Ok(out)
}
