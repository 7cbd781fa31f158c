use half::{bf16, f16};
use num_complex::Complex;

use crate::dtype::{ByteOrder, DType};
use crate::element::Element;
use crate::error::{Result, TensorError};

/// CPU-side tensor storage: one contiguous vector per element type.
#[derive(Debug, Clone, PartialEq)]
pub enum CpuStorage {
    Bool(Vec<bool>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    C64(Vec<Complex<f32>>),
    C128(Vec<Complex<f64>>),
    /// Decoded fixed-width unicode strings (numpy `U`).
    Text(Vec<String>),
    /// Fixed-width raw records (numpy `S` and `V`), `width` bytes each.
    Raw { width: usize, data: Vec<u8> },
}

/// Applies `$body` to the inner vector of every variant that holds plain
/// `Vec<T>` data, leaving `Raw` to the caller.
macro_rules! map_vec {
    ($storage:expr, $v:ident => $body:expr, raw $w:ident, $d:ident => $raw:expr) => {
        match $storage {
            CpuStorage::Bool($v) => $body,
            CpuStorage::I8($v) => $body,
            CpuStorage::I16($v) => $body,
            CpuStorage::I32($v) => $body,
            CpuStorage::I64($v) => $body,
            CpuStorage::U8($v) => $body,
            CpuStorage::U16($v) => $body,
            CpuStorage::U32($v) => $body,
            CpuStorage::U64($v) => $body,
            CpuStorage::F16($v) => $body,
            CpuStorage::BF16($v) => $body,
            CpuStorage::F32($v) => $body,
            CpuStorage::F64($v) => $body,
            CpuStorage::C64($v) => $body,
            CpuStorage::C128($v) => $body,
            CpuStorage::Text($v) => $body,
            CpuStorage::Raw { width: $w, data: $d } => $raw,
        }
    };
}

/// Decodes `count` fixed-width primitives from `bytes` honouring `order`.
macro_rules! decode_prim {
    ($bytes:expr, $count:expr, $order:expr, $dtype:expr, $ty:ty, $n:expr) => {{
        let mut out: Vec<$ty> = alloc($count, $dtype)?;
        for chunk in $bytes.chunks_exact($n).take($count) {
            let mut buf = [0u8; $n];
            buf.copy_from_slice(chunk);
            out.push(match $order {
                ByteOrder::Little => <$ty>::from_le_bytes(buf),
                ByteOrder::Big => <$ty>::from_be_bytes(buf),
            });
        }
        out
    }};
}

/// Writes a slice of primitives little-endian.
macro_rules! encode_prim {
    ($v:expr, $out:expr) => {
        for x in $v.iter() {
            $out.extend_from_slice(&x.to_le_bytes());
        }
    };
}

/// Stores an integer element into a typed slot after a checked narrowing.
macro_rules! set_int {
    ($v:expr, $index:expr, $value:expr, $ty:ty, $dtype:expr) => {{
        let x = int_value($value)
            .and_then(|x| <$ty>::try_from(x).ok())
            .ok_or_else(|| mismatch($dtype, $value))?;
        $v[$index] = x;
    }};
}

fn alloc<T>(count: usize, dtype: DType) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(count)
        .map_err(|_| TensorError::OutOfMemory {
            dtype: dtype.to_string(),
            elements: count,
        })?;
    Ok(v)
}

fn int_value(e: &Element) -> Option<i128> {
    match e {
        Element::Int(x) => Some(*x as i128),
        Element::UInt(x) => Some(*x as i128),
        _ => None,
    }
}

fn float_value(e: &Element) -> Option<f64> {
    match e {
        Element::Float(x) => Some(*x),
        _ => None,
    }
}

fn mismatch(dtype: &str, value: &Element) -> TensorError {
    TensorError::DTypeMismatch {
        expected: dtype.to_string(),
        got: format!("{:?}", value),
    }
}

fn gather<T: Clone>(v: &[T], indices: &[usize]) -> Result<Vec<T>> {
    let mut out = Vec::new();
    out.try_reserve_exact(indices.len())
        .map_err(|_| TensorError::Other(format!("cannot allocate {} elements", indices.len())))?;
    for &i in indices {
        let x = v.get(i).ok_or(TensorError::IndexOutOfRange {
            index: i,
            numel: v.len(),
        })?;
        out.push(x.clone());
    }
    Ok(out)
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    &bytes[..end]
}

impl CpuStorage {
    /// Number of elements in this storage.
    pub fn len(&self) -> usize {
        map_vec!(self, v => v.len(), raw width, data => {
            if *width == 0 { 0 } else { data.len() / width }
        })
    }

    /// Returns true if the storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this storage variant can back a tensor of `dtype`.
    pub fn fits(&self, dtype: DType) -> bool {
        match (self, dtype) {
            (CpuStorage::Bool(_), DType::Bool)
            | (CpuStorage::I8(_), DType::I8)
            | (CpuStorage::I16(_), DType::I16)
            | (CpuStorage::I32(_), DType::I32)
            | (CpuStorage::I64(_), DType::I64)
            | (CpuStorage::U8(_), DType::U8)
            | (CpuStorage::U16(_), DType::U16)
            | (CpuStorage::U32(_), DType::U32)
            | (CpuStorage::U64(_), DType::U64)
            | (CpuStorage::F16(_), DType::F16)
            | (CpuStorage::BF16(_), DType::BF16)
            | (CpuStorage::F32(_), DType::F32)
            | (CpuStorage::F64(_), DType::F64)
            | (CpuStorage::C64(_), DType::C64)
            | (CpuStorage::C128(_), DType::C128)
            | (CpuStorage::Text(_), DType::Unicode(_)) => true,
            (CpuStorage::Raw { width, .. }, DType::Bytes(n) | DType::Void(n)) => *width == n,
            _ => false,
        }
    }

    /// Decodes `count` elements of `dtype` from a serialized buffer.
    ///
    /// # Errors
    /// Fails when the buffer is shorter than `count` elements or when the
    /// allocation for the decoded elements cannot be satisfied.
    pub fn from_bytes(dtype: DType, bytes: &[u8], count: usize, order: ByteOrder) -> Result<Self> {
        let width = dtype.size_in_bytes();
        let needed = count.checked_mul(width).ok_or_else(|| TensorError::OutOfMemory {
            dtype: dtype.to_string(),
            elements: count,
        })?;
        if bytes.len() < needed {
            return Err(TensorError::Other(format!(
                "buffer holds {} bytes but {} elements of {} need {}",
                bytes.len(),
                count,
                dtype,
                needed
            )));
        }
        let bytes = &bytes[..needed];

        let storage = match dtype {
            DType::Bool => {
                let mut out = alloc(count, dtype)?;
                out.extend(bytes.iter().map(|&b| b != 0));
                CpuStorage::Bool(out)
            }
            DType::I8 => {
                let mut out = alloc(count, dtype)?;
                out.extend(bytes.iter().map(|&b| b as i8));
                CpuStorage::I8(out)
            }
            DType::U8 => {
                let mut out = alloc(count, dtype)?;
                out.extend_from_slice(bytes);
                CpuStorage::U8(out)
            }
            DType::I16 => CpuStorage::I16(decode_prim!(bytes, count, order, dtype, i16, 2)),
            DType::I32 => CpuStorage::I32(decode_prim!(bytes, count, order, dtype, i32, 4)),
            DType::I64 => CpuStorage::I64(decode_prim!(bytes, count, order, dtype, i64, 8)),
            DType::U16 => CpuStorage::U16(decode_prim!(bytes, count, order, dtype, u16, 2)),
            DType::U32 => CpuStorage::U32(decode_prim!(bytes, count, order, dtype, u32, 4)),
            DType::U64 => CpuStorage::U64(decode_prim!(bytes, count, order, dtype, u64, 8)),
            DType::F16 => CpuStorage::F16(decode_prim!(bytes, count, order, dtype, f16, 2)),
            DType::BF16 => CpuStorage::BF16(decode_prim!(bytes, count, order, dtype, bf16, 2)),
            DType::F32 => CpuStorage::F32(decode_prim!(bytes, count, order, dtype, f32, 4)),
            DType::F64 => CpuStorage::F64(decode_prim!(bytes, count, order, dtype, f64, 8)),
            DType::C64 => {
                let parts = decode_prim!(bytes, count * 2, order, dtype, f32, 4);
                let mut out = alloc(count, dtype)?;
                out.extend(parts.chunks_exact(2).map(|p| Complex::new(p[0], p[1])));
                CpuStorage::C64(out)
            }
            DType::C128 => {
                let parts = decode_prim!(bytes, count * 2, order, dtype, f64, 8);
                let mut out = alloc(count, dtype)?;
                out.extend(parts.chunks_exact(2).map(|p| Complex::new(p[0], p[1])));
                CpuStorage::C128(out)
            }
            DType::Unicode(n) => {
                let mut out = alloc(count, dtype)?;
                for i in 0..count {
                    let item = &bytes[i * 4 * n..(i + 1) * 4 * n];
                    let units = decode_prim!(item, n, order, dtype, u32, 4);
                    let s: String = units
                        .into_iter()
                        .take_while(|&u| u != 0)
                        .map(|u| char::from_u32(u).unwrap_or(char::REPLACEMENT_CHARACTER))
                        .collect();
                    out.push(s);
                }
                CpuStorage::Text(out)
            }
            DType::Bytes(n) | DType::Void(n) => {
                let mut data = alloc(needed, dtype)?;
                data.extend_from_slice(bytes);
                CpuStorage::Raw { width: n, data }
            }
        };
        Ok(storage)
    }

    /// Serializes the storage as little-endian bytes laid out for `dtype`.
    ///
    /// # Errors
    /// Fails when the storage does not fit `dtype`, or a string is longer
    /// than the fixed element width.
    pub fn to_le_bytes(&self, dtype: DType) -> Result<Vec<u8>> {
        if !self.fits(dtype) {
            return Err(TensorError::DTypeMismatch {
                expected: dtype.to_string(),
                got: self.variant_name().to_string(),
            });
        }
        let mut out = alloc(self.len() * dtype.size_in_bytes(), dtype)?;
        match self {
            CpuStorage::Bool(v) => out.extend(v.iter().map(|&b| b as u8)),
            CpuStorage::I8(v) => encode_prim!(v, out),
            CpuStorage::I16(v) => encode_prim!(v, out),
            CpuStorage::I32(v) => encode_prim!(v, out),
            CpuStorage::I64(v) => encode_prim!(v, out),
            CpuStorage::U8(v) => out.extend_from_slice(v),
            CpuStorage::U16(v) => encode_prim!(v, out),
            CpuStorage::U32(v) => encode_prim!(v, out),
            CpuStorage::U64(v) => encode_prim!(v, out),
            CpuStorage::F16(v) => encode_prim!(v, out),
            CpuStorage::BF16(v) => encode_prim!(v, out),
            CpuStorage::F32(v) => encode_prim!(v, out),
            CpuStorage::F64(v) => encode_prim!(v, out),
            CpuStorage::C64(v) => {
                for c in v {
                    out.extend_from_slice(&c.re.to_le_bytes());
                    out.extend_from_slice(&c.im.to_le_bytes());
                }
            }
            CpuStorage::C128(v) => {
                for c in v {
                    out.extend_from_slice(&c.re.to_le_bytes());
                    out.extend_from_slice(&c.im.to_le_bytes());
                }
            }
            CpuStorage::Text(v) => {
                let n = match dtype {
                    DType::Unicode(n) => n,
                    _ => 0,
                };
                for s in v {
                    let count = s.chars().count();
                    if count > n {
                        return Err(TensorError::Other(format!(
                            "string of {} characters does not fit {}",
                            count, dtype
                        )));
                    }
                    for c in s.chars() {
                        out.extend_from_slice(&(c as u32).to_le_bytes());
                    }
                    out.resize(out.len() + 4 * (n - count), 0);
                }
            }
            CpuStorage::Raw { data, .. } => out.extend_from_slice(data),
        }
        Ok(out)
    }

    /// Reads element `index`, widened to an [`Element`].
    pub fn element(&self, index: usize) -> Option<Element> {
        let e = match self {
            CpuStorage::Bool(v) => Element::Bool(*v.get(index)?),
            CpuStorage::I8(v) => Element::Int(*v.get(index)? as i64),
            CpuStorage::I16(v) => Element::Int(*v.get(index)? as i64),
            CpuStorage::I32(v) => Element::Int(*v.get(index)? as i64),
            CpuStorage::I64(v) => Element::Int(*v.get(index)?),
            CpuStorage::U8(v) => Element::UInt(*v.get(index)? as u64),
            CpuStorage::U16(v) => Element::UInt(*v.get(index)? as u64),
            CpuStorage::U32(v) => Element::UInt(*v.get(index)? as u64),
            CpuStorage::U64(v) => Element::UInt(*v.get(index)?),
            CpuStorage::F16(v) => Element::Float(v.get(index)?.to_f64()),
            CpuStorage::BF16(v) => Element::Float(v.get(index)?.to_f64()),
            CpuStorage::F32(v) => Element::Float(*v.get(index)? as f64),
            CpuStorage::F64(v) => Element::Float(*v.get(index)?),
            CpuStorage::C64(v) => {
                let c = v.get(index)?;
                Element::Complex {
                    re: c.re as f64,
                    im: c.im as f64,
                }
            }
            CpuStorage::C128(v) => {
                let c = v.get(index)?;
                Element::Complex { re: c.re, im: c.im }
            }
            CpuStorage::Text(v) => Element::Text(v.get(index)?.clone()),
            CpuStorage::Raw { width, data } => {
                let start = index.checked_mul(*width)?;
                let record = data.get(start..start + width)?;
                Element::Bytes(trim_nul(record).to_vec())
            }
        };
        Some(e)
    }

    /// Overwrites element `index`.
    ///
    /// The value must already have been converted for the element type (see
    /// [`crate::convert::parse_value`]); integer values are narrowed with a
    /// checked conversion and floats are rounded to the storage width.
    pub fn set(&mut self, index: usize, value: &Element) -> Result<()> {
        let numel = self.len();
        if index >= numel {
            return Err(TensorError::IndexOutOfRange { index, numel });
        }
        match self {
            CpuStorage::Bool(v) => match value {
                Element::Bool(b) => v[index] = *b,
                other => return Err(mismatch("bool", other)),
            },
            CpuStorage::I8(v) => set_int!(v, index, value, i8, "int8"),
            CpuStorage::I16(v) => set_int!(v, index, value, i16, "int16"),
            CpuStorage::I32(v) => set_int!(v, index, value, i32, "int32"),
            CpuStorage::I64(v) => set_int!(v, index, value, i64, "int64"),
            CpuStorage::U8(v) => set_int!(v, index, value, u8, "uint8"),
            CpuStorage::U16(v) => set_int!(v, index, value, u16, "uint16"),
            CpuStorage::U32(v) => set_int!(v, index, value, u32, "uint32"),
            CpuStorage::U64(v) => set_int!(v, index, value, u64, "uint64"),
            CpuStorage::F16(v) => {
                v[index] = f16::from_f64(float_value(value).ok_or_else(|| mismatch("float16", value))?)
            }
            CpuStorage::BF16(v) => {
                v[index] =
                    bf16::from_f64(float_value(value).ok_or_else(|| mismatch("bfloat16", value))?)
            }
            CpuStorage::F32(v) => {
                v[index] = float_value(value).ok_or_else(|| mismatch("float32", value))? as f32
            }
            CpuStorage::F64(v) => {
                v[index] = float_value(value).ok_or_else(|| mismatch("float64", value))?
            }
            CpuStorage::C64(v) => match value {
                Element::Complex { re, im } => v[index] = Complex::new(*re as f32, *im as f32),
                other => return Err(mismatch("complex64", other)),
            },
            CpuStorage::C128(v) => match value {
                Element::Complex { re, im } => v[index] = Complex::new(*re, *im),
                other => return Err(mismatch("complex128", other)),
            },
            CpuStorage::Text(v) => match value {
                Element::Text(s) => v[index] = s.clone(),
                other => return Err(mismatch("unicode string", other)),
            },
            CpuStorage::Raw { width, data } => {
                let bytes: &[u8] = match value {
                    Element::Bytes(b) => b,
                    Element::Text(s) => s.as_bytes(),
                    other => return Err(mismatch("byte string", other)),
                };
                if bytes.len() > *width {
                    return Err(TensorError::Other(format!(
                        "{} bytes do not fit a {}-byte record",
                        bytes.len(),
                        width
                    )));
                }
                let record = &mut data[index * *width..(index + 1) * *width];
                record.fill(0);
                record[..bytes.len()].copy_from_slice(bytes);
            }
        }
        Ok(())
    }

    /// Builds a new storage from the elements at `indices`, in order.
    pub fn select(&self, indices: &[usize]) -> Result<CpuStorage> {
        let out = match self {
            CpuStorage::Bool(v) => CpuStorage::Bool(gather(v, indices)?),
            CpuStorage::I8(v) => CpuStorage::I8(gather(v, indices)?),
            CpuStorage::I16(v) => CpuStorage::I16(gather(v, indices)?),
            CpuStorage::I32(v) => CpuStorage::I32(gather(v, indices)?),
            CpuStorage::I64(v) => CpuStorage::I64(gather(v, indices)?),
            CpuStorage::U8(v) => CpuStorage::U8(gather(v, indices)?),
            CpuStorage::U16(v) => CpuStorage::U16(gather(v, indices)?),
            CpuStorage::U32(v) => CpuStorage::U32(gather(v, indices)?),
            CpuStorage::U64(v) => CpuStorage::U64(gather(v, indices)?),
            CpuStorage::F16(v) => CpuStorage::F16(gather(v, indices)?),
            CpuStorage::BF16(v) => CpuStorage::BF16(gather(v, indices)?),
            CpuStorage::F32(v) => CpuStorage::F32(gather(v, indices)?),
            CpuStorage::F64(v) => CpuStorage::F64(gather(v, indices)?),
            CpuStorage::C64(v) => CpuStorage::C64(gather(v, indices)?),
            CpuStorage::C128(v) => CpuStorage::C128(gather(v, indices)?),
            CpuStorage::Text(v) => CpuStorage::Text(gather(v, indices)?),
            CpuStorage::Raw { width, data } => {
                let numel = self.len();
                let mut out = Vec::with_capacity(indices.len() * width);
                for &i in indices {
                    if i >= numel {
                        return Err(TensorError::IndexOutOfRange { index: i, numel });
                    }
                    out.extend_from_slice(&data[i * width..(i + 1) * width]);
                }
                CpuStorage::Raw {
                    width: *width,
                    data: out,
                }
            }
        };
        Ok(out)
    }

    /// Calls `f(index, value)` for every element of an integer or float
    /// storage. Returns `false` without calling `f` for other storages.
    pub fn for_each_f64(&self, mut f: impl FnMut(usize, f64)) -> bool {
        match self {
            CpuStorage::I8(v) => v.iter().enumerate().for_each(|(i, x)| f(i, *x as f64)),
            CpuStorage::I16(v) => v.iter().enumerate().for_each(|(i, x)| f(i, *x as f64)),
            CpuStorage::I32(v) => v.iter().enumerate().for_each(|(i, x)| f(i, *x as f64)),
            CpuStorage::I64(v) => v.iter().enumerate().for_each(|(i, x)| f(i, *x as f64)),
            CpuStorage::U8(v) => v.iter().enumerate().for_each(|(i, x)| f(i, *x as f64)),
            CpuStorage::U16(v) => v.iter().enumerate().for_each(|(i, x)| f(i, *x as f64)),
            CpuStorage::U32(v) => v.iter().enumerate().for_each(|(i, x)| f(i, *x as f64)),
            CpuStorage::U64(v) => v.iter().enumerate().for_each(|(i, x)| f(i, *x as f64)),
            CpuStorage::F16(v) => v.iter().enumerate().for_each(|(i, x)| f(i, x.to_f64())),
            CpuStorage::BF16(v) => v.iter().enumerate().for_each(|(i, x)| f(i, x.to_f64())),
            CpuStorage::F32(v) => v.iter().enumerate().for_each(|(i, x)| f(i, *x as f64)),
            CpuStorage::F64(v) => v.iter().enumerate().for_each(|(i, x)| f(i, *x)),
            _ => return false,
        }
        true
    }

    /// Calls `f(index)` for every integer element equal to `target`.
    /// Returns `false` for non-integer storages.
    pub fn for_each_int_eq(&self, target: i128, mut f: impl FnMut(usize)) -> bool {
        macro_rules! scan {
            ($v:expr) => {
                for (i, x) in $v.iter().enumerate() {
                    if *x as i128 == target {
                        f(i);
                    }
                }
            };
        }
        match self {
            CpuStorage::I8(v) => scan!(v),
            CpuStorage::I16(v) => scan!(v),
            CpuStorage::I32(v) => scan!(v),
            CpuStorage::I64(v) => scan!(v),
            CpuStorage::U8(v) => scan!(v),
            CpuStorage::U16(v) => scan!(v),
            CpuStorage::U32(v) => scan!(v),
            CpuStorage::U64(v) => scan!(v),
            _ => return false,
        }
        true
    }

    pub(crate) fn variant_name(&self) -> &'static str {
        match self {
            CpuStorage::Bool(_) => "bool",
            CpuStorage::I8(_) => "int8",
            CpuStorage::I16(_) => "int16",
            CpuStorage::I32(_) => "int32",
            CpuStorage::I64(_) => "int64",
            CpuStorage::U8(_) => "uint8",
            CpuStorage::U16(_) => "uint16",
            CpuStorage::U32(_) => "uint32",
            CpuStorage::U64(_) => "uint64",
            CpuStorage::F16(_) => "float16",
            CpuStorage::BF16(_) => "bfloat16",
            CpuStorage::F32(_) => "float32",
            CpuStorage::F64(_) => "float64",
            CpuStorage::C64(_) => "complex64",
            CpuStorage::C128(_) => "complex128",
            CpuStorage::Text(_) => "unicode",
            CpuStorage::Raw { .. } => "raw",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_little_and_big_endian() {
        let le = 258i32.to_le_bytes();
        let be = 258i32.to_be_bytes();
        let a = CpuStorage::from_bytes(DType::I32, &le, 1, ByteOrder::Little).unwrap();
        let b = CpuStorage::from_bytes(DType::I32, &be, 1, ByteOrder::Big).unwrap();
        assert_eq!(a, CpuStorage::I32(vec![258]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(CpuStorage::from_bytes(DType::F64, &[0u8; 7], 1, ByteOrder::Little).is_err());
    }

    #[test]
    fn test_encode_decode_complex() {
        let s = CpuStorage::C64(vec![Complex::new(1.0, -2.0), Complex::new(0.5, 3.0)]);
        let bytes = s.to_le_bytes(DType::C64).unwrap();
        assert_eq!(bytes.len(), 16);
        let back = CpuStorage::from_bytes(DType::C64, &bytes, 2, ByteOrder::Little).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_unicode_roundtrip_and_padding() {
        let s = CpuStorage::Text(vec!["ab".into(), "你好".into()]);
        let bytes = s.to_le_bytes(DType::Unicode(3)).unwrap();
        assert_eq!(bytes.len(), 24);
        let back = CpuStorage::from_bytes(DType::Unicode(3), &bytes, 2, ByteOrder::Little).unwrap();
        assert_eq!(back, s);
        assert!(s.to_le_bytes(DType::Unicode(1)).is_err());
    }

    #[test]
    fn test_raw_records() {
        let s = CpuStorage::from_bytes(DType::Bytes(3), b"ab\0xyz", 2, ByteOrder::Little).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.element(0), Some(Element::Bytes(b"ab".to_vec())));
        assert_eq!(s.element(1), Some(Element::Bytes(b"xyz".to_vec())));
    }

    #[test]
    fn test_set_narrows_with_check() {
        let mut s = CpuStorage::U8(vec![0, 0]);
        s.set(1, &Element::Int(255)).unwrap();
        assert_eq!(s.element(1), Some(Element::UInt(255)));
        assert!(s.set(0, &Element::Int(256)).is_err());
        assert!(s.set(0, &Element::Float(1.0)).is_err());
        assert!(matches!(
            s.set(2, &Element::Int(1)),
            Err(TensorError::IndexOutOfRange { index: 2, numel: 2 })
        ));
    }

    #[test]
    fn test_set_float16_rounds() {
        let mut s = CpuStorage::F16(vec![f16::ZERO]);
        s.set(0, &Element::Float(0.1)).unwrap();
        let v = s.element(0).unwrap().as_f64().unwrap();
        approx::assert_abs_diff_eq!(v, 0.1, epsilon = 1e-3);
    }

    #[test]
    fn test_select() {
        let s = CpuStorage::F32(vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(s.select(&[3, 1]).unwrap(), CpuStorage::F32(vec![3.0, 1.0]));
        assert!(s.select(&[4]).is_err());
    }

    #[test]
    fn test_for_each_f64_skips_non_numeric() {
        let mut seen = Vec::new();
        assert!(CpuStorage::I16(vec![-1, 2]).for_each_f64(|i, v| seen.push((i, v))));
        assert_eq!(seen, vec![(0, -1.0), (1, 2.0)]);
        assert!(!CpuStorage::Bool(vec![true]).for_each_f64(|_, _| {}));
        assert!(!CpuStorage::C64(vec![]).for_each_f64(|_, _| {}));
    }

    #[test]
    fn test_fits() {
        assert!(CpuStorage::Raw { width: 4, data: vec![] }.fits(DType::Void(4)));
        assert!(!CpuStorage::Raw { width: 4, data: vec![] }.fits(DType::Bytes(3)));
        assert!(!CpuStorage::F32(vec![]).fits(DType::F64));
    }
}
