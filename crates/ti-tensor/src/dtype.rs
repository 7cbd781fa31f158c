use std::fmt;

/// Canonical element types a tensor can hold, whatever file it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    /// 16-bit floating point (IEEE 754 half-precision, via the `half` crate).
    F16,
    /// bfloat16 (via the `half` crate). Only produced by PyTorch checkpoints.
    BF16,
    F32,
    F64,
    /// Pair of f32 (real, imaginary).
    C64,
    /// Pair of f64 (real, imaginary).
    C128,
    /// Fixed-width UTF-32 string holding up to `n` characters (numpy `U`).
    Unicode(usize),
    /// Fixed-width byte string of `n` bytes (numpy `S`).
    Bytes(usize),
    /// Opaque fixed-width record of `n` bytes (numpy `V`).
    Void(usize),
}

/// Byte order of multi-byte elements in a serialized buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// Every fixed-width dtype, in display order.
pub const FIXED_DTYPES: [DType; 15] = [
    DType::Bool,
    DType::I8,
    DType::I16,
    DType::I32,
    DType::I64,
    DType::U8,
    DType::U16,
    DType::U32,
    DType::U64,
    DType::F16,
    DType::BF16,
    DType::F32,
    DType::F64,
    DType::C64,
    DType::C128,
];

impl DType {
    /// Returns the size in bytes of a single element.
    ///
    /// `Unicode(n)` stores UTF-32 code units, so it takes `4 * n` bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 | DType::F16 | DType::BF16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 | DType::C64 => 8,
            DType::C128 => 16,
            DType::Unicode(n) => n.saturating_mul(4),
            DType::Bytes(n) | DType::Void(n) => *n,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DType::I8
                | DType::I16
                | DType::I32
                | DType::I64
                | DType::U8
                | DType::U16
                | DType::U32
                | DType::U64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, DType::C64 | DType::C128)
    }

    /// Integer or real floating point. Bool, complex and opaque types are not
    /// numeric for statistics and value search.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, DType::Unicode(_) | DType::Bytes(_) | DType::Void(_))
    }

    /// Inclusive representable range for integer dtypes.
    pub fn int_range(&self) -> Option<(i128, i128)> {
        let range = match self {
            DType::I8 => (i8::MIN as i128, i8::MAX as i128),
            DType::I16 => (i16::MIN as i128, i16::MAX as i128),
            DType::I32 => (i32::MIN as i128, i32::MAX as i128),
            DType::I64 => (i64::MIN as i128, i64::MAX as i128),
            DType::U8 => (0, u8::MAX as i128),
            DType::U16 => (0, u16::MAX as i128),
            DType::U32 => (0, u32::MAX as i128),
            DType::U64 => (0, u64::MAX as i128),
            _ => return None,
        };
        Some(range)
    }

    /// Parses a numpy array-protocol type string such as `<f4`, `|b1` or `<U10`.
    ///
    /// Returns the dtype together with the byte order of the buffer it
    /// describes. Structured (list) descriptors, object arrays and datetimes
    /// are not representable and yield `None`.
    pub fn from_numpy_descr(descr: &str) -> Option<(DType, ByteOrder)> {
        let descr = descr.trim();
        let (order, rest) = match descr.chars().next()? {
            '<' | '|' => (ByteOrder::Little, &descr[1..]),
            '>' => (ByteOrder::Big, &descr[1..]),
            '=' => (ByteOrder::native(), &descr[1..]),
            _ => (ByteOrder::native(), descr),
        };
        let kind = rest.chars().next()?;
        let width: usize = rest[kind.len_utf8()..].parse().ok()?;
        let dtype = match (kind, width) {
            ('b', 1) | ('?', 1) => DType::Bool,
            ('i', 1) => DType::I8,
            ('i', 2) => DType::I16,
            ('i', 4) => DType::I32,
            ('i', 8) => DType::I64,
            ('u', 1) => DType::U8,
            ('u', 2) => DType::U16,
            ('u', 4) => DType::U32,
            ('u', 8) => DType::U64,
            ('f', 2) => DType::F16,
            ('f', 4) => DType::F32,
            ('f', 8) => DType::F64,
            ('c', 8) => DType::C64,
            ('c', 16) => DType::C128,
            ('U', n) if n.checked_mul(4).is_some() => DType::Unicode(n),
            ('S', n) | ('a', n) => DType::Bytes(n),
            ('V', n) => DType::Void(n),
            _ => return None,
        };
        Some((dtype, order))
    }

    /// Returns the little-endian numpy descriptor for this dtype, or `None`
    /// when numpy has no equivalent (bfloat16).
    pub fn to_numpy_descr(&self) -> Option<String> {
        let descr = match self {
            DType::Bool => "|b1".to_string(),
            DType::I8 => "|i1".to_string(),
            DType::U8 => "|u1".to_string(),
            DType::I16 => "<i2".to_string(),
            DType::I32 => "<i4".to_string(),
            DType::I64 => "<i8".to_string(),
            DType::U16 => "<u2".to_string(),
            DType::U32 => "<u4".to_string(),
            DType::U64 => "<u8".to_string(),
            DType::F16 => "<f2".to_string(),
            DType::F32 => "<f4".to_string(),
            DType::F64 => "<f8".to_string(),
            DType::C64 => "<c8".to_string(),
            DType::C128 => "<c16".to_string(),
            DType::Unicode(n) => format!("<U{}", n),
            DType::Bytes(n) => format!("|S{}", n),
            DType::Void(n) => format!("|V{}", n),
            DType::BF16 => return None,
        };
        Some(descr)
    }

    /// Maps a PyTorch typed-storage class name (e.g. `FloatStorage`) to a dtype.
    pub fn from_torch_storage(name: &str) -> Option<DType> {
        let dtype = match name {
            "BoolStorage" => DType::Bool,
            "CharStorage" => DType::I8,
            "ShortStorage" => DType::I16,
            "IntStorage" => DType::I32,
            "LongStorage" => DType::I64,
            "ByteStorage" => DType::U8,
            "UInt16Storage" => DType::U16,
            "UInt32Storage" => DType::U32,
            "UInt64Storage" => DType::U64,
            "HalfStorage" => DType::F16,
            "BFloat16Storage" => DType::BF16,
            "FloatStorage" => DType::F32,
            "DoubleStorage" => DType::F64,
            "ComplexFloatStorage" => DType::C64,
            "ComplexDoubleStorage" => DType::C128,
            _ => return None,
        };
        Some(dtype)
    }

    /// Looks up a fixed-width dtype by its canonical name (`float32`, `uint8`, ...).
    pub fn from_name(name: &str) -> Option<DType> {
        let lower = name.trim().to_ascii_lowercase();
        FIXED_DTYPES
            .iter()
            .copied()
            .find(|dtype| dtype.to_string() == lower)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Bool => write!(f, "bool"),
            DType::I8 => write!(f, "int8"),
            DType::I16 => write!(f, "int16"),
            DType::I32 => write!(f, "int32"),
            DType::I64 => write!(f, "int64"),
            DType::U8 => write!(f, "uint8"),
            DType::U16 => write!(f, "uint16"),
            DType::U32 => write!(f, "uint32"),
            DType::U64 => write!(f, "uint64"),
            DType::F16 => write!(f, "float16"),
            DType::BF16 => write!(f, "bfloat16"),
            DType::F32 => write!(f, "float32"),
            DType::F64 => write!(f, "float64"),
            DType::C64 => write!(f, "complex64"),
            DType::C128 => write!(f, "complex128"),
            DType::Unicode(n) => write!(f, "<U{}", n),
            DType::Bytes(n) => write!(f, "|S{}", n),
            DType::Void(n) => write!(f, "|V{}", n),
        }
    }
}
