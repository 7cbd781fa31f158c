use std::io::Read;

use ti_tensor::{ByteOrder, DType, Shape};

use crate::error::{FormatError, Result};

/// The six-byte magic string that opens every `.npy` file.
pub const NPY_MAGIC: [u8; 6] = [0x93, b'N', b'U', b'M', b'P', b'Y'];

/// Total header length (magic through newline) is padded to this multiple.
pub const NPY_HEADER_ALIGNMENT: usize = 64;

/// Parsed `.npy` header.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyHeader {
    /// Format version (major, minor): 1.0, 2.0 or 3.0.
    pub version: (u8, u8),
    pub dtype: DType,
    /// Byte order of the data that follows the header.
    pub order: ByteOrder,
    /// Data is stored column-major.
    pub fortran_order: bool,
    pub shape: Shape,
}

impl NpyHeader {
    /// A header describing `shape` x `dtype` in little-endian C order.
    pub fn new(dtype: DType, shape: Shape) -> NpyHeader {
        NpyHeader {
            version: (1, 0),
            dtype,
            order: ByteOrder::Little,
            fortran_order: false,
            shape,
        }
    }

    /// Parse a header from the beginning of a reader, leaving the reader at
    /// the first data byte.
    ///
    /// Reads the magic and version, the header length (u16 LE for 1.0, u32 LE
    /// otherwise), then the Python dict literal holding `descr`,
    /// `fortran_order` and `shape`.
    pub fn parse(reader: &mut impl Read) -> Result<NpyHeader> {
        let mut magic = [0u8; 6];
        reader.read_exact(&mut magic)?;
        if magic != NPY_MAGIC {
            return Err(FormatError::InvalidMagic(magic));
        }

        let mut version = [0u8; 2];
        reader.read_exact(&mut version)?;
        let header_len = match version[0] {
            1 => {
                let mut buf2 = [0u8; 2];
                reader.read_exact(&mut buf2)?;
                u16::from_le_bytes(buf2) as usize
            }
            2 | 3 => {
                let mut buf4 = [0u8; 4];
                reader.read_exact(&mut buf4)?;
                u32::from_le_bytes(buf4) as usize
            }
            v => {
                return Err(FormatError::InvalidHeader(format!(
                    "unsupported format version {}.{}",
                    v, version[1]
                )))
            }
        };

        let mut text = Vec::new();
        reader.take(header_len as u64).read_to_end(&mut text)?;
        if text.len() != header_len {
            return Err(FormatError::InvalidHeader(format!(
                "header declares {} bytes but only {} are present",
                header_len,
                text.len()
            )));
        }
        let text = String::from_utf8(text)
            .map_err(|_| FormatError::InvalidHeader("header is not valid text".to_string()))?;

        let fields = match Literal::parse(&text)? {
            Literal::Dict(fields) => fields,
            _ => {
                return Err(FormatError::InvalidHeader(
                    "header is not a dictionary".to_string(),
                ))
            }
        };
        let field = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v)
                .ok_or_else(|| FormatError::InvalidHeader(format!("missing '{}'", name)))
        };

        let (dtype, order) = match field("descr")? {
            Literal::Str(descr) => DType::from_numpy_descr(descr)
                .ok_or_else(|| FormatError::UnsupportedDType(descr.clone()))?,
            Literal::List(_) => {
                return Err(FormatError::UnsupportedDType(
                    "structured (record) dtype".to_string(),
                ))
            }
            other => {
                return Err(FormatError::InvalidHeader(format!(
                    "'descr' must be a string, got {:?}",
                    other
                )))
            }
        };
        let fortran_order = match field("fortran_order")? {
            Literal::Bool(b) => *b,
            other => {
                return Err(FormatError::InvalidHeader(format!(
                    "'fortran_order' must be a bool, got {:?}",
                    other
                )))
            }
        };
        let shape = match field("shape")? {
            Literal::Tuple(items) => items
                .iter()
                .map(|item| match item {
                    Literal::Int(d) => usize::try_from(*d).map_err(|_| {
                        FormatError::InvalidHeader(format!("negative dimension {}", d))
                    }),
                    other => Err(FormatError::InvalidHeader(format!(
                        "shape entries must be integers, got {:?}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(FormatError::InvalidHeader(format!(
                    "'shape' must be a tuple, got {:?}",
                    other
                )))
            }
        };
        if shape
            .iter()
            .try_fold(dtype.size_in_bytes().max(1), |acc: usize, &d| acc.checked_mul(d))
            .is_none()
        {
            return Err(FormatError::InvalidHeader(format!(
                "shape {:?} overflows the address space",
                shape
            )));
        }

        tracing::debug!(
            "npy header v{}.{}: descr={} fortran_order={} shape={:?}",
            version[0],
            version[1],
            dtype,
            fortran_order,
            shape
        );

        Ok(NpyHeader {
            version: (version[0], version[1]),
            dtype,
            order,
            fortran_order,
            shape: Shape::new(shape),
        })
    }

    /// Serialize the header, padded so the data starts on a 64-byte boundary.
    ///
    /// Always writes little-endian C order; version 2.0 is used only when the
    /// dict does not fit a u16 length.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let descr = self.dtype.to_numpy_descr().ok_or_else(|| {
            FormatError::UnsupportedDType(format!("{} has no .npy equivalent", self.dtype))
        })?;
        let dims = self.shape.dims();
        let shape = match dims.len() {
            0 => "()".to_string(),
            1 => format!("({},)", dims[0]),
            _ => format!(
                "({})",
                dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
            ),
        };
        let dict = format!(
            "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
            descr, shape
        );

        let mut out = Vec::with_capacity(dict.len() + NPY_HEADER_ALIGNMENT * 2);
        for (major, prefix) in [(1u8, 10usize), (2u8, 12usize)] {
            let unpadded = prefix + dict.len() + 1;
            let total = unpadded.div_ceil(NPY_HEADER_ALIGNMENT) * NPY_HEADER_ALIGNMENT;
            let header_len = total - prefix;
            if major == 1 && header_len > u16::MAX as usize {
                continue;
            }
            out.extend_from_slice(&NPY_MAGIC);
            out.extend_from_slice(&[major, 0]);
            if major == 1 {
                out.extend_from_slice(&(header_len as u16).to_le_bytes());
            } else {
                let len = u32::try_from(header_len).map_err(|_| {
                    FormatError::InvalidHeader("header too long for .npy 2.0".to_string())
                })?;
                out.extend_from_slice(&len.to_le_bytes());
            }
            out.extend_from_slice(dict.as_bytes());
            out.resize(total - 1, b' ');
            out.push(b'\n');
            break;
        }
        Ok(out)
    }
}

/// The subset of Python literals that appear in `.npy` headers.
#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Int(i64),
    Bool(bool),
    None,
    Tuple(Vec<Literal>),
    List(Vec<Literal>),
    Dict(Vec<(String, Literal)>),
}

impl Literal {
    fn parse(text: &str) -> Result<Literal> {
        let mut p = LiteralParser {
            src: text.as_bytes(),
            pos: 0,
            depth: 0,
        };
        let value = p.value()?;
        p.skip_ws();
        if p.pos != p.src.len() {
            return Err(p.error("trailing characters"));
        }
        Ok(value)
    }
}

/// Deepest bracket nesting accepted in a header literal.
const MAX_LITERAL_DEPTH: usize = 32;

struct LiteralParser<'a> {
    src: &'a [u8],
    pos: usize,
    depth: usize,
}

impl LiteralParser<'_> {
    fn error(&self, what: &str) -> FormatError {
        FormatError::InvalidHeader(format!("{} at byte {}", what, self.pos))
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn value(&mut self) -> Result<Literal> {
        match self.peek() {
            Some(b'{') => self.nested(Self::dict),
            Some(b'(') => self.nested(|p| Ok(Literal::Tuple(p.sequence(b'(', b')')?))),
            Some(b'[') => self.nested(|p| Ok(Literal::List(p.sequence(b'[', b']')?))),
            Some(b'\'') | Some(b'"') => Ok(Literal::Str(self.string()?)),
            Some(c) if c == b'-' || c.is_ascii_digit() => self.int(),
            Some(c) if c.is_ascii_alphabetic() => self.word(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of header")),
        }
    }

    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Result<Literal>) -> Result<Literal> {
        if self.depth >= MAX_LITERAL_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn dict(&mut self) -> Result<Literal> {
        self.pos += 1;
        let mut fields = Vec::new();
        loop {
            if self.peek() == Some(b'}') {
                self.pos += 1;
                return Ok(Literal::Dict(fields));
            }
            let key = match self.value()? {
                Literal::Str(s) => s,
                _ => return Err(self.error("dictionary keys must be strings")),
            };
            if self.peek() != Some(b':') {
                return Err(self.error("expected ':'"));
            }
            self.pos += 1;
            let value = self.value()?;
            fields.push((key, value));
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {}
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn sequence(&mut self, open: u8, close: u8) -> Result<Vec<Literal>> {
        debug_assert_eq!(self.src.get(self.pos), Some(&open));
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.value()?);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(c) if c == close => {}
                _ => return Err(self.error("expected ',' or closing bracket")),
            }
        }
    }

    fn string(&mut self) -> Result<String> {
        let quote = self.src[self.pos];
        self.pos += 1;
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos] != quote {
            if self.src[self.pos] == b'\\' {
                return Err(self.error("escape sequences are not supported"));
            }
            self.pos += 1;
        }
        if self.pos >= self.src.len() {
            return Err(self.error("unterminated string"));
        }
        let s = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| self.error("invalid utf-8 in string"))?
            .to_string();
        self.pos += 1;
        Ok(s)
    }

    fn int(&mut self) -> Result<Literal> {
        let start = self.pos;
        if self.src[self.pos] == b'-' {
            self.pos += 1;
        }
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        // Python 2 era headers may write longs as `3L`
        let digits = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default();
        if self.src.get(self.pos) == Some(&b'L') {
            self.pos += 1;
        }
        digits
            .parse()
            .map(Literal::Int)
            .map_err(|_| self.error("invalid integer"))
    }

    fn word(&mut self) -> Result<Literal> {
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_alphanumeric() {
            self.pos += 1;
        }
        match &self.src[start..self.pos] {
            b"True" => Ok(Literal::Bool(true)),
            b"False" => Ok(Literal::Bool(false)),
            b"None" => Ok(Literal::None),
            _ => Err(self.error("unknown identifier")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn raw_header(major: u8, dict: &str) -> Vec<u8> {
        let mut out = NPY_MAGIC.to_vec();
        out.extend_from_slice(&[major, 0]);
        if major == 1 {
            out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
        } else {
            out.extend_from_slice(&(dict.len() as u32).to_le_bytes());
        }
        out.extend_from_slice(dict.as_bytes());
        out
    }

    #[test]
    fn test_write_then_parse() {
        let header = NpyHeader::new(DType::F32, Shape::new(vec![3, 4]));
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len() % NPY_HEADER_ALIGNMENT, 0);
        assert_eq!(*bytes.last().unwrap(), b'\n');
        let parsed = NpyHeader::parse(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_shape_literals() {
        let scalar = NpyHeader::new(DType::F64, Shape::new(vec![])).to_bytes().unwrap();
        assert!(String::from_utf8_lossy(&scalar).contains("'shape': ()"));
        let one = NpyHeader::new(DType::I8, Shape::new(vec![5])).to_bytes().unwrap();
        assert!(String::from_utf8_lossy(&one).contains("'shape': (5,)"));
    }

    #[test]
    fn test_parse_big_endian_fortran_v2() {
        let bytes = raw_header(
            2,
            "{'descr': '>i8', 'fortran_order': True, 'shape': (2, 3), }\n",
        );
        let h = NpyHeader::parse(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(h.version, (2, 0));
        assert_eq!(h.dtype, DType::I64);
        assert_eq!(h.order, ByteOrder::Big);
        assert!(h.fortran_order);
        assert_eq!(h.shape.dims(), &[2, 3]);
    }

    #[test]
    fn test_parse_python2_long_and_double_quotes() {
        let bytes = raw_header(
            1,
            "{\"descr\": \"<u2\", \"fortran_order\": False, \"shape\": (3L,)}",
        );
        let h = NpyHeader::parse(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(h.dtype, DType::U16);
        assert_eq!(h.shape.dims(), &[3]);
    }

    #[test]
    fn test_rejects_structured_and_object() {
        let structured = raw_header(
            1,
            "{'descr': [('x', '<f4'), ('y', '<i4')], 'fortran_order': False, 'shape': (2,), }",
        );
        assert!(matches!(
            NpyHeader::parse(&mut Cursor::new(&structured)),
            Err(FormatError::UnsupportedDType(_))
        ));
        let object = raw_header(1, "{'descr': '|O', 'fortran_order': False, 'shape': (2,), }");
        assert!(matches!(
            NpyHeader::parse(&mut Cursor::new(&object)),
            Err(FormatError::UnsupportedDType(_))
        ));
    }

    #[test]
    fn test_rejects_bad_magic_and_truncation() {
        assert!(matches!(
            NpyHeader::parse(&mut Cursor::new(b"PK\x03\x04\0\0\0\0".to_vec())),
            Err(FormatError::InvalidMagic(_))
        ));
        let mut bytes = raw_header(1, "{'descr': '<f4', 'fortran_order': False, 'shape': (2,), }");
        bytes.truncate(bytes.len() - 5);
        assert!(matches!(
            NpyHeader::parse(&mut Cursor::new(&bytes)),
            Err(FormatError::InvalidHeader(_))
        ));
        let missing = raw_header(1, "{'descr': '<f4', 'shape': (2,)}");
        assert!(NpyHeader::parse(&mut Cursor::new(&missing)).is_err());
    }

    #[test]
    fn test_rejects_deeply_nested_literal() {
        let mut dict = "{'descr': '<f4', 'fortran_order': False, 'shape': ".to_string();
        dict.push_str(&"(".repeat(60_000));
        let bytes = raw_header(1, &dict);
        match NpyHeader::parse(&mut Cursor::new(&bytes)) {
            Err(FormatError::InvalidHeader(msg)) => assert!(msg.contains("nesting")),
            other => panic!("unexpected {:?}", other),
        }

        let ok = format!(
            "{{'descr': '<f4', 'fortran_order': False, 'shape': (2,), 'x': {}1{}}}",
            "[".repeat(MAX_LITERAL_DEPTH - 1),
            "]".repeat(MAX_LITERAL_DEPTH - 1)
        );
        assert!(NpyHeader::parse(&mut Cursor::new(&raw_header(1, &ok))).is_ok());
    }

    #[test]
    fn test_rejects_oversized_unicode_width() {
        let bytes = raw_header(
            1,
            "{'descr': '<U4611686018427387905', 'fortran_order': False, 'shape': (1,), }",
        );
        assert!(matches!(
            NpyHeader::parse(&mut Cursor::new(&bytes)),
            Err(FormatError::UnsupportedDType(_))
        ));
        let wide = raw_header(
            1,
            "{'descr': '<U1152921504606846976', 'fortran_order': False, 'shape': (16,), }",
        );
        assert!(matches!(
            NpyHeader::parse(&mut Cursor::new(&wide)),
            Err(FormatError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_bfloat16_has_no_descr() {
        let header = NpyHeader::new(DType::BF16, Shape::new(vec![2]));
        assert!(matches!(header.to_bytes(), Err(FormatError::UnsupportedDType(_))));
    }
}
