use half::{bf16, f16};
use serde::Serialize;
use thiserror::Error;

use crate::dtype::DType;
use crate::element::Element;

const TRUE_WORDS: [&str; 5] = ["true", "1", "yes", "t", "y"];
const FALSE_WORDS: [&str; 5] = ["false", "0", "no", "f", "n"];

/// Why a user-supplied literal could not be stored in a tensor element.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("cannot convert '{value}' to {dtype}: expected {expected}")]
    Syntax {
        value: String,
        dtype: String,
        expected: &'static str,
    },
    #[error("cannot convert '{value}' to {dtype}: value must be a finite number")]
    NonFinite { value: String, dtype: String },
    #[error("cannot convert '{value}' to {dtype}: contains a decimal point, integer types need a whole number")]
    Precision { value: String, dtype: String },
    #[error("'{value}' is out of range for {dtype} [{min}, {max}]")]
    Range {
        value: String,
        dtype: String,
        min: String,
        max: String,
    },
    #[error("cannot convert '{value}' to bool: expected one of true/1/yes/t/y or false/0/no/f/n")]
    Vocabulary { value: String },
}

/// Stable sub-kind of a [`ConversionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    Syntax,
    NonFinite,
    Precision,
    Range,
    Vocabulary,
}

impl ConversionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionKind::Syntax => "syntax",
            ConversionKind::NonFinite => "non_finite",
            ConversionKind::Precision => "precision",
            ConversionKind::Range => "range",
            ConversionKind::Vocabulary => "vocabulary",
        }
    }
}

impl ConversionError {
    pub fn kind(&self) -> ConversionKind {
        match self {
            ConversionError::Syntax { .. } => ConversionKind::Syntax,
            ConversionError::NonFinite { .. } => ConversionKind::NonFinite,
            ConversionError::Precision { .. } => ConversionKind::Precision,
            ConversionError::Range { .. } => ConversionKind::Range,
            ConversionError::Vocabulary { .. } => ConversionKind::Vocabulary,
        }
    }
}

/// Convert the literal `text` into an element of `dtype`.
///
/// - floats: a finite real number that fits the storage width
/// - integers: no decimal point, within the dtype's range
/// - bool: `true/1/yes/t/y` or `false/0/no/f/n`, any case
/// - complex: a Python-style literal such as `1+2j`, `-3.5j` or `(2-1j)`
/// - strings and records: taken verbatim, up to the element width
pub fn parse_value(text: &str, dtype: DType) -> Result<Element, ConversionError> {
    match dtype {
        DType::Bool => parse_bool(text),
        DType::F16 | DType::BF16 | DType::F32 | DType::F64 => parse_float(text, dtype),
        DType::C64 | DType::C128 => parse_complex(text, dtype),
        DType::Unicode(n) => {
            let count = text.chars().count();
            if count > n {
                return Err(width_error(text, dtype, count, n));
            }
            Ok(Element::Text(text.to_string()))
        }
        DType::Bytes(n) | DType::Void(n) => {
            if text.len() > n {
                return Err(width_error(text, dtype, text.len(), n));
            }
            Ok(Element::Bytes(text.as_bytes().to_vec()))
        }
        _ => parse_int(text, dtype),
    }
}

fn parse_bool(text: &str) -> Result<Element, ConversionError> {
    let lower = text.trim().to_lowercase();
    if TRUE_WORDS.contains(&lower.as_str()) {
        Ok(Element::Bool(true))
    } else if FALSE_WORDS.contains(&lower.as_str()) {
        Ok(Element::Bool(false))
    } else {
        Err(ConversionError::Vocabulary {
            value: text.to_string(),
        })
    }
}

fn float_limit(dtype: DType) -> f64 {
    match dtype {
        DType::F16 => f16::MAX.to_f64(),
        DType::BF16 => bf16::MAX.to_f64(),
        DType::F32 | DType::C64 => f32::MAX as f64,
        _ => f64::MAX,
    }
}

fn parse_float(text: &str, dtype: DType) -> Result<Element, ConversionError> {
    let x: f64 = text.trim().parse().map_err(|_| ConversionError::Syntax {
        value: text.to_string(),
        dtype: dtype.to_string(),
        expected: "a real number",
    })?;
    if !x.is_finite() {
        return Err(ConversionError::NonFinite {
            value: text.to_string(),
            dtype: dtype.to_string(),
        });
    }
    let limit = float_limit(dtype);
    if x.abs() > limit {
        return Err(ConversionError::Range {
            value: text.to_string(),
            dtype: dtype.to_string(),
            min: format!("{:e}", -limit),
            max: format!("{:e}", limit),
        });
    }
    Ok(Element::Float(x))
}

fn parse_int(text: &str, dtype: DType) -> Result<Element, ConversionError> {
    let Some((min, max)) = dtype.int_range() else {
        return Err(ConversionError::Syntax {
            value: text.to_string(),
            dtype: dtype.to_string(),
            expected: "a supported element type",
        });
    };
    if text.contains('.') {
        return Err(ConversionError::Precision {
            value: text.to_string(),
            dtype: dtype.to_string(),
        });
    }
    let x: i128 = text.trim().parse().map_err(|_| ConversionError::Syntax {
        value: text.to_string(),
        dtype: dtype.to_string(),
        expected: "an integer",
    })?;
    if x < min || x > max {
        return Err(ConversionError::Range {
            value: text.to_string(),
            dtype: dtype.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    // in range, so the narrowing below is exact
    if min < 0 {
        Ok(Element::Int(x as i64))
    } else {
        Ok(Element::UInt(x as u64))
    }
}

fn parse_complex(text: &str, dtype: DType) -> Result<Element, ConversionError> {
    let syntax = || ConversionError::Syntax {
        value: text.to_string(),
        dtype: dtype.to_string(),
        expected: "a complex literal such as 1+2j",
    };
    let (re, im) = split_complex(text).ok_or_else(syntax)?;
    let limit = float_limit(dtype);
    if (re.is_finite() && re.abs() > limit) || (im.is_finite() && im.abs() > limit) {
        return Err(ConversionError::Range {
            value: text.to_string(),
            dtype: dtype.to_string(),
            min: format!("{:e}", -limit),
            max: format!("{:e}", limit),
        });
    }
    Ok(Element::Complex { re, im })
}

/// Split `a+bj`, `bj` or `a` into its real and imaginary parts.
fn split_complex(text: &str) -> Option<(f64, f64)> {
    let mut s = text.trim();
    if let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        s = inner.trim();
    }
    if s.is_empty() || s.contains(char::is_whitespace) {
        return None;
    }
    let Some(body) = s.strip_suffix(['j', 'J']) else {
        return Some((parse_part(s)?, 0.0));
    };

    // the imaginary part starts at the last sign that is not an exponent sign
    let bytes = body.as_bytes();
    let split = (1..bytes.len())
        .rev()
        .find(|&i| matches!(bytes[i], b'+' | b'-') && !matches!(bytes[i - 1], b'e' | b'E'));
    match split {
        Some(p) => Some((parse_part(&body[..p])?, parse_imag(&body[p..])?)),
        None => Some((0.0, parse_imag(body)?)),
    }
}

fn parse_imag(s: &str) -> Option<f64> {
    match s {
        "" | "+" => Some(1.0),
        "-" => Some(-1.0),
        _ => parse_part(s),
    }
}

fn parse_part(s: &str) -> Option<f64> {
    // reject a doubled sign such as "1+-2j"
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    if unsigned.starts_with(['+', '-']) {
        return None;
    }
    s.parse().ok()
}

fn width_error(text: &str, dtype: DType, len: usize, width: usize) -> ConversionError {
    ConversionError::Range {
        value: text.to_string(),
        dtype: dtype.to_string(),
        min: "0".to_string(),
        max: format!("{} ({} given)", width, len),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_accepts_finite() {
        assert_eq!(parse_value("3.14", DType::F32), Ok(Element::Float(3.14)));
        assert_eq!(parse_value(" -2e3 ", DType::F64), Ok(Element::Float(-2000.0)));
        assert_eq!(parse_value("7", DType::F16), Ok(Element::Float(7.0)));
    }

    #[test]
    fn test_float_rejects_non_finite_text() {
        for text in ["nan", "NaN", "inf", "-inf", "infinity"] {
            let err = parse_value(text, DType::F32).unwrap_err();
            assert_eq!(err.kind(), ConversionKind::NonFinite, "{text}");
        }
        assert_eq!(
            parse_value("abc", DType::F64).unwrap_err().kind(),
            ConversionKind::Syntax
        );
    }

    #[test]
    fn test_float_overflowing_width() {
        assert_eq!(
            parse_value("1e300", DType::F32).unwrap_err().kind(),
            ConversionKind::Range
        );
        assert_eq!(
            parse_value("70000", DType::F16).unwrap_err().kind(),
            ConversionKind::Range
        );
        assert!(parse_value("1e300", DType::F64).is_ok());
    }

    #[test]
    fn test_int_decimal_point() {
        let err = parse_value("3.14", DType::I32).unwrap_err();
        assert_eq!(err.kind(), ConversionKind::Precision);
        assert!(err.to_string().contains("decimal point"));
        assert_eq!(
            parse_value("3.0", DType::U8).unwrap_err().kind(),
            ConversionKind::Precision
        );
    }

    #[test]
    fn test_int_range() {
        assert_eq!(parse_value("255", DType::U8), Ok(Element::UInt(255)));
        assert_eq!(parse_value("-128", DType::I8), Ok(Element::Int(-128)));
        let err = parse_value("256", DType::U8).unwrap_err();
        assert_eq!(err.kind(), ConversionKind::Range);
        assert!(err.to_string().contains("[0, 255]"));
        assert_eq!(
            parse_value("-1", DType::U64).unwrap_err().kind(),
            ConversionKind::Range
        );
        assert_eq!(
            parse_value("18446744073709551615", DType::U64),
            Ok(Element::UInt(u64::MAX))
        );
        assert_eq!(
            parse_value("12abc", DType::I64).unwrap_err().kind(),
            ConversionKind::Syntax
        );
    }

    #[test]
    fn test_bool_vocabulary() {
        for t in ["true", "TRUE", "1", "yes", "T", "y"] {
            assert_eq!(parse_value(t, DType::Bool), Ok(Element::Bool(true)));
        }
        for f in ["false", "0", "No", "f", "N"] {
            assert_eq!(parse_value(f, DType::Bool), Ok(Element::Bool(false)));
        }
        assert_eq!(
            parse_value("maybe", DType::Bool).unwrap_err().kind(),
            ConversionKind::Vocabulary
        );
    }

    #[test]
    fn test_complex_literals() {
        let c = |re, im| Ok(Element::Complex { re, im });
        assert_eq!(parse_value("1+2j", DType::C128), c(1.0, 2.0));
        assert_eq!(parse_value("(1.5-2j)", DType::C64), c(1.5, -2.0));
        assert_eq!(parse_value("3j", DType::C128), c(0.0, 3.0));
        assert_eq!(parse_value("-j", DType::C128), c(0.0, -1.0));
        assert_eq!(parse_value("4", DType::C128), c(4.0, 0.0));
        assert_eq!(parse_value("1e-3+2e+2J", DType::C128), c(1e-3, 200.0));
        for bad in ["", "j2", "1+2", "1 + 2j", "1+-2j", "abc"] {
            assert_eq!(
                parse_value(bad, DType::C128).unwrap_err().kind(),
                ConversionKind::Syntax,
                "{bad}"
            );
        }
    }

    #[test]
    fn test_strings_verbatim_within_width() {
        assert_eq!(
            parse_value(" hi", DType::Unicode(4)),
            Ok(Element::Text(" hi".to_string()))
        );
        assert_eq!(
            parse_value("hello", DType::Unicode(4)).unwrap_err().kind(),
            ConversionKind::Range
        );
        assert_eq!(
            parse_value("ab", DType::Bytes(2)),
            Ok(Element::Bytes(b"ab".to_vec()))
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ConversionKind::NonFinite.as_str(), "non_finite");
        assert_eq!(
            serde_json::to_string(&ConversionKind::Vocabulary).unwrap(),
            "\"vocabulary\""
        );
    }
}
