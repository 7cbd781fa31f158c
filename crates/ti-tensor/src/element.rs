use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// A single tensor element, widened to a format-independent representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Complex { re: f64, im: f64 },
    Text(String),
    Bytes(Vec<u8>),
}

impl Element {
    /// Real value of an integer or float element.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Element::Int(v) => Some(*v as f64),
            Element::UInt(v) => Some(*v as f64),
            Element::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Value used when plotting: bools become 0/1 and complex numbers their
    /// magnitude.
    pub fn plot_value(&self) -> Option<f64> {
        match self {
            Element::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Element::Complex { re, im } => Some(re.hypot(*im)),
            other => other.as_f64(),
        }
    }
}

fn fmt_float(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_nan() {
        write!(f, "nan")
    } else if v.is_infinite() {
        write!(f, "{}", if v > 0.0 { "inf" } else { "-inf" })
    } else {
        write!(f, "{:?}", v)
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Element::Int(v) => write!(f, "{}", v),
            Element::UInt(v) => write!(f, "{}", v),
            Element::Float(v) => fmt_float(f, *v),
            Element::Complex { re, im } => {
                write!(f, "(")?;
                fmt_float(f, *re)?;
                if *im >= 0.0 || im.is_nan() {
                    write!(f, "+")?;
                }
                fmt_float(f, *im)?;
                write!(f, "j)")
            }
            Element::Text(s) => write!(f, "{}", s),
            Element::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

impl Serialize for Element {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Element::Bool(b) => serializer.serialize_bool(*b),
            Element::Int(v) => serializer.serialize_i64(*v),
            Element::UInt(v) => serializer.serialize_u64(*v),
            Element::Float(v) => serializer.serialize_f64(*v),
            Element::Complex { re, im } => {
                let mut state = serializer.serialize_struct("Complex", 2)?;
                state.serialize_field("re", re)?;
                state.serialize_field("im", im)?;
                state.end()
            }
            Element::Text(s) => serializer.serialize_str(s),
            Element::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
        }
    }
}

/// A nested-list rendering of (part of) a tensor, as returned by preview and
/// slice operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Nested {
    Scalar(Element),
    List(Vec<Nested>),
}

impl Nested {
    pub fn empty() -> Nested {
        Nested::List(Vec::new())
    }

    /// Folds row-major `values` into nested lists of the given dimensions.
    /// Empty `dims` produce a scalar.
    pub fn from_flat(values: Vec<Element>, dims: &[usize]) -> Nested {
        let mut iter = values.into_iter();
        build(&mut iter, dims)
    }

    /// Dimensions along the first element of every level.
    pub fn dims(&self) -> Vec<usize> {
        let mut dims = Vec::new();
        let mut cur = self;
        while let Nested::List(items) = cur {
            dims.push(items.len());
            match items.first() {
                Some(next) => cur = next,
                None => break,
            }
        }
        dims
    }

    /// All scalar leaves in row-major order.
    pub fn leaves(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }
}

fn build(iter: &mut impl Iterator<Item = Element>, dims: &[usize]) -> Nested {
    match dims.split_first() {
        None => match iter.next() {
            Some(e) => Nested::Scalar(e),
            None => Nested::empty(),
        },
        Some((&n, rest)) => Nested::List((0..n).map(|_| build(iter, rest)).collect()),
    }
}

fn collect_leaves<'a>(node: &'a Nested, out: &mut Vec<&'a Element>) {
    match node {
        Nested::Scalar(e) => out.push(e),
        Nested::List(items) => items.iter().for_each(|n| collect_leaves(n, out)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flat_2d() {
        let values = (0..6).map(Element::Int).collect();
        let nested = Nested::from_flat(values, &[2, 3]);
        assert_eq!(nested.dims(), vec![2, 3]);
        assert_eq!(
            serde_json::to_string(&nested).unwrap(),
            "[[0,1,2],[3,4,5]]"
        );
    }

    #[test]
    fn test_from_flat_scalar() {
        let nested = Nested::from_flat(vec![Element::Float(2.5)], &[]);
        assert_eq!(nested, Nested::Scalar(Element::Float(2.5)));
    }

    #[test]
    fn test_from_flat_zero_columns() {
        let nested = Nested::from_flat(vec![], &[2, 0]);
        assert_eq!(serde_json::to_string(&nested).unwrap(), "[[],[]]");
    }

    #[test]
    fn test_display() {
        assert_eq!(Element::Bool(true).to_string(), "True");
        assert_eq!(Element::Float(3.0).to_string(), "3.0");
        assert_eq!(Element::Float(f64::NAN).to_string(), "nan");
        assert_eq!(Element::Float(f64::NEG_INFINITY).to_string(), "-inf");
        assert_eq!(Element::Complex { re: 1.0, im: -2.0 }.to_string(), "(1.0-2.0j)");
        assert_eq!(Element::Complex { re: 1.0, im: 2.0 }.to_string(), "(1.0+2.0j)");
    }

    #[test]
    fn test_serialize_complex_and_nan() {
        let json = serde_json::to_string(&Element::Complex { re: 1.0, im: 0.5 }).unwrap();
        assert_eq!(json, r#"{"re":1.0,"im":0.5}"#);
        assert_eq!(serde_json::to_string(&Element::Float(f64::NAN)).unwrap(), "null");
    }

    #[test]
    fn test_plot_value() {
        assert_eq!(Element::Bool(true).plot_value(), Some(1.0));
        assert_eq!(Element::Complex { re: 3.0, im: 4.0 }.plot_value(), Some(5.0));
        assert_eq!(Element::Text("a".into()).plot_value(), None);
    }
}
