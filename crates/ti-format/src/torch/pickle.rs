//! A restricted pickle reader for PyTorch's `data.pkl`.
//!
//! Only the opcodes PyTorch emits (protocol 2 and up) are understood, and only
//! a fixed allow-list of reconstructors is interpreted. Any other global is
//! turned into an inert [`Value::Object`]; nothing is ever executed.

use std::collections::HashMap;

use ti_tensor::DType;

use crate::error::{FormatError, Result};

// Opcodes, see CPython's Lib/pickletools.py.
pub(crate) const PROTO: u8 = 0x80;
pub(crate) const FRAME: u8 = 0x95;
pub(crate) const STOP: u8 = b'.';
pub(crate) const MARK: u8 = b'(';
pub(crate) const POP: u8 = b'0';
pub(crate) const POP_MARK: u8 = b'1';
pub(crate) const DUP: u8 = b'2';
pub(crate) const NONE: u8 = b'N';
pub(crate) const NEWTRUE: u8 = 0x88;
pub(crate) const NEWFALSE: u8 = 0x89;
pub(crate) const BININT: u8 = b'J';
pub(crate) const BININT1: u8 = b'K';
pub(crate) const BININT2: u8 = b'M';
pub(crate) const LONG1: u8 = 0x8a;
pub(crate) const LONG4: u8 = 0x8b;
pub(crate) const BINFLOAT: u8 = b'G';
pub(crate) const BINUNICODE: u8 = b'X';
pub(crate) const SHORT_BINUNICODE: u8 = 0x8c;
pub(crate) const BINUNICODE8: u8 = 0x8d;
pub(crate) const BINSTRING: u8 = b'T';
pub(crate) const SHORT_BINSTRING: u8 = b'U';
pub(crate) const BINBYTES: u8 = b'B';
pub(crate) const SHORT_BINBYTES: u8 = b'C';
pub(crate) const BINBYTES8: u8 = 0x8e;
pub(crate) const EMPTY_TUPLE: u8 = b')';
pub(crate) const TUPLE: u8 = b't';
pub(crate) const TUPLE1: u8 = 0x85;
pub(crate) const TUPLE2: u8 = 0x86;
pub(crate) const TUPLE3: u8 = 0x87;
pub(crate) const EMPTY_LIST: u8 = b']';
pub(crate) const LIST: u8 = b'l';
pub(crate) const APPEND: u8 = b'a';
pub(crate) const APPENDS: u8 = b'e';
pub(crate) const EMPTY_DICT: u8 = b'}';
pub(crate) const DICT: u8 = b'd';
pub(crate) const SETITEM: u8 = b's';
pub(crate) const SETITEMS: u8 = b'u';
pub(crate) const EMPTY_SET: u8 = 0x8f;
pub(crate) const ADDITEMS: u8 = 0x90;
pub(crate) const FROZENSET: u8 = 0x91;
pub(crate) const BINPUT: u8 = b'q';
pub(crate) const LONG_BINPUT: u8 = b'r';
pub(crate) const MEMOIZE: u8 = 0x94;
pub(crate) const BINGET: u8 = b'h';
pub(crate) const LONG_BINGET: u8 = b'j';
pub(crate) const GLOBAL: u8 = b'c';
pub(crate) const STACK_GLOBAL: u8 = 0x93;
pub(crate) const REDUCE: u8 = b'R';
pub(crate) const BUILD: u8 = b'b';
pub(crate) const NEWOBJ: u8 = 0x81;
pub(crate) const BINPERSID: u8 = b'Q';

/// A typed storage referenced through a persistent id.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageRef {
    /// Archive record name under `data/`.
    pub key: String,
    pub dtype: DType,
    /// Storage length in elements.
    pub numel: usize,
}

/// A strided view over a storage, as rebuilt by `_rebuild_tensor_v2`.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorRef {
    pub storage: StorageRef,
    /// Offset into the storage, in elements.
    pub offset: usize,
    pub shape: Vec<usize>,
    /// Strides in elements.
    pub stride: Vec<usize>,
}

/// Values the reader can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    /// Integers wider than 64 bits are not representable and decode as `None`.
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    /// Lists, sets and frozensets.
    List(Vec<Value>),
    /// Dicts and `OrderedDict`s, in insertion order.
    Dict(Vec<(Value, Value)>),
    Global { module: String, name: String },
    Storage(StorageRef),
    Tensor(TensorRef),
    /// Result of calling a global outside the allow-list.
    Object(String),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Global { .. } => "global",
            Value::Storage(_) => "storage",
            Value::Tensor(_) => "tensor",
            Value::Object(_) => "object",
        }
    }
}

fn err(msg: impl Into<String>) -> FormatError {
    FormatError::Pickle(msg.into())
}

/// Run the pickle program in `data` and return the value left by `STOP`.
pub fn load(data: &[u8]) -> Result<Value> {
    Machine {
        data,
        pos: 0,
        stack: Vec::new(),
        marks: Vec::new(),
        memo: HashMap::new(),
    }
    .run()
}

struct Machine<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
}

impl<'a> Machine<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| err(format!("truncated pickle at byte {}", self.pos)))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(buf))
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn len64(&mut self) -> Result<usize> {
        let n = self.u64()?;
        usize::try_from(n).map_err(|_| err(format!("length {} exceeds address space", n)))
    }

    fn line(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| err("unterminated GLOBAL line"))?;
        let line = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(line)
    }

    fn text(&mut self, n: usize) -> Result<Value> {
        let bytes = self.take(n)?;
        let s = std::str::from_utf8(bytes).map_err(|_| err("invalid utf-8 in string"))?;
        Ok(Value::Str(s.to_string()))
    }

    fn pop(&mut self) -> Result<Value> {
        let floor = self.marks.last().copied().unwrap_or(0);
        if self.stack.len() <= floor {
            return Err(err("stack underflow"));
        }
        self.stack.pop().ok_or_else(|| err("stack underflow"))
    }

    fn top(&mut self) -> Result<&mut Value> {
        self.stack.last_mut().ok_or_else(|| err("empty stack"))
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let mark = self.marks.pop().ok_or_else(|| err("MARK expected"))?;
        Ok(self.stack.split_off(mark))
    }

    fn memo_put(&mut self, index: u32) -> Result<()> {
        let value = self.top()?.clone();
        self.memo.insert(index, value);
        Ok(())
    }

    fn memo_get(&mut self, index: u32) -> Result<()> {
        let value = self
            .memo
            .get(&index)
            .cloned()
            .ok_or_else(|| err(format!("memo key {} not found", index)))?;
        self.stack.push(value);
        Ok(())
    }

    fn run(mut self) -> Result<Value> {
        loop {
            let op = self.byte()?;
            match op {
                PROTO => {
                    let proto = self.byte()?;
                    if proto > 5 {
                        return Err(err(format!("unsupported pickle protocol {}", proto)));
                    }
                }
                FRAME => {
                    self.u64()?;
                }
                STOP => return self.stack.pop().ok_or_else(|| err("STOP with empty stack")),

                MARK => self.marks.push(self.stack.len()),
                POP => {
                    // POP right after MARK discards the mark
                    if self.marks.last() == Some(&self.stack.len()) {
                        self.marks.pop();
                    } else {
                        self.pop()?;
                    }
                }
                POP_MARK => {
                    self.pop_mark()?;
                }
                DUP => {
                    let v = self.top()?.clone();
                    self.stack.push(v);
                }

                NONE => self.stack.push(Value::None),
                NEWTRUE => self.stack.push(Value::Bool(true)),
                NEWFALSE => self.stack.push(Value::Bool(false)),
                BININT => {
                    let v = self.u32()? as i32;
                    self.stack.push(Value::Int(v as i64));
                }
                BININT1 => {
                    let v = self.byte()?;
                    self.stack.push(Value::Int(v as i64));
                }
                BININT2 => {
                    let v = self.u16()?;
                    self.stack.push(Value::Int(v as i64));
                }
                LONG1 => {
                    let n = self.byte()? as usize;
                    let v = decode_long(self.take(n)?);
                    self.stack.push(v);
                }
                LONG4 => {
                    let n = self.u32()? as usize;
                    let v = decode_long(self.take(n)?);
                    self.stack.push(v);
                }
                BINFLOAT => {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(self.take(8)?);
                    self.stack.push(Value::Float(f64::from_be_bytes(buf)));
                }

                BINUNICODE => {
                    let n = self.u32()? as usize;
                    let v = self.text(n)?;
                    self.stack.push(v);
                }
                SHORT_BINUNICODE => {
                    let n = self.byte()? as usize;
                    let v = self.text(n)?;
                    self.stack.push(v);
                }
                BINUNICODE8 => {
                    let n = self.len64()?;
                    let v = self.text(n)?;
                    self.stack.push(v);
                }
                BINSTRING => {
                    let n = self.u32()? as usize;
                    let s = String::from_utf8_lossy(self.take(n)?).into_owned();
                    self.stack.push(Value::Str(s));
                }
                SHORT_BINSTRING => {
                    let n = self.byte()? as usize;
                    let s = String::from_utf8_lossy(self.take(n)?).into_owned();
                    self.stack.push(Value::Str(s));
                }
                BINBYTES => {
                    let n = self.u32()? as usize;
                    let b = self.take(n)?.to_vec();
                    self.stack.push(Value::Bytes(b));
                }
                SHORT_BINBYTES => {
                    let n = self.byte()? as usize;
                    let b = self.take(n)?.to_vec();
                    self.stack.push(Value::Bytes(b));
                }
                BINBYTES8 => {
                    let n = self.len64()?;
                    let b = self.take(n)?.to_vec();
                    self.stack.push(Value::Bytes(b));
                }

                EMPTY_TUPLE => self.stack.push(Value::Tuple(Vec::new())),
                TUPLE => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items));
                }
                TUPLE1 | TUPLE2 | TUPLE3 => {
                    let n = (op - TUPLE1 + 1) as usize;
                    let mut items = Vec::with_capacity(n);
                    for _ in 0..n {
                        items.push(self.pop()?);
                    }
                    items.reverse();
                    self.stack.push(Value::Tuple(items));
                }
                EMPTY_LIST | EMPTY_SET => self.stack.push(Value::List(Vec::new())),
                LIST | FROZENSET => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::List(items));
                }
                APPEND => {
                    let item = self.pop()?;
                    self.extend_list(vec![item])?;
                }
                APPENDS | ADDITEMS => {
                    let items = self.pop_mark()?;
                    self.extend_list(items)?;
                }
                EMPTY_DICT => self.stack.push(Value::Dict(Vec::new())),
                DICT => {
                    let items = self.pop_mark()?;
                    let pairs = pairs(items)?;
                    self.stack.push(Value::Dict(pairs));
                }
                SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.extend_dict(vec![(key, value)])?;
                }
                SETITEMS => {
                    let items = self.pop_mark()?;
                    let pairs = pairs(items)?;
                    self.extend_dict(pairs)?;
                }

                BINPUT => {
                    let i = self.byte()? as u32;
                    self.memo_put(i)?;
                }
                LONG_BINPUT => {
                    let i = self.u32()?;
                    self.memo_put(i)?;
                }
                MEMOIZE => {
                    let i = self.memo.len() as u32;
                    self.memo_put(i)?;
                }
                BINGET => {
                    let i = self.byte()? as u32;
                    self.memo_get(i)?;
                }
                LONG_BINGET => {
                    let i = self.u32()?;
                    self.memo_get(i)?;
                }

                GLOBAL => {
                    let module = self.line()?;
                    let name = self.line()?;
                    self.stack.push(Value::Global { module, name });
                }
                STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    match (module, name) {
                        (Value::Str(module), Value::Str(name)) => {
                            self.stack.push(Value::Global { module, name })
                        }
                        _ => return Err(err("STACK_GLOBAL expects two strings")),
                    }
                }
                REDUCE => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let v = reduce(callable, args)?;
                    self.stack.push(v);
                }
                NEWOBJ => {
                    let _args = self.pop()?;
                    let cls = self.pop()?;
                    self.stack.push(Value::Object(describe_callable(&cls)));
                }
                BUILD => {
                    // state is applied with __setstate__ in Python; tensors and
                    // dicts carry nothing we need in it
                    self.pop()?;
                    self.top()?;
                }
                BINPERSID => {
                    let pid = self.pop()?;
                    let v = persistent_load(pid)?;
                    self.stack.push(v);
                }

                other => {
                    return Err(err(format!(
                        "unsupported opcode 0x{:02x} at byte {}",
                        other,
                        self.pos - 1
                    )))
                }
            }
        }
    }

    fn extend_list(&mut self, items: Vec<Value>) -> Result<()> {
        match self.top()? {
            Value::List(list) => {
                list.extend(items);
                Ok(())
            }
            Value::Object(_) => Ok(()),
            other => Err(err(format!("cannot append to {}", other.kind()))),
        }
    }

    fn extend_dict(&mut self, new: Vec<(Value, Value)>) -> Result<()> {
        match self.top()? {
            Value::Dict(items) => {
                for (k, v) in new {
                    match items.iter_mut().find(|(existing, _)| *existing == k) {
                        Some(slot) => slot.1 = v,
                        None => items.push((k, v)),
                    }
                }
                Ok(())
            }
            Value::Object(_) => Ok(()),
            other => Err(err(format!("cannot set items on {}", other.kind()))),
        }
    }
}

fn pairs(items: Vec<Value>) -> Result<Vec<(Value, Value)>> {
    if items.len() % 2 != 0 {
        return Err(err("odd number of items for dict"));
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        out.push((k, v));
    }
    Ok(out)
}

/// Little-endian two's complement integer of arbitrary width.
fn decode_long(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Int(0);
    }
    if bytes.len() > 8 {
        return Value::None;
    }
    let fill = if bytes[bytes.len() - 1] & 0x80 != 0 { 0xff } else { 0 };
    let mut buf = [fill; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Value::Int(i64::from_le_bytes(buf))
}

fn describe_callable(v: &Value) -> String {
    match v {
        Value::Global { module, name } => format!("{}.{}", module, name),
        other => other.kind().to_string(),
    }
}

fn as_usize(v: &Value, what: &str) -> Result<usize> {
    match v {
        Value::Int(i) => usize::try_from(*i).map_err(|_| err(format!("negative {}: {}", what, i))),
        other => Err(err(format!("{} must be an int, got {}", what, other.kind()))),
    }
}

fn as_dims(v: &Value, what: &str) -> Result<Vec<usize>> {
    match v {
        Value::Tuple(items) | Value::List(items) => {
            items.iter().map(|item| as_usize(item, what)).collect()
        }
        other => Err(err(format!("{} must be a tuple, got {}", what, other.kind()))),
    }
}

fn reduce(callable: Value, args: Value) -> Result<Value> {
    let Value::Global { module, name } = &callable else {
        return Ok(Value::Object(describe_callable(&callable)));
    };
    let args = match args {
        Value::Tuple(items) => items,
        other => return Err(err(format!("REDUCE args must be a tuple, got {}", other.kind()))),
    };

    match (module.as_str(), name.as_str()) {
        ("torch._utils", "_rebuild_tensor_v2") | ("torch._utils", "_rebuild_tensor") => {
            if args.len() < 4 {
                return Err(err(format!("{} expects at least 4 arguments", name)));
            }
            let storage = match &args[0] {
                Value::Storage(s) => s.clone(),
                other => {
                    return Err(err(format!(
                        "{} expects a storage, got {}",
                        name,
                        other.kind()
                    )))
                }
            };
            let offset = as_usize(&args[1], "storage offset")?;
            let shape = as_dims(&args[2], "size")?;
            let stride = as_dims(&args[3], "stride")?;
            if shape.len() != stride.len() {
                return Err(err("size and stride differ in length"));
            }
            check_view(&storage, offset, &shape, &stride)?;
            Ok(Value::Tensor(TensorRef {
                storage,
                offset,
                shape,
                stride,
            }))
        }
        ("torch._utils", "_rebuild_parameter")
        | ("torch._utils", "_rebuild_parameter_with_state") => args
            .into_iter()
            .next()
            .ok_or_else(|| err("_rebuild_parameter without arguments")),
        // _rebuild_from_type_v2(func, new_type, args, state) rebuilds a
        // tensor subclass by calling func(*args)
        ("torch._tensor", "_rebuild_from_type_v2") => {
            let mut it = args.into_iter();
            match (it.next(), it.next(), it.next()) {
                (Some(func), Some(_), Some(inner)) => reduce(func, inner),
                _ => Err(err("_rebuild_from_type_v2 expects 4 arguments")),
            }
        }
        ("collections", "OrderedDict") => Ok(Value::Dict(Vec::new())),
        _ => {
            tracing::warn!("ignoring pickle global {}.{}", module, name);
            Ok(Value::Object(format!("{}.{}", module, name)))
        }
    }
}

/// A view must have an addressable byte size and, unless empty, end inside
/// its storage.
fn check_view(storage: &StorageRef, offset: usize, shape: &[usize], stride: &[usize]) -> Result<()> {
    let numel = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .filter(|n| n.checked_mul(storage.dtype.size_in_bytes()).is_some())
        .ok_or_else(|| err(format!("tensor size {:?} overflows the address space", shape)))?;
    if numel == 0 {
        return Ok(());
    }
    let last = shape
        .iter()
        .zip(stride)
        .try_fold(offset, |acc, (&d, &s)| (d - 1).checked_mul(s)?.checked_add(acc));
    match last {
        Some(last) if last < storage.numel => Ok(()),
        _ => Err(err(format!(
            "view (offset {}, size {:?}, stride {:?}) exceeds storage {} of {} elements",
            offset, shape, stride, storage.key, storage.numel
        ))),
    }
}

/// Resolve `('storage', StorageType, key, location, numel)`.
fn persistent_load(pid: Value) -> Result<Value> {
    let items = match pid {
        Value::Tuple(items) => items,
        other => {
            return Err(err(format!(
                "persistent id must be a tuple, got {}",
                other.kind()
            )))
        }
    };
    match items.as_slice() {
        [Value::Str(tag), ty, Value::Str(key), _location, numel] if tag == "storage" => {
            let type_name = match ty {
                Value::Global { name, .. } => name.as_str(),
                other => {
                    return Err(err(format!(
                        "storage type must be a global, got {}",
                        other.kind()
                    )))
                }
            };
            let dtype = DType::from_torch_storage(type_name)
                .ok_or_else(|| FormatError::UnsupportedDType(type_name.to_string()))?;
            Ok(Value::Storage(StorageRef {
                key: key.clone(),
                dtype,
                numel: as_usize(numel, "storage size")?,
            }))
        }
        _ => Err(err("unrecognized persistent id")),
    }
}
