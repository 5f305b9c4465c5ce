//! Scalar convertors - integers, floats, characters and strings

use crate::value::Value;
use num_traits::{Bounded, ToPrimitive};

/// Why a scalar conversion failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarError {
    WrongType,
    /// The value is an integer but does not fit; carries the allowed range.
    Overflow(String),
}

/// Native integer widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Size,
}

fn bounds<T: Bounded + ToPrimitive>() -> (i128, i128) {
    (
        T::min_value().to_i128().unwrap_or(i128::MIN),
        T::max_value().to_i128().unwrap_or(i128::MAX),
    )
}

impl IntKind {
    pub fn name(self) -> &'static str {
        match self {
            IntKind::I8 => "signed char",
            IntKind::U8 => "unsigned char",
            IntKind::I16 => "short",
            IntKind::U16 => "unsigned short",
            IntKind::I32 => "int",
            IntKind::U32 => "unsigned int",
            IntKind::I64 => "long long",
            IntKind::U64 => "unsigned long long",
            IntKind::Size => "size_t",
        }
    }

    pub fn range(self) -> (i128, i128) {
        match self {
            IntKind::I8 => bounds::<i8>(),
            IntKind::U8 => bounds::<u8>(),
            IntKind::I16 => bounds::<i16>(),
            IntKind::U16 => bounds::<u16>(),
            IntKind::I32 => bounds::<i32>(),
            IntKind::U32 => bounds::<u32>(),
            IntKind::I64 => bounds::<i64>(),
            IntKind::U64 => bounds::<u64>(),
            IntKind::Size => bounds::<usize>(),
        }
    }
}

/// Encodings for strings passed as native byte strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Latin1,
    Utf8,
}

impl Encoding {
    pub fn from_format(c: char) -> Option<Self> {
        match c {
            'A' => Some(Encoding::Ascii),
            'L' => Some(Encoding::Latin1),
            '8' => Some(Encoding::Utf8),
            _ => None,
        }
    }

    pub fn format_char(self) -> char {
        match self {
            Encoding::Ascii => 'A',
            Encoding::Latin1 => 'L',
            Encoding::Utf8 => '8',
        }
    }

    pub fn encode(self, s: &str) -> Option<Vec<u8>> {
        match self {
            Encoding::Utf8 => Some(s.as_bytes().to_vec()),
            Encoding::Ascii => s.is_ascii().then(|| s.as_bytes().to_vec()),
            Encoding::Latin1 => s.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect(),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
            Encoding::Ascii => bytes.is_ascii().then(|| bytes.iter().map(|&b| char::from(b)).collect()),
            Encoding::Latin1 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

pub(crate) fn to_int(value: &Value, kind: IntKind) -> Result<i128, ScalarError> {
    let v = match value {
        Value::Int(i) => *i,
        Value::Bool(b) => *b as i128,
        _ => return Err(ScalarError::WrongType),
    };
    let (min, max) = kind.range();
    if v < min || v > max {
        return Err(ScalarError::Overflow(format!(
            "value must be in the range {} to {}",
            min, max
        )));
    }
    Ok(v)
}

pub(crate) fn to_bool(value: &Value) -> Result<bool, ScalarError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(i) => Ok(*i != 0),
        _ => Err(ScalarError::WrongType),
    }
}

pub(crate) fn to_float(value: &Value) -> Result<f64, ScalarError> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        _ => Err(ScalarError::WrongType),
    }
}

/// A single-byte `bytes` object.
pub(crate) fn to_char(value: &Value) -> Result<u8, ScalarError> {
    match value {
        Value::Bytes(b) if b.len() == 1 => Ok(b[0]),
        _ => Err(ScalarError::WrongType),
    }
}

/// A one-character `str` that encodes to a single byte.
pub(crate) fn to_encoded_char(value: &Value, encoding: Encoding) -> Result<u8, ScalarError> {
    let s = single_char_str(value)?;
    match encoding.encode(s).as_deref() {
        Some([b]) => Ok(*b),
        _ => Err(ScalarError::WrongType),
    }
}

pub(crate) fn to_wchar(value: &Value) -> Result<char, ScalarError> {
    single_char_str(value)?.chars().next().ok_or(ScalarError::WrongType)
}

fn single_char_str(value: &Value) -> Result<&str, ScalarError> {
    match value {
        Value::Str(s) if s.chars().count() == 1 => Ok(s),
        _ => Err(ScalarError::WrongType),
    }
}

/// A byte string or `None`. A `str` is rejected: bytes have no implied encoding.
pub(crate) fn to_bytes(value: &Value) -> Result<Option<Vec<u8>>, ScalarError> {
    match value {
        Value::None => Ok(None),
        Value::Bytes(b) => Ok(Some(b.to_vec())),
        _ => Err(ScalarError::WrongType),
    }
}

pub(crate) fn to_encoded_string(value: &Value, encoding: Encoding) -> Result<Option<Vec<u8>>, ScalarError> {
    match value {
        Value::None => Ok(None),
        Value::Str(s) => encoding.encode(s).map(Some).ok_or(ScalarError::WrongType),
        _ => Err(ScalarError::WrongType),
    }
}

/// A text string or `None`.
pub(crate) fn to_text(value: &Value) -> Result<Option<String>, ScalarError> {
    match value {
        Value::None => Ok(None),
        Value::Str(s) => Ok(Some(s.to_string())),
        _ => Err(ScalarError::WrongType),
    }
}
