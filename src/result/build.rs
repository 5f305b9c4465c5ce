//! Building dynamic results from native values

use super::{FormatItem, ResultFormat};
use crate::error::{Error, Result};
use crate::logging::perf;
use crate::registry::{Encoding, IntKind, Transfer, TypeId};
use crate::runtime::Runtime;
use crate::value::{Callable, Capsule, NativePtr, Value};
use crate::wrapper::Wrapper;
use std::sync::Arc;

/// A native value handed to [`build_result`].
#[derive(Debug)]
pub enum NativeArg<'a> {
    /// `b`
    Bool(bool),
    /// `c`, or `a` with an encoding
    Char(u8),
    /// `w`
    WideChar(char),
    /// Any integer code; checked against the code's native width.
    Int(i128),
    /// `f`, `d`
    Float(f64),
    /// `s`, `g`, or `A` with an encoding; `None` is a null string.
    Bytes(Option<&'a [u8]>),
    /// `x`
    Str(Option<&'a str>),
    /// `D`: an existing native object.
    Instance {
        ptr: Option<NativePtr>,
        ty: TypeId,
        transfer: Transfer,
    },
    /// `N`: a native object just created by the call.
    NewInstance {
        ptr: Option<NativePtr>,
        ty: TypeId,
        owner: Option<Arc<Wrapper>>,
    },
    /// `r`: an array of `len` instances of `ty`.
    Array {
        ptr: Option<NativePtr>,
        len: usize,
        ty: TypeId,
    },
    /// `R`, `S`
    Object(Value),
    /// `V`
    VoidPtr(Option<NativePtr>),
    /// `z`
    Capsule {
        ptr: Option<NativePtr>,
        name: &'a str,
    },
}

fn int_kind(code: char) -> Option<IntKind> {
    Some(match code {
        'L' => IntKind::I8,
        'M' => IntKind::U8,
        'h' => IntKind::I16,
        't' => IntKind::U16,
        'i' | 'e' => IntKind::I32,
        'u' => IntKind::U32,
        'l' | 'n' => IntKind::I64,
        'm' | 'o' => IntKind::U64,
        '=' => IntKind::Size,
        _ => return None,
    })
}

fn encoding(item: FormatItem) -> Result<Encoding> {
    item.sub.and_then(Encoding::from_format).ok_or_else(|| {
        Error::System(format!(
            "build_result(): invalid encoding after '{}'",
            item.code
        ))
    })
}

fn decode(bytes: &[u8], encoding: Encoding) -> Result<Value> {
    encoding.decode(bytes).map(Value::from).ok_or_else(|| {
        Error::Value(format!(
            "bytes cannot be decoded as {:?}",
            encoding
        ))
    })
}

fn build_one(rt: &Runtime, item: FormatItem, arg: NativeArg<'_>) -> Result<Value> {
    match (item.code, arg) {
        ('b', NativeArg::Bool(b)) => Ok(Value::Bool(b)),
        ('c', NativeArg::Char(c)) => Ok(Value::bytes(&[c])),
        ('a', NativeArg::Char(c)) => decode(&[c], encoding(item)?),
        ('w', NativeArg::WideChar(c)) => Ok(Value::from(c.to_string())),
        ('f' | 'd', NativeArg::Float(x)) => Ok(Value::Float(x)),
        ('s' | 'g', NativeArg::Bytes(b)) => Ok(b.map_or(Value::None, Value::bytes)),
        ('A', NativeArg::Bytes(b)) => {
            let encoding = encoding(item)?;
            b.map_or(Ok(Value::None), |b| decode(b, encoding))
        }
        ('x', NativeArg::Str(s)) => Ok(s.map_or(Value::None, Value::str)),
        ('D', NativeArg::Instance { ptr, ty, transfer }) => rt.from_native(ptr, ty, &transfer),
        ('N', NativeArg::NewInstance { ptr, ty, owner }) => rt.from_new_native(ptr, ty, owner.as_ref()),
        ('r', NativeArg::Array { ptr, len, ty }) => match ptr {
            Some(ptr) => rt.native_array_to_tuple(ptr, len, ty),
            None => Ok(Value::None),
        },
        ('R' | 'S', NativeArg::Object(value)) => Ok(value),
        ('V', NativeArg::VoidPtr(ptr)) => Ok(ptr.map_or(Value::None, Value::VoidPtr)),
        ('z', NativeArg::Capsule { ptr, name }) => Ok(ptr.map_or(Value::None, |ptr| {
            Value::Capsule(Capsule {
                name: Some(Arc::from(name)),
                ptr,
            })
        })),
        (code, NativeArg::Int(i)) => {
            let Some(kind) = int_kind(code) else {
                return Err(mismatch(code));
            };
            let (min, max) = kind.range();
            if i < min || i > max {
                return Err(Error::Overflow(format!(
                    "value must be in the range {} to {}",
                    min, max
                )));
            }
            Ok(Value::Int(i))
        }
        (code, _) => Err(mismatch(code)),
    }
}

fn mismatch(code: char) -> Error {
    Error::System(format!(
        "build_result(): argument does not match format character '{}'",
        code
    ))
}

/// Build a dynamic value from native values, one per format character.
///
/// A parenthesised format builds a tuple; otherwise the format names
/// exactly one value.
pub fn build_result(rt: &Runtime, format: &str, args: Vec<NativeArg<'_>>) -> Result<Value> {
    let _perf = perf::track("build_result");
    let format = ResultFormat::compile(format, "build_result", "aA")?;
    if args.len() != format.items.len() {
        return Err(Error::System(format!(
            "build_result(): {} values given for {} format characters",
            args.len(),
            format.items.len()
        )));
    }

    let mut values = Vec::new();
    values.try_reserve(args.len())?;
    for (item, arg) in format.items.iter().zip(args) {
        values.push(build_one(rt, *item, arg)?);
    }

    if format.tuple {
        Ok(Value::tuple(values))
    } else {
        Ok(values.pop().unwrap_or(Value::None))
    }
}

/// Call a dynamic callable with arguments built from native values.
///
/// `format` is a parenthesised argument format; `"()"` calls with no arguments.
pub fn call_method(rt: &Runtime, callable: &Callable, format: &str, args: Vec<NativeArg<'_>>) -> Result<Value> {
    if !format.starts_with('(') {
        return Err(Error::System(format!(
            "call_method(): argument format \"{}\" must be a tuple",
            format
        )));
    }
    let built = build_result(rt, format, args)?;
    let args = built.as_sequence().unwrap_or_default();
    tracing::trace!(
        event = "call_method",
        method = callable.name(),
        args = args.len(),
        "Calling dynamic method"
    );
    callable.call(args)
}
