//! Parsing results of dynamic overrides back into native values

use super::{build::call_method, FormatItem, NativeArg, ResultFormat};
use crate::error::{Error, Result};
use crate::logging::{self, perf};
use crate::parser::FormatArg;
use crate::registry::{
    self, ConversionResult, ConvertFlags, Converted, Encoding, IntKind, ScalarError, Transfer, TypeId,
};
use crate::runtime::Runtime;
use crate::value::{Callable, NativePtr, Value, ValueKind};
use crate::wrapper::Wrapper;
use bitflags::bitflags;
use std::sync::Arc;

/// Key under which the receiver keeps the last instance an override returned.
const KEPT_RESULT: i32 = -1;

bitflags! {
    /// Sub-format flags of an `H` instance result.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResultFlags: u8 {
        /// `None` is not an acceptable result.
        const DEREF     = 0x01;
        /// Native code takes ownership of the returned object.
        const FACTORY   = 0x02;
        /// Native code gets its own copy.
        const MAKE_COPY = 0x04;
    }
}

/// One native value parsed from an override result.
#[derive(Debug)]
pub enum ResultValue {
    Bool(bool),
    Char(u8),
    WideChar(char),
    Int(i128),
    Float(f64),
    Bytes(Option<Vec<u8>>),
    Text(Option<String>),
    Instance(ConversionResult),
    Object(Value),
    VoidPtr(Option<NativePtr>),
}

/// Why one element was rejected; `None` when there is nothing to add.
type Invalid = Option<Error>;

fn scalar<T>(result: std::result::Result<T, ScalarError>, value: &Value) -> std::result::Result<T, Invalid> {
    result.map_err(|e| match e {
        ScalarError::WrongType => Some(Error::Type(format!("unexpected type '{}'", value.type_name()))),
        ScalarError::Overflow(range) => Some(Error::Overflow(range)),
    })
}

fn int_kind(code: char) -> Option<IntKind> {
    Some(match code {
        'L' => IntKind::I8,
        'M' => IntKind::U8,
        'h' => IntKind::I16,
        't' => IntKind::U16,
        'i' => IntKind::I32,
        'u' => IntKind::U32,
        'l' | 'n' => IntKind::I64,
        'm' | 'o' => IntKind::U64,
        '=' => IntKind::Size,
        _ => return None,
    })
}

/// Walks the format items, taking `H`, `N`, `T` and `z` arguments in order.
struct ResultParser<'a, 'f> {
    rt: &'a Runtime,
    receiver: Option<&'a Arc<Wrapper>>,
    format: &'f str,
    args: std::slice::Iter<'f, FormatArg<'f>>,
}

impl<'a, 'f> ResultParser<'a, 'f> {
    fn bad_format(&self, detail: &str) -> Error {
        Error::System(format!(
            "parse_result(): invalid format string \"{}\": {}",
            self.format, detail
        ))
    }

    fn encoding(&self, item: FormatItem) -> Result<Encoding> {
        item.sub
            .and_then(Encoding::from_format)
            .ok_or_else(|| self.bad_format("invalid encoding"))
    }

    fn type_arg(&mut self) -> Result<TypeId> {
        match self.args.next() {
            Some(FormatArg::Type(ty)) => Ok(*ty),
            _ => Err(self.bad_format("expected a type argument")),
        }
    }

    fn kind_arg(&mut self) -> Result<ValueKind> {
        match self.args.next() {
            Some(FormatArg::Kind(kind)) => Ok(*kind),
            _ => Err(self.bad_format("expected a kind argument")),
        }
    }

    fn capsule_arg(&mut self) -> Result<&'f str> {
        match self.args.next() {
            Some(FormatArg::Capsule(name)) => Ok(*name),
            _ => Err(self.bad_format("expected a capsule name")),
        }
    }

    /// The outer `Result` is a malformed format; the inner one an unusable value.
    fn parse_one(
        &mut self,
        item: FormatItem,
        value: &Value,
    ) -> Result<std::result::Result<Option<ResultValue>, Invalid>> {
        let wrong = || Some(Error::Type(format!("unexpected type '{}'", value.type_name())));
        let parsed = match item.code {
            'b' => scalar(registry::to_bool(value), value).map(ResultValue::Bool),
            'c' => scalar(registry::to_char(value), value).map(ResultValue::Char),
            'a' => {
                let encoding = self.encoding(item)?;
                scalar(registry::to_encoded_char(value, encoding), value).map(ResultValue::Char)
            }
            'w' => scalar(registry::to_wchar(value), value).map(ResultValue::WideChar),
            'f' => scalar(registry::to_float(value), value).map(|x| ResultValue::Float(f64::from(x as f32))),
            'd' => scalar(registry::to_float(value), value).map(ResultValue::Float),
            's' | 'g' => scalar(registry::to_bytes(value), value).map(ResultValue::Bytes),
            'A' => {
                let encoding = self.encoding(item)?;
                scalar(registry::to_encoded_string(value, encoding), value).map(ResultValue::Bytes)
            }
            'x' => scalar(registry::to_text(value), value).map(ResultValue::Text),
            'H' => {
                let flags = item
                    .sub
                    .and_then(|c| c.to_digit(8))
                    .and_then(|d| u8::try_from(d).ok())
                    .and_then(ResultFlags::from_bits)
                    .ok_or_else(|| self.bad_format("invalid flags after 'H'"))?;
                let ty = self.type_arg()?;
                self.instance(value, ty, flags)?
            }
            'N' => {
                let kind = self.kind_arg()?;
                if value.is_none() || value.kind() == kind {
                    Ok(ResultValue::Object(value.clone()))
                } else {
                    Err(wrong())
                }
            }
            'T' => {
                let kind = self.kind_arg()?;
                if value.kind() == kind {
                    Ok(ResultValue::Object(value.clone()))
                } else {
                    Err(wrong())
                }
            }
            'O' => Ok(ResultValue::Object(value.clone())),
            'V' => match value {
                Value::None => Ok(ResultValue::VoidPtr(None)),
                Value::VoidPtr(ptr) => Ok(ResultValue::VoidPtr(Some(*ptr))),
                Value::Capsule(capsule) => Ok(ResultValue::VoidPtr(Some(capsule.ptr))),
                _ => Err(wrong()),
            },
            'z' => {
                let name = self.capsule_arg()?;
                match value {
                    Value::None => Ok(ResultValue::VoidPtr(None)),
                    Value::Capsule(capsule) if capsule.name.as_deref() == Some(name) => {
                        Ok(ResultValue::VoidPtr(Some(capsule.ptr)))
                    }
                    _ => Err(wrong()),
                }
            }
            'Z' => {
                return Ok(if value.is_none() { Ok(None) } else { Err(wrong()) });
            }
            code => match int_kind(code) {
                Some(kind) => scalar(registry::to_int(value, kind), value).map(ResultValue::Int),
                None => return Err(self.bad_format(&format!("unknown format character '{}'", code))),
            },
        };
        Ok(parsed.map(Some))
    }

    fn instance(
        &self,
        value: &Value,
        ty: TypeId,
        flags: ResultFlags,
    ) -> Result<std::result::Result<ResultValue, Invalid>> {
        let convert = if flags.contains(ResultFlags::DEREF) {
            ConvertFlags::NOT_NONE
        } else {
            ConvertFlags::empty()
        };
        match self.rt.can_convert(value, ty, convert) {
            Ok(true) => {}
            Ok(false) => return Ok(Err(Some(Error::Type(format!("unexpected type '{}'", value.type_name()))))),
            Err(error) => return Ok(Err(Some(error))),
        }

        let transfer = if flags.contains(ResultFlags::FACTORY) {
            Transfer::ToNative
        } else {
            Transfer::Keep
        };
        let converted = match self.rt.to_native(value, ty, &transfer, convert) {
            Ok(converted) => converted,
            Err(error) => return Ok(Err(Some(error))),
        };

        if flags.contains(ResultFlags::MAKE_COPY) {
            let Some(ptr) = converted.ptr() else {
                return Ok(Ok(ResultValue::Instance(converted)));
            };
            let entry = self.rt.type_entry(ty)?;
            let Some(copy) = entry.behaviour().copy(ptr) else {
                return Ok(Err(Some(Error::Type(format!("'{}' cannot be copied", entry.name())))));
            };
            drop(converted);
            return Ok(Ok(ResultValue::Instance(ConversionResult::new(
                entry,
                Converted::temporary(copy),
            ))));
        }

        // The pointer handed out is only valid while the wrapper lives.
        if let (Some(receiver), Some(wrapper)) = (self.receiver, value.as_wrapper()) {
            if !flags.contains(ResultFlags::FACTORY) && !Arc::ptr_eq(receiver, wrapper) {
                receiver.keep_reference(KEPT_RESULT, value.clone());
            }
        }
        Ok(Ok(ResultValue::Instance(converted)))
    }
}

/// The error for an unusable override result, after reporting it.
fn bad_result(rt: &Runtime, receiver: Option<&Arc<Wrapper>>, method: &str, cause: Invalid) -> Error {
    let name = match receiver {
        Some(receiver) => format!("{}.{}", receiver.wrapper_type().name(), method),
        None => method.to_string(),
    };
    let error = match cause {
        Some(cause) => cause.with_message(format!("invalid result from {}(), {}", name, cause.message())),
        None => Error::Type(format!("invalid result from {}()", name)),
    };
    logging::log_bad_result(&name, &error.to_string());
    rt.report_virtual_error(&error, receiver);
    error
}

/// Convert the result of a dynamic override of `method` into native values.
///
/// A parenthesised format requires a tuple of exactly that many items.
/// `Z` checks for `None` and yields nothing. `H`, `N`, `T` and `z` each take
/// the next entry of `args`.
pub fn parse_result(
    rt: &Runtime,
    receiver: Option<&Arc<Wrapper>>,
    method: &str,
    format: &str,
    args: &[FormatArg<'_>],
    value: &Value,
) -> Result<Vec<ResultValue>> {
    let _perf = perf::track("parse_result");
    let compiled = ResultFormat::compile(format, "parse_result", "aAH")?;

    let items: &[Value] = if compiled.tuple {
        match value {
            Value::Tuple(items) if items.len() == compiled.items.len() => &items[..],
            _ => {
                let detail = Error::Type(format!(
                    "a tuple of {} items is expected",
                    compiled.items.len()
                ));
                return Err(bad_result(rt, receiver, method, Some(detail)));
            }
        }
    } else {
        std::slice::from_ref(value)
    };

    let mut parser = ResultParser {
        rt,
        receiver,
        format,
        args: args.iter(),
    };
    let mut out = Vec::new();
    out.try_reserve(items.len())?;
    for (item, value) in compiled.items.iter().zip(items) {
        match parser.parse_one(*item, value)? {
            Ok(Some(parsed)) => out.push(parsed),
            Ok(None) => {}
            Err(cause) => return Err(bad_result(rt, receiver, method, cause)),
        }
    }
    if parser.args.next().is_some() {
        return Err(parser.bad_format("more arguments than the format uses"));
    }
    Ok(out)
}

/// Run a dynamic override of a native virtual and parse its result.
///
/// An error raised by the override is reported the same way as an unusable
/// result, since the native caller has no way to receive it.
pub fn call_override(
    rt: &Runtime,
    receiver: &Arc<Wrapper>,
    method: &Callable,
    args_format: &str,
    args: Vec<NativeArg<'_>>,
    result_format: &str,
    result_args: &[FormatArg<'_>],
) -> Result<Vec<ResultValue>> {
    let value = match call_method(rt, method, args_format, args) {
        Ok(value) => value,
        Err(error) => {
            rt.report_virtual_error(&error, Some(receiver));
            return Err(error);
        }
    };
    parse_result(rt, Some(receiver), method.name(), result_format, result_args, &value)
}
