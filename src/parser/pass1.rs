//! First pass - match arguments against a signature without side effects
//!
//! Only cheap checks happen here: tag tests, range checks and the
//! convertibility hooks of native types. Anything that allocates native
//! objects or moves ownership is deferred to the second pass.

use super::failure::{ArgRef, FailureReason, ParseFailure};
use super::signature::{CallSignature, ExactKind, Param, ParamFlags, ParamKind, Receiver};
use super::{Arg, CallArgs};
use crate::registry::{self, ConvertFlags, IntKind, ScalarError};
use crate::runtime::Runtime;
use crate::value::Value;
use crate::wrapper::{Wrapper, WrapperType};
use std::sync::Arc;

pub(super) enum Slot<'a> {
    /// Optional and not given.
    Missing,
    Ready(Arg),
    /// Converted by the second pass.
    Deferred(&'a Value),
}

pub(super) enum ReceiverMatch<'a> {
    None,
    Instance(&'a Arc<Wrapper>, registry::TypeId),
    Class(Option<Arc<WrapperType>>),
    Constructing(Option<&'a Arc<Wrapper>>),
}

pub(super) struct Matched<'a> {
    pub(super) receiver: ReceiverMatch<'a>,
    pub(super) slots: Vec<Slot<'a>>,
    pub(super) unused: Vec<(Arc<str>, Value)>,
}

pub(super) fn bind<'a>(
    rt: &Runtime,
    signature: &CallSignature,
    args: &'a CallArgs,
) -> Result<Matched<'a>, ParseFailure> {
    let positional = args.args();
    let (receiver, first) = bind_receiver(rt, signature, args)?;
    let given = positional.len() - first;
    if signature.max_positional().is_some_and(|max| given > max) {
        return Err(ParseFailure::new(FailureReason::TooMany));
    }

    let mut used = vec![false; args.keywords().len()];
    let mut slots = Vec::new();
    slots
        .try_reserve(signature.params().len())
        .map_err(|e| ParseFailure::raised(e.into()))?;
    // Overflow is only reported if nothing else is wrong with the call.
    let mut overflow = None;
    let mut next = first;

    for param in signature.params() {
        if param.kind == ParamKind::Rest {
            let rest = positional.get(next..).map(<[Value]>::to_vec).unwrap_or_default();
            slots.push(Slot::Ready(Arg::Rest(rest)));
            continue;
        }

        let (arg, arg_ref) = fetch(args, param, next, &mut used);
        if param.kind.consumes() {
            next += 1;
        }
        let Some(arg) = arg else {
            if param.optional {
                slots.push(Slot::Missing);
                continue;
            }
            return Err(missing_argument(signature, args, &used));
        };

        match check(rt, &param.kind, arg, arg_ref) {
            Ok(slot) => slots.push(slot),
            Err(failure) if failure.reason == FailureReason::Overflow => {
                overflow = Some(failure);
                slots.push(Slot::Missing);
            }
            Err(failure) => return Err(failure),
        }
    }

    let unused = check_keywords(signature, args, &used, given)?;
    if let Some(failure) = overflow {
        return Err(failure);
    }
    Ok(Matched {
        receiver,
        slots,
        unused,
    })
}

/// The receiver binding and the index of the first real positional argument.
fn bind_receiver<'a>(
    rt: &Runtime,
    signature: &CallSignature,
    args: &'a CallArgs,
) -> Result<(ReceiverMatch<'a>, usize), ParseFailure> {
    match signature.receiver() {
        Receiver::None => Ok((ReceiverMatch::None, 0)),
        Receiver::Instance(ty) => {
            let bound = args.receiver().and_then(Value::as_wrapper);
            if let Some(wrapper) = bound.filter(|w| w.is_instance_of(ty)) {
                return Ok((ReceiverMatch::Instance(wrapper, ty), 0));
            }
            // Class.method(obj, ...)
            let unbound = args.args().first().and_then(Value::as_wrapper);
            if let Some(wrapper) = unbound.filter(|w| w.is_instance_of(ty)) {
                return Ok((ReceiverMatch::Instance(wrapper, ty), 1));
            }
            let entry = rt.type_entry(ty).map_err(ParseFailure::raised)?;
            Err(ParseFailure::unbound(entry.name()))
        }
        Receiver::Class => {
            let class = match args.receiver() {
                Some(Value::Wrapper(w)) => Some(w.wrapper_type().clone()),
                Some(Value::Type(t)) => Some(t.clone()),
                _ => None,
            };
            Ok((ReceiverMatch::Class(class), 0))
        }
        Receiver::Constructor => Ok((
            ReceiverMatch::Constructing(args.receiver().and_then(Value::as_wrapper)),
            0,
        )),
    }
}

/// The argument for `param`: positional if there are enough, else by keyword.
fn fetch<'a>(
    args: &'a CallArgs,
    param: &Param,
    next: usize,
    used: &mut [bool],
) -> (Option<&'a Value>, ArgRef) {
    if let Some(value) = args.args().get(next) {
        return (Some(value), ArgRef::Position(next + 1));
    }
    let Some(name) = param.name.as_deref() else {
        return (None, ArgRef::None);
    };
    let arg_ref = ArgRef::Keyword(name.to_string());
    match args.keyword(name) {
        Some((index, value)) => {
            used[index] = true;
            (Some(value), arg_ref)
        }
        None => (None, arg_ref),
    }
}

/// A required argument is missing. A misspelt keyword explains that better
/// than "not enough arguments".
fn missing_argument(signature: &CallSignature, args: &CallArgs, used: &[bool]) -> ParseFailure {
    if !signature.collects_unused() {
        let unused = args.keywords().iter().zip(used).filter(|(_, used)| !**used);
        for ((name, _), _) in unused {
            match name.as_str() {
                None => return ParseFailure::keyword(FailureReason::KeywordNotString, name),
                Some(text) if signature.keyword_position(text).is_none() => {
                    return ParseFailure::keyword(FailureReason::UnknownKeyword, name);
                }
                Some(_) => {}
            }
        }
    }
    ParseFailure::new(FailureReason::TooFew)
}

/// Keywords no parameter took: duplicates of positional arguments, or unknown.
fn check_keywords(
    signature: &CallSignature,
    args: &CallArgs,
    used: &[bool],
    given: usize,
) -> Result<Vec<(Arc<str>, Value)>, ParseFailure> {
    let mut unused = Vec::new();
    for ((name, value), used) in args.keywords().iter().zip(used) {
        if *used {
            continue;
        }
        let Some(text) = name.as_str() else {
            return Err(ParseFailure::keyword(FailureReason::KeywordNotString, name));
        };
        match signature.keyword_position(text) {
            Some(position) if position < given => {
                return Err(ParseFailure::keyword(FailureReason::Duplicate, name));
            }
            _ if signature.collects_unused() => unused.push((Arc::from(text), value.clone())),
            _ => return Err(ParseFailure::keyword(FailureReason::UnknownKeyword, name)),
        }
    }
    Ok(unused)
}

pub(super) fn convert_flags(flags: ParamFlags) -> ConvertFlags {
    let mut out = ConvertFlags::empty();
    if flags.contains(ParamFlags::DEREF) {
        out |= ConvertFlags::NOT_NONE;
    }
    if flags.contains(ParamFlags::NO_CONVERTORS) {
        out |= ConvertFlags::NO_CONVERTORS;
    }
    out
}

fn scalar<T>(result: Result<T, ScalarError>, arg_ref: &ArgRef, arg: &Value) -> Result<T, ParseFailure> {
    result.map_err(|e| match e {
        ScalarError::WrongType => ParseFailure::wrong_type(arg_ref.clone(), arg),
        ScalarError::Overflow(range) => ParseFailure::overflow(arg_ref.clone(), range),
    })
}

fn is_callable(value: &Value) -> bool {
    matches!(value, Value::Callable(_) | Value::Type(_))
}

fn check<'a>(rt: &Runtime, kind: &ParamKind, arg: &'a Value, arg_ref: ArgRef) -> Result<Slot<'a>, ParseFailure> {
    let wrong = || -> Result<Slot<'a>, ParseFailure> { Err(ParseFailure::wrong_type(arg_ref.clone(), arg)) };
    let ready = |a: Arg| -> Result<Slot<'a>, ParseFailure> { Ok(Slot::Ready(a)) };
    match kind {
        ParamKind::Bool => ready(Arg::Bool(scalar(registry::to_bool(arg), &arg_ref, arg)?)),
        ParamKind::Char => ready(Arg::Char(scalar(registry::to_char(arg), &arg_ref, arg)?)),
        ParamKind::EncodedChar(encoding) => ready(Arg::Char(scalar(
            registry::to_encoded_char(arg, *encoding),
            &arg_ref,
            arg,
        )?)),
        ParamKind::WideChar => ready(Arg::WideChar(scalar(registry::to_wchar(arg), &arg_ref, arg)?)),
        ParamKind::Int(int_kind) => ready(Arg::Int(scalar(registry::to_int(arg, *int_kind), &arg_ref, arg)?)),
        ParamKind::Float32 => {
            let v = scalar(registry::to_float(arg), &arg_ref, arg)?;
            ready(Arg::Float(f64::from(v as f32)))
        }
        ParamKind::Float64 => ready(Arg::Float(scalar(registry::to_float(arg), &arg_ref, arg)?)),
        ParamKind::Exact(exact) => match (exact, arg) {
            (ExactKind::Bool, Value::Bool(b)) => ready(Arg::Bool(*b)),
            (ExactKind::Int32, Value::Int(_)) => {
                ready(Arg::Int(scalar(registry::to_int(arg, IntKind::I32), &arg_ref, arg)?))
            }
            (ExactKind::Float64, Value::Float(x)) => ready(Arg::Float(*x)),
            (ExactKind::Float32, Value::Float(x)) => ready(Arg::Float(f64::from(*x as f32))),
            _ => wrong(),
        },
        ParamKind::Bytes => ready(Arg::Bytes(scalar(registry::to_bytes(arg), &arg_ref, arg)?)),
        ParamKind::EncodedString(encoding) => ready(Arg::Bytes(scalar(
            registry::to_encoded_string(arg, *encoding),
            &arg_ref,
            arg,
        )?)),
        ParamKind::Text => ready(Arg::Text(scalar(registry::to_text(arg), &arg_ref, arg)?)),
        ParamKind::Object(value_kind) if arg.kind() == *value_kind => ready(Arg::Object(arg.clone())),
        ParamKind::ObjectOrNone(value_kind) if arg.is_none() || arg.kind() == *value_kind => {
            ready(Arg::Object(arg.clone()))
        }
        ParamKind::AnyObject | ParamKind::GetWrapper => ready(Arg::Object(arg.clone())),
        ParamKind::Callable if is_callable(arg) => ready(Arg::Object(arg.clone())),
        ParamKind::CallableOrNone if arg.is_none() || is_callable(arg) => ready(Arg::Object(arg.clone())),
        ParamKind::Instance { ty, flags } => {
            match rt.can_convert(arg, *ty, convert_flags(*flags)) {
                Ok(true) => Ok(Slot::Deferred(arg)),
                Ok(false) => wrong(),
                Err(error) => Err(ParseFailure::raised(error)),
            }
        }
        ParamKind::Array(ty) => match rt.can_convert_sequence(arg, *ty) {
            Ok(true) => Ok(Slot::Deferred(arg)),
            Ok(false) => wrong(),
            Err(error) => Err(ParseFailure::raised(error)),
        },
        ParamKind::VoidPtr => match arg {
            Value::None => ready(Arg::VoidPtr(None)),
            Value::VoidPtr(ptr) => ready(Arg::VoidPtr(Some(*ptr))),
            Value::Capsule(capsule) => ready(Arg::VoidPtr(Some(capsule.ptr))),
            _ => wrong(),
        },
        ParamKind::Capsule(name) => match arg {
            Value::None => ready(Arg::VoidPtr(None)),
            Value::Capsule(capsule) if capsule.name.as_deref() == Some(&**name) => {
                ready(Arg::VoidPtr(Some(capsule.ptr)))
            }
            _ => wrong(),
        },
        // Rest is bound by the caller.
        ParamKind::Rest => Ok(Slot::Missing),
        ParamKind::Object(_) | ParamKind::ObjectOrNone(_) | ParamKind::Callable | ParamKind::CallableOrNone => {
            wrong()
        }
    }
}
