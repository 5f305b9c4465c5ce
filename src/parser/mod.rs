//! Call-signature parser - overload resolution for calls into native code
//!
//! Design: each candidate signature is tried in two passes. The first
//! binds arguments and runs only cheap checks, so a rejected candidate
//! leaves nothing behind. The second performs the conversions that allocate
//! native objects or move ownership, and runs only for the candidate that
//! matched. [`ParseState`] collects the failures of rejected candidates so
//! the caller can report all of them once none matched.

mod args;
mod failure;
mod pass1;
mod pass2;
mod signature;

pub use args::CallArgs;
pub use failure::{ArgRef, FailureReason, ParseFailure};
pub use signature::{
    CallSignature, ExactKind, FormatArg, Param, ParamFlags, ParamKind, Receiver, SignatureBuilder,
};

use crate::error::{Error, Result};
use crate::logging::{self, perf};
use crate::registry::{ConversionResult, NativeArray};
use crate::runtime::Runtime;
use crate::value::{NativePtr, Value};
use crate::wrapper::{Wrapper, WrapperType};
use std::sync::Arc;

/// One converted argument.
#[derive(Debug)]
pub enum Arg {
    /// Optional and not given; the native default applies.
    Missing,
    Bool(bool),
    Char(u8),
    WideChar(char),
    /// Already checked against the parameter's native range.
    Int(i128),
    Float(f64),
    Bytes(Option<Vec<u8>>),
    Text(Option<String>),
    Object(Value),
    Instance(ConversionResult),
    Array(NativeArray),
    VoidPtr(Option<NativePtr>),
    Rest(Vec<Value>),
}

/// The receiver a call was bound to.
#[derive(Debug)]
pub enum BoundReceiver {
    None,
    Instance {
        wrapper: Arc<Wrapper>,
        /// The native object viewed as the method's class.
        ptr: NativePtr,
    },
    Class(Arc<WrapperType>),
    /// The instance a constructor is initialising.
    Constructing(Arc<Wrapper>),
}

impl BoundReceiver {
    pub fn wrapper(&self) -> Option<&Arc<Wrapper>> {
        match self {
            BoundReceiver::Instance { wrapper, .. } | BoundReceiver::Constructing(wrapper) => Some(wrapper),
            _ => None,
        }
    }
}

/// Arguments of a call that matched a signature, one slot per parameter.
#[derive(Debug)]
pub struct ParsedArgs {
    receiver: BoundReceiver,
    args: Vec<Arg>,
    owner: Option<Arc<Wrapper>>,
    unused: Vec<(Arc<str>, Value)>,
}

impl ParsedArgs {
    pub fn receiver(&self) -> &BoundReceiver {
        &self.receiver
    }

    /// Native address of the bound instance.
    pub fn receiver_ptr(&self) -> Option<NativePtr> {
        match self.receiver {
            BoundReceiver::Instance { ptr, .. } => Some(ptr),
            _ => None,
        }
    }

    /// The argument a `TRANSFER_THIS` parameter named as owner of the new object.
    pub fn owner(&self) -> Option<&Arc<Wrapper>> {
        self.owner.as_ref()
    }

    /// Keywords no parameter claimed, for another overload to use.
    pub fn unused_keywords(&self) -> &[(Arc<str>, Value)] {
        &self.unused
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.args.get(index)
    }

    pub fn is_given(&self, index: usize) -> bool {
        self.args.get(index).is_some_and(|a| !matches!(a, Arg::Missing))
    }

    /// Move the argument out, leaving [`Arg::Missing`].
    pub fn take(&mut self, index: usize) -> Arg {
        self.args
            .get_mut(index)
            .map_or(Arg::Missing, |a| std::mem::replace(a, Arg::Missing))
    }

    pub fn bool(&self, index: usize) -> Option<bool> {
        match self.get(index)? {
            Arg::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn int<T: TryFrom<i128>>(&self, index: usize) -> Option<T> {
        match self.get(index)? {
            Arg::Int(i) => T::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn float(&self, index: usize) -> Option<f64> {
        match self.get(index)? {
            Arg::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn char(&self, index: usize) -> Option<u8> {
        match self.get(index)? {
            Arg::Char(c) => Some(*c),
            _ => None,
        }
    }

    pub fn wide_char(&self, index: usize) -> Option<char> {
        match self.get(index)? {
            Arg::WideChar(c) => Some(*c),
            _ => None,
        }
    }

    pub fn bytes(&self, index: usize) -> Option<&[u8]> {
        match self.get(index)? {
            Arg::Bytes(b) => b.as_deref(),
            _ => None,
        }
    }

    pub fn text(&self, index: usize) -> Option<&str> {
        match self.get(index)? {
            Arg::Text(t) => t.as_deref(),
            _ => None,
        }
    }

    pub fn object(&self, index: usize) -> Option<&Value> {
        match self.get(index)? {
            Arg::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn instance(&self, index: usize) -> Option<&ConversionResult> {
        match self.get(index)? {
            Arg::Instance(c) => Some(c),
            _ => None,
        }
    }

    /// Native pointer of an instance argument; `None` for a null value.
    pub fn instance_ptr(&self, index: usize) -> Option<NativePtr> {
        self.instance(index)?.ptr()
    }

    pub fn array(&self, index: usize) -> Option<&NativeArray> {
        match self.get(index)? {
            Arg::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn void_ptr(&self, index: usize) -> Option<NativePtr> {
        match self.get(index)? {
            Arg::VoidPtr(p) => *p,
            _ => None,
        }
    }

    pub fn rest(&self, index: usize) -> Option<&[Value]> {
        match self.get(index)? {
            Arg::Rest(values) => Some(values),
            _ => None,
        }
    }
}

/// Failures collected while trying the overloads of one callable.
#[derive(Debug, Default)]
pub struct ParseState {
    failures: Vec<ParseFailure>,
    tried: usize,
}

impl ParseState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try one candidate.
    ///
    /// `Ok(None)` means the candidate rejected the call and the next one
    /// should be tried. An error ends the search: an overflowing argument,
    /// an exception raised by a check, or a conversion error of the matched
    /// candidate.
    pub fn parse(
        &mut self,
        rt: &Runtime,
        signature: &CallSignature,
        args: &CallArgs,
    ) -> Result<Option<ParsedArgs>> {
        let candidate = self.tried;
        self.tried += 1;
        let log_failures = rt.config().diagnostics.log_failures;

        match pass1::bind(rt, signature, args) {
            Ok(matched) => {
                self.failures.clear();
                match pass2::convert(rt, signature, matched) {
                    Ok(parsed) => Ok(Some(parsed)),
                    Err(error) => {
                        if log_failures {
                            logging::log_parse_conversion_error(candidate, &error.to_string());
                        }
                        Err(error)
                    }
                }
            }
            Err(failure) if failure.reason.is_escalated() => {
                self.failures.clear();
                let error = failure.into_error();
                if log_failures {
                    logging::log_parse_escalation(candidate, &error.to_string());
                }
                Err(error)
            }
            Err(failure) => {
                rt.count_overload_failure();
                if log_failures {
                    logging::log_parse_failure(candidate, failure.reason.as_str());
                }
                self.failures.try_reserve(1)?;
                self.failures.push(failure);
                Ok(None)
            }
        }
    }

    /// Failures of the candidates tried so far, in order.
    pub fn failures(&self) -> &[ParseFailure] {
        &self.failures
    }

    /// The error for a method none of whose overloads matched.
    ///
    /// With a docstring, its lines label the overloads instead of their numbers.
    pub fn no_method(self, scope: Option<&str>, method: &str, doc: Option<&str>) -> Error {
        failure::no_method(&self.failures, scope, method, doc)
    }

    pub fn no_function(self, function: &str, doc: Option<&str>) -> Error {
        self.no_method(None, function, doc)
    }
}

/// Try `candidates` in order and return the index and arguments of the
/// first that matches, or the combined failure of all of them.
pub fn parse_overloads(
    rt: &Runtime,
    candidates: &[CallSignature],
    args: &CallArgs,
    scope: Option<&str>,
    method: &str,
    doc: Option<&str>,
) -> Result<(usize, ParsedArgs)> {
    let _perf = perf::track("parse_overloads");
    let mut state = ParseState::new();
    for (index, signature) in candidates.iter().enumerate() {
        if let Some(parsed) = state.parse(rt, signature, args)? {
            return Ok((index, parsed));
        }
    }
    let doc = doc.filter(|_| rt.config().diagnostics.use_docstrings);
    Err(state.no_method(scope, method, doc))
}
