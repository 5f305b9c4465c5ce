//! Parse failures - why one candidate signature rejected a call

use crate::error::Error;
use crate::value::Value;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// An instance method was called unbound without an instance.
    Unbound,
    TooFew,
    TooMany,
    UnknownKeyword,
    Duplicate,
    WrongType,
    KeywordNotString,
    Overflow,
    UserException,
    Fatal,
}

impl FailureReason {
    /// Stops the whole overload search instead of moving to the next candidate.
    pub fn is_escalated(self) -> bool {
        matches!(
            self,
            FailureReason::Overflow | FailureReason::UserException | FailureReason::Fatal
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::Unbound => "unbound",
            FailureReason::TooFew => "too_few",
            FailureReason::TooMany => "too_many",
            FailureReason::UnknownKeyword => "unknown_keyword",
            FailureReason::Duplicate => "duplicate",
            FailureReason::WrongType => "wrong_type",
            FailureReason::KeywordNotString => "keyword_not_string",
            FailureReason::Overflow => "overflow",
            FailureReason::UserException => "user_exception",
            FailureReason::Fatal => "fatal",
        }
    }
}

/// The argument a failure is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgRef {
    None,
    /// 1-based position among the positional arguments.
    Position(usize),
    Keyword(String),
}

#[derive(Debug, Clone)]
pub struct ParseFailure {
    pub reason: FailureReason,
    pub arg: ArgRef,
    /// The offending argument, or keyword name.
    pub value: Option<Value>,
    detail: Option<String>,
    error: Option<Error>,
}

impl ParseFailure {
    pub(crate) fn new(reason: FailureReason) -> Self {
        Self {
            reason,
            arg: ArgRef::None,
            value: None,
            detail: None,
            error: None,
        }
    }

    pub(crate) fn unbound(type_name: &str) -> Self {
        Self {
            detail: Some(type_name.to_string()),
            ..Self::new(FailureReason::Unbound)
        }
    }

    pub(crate) fn wrong_type(arg: ArgRef, value: &Value) -> Self {
        Self {
            arg,
            value: Some(value.clone()),
            ..Self::new(FailureReason::WrongType)
        }
    }

    pub(crate) fn keyword(reason: FailureReason, name: &Value) -> Self {
        Self {
            value: Some(name.clone()),
            ..Self::new(reason)
        }
    }

    pub(crate) fn overflow(arg: ArgRef, range: String) -> Self {
        Self {
            arg,
            detail: Some(range),
            ..Self::new(FailureReason::Overflow)
        }
    }

    /// An error raised by user code during a check.
    pub(crate) fn raised(error: Error) -> Self {
        let reason = match error {
            Error::Fatal(_) => FailureReason::Fatal,
            _ => FailureReason::UserException,
        };
        Self {
            error: Some(error),
            ..Self::new(reason)
        }
    }

    /// The error an escalated failure surfaces as.
    pub(crate) fn into_error(mut self) -> Error {
        match (self.reason, self.error.take()) {
            (_, Some(error)) => error,
            (FailureReason::Overflow, None) => Error::Overflow(self.message()),
            (_, None) => Error::Type(self.message()),
        }
    }

    /// The per-candidate detail shown to the caller.
    pub fn message(&self) -> String {
        let keyword = || {
            self.value
                .as_ref()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        match self.reason {
            FailureReason::Unbound => format!(
                "first argument of unbound method must have type '{}'",
                self.detail.as_deref().unwrap_or_default()
            ),
            FailureReason::TooFew => "not enough arguments".to_string(),
            FailureReason::TooMany => "too many arguments".to_string(),
            FailureReason::KeywordNotString => format!(
                "{:?} keyword argument name is not a string",
                self.value.as_ref().unwrap_or(&Value::None)
            ),
            FailureReason::UnknownKeyword => {
                format!("'{}' is not a valid keyword argument", keyword())
            }
            FailureReason::Duplicate => {
                format!("'{}' has already been given as a positional argument", keyword())
            }
            FailureReason::WrongType => {
                let type_name = self.value.as_ref().map_or("NoneType", Value::type_name);
                match &self.arg {
                    ArgRef::Keyword(name) => {
                        format!("argument '{}' has unexpected type '{}'", name, type_name)
                    }
                    ArgRef::Position(n) => {
                        format!("argument {} has unexpected type '{}'", n, type_name)
                    }
                    ArgRef::None => format!("argument has unexpected type '{}'", type_name),
                }
            }
            FailureReason::Overflow => {
                let range = self.detail.as_deref().unwrap_or_default();
                match &self.arg {
                    ArgRef::Keyword(name) => format!("argument '{}' overflowed: {}", name, range),
                    ArgRef::Position(n) => format!("argument {} overflowed: {}", n, range),
                    ArgRef::None => format!("argument overflowed: {}", range),
                }
            }
            FailureReason::UserException | FailureReason::Fatal => match &self.error {
                Some(error) => error.message().to_string(),
                None => "unknown reason".to_string(),
            },
        }
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// The signature part of line `line` of a docstring, up to its closing parenthesis.
pub(crate) fn signature_from_docstring(doc: &str, line: usize) -> Option<&str> {
    let text = doc.lines().nth(line)?.trim();
    let open = text.find('(')?;
    let mut depth = 0usize;
    for (index, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..open + index + 1]);
                }
            }
            _ => {}
        }
    }
    Some(text)
}

/// The error raised when no candidate accepted a call.
///
/// `failures` holds one entry per candidate tried, in declaration order.
pub(crate) fn no_method(
    failures: &[ParseFailure],
    scope: Option<&str>,
    method: &str,
    doc: Option<&str>,
) -> Error {
    let name = match scope {
        Some(scope) => format!("{}.{}", scope, method),
        None => method.to_string(),
    };
    match failures {
        [] => Error::Type(format!("{}() is a private method", name)),
        [failure] => match doc.and_then(|d| signature_from_docstring(d, 0)) {
            Some(sig) => Error::Type(format!("{}: {}", sig, failure.message())),
            None => Error::Type(format!("{}(): {}", name, failure.message())),
        },
        _ => {
            const SUMMARY: &str = "arguments did not match any overloaded call:";
            let mut message = match doc {
                Some(_) => SUMMARY.to_string(),
                None => format!("{}(): {}", name, SUMMARY),
            };
            for (index, failure) in failures.iter().enumerate() {
                match doc.and_then(|d| signature_from_docstring(d, index)) {
                    Some(sig) => message.push_str(&format!("\n  {}: {}", sig, failure.message())),
                    None => message.push_str(&format!(
                        "\n  overload {}: {}",
                        index + 1,
                        failure.message()
                    )),
                }
            }
            Error::Type(message)
        }
    }
}
