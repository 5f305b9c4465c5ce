//! Result builder - native values to dynamic results and back
//!
//! Design: [`build_result`] turns the outputs of a native call into the
//! dynamic value returned to the caller, one format character per value.
//! [`parse_result`] is the inverse, used when a dynamic override of a
//! native virtual hands its result back to native code. A malformed override
//! result cannot be retried against another candidate, so it is reported
//! through the diagnostic channel and returned as an error.

mod build;
mod parse;

pub use build::{build_result, call_method, NativeArg};
pub use parse::{call_override, parse_result, ResultFlags, ResultValue};

use crate::error::{Error, Result};

/// One format character and its sub-format character, if it takes one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FormatItem {
    code: char,
    sub: Option<char>,
}

/// A result format: a single value, or a tuple of values in parentheses.
#[derive(Debug)]
struct ResultFormat {
    tuple: bool,
    items: Vec<FormatItem>,
}

impl ResultFormat {
    /// Split `format` into items. `with_sub` lists the codes followed by a
    /// sub-format character.
    fn compile(format: &str, caller: &str, with_sub: &str) -> Result<Self> {
        let invalid = || Error::System(format!("{}(): invalid format string \"{}\"", caller, format));

        let (tuple, body) = match format.strip_prefix('(') {
            Some(rest) => (true, rest.strip_suffix(')').ok_or_else(invalid)?),
            None => (false, format),
        };

        let mut items = Vec::new();
        let mut chars = body.chars();
        while let Some(code) = chars.next() {
            if matches!(code, '(' | ')') {
                return Err(invalid());
            }
            let sub = if with_sub.contains(code) {
                Some(chars.next().ok_or_else(invalid)?)
            } else {
                None
            };
            items.push(FormatItem { code, sub });
        }

        if !tuple && items.len() != 1 {
            return Err(invalid());
        }
        Ok(Self { tuple, items })
    }
}

#[cfg(test)]
mod tests;
