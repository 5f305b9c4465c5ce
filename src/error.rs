//! Error taxonomy - the exception classes raised across the binding boundary
//!
//! Design: one flat enum so generated code can propagate every failure with `?`.
//! Each variant corresponds to an exception class of the dynamic runtime.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// A value had the wrong type, or no overload accepted the arguments.
    #[error("TypeError: {0}")]
    Type(String),

    /// An integer argument did not fit its native width.
    #[error("OverflowError: {0}")]
    Overflow(String),

    #[error("ValueError: {0}")]
    Value(String),

    /// Misuse of a wrapper, e.g. its native object was already deleted.
    #[error("RuntimeError: {0}")]
    Runtime(String),

    /// Internal inconsistency such as an invalid format character.
    #[error("SystemError: {0}")]
    System(String),

    /// Raised by user code: a convertor, constructor or dynamic callable.
    #[error("{kind}: {message}")]
    User { kind: String, message: String },

    /// Allocation failure while recording diagnostics.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Malformed call signature or result format.
    #[error("invalid signature: {0}")]
    Signature(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn user(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Error::User {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The exception class name, as the dynamic side would see it.
    pub fn kind(&self) -> &str {
        match self {
            Error::Type(_) => "TypeError",
            Error::Overflow(_) => "OverflowError",
            Error::Value(_) => "ValueError",
            Error::Runtime(_) => "RuntimeError",
            Error::System(_) | Error::Signature(_) => "SystemError",
            Error::User { kind, .. } => kind,
            Error::Fatal(_) => "MemoryError",
            Error::Config(_) => "ConfigError",
        }
    }

    /// The message without the class prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::Type(m)
            | Error::Overflow(m)
            | Error::Value(m)
            | Error::Runtime(m)
            | Error::System(m)
            | Error::Fatal(m)
            | Error::Signature(m)
            | Error::Config(m) => m,
            Error::User { message, .. } => message,
        }
    }

    /// The same exception class with a different message.
    pub(crate) fn with_message(&self, message: String) -> Self {
        match self {
            Error::Type(_) => Error::Type(message),
            Error::Overflow(_) => Error::Overflow(message),
            Error::Value(_) => Error::Value(message),
            Error::Runtime(_) => Error::Runtime(message),
            Error::System(_) => Error::System(message),
            Error::User { kind, .. } => Error::User {
                kind: kind.clone(),
                message,
            },
            Error::Fatal(_) => Error::Fatal(message),
            Error::Signature(_) => Error::Signature(message),
            Error::Config(_) => Error::Config(message),
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(err: std::collections::TryReserveError) -> Self {
        Error::Fatal(err.to_string())
    }
}
