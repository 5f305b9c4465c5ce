//! bindery - runtime core for generated native bindings
//!
//! Generated binding code calls into this crate to parse dynamic call
//! arguments against native signatures, convert values across the boundary,
//! keep one wrapper per live native object, and track which side owns each
//! native object.

// Core modules
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod ownership;
pub mod parser;
pub mod pending;
pub mod registry;
pub mod result;
pub mod runtime;
pub mod value;
pub mod wrapper;

// Re-export commonly used items
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use identity::{Identity, ObjectMapStats};
pub use ownership::TransferTarget;
pub use parser::{
    parse_overloads, Arg, BoundReceiver, CallArgs, CallSignature, FailureReason, FormatArg, ParamFlags,
    ParamKind, ParseState, ParsedArgs, Receiver,
};
pub use pending::PendingHandoff;
pub use registry::{
    ConversionResult, Converted, ConvertFlags, Disposition, NativeType, Transfer, TypeDef, TypeFlags, TypeId,
};
pub use result::{build_result, call_method, call_override, parse_result, NativeArg, ResultFlags, ResultValue};
pub use runtime::{DefaultObjectModel, InitContext, ObjectModel, Runtime, RuntimeBuilder, RuntimeStats};
pub use value::{Callable, Capsule, NativePtr, Value, ValueKind};
pub use wrapper::{Ownership, Wrapper, WrapperFlags, WrapperType};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
