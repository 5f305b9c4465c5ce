//! Dynamic values - the objects exchanged with the dynamic runtime
//!
//! Design: reference counting is `Arc`, so "collecting" a wrapper means
//! dropping its last `Arc`. Integers are `i128` so narrowing to a native
//! width can overflow the way arbitrary-precision integers do.

use crate::error::Result;
use crate::wrapper::{Wrapper, WrapperType};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Address of a native object. Null is `Option::None`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativePtr(NonZeroUsize);

impl NativePtr {
    pub fn new(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(NativePtr)
    }

    pub fn addr(self) -> usize {
        self.0.get()
    }

    /// Leak a boxed native object and return its address.
    pub fn from_box<T>(value: Box<T>) -> Self {
        let raw = Box::into_raw(value);
        // Box never hands out null.
        NativePtr(NonZeroUsize::new(raw as usize).unwrap_or(NonZeroUsize::MIN))
    }

    /// Reclaim an object leaked by [`NativePtr::from_box`].
    ///
    /// # Safety
    /// The address must come from `from_box::<T>` and not have been reclaimed.
    pub unsafe fn into_box<T>(self) -> Box<T> {
        Box::from_raw(self.addr() as *mut T)
    }

    /// # Safety
    /// The address must point at a live `T`.
    pub unsafe fn as_ref<'a, T>(self) -> &'a T {
        &*(self.addr() as *const T)
    }

    /// Address `offset` bytes further on, for sub-object casts.
    pub fn offset(self, offset: usize) -> Self {
        NativePtr::new(self.addr().wrapping_add(offset)).unwrap_or(self)
    }
}

impl fmt::Debug for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.addr())
    }
}

pub type CallFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A dynamic callable (function, bound method, override)
#[derive(Clone)]
pub struct Callable {
    name: Arc<str>,
    func: Arc<CallFn>,
}

impl Callable {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }
}

/// An opaque native pointer with an optional type name.
#[derive(Clone, Debug, PartialEq)]
pub struct Capsule {
    pub name: Option<Arc<str>>,
    pub ptr: NativePtr,
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    Tuple(Arc<[Value]>),
    List(Arc<[Value]>),
    Capsule(Capsule),
    VoidPtr(NativePtr),
    Wrapper(Arc<Wrapper>),
    Type(Arc<WrapperType>),
    Callable(Callable),
}

/// Runtime type of a [`Value`], used for cheap membership tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    None,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    Tuple,
    List,
    Capsule,
    VoidPtr,
    Wrapper,
    Type,
    Callable,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::None => "NoneType",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "str",
            ValueKind::Bytes => "bytes",
            ValueKind::Tuple => "tuple",
            ValueKind::List => "list",
            ValueKind::Capsule => "PyCapsule",
            ValueKind::VoidPtr => "voidptr",
            ValueKind::Wrapper => "wrapper",
            ValueKind::Type => "type",
            ValueKind::Callable => "function",
        }
    }
}

impl Value {
    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(items.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(items.into())
    }

    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn bytes(b: &[u8]) -> Self {
        Value::Bytes(Arc::from(b))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::None => ValueKind::None,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::List(_) => ValueKind::List,
            Value::Capsule(_) => ValueKind::Capsule,
            Value::VoidPtr(_) => ValueKind::VoidPtr,
            Value::Wrapper(_) => ValueKind::Wrapper,
            Value::Type(_) => ValueKind::Type,
            Value::Callable(_) => ValueKind::Callable,
        }
    }

    /// Type name as shown in diagnostics; wrappers report their native type.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Wrapper(w) => w.wrapper_type().name(),
            other => other.kind().name(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_wrapper(&self) -> Option<&Arc<Wrapper>> {
        match self {
            Value::Wrapper(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i128),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Elements of a tuple or list.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) | Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Object identity: same wrapper, same type object, same callable.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Wrapper(a), Value::Wrapper(b)) => Arc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => Arc::ptr_eq(a, b),
            (Value::Callable(a), Value::Callable(b)) => Arc::ptr_eq(&a.func, &b.func),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) | (Value::List(a), Value::List(b)) => a == b,
            (Value::Capsule(a), Value::Capsule(b)) => a == b,
            (Value::VoidPtr(a), Value::VoidPtr(b)) => a == b,
            _ => self.is(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            Value::Tuple(items) => f.debug_tuple("").field(items).finish(),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Capsule(c) => write!(f, "<capsule {:?} at {:?}>", c.name, c.ptr),
            Value::VoidPtr(p) => write!(f, "<voidptr {:?}>", p),
            Value::Wrapper(w) => write!(f, "<{} object at {:?}>", w.wrapper_type().name(), w.address()),
            Value::Type(t) => write!(f, "<class '{}'>", t.name()),
            Value::Callable(c) => write!(f, "<function {}>", c.name()),
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(v as i128)
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, i128, u8, u16, u32, u64, usize);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<Arc<Wrapper>> for Value {
    fn from(v: Arc<Wrapper>) -> Self {
        Value::Wrapper(v)
    }
}

impl From<Callable> for Value {
    fn from(v: Callable) -> Self {
        Value::Callable(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}
