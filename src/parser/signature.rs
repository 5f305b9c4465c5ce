//! Call signatures - typed parameter descriptors compiled from a format
//!
//! Design: a format string is compiled once, at bind time, into a
//! [`CallSignature`]. Type and kind arguments that a format character needs
//! come from a typed slice instead of a variadic list, and the builder API
//! produces exactly the same descriptors without going through text.

use crate::error::{Error, Result};
use crate::registry::{Encoding, IntKind, TypeId};
use crate::value::ValueKind;
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// Annotations on an instance parameter (`J<flags>`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamFlags: u8 {
        /// A null native value is not acceptable.
        const DEREF         = 0x01;
        /// Ownership passes to native code.
        const TRANSFER      = 0x02;
        /// Ownership passes back to the dynamic side.
        const TRANSFER_BACK = 0x04;
        /// Only the type's own instances are accepted.
        const NO_CONVERTORS = 0x08;
        /// The argument becomes the owner of the object being built.
        const TRANSFER_THIS = 0x10;
    }
}

/// How the implicit receiver is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// Static method or plain function.
    None,
    /// Instance method of `TypeId`, called either bound or as
    /// `Class.method(obj, ...)`.
    Instance(TypeId),
    /// Class method; an instance receiver is replaced by its type.
    Class,
    /// Constructor; the receiver is the wrapper under construction.
    Constructor,
}

/// Scalars that must already have the exact dynamic type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExactKind {
    Bool,
    Float64,
    Float32,
    Int32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    /// One-byte `bytes`.
    Char,
    /// One-character `str` encoded to a single byte.
    EncodedChar(Encoding),
    WideChar,
    Int(IntKind),
    Float32,
    Float64,
    Exact(ExactKind),
    /// `bytes` or `None`.
    Bytes,
    /// `str` or `None`, encoded.
    EncodedString(Encoding),
    /// `str` or `None`.
    Text,
    Object(ValueKind),
    ObjectOrNone(ValueKind),
    AnyObject,
    Callable,
    CallableOrNone,
    Instance { ty: TypeId, flags: ParamFlags },
    Array(TypeId),
    VoidPtr,
    Capsule(Arc<str>),
    /// The argument object itself; reads the same argument as the next parameter.
    GetWrapper,
    /// All remaining positional arguments.
    Rest,
}

impl ParamKind {
    /// Whether the parameter consumes an argument of its own.
    pub fn consumes(&self) -> bool {
        !matches!(self, ParamKind::GetWrapper)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub kind: ParamKind,
    pub name: Option<Arc<str>>,
    pub optional: bool,
}

/// Typed arguments consumed by format characters that need them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg<'a> {
    Type(TypeId),
    Kind(ValueKind),
    Capsule(&'a str),
}

impl From<TypeId> for FormatArg<'_> {
    fn from(ty: TypeId) -> Self {
        FormatArg::Type(ty)
    }
}

impl From<ValueKind> for FormatArg<'_> {
    fn from(kind: ValueKind) -> Self {
        FormatArg::Kind(kind)
    }
}

/// An immutable, compiled call signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSignature {
    receiver: Receiver,
    params: Vec<Param>,
    collect_unused: bool,
}

impl CallSignature {
    pub fn builder() -> SignatureBuilder {
        SignatureBuilder::default()
    }

    /// Compile `format`, taking type, kind and capsule arguments from
    /// `args` in order. `names` gives keyword names to the parameters that
    /// consume an argument; an empty name, or running out of names, makes
    /// the remaining ones positional-only.
    pub fn from_format(format: &str, args: &[FormatArg<'_>], names: &[&str]) -> Result<Self> {
        FormatCompiler {
            chars: format.chars().peekable(),
            args: args.iter(),
            format,
        }
        .compile(names)
    }

    pub fn receiver(&self) -> Receiver {
        self.receiver
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Keywords no parameter claims are collected instead of rejected.
    pub fn collects_unused(&self) -> bool {
        self.collect_unused
    }

    pub fn has_rest(&self) -> bool {
        self.params.iter().any(|p| p.kind == ParamKind::Rest)
    }

    /// Most positional arguments accepted, receiver excluded. `None` with a rest parameter.
    pub fn max_positional(&self) -> Option<usize> {
        if self.has_rest() {
            return None;
        }
        Some(self.params.iter().filter(|p| p.kind.consumes()).count())
    }

    /// Parameter position of the keyword `name`, counted over consuming parameters.
    pub(crate) fn keyword_position(&self, name: &str) -> Option<usize> {
        self.params
            .iter()
            .filter(|p| p.kind.consumes())
            .position(|p| p.name.as_deref() == Some(name))
    }
}

/// Builds a [`CallSignature`] parameter by parameter.
#[derive(Debug, Default)]
pub struct SignatureBuilder {
    receiver: Option<Receiver>,
    params: Vec<Param>,
    optional: bool,
    collect_unused: bool,
}

impl SignatureBuilder {
    pub fn receiver(mut self, receiver: Receiver) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Every parameter added from now on is optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn param(self, kind: ParamKind) -> Self {
        self.push(kind, None)
    }

    pub fn named(self, name: &str, kind: ParamKind) -> Self {
        self.push(kind, Some(name))
    }

    pub fn collect_unused(mut self) -> Self {
        self.collect_unused = true;
        self
    }

    fn push(mut self, kind: ParamKind, name: Option<&str>) -> Self {
        self.params.push(Param {
            kind,
            name: name.filter(|n| !n.is_empty()).map(Arc::from),
            optional: self.optional,
        });
        self
    }

    pub fn build(mut self) -> Result<CallSignature> {
        let count = self.params.len();
        for index in 0..count {
            match self.params[index].kind {
                ParamKind::Rest if index + 1 != count => {
                    return Err(Error::Signature("a rest parameter must be the last".into()));
                }
                ParamKind::GetWrapper => {
                    let next = self.params.get(index + 1).filter(|p| {
                        p.kind.consumes() && p.kind != ParamKind::Rest
                    });
                    let Some(next) = next else {
                        return Err(Error::Signature(
                            "a wrapper parameter must precede the argument it reads".into(),
                        ));
                    };
                    let (name, optional) = (next.name.clone(), next.optional);
                    let param = &mut self.params[index];
                    param.name = name;
                    param.optional = optional;
                }
                ParamKind::Instance { flags, .. }
                    if flags.contains(ParamFlags::TRANSFER | ParamFlags::TRANSFER_BACK) =>
                {
                    return Err(Error::Signature(
                        "a parameter cannot transfer both ways".into(),
                    ));
                }
                _ => {}
            }
        }
        Ok(CallSignature {
            receiver: self.receiver.unwrap_or(Receiver::None),
            params: self.params,
            collect_unused: self.collect_unused,
        })
    }
}

struct FormatCompiler<'f, 'a, 'n> {
    chars: std::iter::Peekable<std::str::Chars<'f>>,
    args: std::slice::Iter<'a, FormatArg<'n>>,
    format: &'f str,
}

impl FormatCompiler<'_, '_, '_> {
    fn compile(mut self, names: &[&str]) -> Result<CallSignature> {
        let mut builder = CallSignature::builder();
        match self.chars.peek() {
            Some('B') | Some('p') => {
                self.chars.next();
                builder = builder.receiver(Receiver::Instance(self.type_arg('B')?));
            }
            Some('C') => {
                self.chars.next();
                builder = builder.receiver(Receiver::Class);
            }
            Some('#') => {
                self.chars.next();
                builder = builder.receiver(Receiver::Constructor);
            }
            _ => {}
        }

        let mut names = names.iter();
        while let Some(c) = self.chars.next() {
            if c == '|' {
                builder = builder.optional();
                continue;
            }
            let kind = self.param_kind(c)?;
            builder = if kind.consumes() && kind != ParamKind::Rest {
                match names.next() {
                    Some(name) => builder.named(name, kind),
                    None => builder.param(kind),
                }
            } else {
                builder.param(kind)
            };
        }
        if self.args.next().is_some() {
            return Err(self.error("more arguments than the format uses"));
        }
        builder.build()
    }

    fn param_kind(&mut self, c: char) -> Result<ParamKind> {
        let kind = match c {
            'b' => ParamKind::Bool,
            'c' => ParamKind::Char,
            'a' => ParamKind::EncodedChar(self.encoding(c)?),
            'w' => ParamKind::WideChar,
            'L' => ParamKind::Int(IntKind::I8),
            'M' => ParamKind::Int(IntKind::U8),
            'h' => ParamKind::Int(IntKind::I16),
            't' => ParamKind::Int(IntKind::U16),
            'i' => ParamKind::Int(IntKind::I32),
            'u' => ParamKind::Int(IntKind::U32),
            'l' | 'n' => ParamKind::Int(IntKind::I64),
            'm' | 'o' => ParamKind::Int(IntKind::U64),
            '=' => ParamKind::Int(IntKind::Size),
            'f' => ParamKind::Float32,
            'd' => ParamKind::Float64,
            'X' => ParamKind::Exact(match self.chars.next() {
                Some('b') => ExactKind::Bool,
                Some('d') => ExactKind::Float64,
                Some('f') => ExactKind::Float32,
                Some('i') => ExactKind::Int32,
                _ => return Err(self.error("'X' needs one of 'b', 'd', 'f' or 'i'")),
            }),
            's' => ParamKind::Bytes,
            'A' => ParamKind::EncodedString(self.encoding(c)?),
            'x' => ParamKind::Text,
            'T' => ParamKind::Object(self.kind_arg(c)?),
            'N' => ParamKind::ObjectOrNone(self.kind_arg(c)?),
            'P' => ParamKind::AnyObject,
            'F' => ParamKind::Callable,
            'H' => ParamKind::CallableOrNone,
            'J' => {
                let flags = self
                    .chars
                    .next()
                    .and_then(|f| (f as u32).checked_sub('0' as u32))
                    .and_then(|bits| u8::try_from(bits).ok())
                    .and_then(ParamFlags::from_bits)
                    .ok_or_else(|| self.error("'J' needs a flags character"))?;
                ParamKind::Instance {
                    ty: self.type_arg(c)?,
                    flags,
                }
            }
            'r' => ParamKind::Array(self.type_arg(c)?),
            'v' => ParamKind::VoidPtr,
            'z' => match self.args.next() {
                Some(FormatArg::Capsule(name)) => ParamKind::Capsule(Arc::from(*name)),
                _ => return Err(self.error("'z' needs a capsule name")),
            },
            '@' => ParamKind::GetWrapper,
            'W' => ParamKind::Rest,
            other => {
                return Err(self.error(&format!("unknown format character '{}'", other)));
            }
        };
        Ok(kind)
    }

    fn encoding(&mut self, c: char) -> Result<Encoding> {
        self.chars
            .next()
            .and_then(Encoding::from_format)
            .ok_or_else(|| self.error(&format!("'{}' needs an encoding of 'A', 'L' or '8'", c)))
    }

    fn type_arg(&mut self, c: char) -> Result<TypeId> {
        match self.args.next() {
            Some(FormatArg::Type(ty)) => Ok(*ty),
            _ => Err(self.error(&format!("'{}' needs a type argument", c))),
        }
    }

    fn kind_arg(&mut self, c: char) -> Result<ValueKind> {
        match self.args.next() {
            Some(FormatArg::Kind(kind)) => Ok(*kind),
            _ => Err(self.error(&format!("'{}' needs a value kind argument", c))),
        }
    }

    fn error(&self, detail: &str) -> Error {
        Error::Signature(format!("{}: {}", self.format, detail))
    }
}
