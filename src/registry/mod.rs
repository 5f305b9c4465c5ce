//! Type-conversion registry - per-native-type conversion behaviour
//!
//! Design: every native type registers a [`TypeDef`] carrying a
//! [`NativeType`] trait object. The behaviour is chosen once at registration,
//! so conversions dispatch through a vtable instead of checking flags.
//! Class types get a [`WrapperType`]; mapped types only ever cross the
//! boundary through their convertors.

mod convert;
mod scalar;
mod sequence;

pub use convert::{ConversionResult, Converted, ConvertFlags, Disposition, Transfer, UserState};
pub use scalar::{Encoding, IntKind, ScalarError};
pub use sequence::NativeArray;

pub(crate) use scalar::{
    to_bool, to_char, to_encoded_char, to_encoded_string, to_float, to_int, to_text, to_wchar,
    to_bytes,
};

use crate::error::{Error, Result};
use crate::ownership::TransferTarget;
use crate::runtime::{InitContext, Runtime};
use crate::value::{NativePtr, Value};
use crate::wrapper::WrapperType;
use bitflags::bitflags;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handle of a registered native type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Instances are wrapped and tracked by identity.
    Class,
    /// Values are converted by value, never wrapped.
    Mapped,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeFlags: u8 {
        /// `None` converts to a null native value.
        const ALLOW_NONE = 0x01;
    }
}

/// What a native constructor produced.
pub struct Constructed {
    pub ptr: NativePtr,
    /// Where ownership goes; `None` leaves the object owned by its wrapper.
    pub owner: Option<TransferTarget>,
}

impl Constructed {
    pub fn new(ptr: NativePtr) -> Self {
        Self { ptr, owner: None }
    }
}

/// Conversion behaviour of one native type.
///
/// Every hook has a default, so a plain class only implements `release`
/// and `init`.
pub trait NativeType: Send + Sync + 'static {
    /// Whether values other than this type's own wrappers may convert.
    fn has_convertor(&self) -> bool {
        false
    }

    /// Cheap convertibility check. Must not allocate native objects.
    fn can_convert_to(&self, _rt: &Runtime, _value: &Value) -> Result<bool> {
        Ok(false)
    }

    /// Convert a dynamic value that passed `can_convert_to`.
    fn convert_to(&self, _rt: &Runtime, value: &Value, _transfer: &Transfer) -> Result<Converted> {
        Err(Error::Type(format!("no convertor accepts '{}'", value.type_name())))
    }

    /// Whether native values of this type convert through `convert_from`
    /// instead of being wrapped.
    fn has_from_convertor(&self) -> bool {
        false
    }

    fn convert_from(&self, _rt: &Runtime, ptr: NativePtr, _transfer: &Transfer) -> Result<Value> {
        Err(Error::System(format!("no convertor from native object at {:?}", ptr)))
    }

    /// Destroy a native object of this type.
    fn release(&self, _ptr: NativePtr, _user_state: Option<UserState>) {}

    /// Address of the `target` super-type sub-object.
    fn cast(&self, ptr: NativePtr, _target: TypeId) -> NativePtr {
        ptr
    }

    /// Heap copy of a single native object, released through `release`.
    fn copy(&self, _ptr: NativePtr) -> Option<NativePtr> {
        None
    }

    fn array_new(&self, _len: usize) -> Option<NativePtr> {
        None
    }

    fn array_assign(&self, _array: NativePtr, _index: usize, _value: NativePtr) {}

    /// Heap copy of one element of a native array.
    fn array_copy(&self, _array: NativePtr, _index: usize) -> Option<NativePtr> {
        None
    }

    fn array_release(&self, _array: NativePtr, _len: usize) {}

    /// Construct a native object for a wrapper created from the dynamic side.
    fn init(&self, cx: &mut InitContext<'_>) -> Result<Constructed> {
        Err(Error::Type(format!("{} cannot be instantiated", cx.type_name())))
    }
}

/// Registration record of a native type.
pub struct TypeDef {
    name: String,
    kind: TypeKind,
    supers: Vec<TypeId>,
    flags: TypeFlags,
    behaviour: Arc<dyn NativeType>,
}

impl TypeDef {
    pub fn class(name: &str, behaviour: impl NativeType) -> Self {
        Self::new(name, TypeKind::Class, behaviour)
    }

    pub fn mapped(name: &str, behaviour: impl NativeType) -> Self {
        Self::new(name, TypeKind::Mapped, behaviour)
    }

    fn new(name: &str, kind: TypeKind, behaviour: impl NativeType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            supers: Vec::new(),
            flags: TypeFlags::empty(),
            behaviour: Arc::new(behaviour),
        }
    }

    pub fn with_super(mut self, base: TypeId) -> Self {
        self.supers.push(base);
        self
    }

    pub fn with_flags(mut self, flags: TypeFlags) -> Self {
        self.flags |= flags;
        self
    }
}

/// A registered type.
pub struct TypeEntry {
    id: TypeId,
    name: String,
    kind: TypeKind,
    flags: TypeFlags,
    behaviour: Arc<dyn NativeType>,
    wrapper_type: Option<Arc<WrapperType>>,
}

impl TypeEntry {
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    pub fn is_class(&self) -> bool {
        self.kind == TypeKind::Class
    }

    pub fn allows_none(&self) -> bool {
        self.flags.contains(TypeFlags::ALLOW_NONE)
    }

    pub fn behaviour(&self) -> &dyn NativeType {
        self.behaviour.as_ref()
    }

    pub fn wrapper_type(&self) -> Option<&Arc<WrapperType>> {
        self.wrapper_type.as_ref()
    }
}

impl fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

pub type SubclassFn = dyn Fn(NativePtr) -> Option<(NativePtr, TypeId)> + Send + Sync;

/// Down-cast convertor: given a pointer to `base`, name the most specific
/// type it really is.
#[derive(Clone)]
pub struct SubclassConvertor {
    pub base: TypeId,
    pub(crate) func: Arc<SubclassFn>,
}

#[derive(Default)]
pub struct TypeRegistry {
    types: Vec<Arc<TypeEntry>>,
    by_name: HashMap<String, TypeId>,
    /// Tried in registration order.
    subclass_convertors: Vec<SubclassConvertor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: TypeDef) -> Result<TypeId> {
        if self.by_name.contains_key(&def.name) {
            return Err(Error::Value(format!("type '{}' is already registered", def.name)));
        }
        let id = TypeId(
            u32::try_from(self.types.len())
                .map_err(|_| Error::Fatal("too many registered types".into()))?,
        );

        let wrapper_type = match def.kind {
            TypeKind::Class => {
                let mut ancestry = vec![id];
                for base in &def.supers {
                    let base_type = self.get(*base)?.wrapper_type.clone().ok_or_else(|| {
                        Error::Type(format!("'{}' cannot derive from mapped type {}", def.name, base))
                    })?;
                    for ancestor in base_type.ancestry() {
                        if !ancestry.contains(ancestor) {
                            ancestry.push(*ancestor);
                        }
                    }
                }
                Some(Arc::new(WrapperType::new(id, &def.name, def.supers.clone(), ancestry)))
            }
            TypeKind::Mapped if !def.supers.is_empty() => {
                return Err(Error::Type(format!("mapped type '{}' cannot have super types", def.name)));
            }
            TypeKind::Mapped => None,
        };

        tracing::debug!(event = "register_type", name = %def.name, id = %id, "Native type registered");
        self.by_name.insert(def.name.clone(), id);
        self.types.push(Arc::new(TypeEntry {
            id,
            name: def.name,
            kind: def.kind,
            flags: def.flags,
            behaviour: def.behaviour,
            wrapper_type,
        }));
        Ok(id)
    }

    pub fn add_subclass_convertor(&mut self, base: TypeId, func: Arc<SubclassFn>) -> Result<()> {
        if !self.get(base)?.is_class() {
            return Err(Error::Type(format!("sub-class convertor base {} is not a class", base)));
        }
        self.subclass_convertors.push(SubclassConvertor { base, func });
        Ok(())
    }

    pub fn get(&self, id: TypeId) -> Result<Arc<TypeEntry>> {
        self.types
            .get(id.index())
            .cloned()
            .ok_or_else(|| Error::System(format!("unknown native type {}", id)))
    }

    pub fn find(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn wrapper_type(&self, id: TypeId) -> Result<Arc<WrapperType>> {
        let entry = self.get(id)?;
        entry
            .wrapper_type
            .clone()
            .ok_or_else(|| Error::Type(format!("'{}' is a mapped type and has no instances", entry.name)))
    }

    /// `sub` is `base` or derives from it. Mapped types are only subtypes of themselves.
    pub fn is_subtype(&self, sub: TypeId, base: TypeId) -> bool {
        sub == base
            || self
                .types
                .get(sub.index())
                .and_then(|e| e.wrapper_type.as_ref())
                .is_some_and(|t| t.is_subtype_of(base))
    }

    /// Convertors whose base `ty` derives from, in registration order.
    pub fn subclass_convertors_for(&self, ty: TypeId) -> Vec<SubclassConvertor> {
        self.subclass_convertors
            .iter()
            .filter(|c| self.is_subtype(ty, c.base))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
