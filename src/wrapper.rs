//! Wrappers - the dynamic-side proxies for native objects
//!
//! Design: a wrapper is always handled through `Arc<Wrapper>`. The identity
//! cache only ever holds `Weak` references; the ownership forest holds the
//! strong references that keep owned children alive. Exactly one
//! [`Ownership`] state applies at a time.

use crate::ownership::NodeId;
use crate::registry::TypeId;
use crate::runtime::{Runtime, Shared};
use crate::value::{NativePtr, Value};
use bitflags::bitflags;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};

/// Runtime type object of a registered native class.
pub struct WrapperType {
    id: TypeId,
    name: Arc<str>,
    /// This type followed by every super type, primary chain first.
    ancestry: Vec<TypeId>,
    supers: Vec<TypeId>,
}

impl WrapperType {
    pub(crate) fn new(id: TypeId, name: &str, supers: Vec<TypeId>, ancestry: Vec<TypeId>) -> Self {
        Self {
            id,
            name: Arc::from(name),
            ancestry,
            supers,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct super types in declaration order.
    pub fn supers(&self) -> &[TypeId] {
        &self.supers
    }

    pub fn ancestry(&self) -> &[TypeId] {
        &self.ancestry
    }

    pub fn is_subtype_of(&self, other: TypeId) -> bool {
        self.ancestry.contains(&other)
    }
}

impl fmt::Debug for WrapperType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name)
    }
}

/// Who is responsible for destroying the native object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Ownership {
    /// Native code destroys it; the wrapper never does.
    NativeOwned,
    /// Destroyed when the wrapper is collected, unless an owner holds it.
    DynamicOwned,
    /// Native code owns it and keeps the wrapper alive with an extra reference.
    NativeHasExtraRef,
}

impl Ownership {
    pub fn as_str(self) -> &'static str {
        match self {
            Ownership::NativeOwned => "native",
            Ownership::DynamicOwned => "dynamic",
            Ownership::NativeHasExtraRef => "native+ref",
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WrapperFlags: u8 {
        /// Several wrappers may share the same address (e.g. a member
        /// sub-object at offset zero).
        const SHARE_MAP  = 0x01;
        /// Never registered in the identity cache.
        const NOT_IN_MAP = 0x02;
        /// The native object was created through the constructor.
        const CREATED    = 0x04;
    }
}

struct WrapperState {
    address: Option<NativePtr>,
    ownership: Ownership,
    flags: WrapperFlags,
    node: Option<NodeId>,
}

pub struct Wrapper {
    ty: Arc<WrapperType>,
    state: Mutex<WrapperState>,
    /// Extra references kept alive on behalf of the native object.
    extra_refs: DashMap<i32, Value>,
    runtime: Weak<Shared>,
}

impl Wrapper {
    pub(crate) fn new(ty: Arc<WrapperType>, runtime: Weak<Shared>) -> Arc<Wrapper> {
        Arc::new(Wrapper {
            ty,
            state: Mutex::new(WrapperState {
                address: None,
                ownership: Ownership::NativeOwned,
                flags: WrapperFlags::empty(),
                node: None,
            }),
            extra_refs: DashMap::new(),
            runtime,
        })
    }

    pub fn wrapper_type(&self) -> &Arc<WrapperType> {
        &self.ty
    }

    pub fn type_id(&self) -> TypeId {
        self.ty.id()
    }

    pub fn is_instance_of(&self, ty: TypeId) -> bool {
        self.ty.is_subtype_of(ty)
    }

    /// Native address, `None` once the native side destroyed the object.
    pub fn address(&self) -> Option<NativePtr> {
        self.state.lock().address
    }

    pub fn ownership(&self) -> Ownership {
        self.state.lock().ownership
    }

    pub fn flags(&self) -> WrapperFlags {
        self.state.lock().flags
    }

    /// Keep `value` alive for as long as this wrapper, under `key`.
    /// `Value::None` clears the slot.
    pub fn keep_reference(&self, key: i32, value: Value) {
        if value.is_none() {
            self.extra_refs.remove(&key);
        } else {
            self.extra_refs.insert(key, value);
        }
    }

    pub fn kept_reference(&self, key: i32) -> Option<Value> {
        self.extra_refs.get(&key).map(|v| v.value().clone())
    }

    pub(crate) fn set_address(&self, address: Option<NativePtr>) {
        self.state.lock().address = address;
    }

    pub(crate) fn set_ownership(&self, ownership: Ownership) {
        self.state.lock().ownership = ownership;
    }

    pub(crate) fn insert_flags(&self, flags: WrapperFlags) {
        self.state.lock().flags.insert(flags);
    }

    pub(crate) fn node(&self) -> Option<NodeId> {
        self.state.lock().node
    }

    pub(crate) fn set_node(&self, node: Option<NodeId>) {
        self.state.lock().node = node;
    }
}

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Wrapper")
            .field("type", &self.ty.name())
            .field("address", &state.address)
            .field("ownership", &state.ownership)
            .field("flags", &state.flags)
            .finish()
    }
}

impl Drop for Wrapper {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let (address, ownership, node) = (state.address, state.ownership, state.node.take());
        if let Some(shared) = self.runtime.upgrade() {
            Runtime::from_shared(shared).wrapper_collected(&self.ty, address, ownership, node);
        }
    }
}
