//! Conversions between dynamic values and native objects

use super::{TypeEntry, TypeId};
use crate::error::{Error, Result};
use crate::logging;
use crate::ownership::TransferTarget;
use crate::pending::PendingHandoff;
use crate::runtime::Runtime;
use crate::value::{NativePtr, Value};
use crate::wrapper::{Ownership, Wrapper, WrapperFlags};
use bitflags::bitflags;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Per-conversion state a convertor hands back to its own `release`.
pub type UserState = Box<dyn Any + Send>;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConvertFlags: u8 {
        /// `None` is rejected even if the type allows it.
        const NOT_NONE      = 0x01;
        /// Only the type's own instances are accepted.
        const NO_CONVERTORS = 0x02;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Disposition: u8 {
        /// Created for this call; release once it is done.
        const TEMPORARY     = 0x01;
        /// Ownership moved to the receiver; never released here.
        const OWNED         = 0x02;
        /// Release is required even though the value is not temporary.
        const NEEDS_RELEASE = 0x04;
    }
}

/// Ownership change requested alongside a conversion.
#[derive(Clone, Default)]
pub enum Transfer {
    #[default]
    Keep,
    /// Back to the dynamic side.
    Back,
    /// To native code, with no owning wrapper.
    ToNative,
    /// To native code, owned by this wrapper.
    To(Arc<Wrapper>),
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transfer::Keep => f.write_str("Keep"),
            Transfer::Back => f.write_str("Back"),
            Transfer::ToNative => f.write_str("ToNative"),
            Transfer::To(owner) => write!(f, "To({})", owner.wrapper_type().name()),
        }
    }
}

/// What a user convertor produced.
pub struct Converted {
    pub ptr: Option<NativePtr>,
    pub disposition: Disposition,
    pub user_state: Option<UserState>,
}

impl Converted {
    /// A fresh native value to be released after the call.
    pub fn temporary(ptr: NativePtr) -> Self {
        Self {
            ptr: Some(ptr),
            disposition: Disposition::TEMPORARY,
            user_state: None,
        }
    }

    /// A pointer into an existing object; nothing to release.
    pub fn borrowed(ptr: NativePtr) -> Self {
        Self {
            ptr: Some(ptr),
            disposition: Disposition::empty(),
            user_state: None,
        }
    }

    pub fn with_user_state(mut self, state: UserState) -> Self {
        self.user_state = Some(state);
        self.disposition.insert(Disposition::NEEDS_RELEASE);
        self
    }
}

/// A native value obtained from a dynamic one.
///
/// Temporaries are released through their type exactly once, when the
/// result is dropped, unless [`ConversionResult::into_owned`] took them.
pub struct ConversionResult {
    ptr: Option<NativePtr>,
    disposition: Disposition,
    user_state: Option<UserState>,
    ty: Arc<TypeEntry>,
}

impl ConversionResult {
    pub(crate) fn new(ty: Arc<TypeEntry>, converted: Converted) -> Self {
        Self {
            ptr: converted.ptr,
            disposition: converted.disposition,
            user_state: converted.user_state,
            ty,
        }
    }

    fn plain(ty: Arc<TypeEntry>, ptr: Option<NativePtr>) -> Self {
        Self {
            ptr,
            disposition: Disposition::empty(),
            user_state: None,
            ty,
        }
    }

    pub fn ptr(&self) -> Option<NativePtr> {
        self.ptr
    }

    pub fn type_id(&self) -> TypeId {
        self.ty.id()
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    pub fn is_temporary(&self) -> bool {
        self.disposition.contains(Disposition::TEMPORARY)
    }

    pub fn user_state(&self) -> Option<&(dyn Any + Send)> {
        self.user_state.as_deref()
    }

    /// Take the native value; the caller becomes responsible for it.
    pub fn into_owned(mut self) -> Option<NativePtr> {
        self.disposition.insert(Disposition::OWNED);
        self.ptr
    }
}

impl Drop for ConversionResult {
    fn drop(&mut self) {
        if self.disposition.contains(Disposition::OWNED) {
            return;
        }
        if !self
            .disposition
            .intersects(Disposition::TEMPORARY | Disposition::NEEDS_RELEASE)
        {
            return;
        }
        if let Some(ptr) = self.ptr.take() {
            logging::log_release(self.ty.name(), ptr.addr());
            self.ty.behaviour().release(ptr, self.user_state.take());
        }
    }
}

impl fmt::Debug for ConversionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionResult")
            .field("type", &self.ty.name())
            .field("ptr", &self.ptr)
            .field("disposition", &self.disposition)
            .finish()
    }
}

impl Runtime {
    /// Whether `value` converts to `ty`. Cheap and side-effect free apart
    /// from whatever a user check does.
    pub fn can_convert(&self, value: &Value, ty: TypeId, flags: ConvertFlags) -> Result<bool> {
        let entry = self.type_entry(ty)?;
        self.can_convert_entry(value, &entry, flags)
    }

    pub(crate) fn can_convert_entry(
        &self,
        value: &Value,
        entry: &TypeEntry,
        flags: ConvertFlags,
    ) -> Result<bool> {
        if value.is_none() {
            return Ok(entry.allows_none() || !flags.contains(ConvertFlags::NOT_NONE));
        }
        if is_own_instance(value, entry) {
            return Ok(true);
        }
        if entry.behaviour().has_convertor() && !flags.contains(ConvertFlags::NO_CONVERTORS) {
            return entry.behaviour().can_convert_to(self, value);
        }
        Ok(false)
    }

    /// Convert `value` to a native `ty`, applying `transfer` to wrapped instances.
    pub fn to_native(
        &self,
        value: &Value,
        ty: TypeId,
        transfer: &Transfer,
        flags: ConvertFlags,
    ) -> Result<ConversionResult> {
        let entry = self.type_entry(ty)?;
        self.to_native_entry(value, entry, transfer, flags)
    }

    pub(crate) fn to_native_entry(
        &self,
        value: &Value,
        entry: Arc<TypeEntry>,
        transfer: &Transfer,
        flags: ConvertFlags,
    ) -> Result<ConversionResult> {
        let convertor_takes_none = entry.allows_none() && entry.behaviour().has_convertor();
        if value.is_none() && !convertor_takes_none {
            if !entry.allows_none() && flags.contains(ConvertFlags::NOT_NONE) {
                return Err(Error::Type(format!(
                    "'NoneType' cannot be converted to '{}'",
                    entry.name()
                )));
            }
            return Ok(ConversionResult::plain(entry, None));
        }

        if let Some(wrapper) = value.as_wrapper().filter(|_| is_own_instance(value, &entry)) {
            let ptr = self.native_ptr(wrapper, entry.id())?;
            self.apply_transfer(wrapper, transfer)?;
            return Ok(ConversionResult::plain(entry, Some(ptr)));
        }

        if !entry.behaviour().has_convertor() || flags.contains(ConvertFlags::NO_CONVERTORS) {
            return Err(Error::Type(format!(
                "'{}' cannot be converted to '{}'",
                value.type_name(),
                entry.name()
            )));
        }

        let converted = entry.behaviour().convert_to(self, value, transfer)?;
        if converted.ptr.is_none() && flags.contains(ConvertFlags::NOT_NONE) {
            return Err(Error::Type(format!(
                "convertor for '{}' produced a null value",
                entry.name()
            )));
        }
        logging::log_type_conversion(value.type_name(), entry.name());
        Ok(ConversionResult::new(entry, converted))
    }

    /// Wrap an existing native object, reusing its wrapper when one is live.
    pub fn from_native(&self, ptr: Option<NativePtr>, ty: TypeId, transfer: &Transfer) -> Result<Value> {
        let Some(ptr) = ptr else {
            return Ok(Value::None);
        };
        let entry = self.type_entry(ty)?;
        if entry.behaviour().has_from_convertor() {
            return entry.behaviour().convert_from(self, ptr, transfer);
        }
        if !entry.is_class() {
            return Err(Error::System(format!(
                "mapped type '{}' has no convertor from native",
                entry.name()
            )));
        }

        let wrapper = match self.find_wrapper(ptr, ty) {
            Some(wrapper) => wrapper,
            None => {
                let (ptr, ty) = self.resolve_subclass(ptr, ty)?;
                match self.find_wrapper(ptr, ty) {
                    Some(wrapper) => wrapper,
                    None => self.wrap_instance(
                        ty,
                        PendingHandoff::new(ptr)
                            .with_ownership(Ownership::NativeOwned)
                            .with_flags(WrapperFlags::SHARE_MAP),
                    )?,
                }
            }
        };

        self.apply_transfer(&wrapper, transfer)?;
        Ok(Value::Wrapper(wrapper))
    }

    /// Wrap a native object just created by native code.
    ///
    /// Without an owner the new wrapper owns it; with one, the owner keeps it alive.
    pub fn from_new_native(
        &self,
        ptr: Option<NativePtr>,
        ty: TypeId,
        owner: Option<&Arc<Wrapper>>,
    ) -> Result<Value> {
        let Some(ptr) = ptr else {
            return Ok(Value::None);
        };
        let entry = self.type_entry(ty)?;
        if entry.behaviour().has_from_convertor() {
            let transfer = owner.map_or(Transfer::Keep, |o| Transfer::To(o.clone()));
            let value = entry.behaviour().convert_from(self, ptr, &transfer)?;
            if owner.is_none() {
                logging::log_release(entry.name(), ptr.addr());
                entry.behaviour().release(ptr, None);
            }
            return Ok(value);
        }
        if !entry.is_class() {
            return Err(Error::System(format!(
                "mapped type '{}' has no convertor from native",
                entry.name()
            )));
        }

        let (ptr, ty) = self.resolve_subclass(ptr, ty)?;
        let mut handoff = PendingHandoff::new(ptr).with_ownership(Ownership::DynamicOwned);
        if let Some(owner) = owner {
            handoff = handoff.with_owner(owner.clone());
        }
        Ok(Value::Wrapper(self.wrap_instance(ty, handoff)?))
    }

    /// Release a native object through its type.
    pub fn release(&self, ptr: NativePtr, ty: TypeId, user_state: Option<UserState>) -> Result<()> {
        let entry = self.type_entry(ty)?;
        logging::log_release(entry.name(), ptr.addr());
        entry.behaviour().release(ptr, user_state);
        Ok(())
    }

    /// Native address of `wrapper` viewed as a `ty`.
    pub fn native_ptr(&self, wrapper: &Wrapper, ty: TypeId) -> Result<NativePtr> {
        let ptr = wrapper.address().ok_or_else(|| {
            Error::Runtime(format!(
                "wrapped native object of type {} has been deleted",
                wrapper.wrapper_type().name()
            ))
        })?;
        self.cast_ptr(ptr, wrapper.type_id(), ty)
    }

    pub(crate) fn cast_ptr(&self, ptr: NativePtr, from: TypeId, to: TypeId) -> Result<NativePtr> {
        if from == to {
            return Ok(ptr);
        }
        Ok(self.type_entry(from)?.behaviour().cast(ptr, to))
    }

    /// Follow sub-class convertors to the most specific type of `ptr`.
    ///
    /// Each pass tries the convertors whose base `ty` derives from, in
    /// registration order, and takes the first strictly more specific answer.
    /// A type is never revisited, so the walk terminates.
    pub fn resolve_subclass(&self, mut ptr: NativePtr, mut ty: TypeId) -> Result<(NativePtr, TypeId)> {
        let mut visited = vec![ty];
        loop {
            let convertors = self.registry().subclass_convertors_for(ty);
            let mut advanced = false;
            for convertor in convertors {
                let base_ptr = self.cast_ptr(ptr, ty, convertor.base)?;
                let Some((sub_ptr, sub_ty)) = (convertor.func)(base_ptr) else {
                    continue;
                };
                if visited.contains(&sub_ty) || self.registry().is_subtype(ty, sub_ty) {
                    continue;
                }
                tracing::trace!(
                    event = "subclass_resolved",
                    from = %ty,
                    to = %sub_ty,
                    "Sub-class convertor refined native type"
                );
                visited.push(sub_ty);
                ptr = sub_ptr;
                ty = sub_ty;
                advanced = true;
                break;
            }
            if !advanced {
                return Ok((ptr, ty));
            }
        }
    }

    pub(crate) fn apply_transfer(&self, wrapper: &Arc<Wrapper>, transfer: &Transfer) -> Result<()> {
        match transfer {
            Transfer::Keep => Ok(()),
            Transfer::Back => {
                self.transfer_back(wrapper);
                Ok(())
            }
            Transfer::ToNative => self.transfer_to(wrapper, TransferTarget::None),
            Transfer::To(owner) => self.transfer_to(wrapper, TransferTarget::Owner(owner.clone())),
        }
    }
}

fn is_own_instance(value: &Value, entry: &TypeEntry) -> bool {
    entry.is_class()
        && value
            .as_wrapper()
            .is_some_and(|w| w.is_instance_of(entry.id()))
}
