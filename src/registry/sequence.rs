//! Sequence helpers - dynamic sequences to native arrays and back

use super::{ConvertFlags, Transfer, TypeEntry, TypeId};
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::value::{NativePtr, Value};
use std::fmt;
use std::sync::Arc;

/// A native array built from a dynamic sequence, released on drop.
pub struct NativeArray {
    ptr: Option<NativePtr>,
    len: usize,
    ty: Arc<TypeEntry>,
}

impl NativeArray {
    pub fn ptr(&self) -> Option<NativePtr> {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn type_id(&self) -> TypeId {
        self.ty.id()
    }

    /// Keep the array; the caller must release it.
    pub fn into_raw(mut self) -> (Option<NativePtr>, usize) {
        (self.ptr.take(), self.len)
    }
}

impl Drop for NativeArray {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            self.ty.behaviour().array_release(ptr, self.len);
        }
    }
}

impl fmt::Debug for NativeArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeArray")
            .field("type", &self.ty.name())
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

const ELEMENT_FLAGS: ConvertFlags = ConvertFlags::NOT_NONE.union(ConvertFlags::NO_CONVERTORS);

impl Runtime {
    /// Every element of a tuple or list is an instance of `ty`.
    pub fn can_convert_sequence(&self, value: &Value, ty: TypeId) -> Result<bool> {
        let Some(items) = value.as_sequence() else {
            return Ok(false);
        };
        let entry = self.type_entry(ty)?;
        for item in items {
            if !self.can_convert_entry(item, &entry, ELEMENT_FLAGS)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Build a native array of `ty` from a tuple or list of instances.
    pub fn sequence_to_native(&self, value: &Value, ty: TypeId) -> Result<NativeArray> {
        let items = value
            .as_sequence()
            .ok_or_else(|| Error::Type(format!("'{}' is not a sequence", value.type_name())))?;
        let entry = self.type_entry(ty)?;
        if items.is_empty() {
            return Ok(NativeArray { ptr: None, len: 0, ty: entry });
        }

        let array = entry.behaviour().array_new(items.len()).ok_or_else(|| {
            Error::System(format!("'{}' does not support native arrays", entry.name()))
        })?;
        let out = NativeArray {
            ptr: Some(array),
            len: items.len(),
            ty: entry.clone(),
        };
        for (index, item) in items.iter().enumerate() {
            let element = self.to_native_entry(item, entry.clone(), &Transfer::Keep, ELEMENT_FLAGS)?;
            if let Some(ptr) = element.ptr() {
                entry.behaviour().array_assign(array, index, ptr);
            }
        }
        Ok(out)
    }

    /// Copy each element of a native array into a new wrapper and return a tuple.
    pub fn native_array_to_tuple(&self, array: NativePtr, len: usize, ty: TypeId) -> Result<Value> {
        let entry = self.type_entry(ty)?;
        let mut items = Vec::new();
        items.try_reserve(len)?;
        for index in 0..len {
            let copy = entry.behaviour().array_copy(array, index).ok_or_else(|| {
                Error::System(format!("'{}' cannot copy array elements", entry.name()))
            })?;
            items.push(self.from_new_native(Some(copy), ty, None)?);
        }
        Ok(Value::tuple(items))
    }
}
