mod common;

use bindery::registry::{Constructed, UserState};
use bindery::{
    CallArgs, InitContext, NativePtr, NativeType, Ownership, PendingHandoff, Transfer, TransferTarget, TypeDef, Value,
    WrapperFlags,
};
use common::{button_ptr, fixture, widget_at, widget_ptr};
use std::sync::Arc;

#[test]
fn test_same_native_object_same_wrapper() {
    let fx = fixture();
    let ptr = widget_ptr(3);

    let first = fx.rt.from_native(Some(ptr), fx.widget, &Transfer::Keep).unwrap();
    let second = fx.rt.from_native(Some(ptr), fx.widget, &Transfer::Keep).unwrap();
    assert!(first.is(&second));

    let wrapper = first.as_wrapper().unwrap();
    assert_eq!(wrapper.ownership(), Ownership::NativeOwned);
    assert!(wrapper.flags().contains(WrapperFlags::SHARE_MAP));
    assert!(Arc::ptr_eq(&fx.rt.find_wrapper(ptr, fx.widget).unwrap(), wrapper));

    drop((first, second));
    assert!(fx.rt.find_wrapper(ptr, fx.widget).is_none());
    assert_eq!(fx.releases.count(), 0);
    fx.rt.release(ptr, fx.widget, None).unwrap();
}

/// An unrelated view of the same memory; never releases anything.
struct Opaque;

impl NativeType for Opaque {}

#[test]
fn test_unrelated_types_get_independent_wrappers() {
    let fx = fixture();
    let handle = fx.rt.register_type(TypeDef::class("Handle", Opaque)).unwrap();
    let ptr = widget_ptr(3);

    let as_widget = fx.rt.from_native(Some(ptr), fx.widget, &Transfer::Keep).unwrap();
    let as_handle = fx.rt.from_native(Some(ptr), handle, &Transfer::Keep).unwrap();
    assert!(!as_widget.is(&as_handle));
    assert_eq!(as_handle.as_wrapper().unwrap().type_id(), handle);

    // Both stay live and each is found again as its own type.
    assert!(fx.rt.from_native(Some(ptr), fx.widget, &Transfer::Keep).unwrap().is(&as_widget));
    assert!(fx.rt.from_native(Some(ptr), handle, &Transfer::Keep).unwrap().is(&as_handle));

    drop((as_widget, as_handle));
    fx.rt.release(ptr, fx.widget, None).unwrap();
}

#[test]
fn test_subclass_convertor_picks_most_specific_type() {
    let fx = fixture();
    let ptr = button_ptr(6);

    let value = fx.rt.from_native(Some(ptr), fx.widget, &Transfer::Keep).unwrap();
    let wrapper = value.as_wrapper().unwrap();
    assert_eq!(wrapper.type_id(), fx.button);
    assert_eq!(wrapper.wrapper_type().name(), "Button");

    // Found again whichever type it is looked up as.
    assert!(fx.rt.find_wrapper(ptr, fx.widget).is_some());
    assert!(fx.rt.find_wrapper(ptr, fx.button).is_some());
    let again = fx.rt.from_native(Some(ptr), fx.button, &Transfer::Keep).unwrap();
    assert!(again.is(&value));

    drop((value, again));
    fx.rt.release(ptr, fx.button, None).unwrap();
}

#[test]
fn test_new_native_object_owned_by_wrapper() {
    let fx = fixture();
    let ptr = widget_ptr(1);

    let value = fx.rt.from_new_native(Some(ptr), fx.widget, None).unwrap();
    assert_eq!(value.as_wrapper().unwrap().ownership(), Ownership::DynamicOwned);
    assert_eq!(fx.rt.live_wrappers().len(), 1);

    drop(value);
    assert_eq!(fx.releases.count(), 1);
    assert!(fx.rt.live_wrappers().is_empty());
    assert_eq!(fx.rt.stats().native_releases, 1);
}

#[test]
fn test_destroyed_instance_leaves_cache() {
    let fx = fixture();
    let wrapper = fx.rt.construct(fx.widget, &CallArgs::new().arg(2)).unwrap();
    let ptr = wrapper.address().unwrap();
    assert!(wrapper.flags().contains(WrapperFlags::CREATED));

    fx.rt.instance_destroyed(&wrapper).unwrap();
    assert_eq!(wrapper.address(), None);
    assert!(fx.rt.find_wrapper(ptr, fx.widget).is_none());

    drop(wrapper);
    assert_eq!(fx.releases.count(), 0);
    fx.rt.release(ptr, fx.widget, None).unwrap();
}

#[test]
fn test_reused_address_invalidates_stale_wrapper() {
    let fx = fixture();
    let ptr = widget_ptr(1);
    let stale = fx.rt.from_native(Some(ptr), fx.widget, &Transfer::Keep).unwrap();

    // Native code deleted the object without telling us and built a new one
    // at the same address.
    let fresh = fx
        .rt
        .wrap_instance(fx.widget, PendingHandoff::new(ptr).with_ownership(Ownership::DynamicOwned))
        .unwrap();

    assert_eq!(stale.as_wrapper().unwrap().address(), None);
    assert!(Arc::ptr_eq(&fx.rt.find_wrapper(ptr, fx.widget).unwrap(), &fresh));
    drop(stale);
    assert_eq!(fx.releases.count(), 0);
    drop(fresh);
    assert_eq!(fx.releases.count(), 1);
}

#[test]
fn test_many_wrappers_survive_reorganisation() {
    let fx = fixture();
    let values: Vec<Value> = (0..2000)
        .map(|size| fx.rt.from_new_native(Some(widget_ptr(size)), fx.widget, None).unwrap())
        .collect();

    for (size, value) in values.iter().enumerate() {
        let ptr = value.as_wrapper().unwrap().address().unwrap();
        assert_eq!(widget_at(ptr).size, size as i32);
        assert!(fx.rt.find_wrapper(ptr, fx.widget).is_some());
    }
    assert_eq!(fx.rt.stats().identity.entries, 2000);

    drop(values);
    assert_eq!(fx.releases.count(), 2000);
    assert!(fx.rt.live_wrappers().is_empty());
}

/// Hands its new object to the wrapper being constructed.
struct SelfOwned {
    releases: common::Releases,
}

impl NativeType for SelfOwned {
    fn release(&self, ptr: NativePtr, _user_state: Option<UserState>) {
        drop(unsafe { ptr.into_box::<common::Widget>() });
        self.releases.bump();
    }

    fn init(&self, cx: &mut InitContext<'_>) -> bindery::Result<Constructed> {
        Ok(Constructed {
            ptr: widget_ptr(1),
            owner: Some(TransferTarget::Owner(cx.wrapper().clone())),
        })
    }
}

#[test]
fn test_failed_binding_releases_constructed_object() {
    let fx = fixture();
    let releases = common::Releases::default();
    let ty = fx
        .rt
        .register_type(TypeDef::class(
            "SelfOwned",
            SelfOwned {
                releases: releases.clone(),
            },
        ))
        .unwrap();

    let err = fx.rt.construct(ty, &CallArgs::new()).unwrap_err();
    assert!(matches!(err, bindery::Error::Value(_)));
    assert_eq!(releases.count(), 1);
    assert!(fx.rt.live_wrappers().is_empty());
}
