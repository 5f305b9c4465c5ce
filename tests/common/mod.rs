//! Shared fixtures: a small class hierarchy backed by boxed Rust values.
#![allow(dead_code)]

use bindery::registry::{Constructed, IntKind, UserState};
use bindery::{
    CallSignature, InitContext, NativePtr, NativeType, ParamKind, ParseState, Result, Runtime, TypeDef,
    TypeId,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const KIND_WIDGET: u8 = 0;
pub const KIND_BUTTON: u8 = 1;

#[repr(C)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Widget {
    pub kind: u8,
    pub size: i32,
}

#[repr(C)]
#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub base: Widget,
    pub pressed: bool,
}

/// Counts native objects the runtime destroyed.
#[derive(Debug, Clone, Default)]
pub struct Releases(Arc<AtomicUsize>);

impl Releases {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn widget_ptr(size: i32) -> NativePtr {
    NativePtr::from_box(Box::new(Widget {
        kind: KIND_WIDGET,
        size,
    }))
}

pub fn button_ptr(size: i32) -> NativePtr {
    NativePtr::from_box(Box::new(Button {
        base: Widget {
            kind: KIND_BUTTON,
            size,
        },
        pressed: false,
    }))
}

pub fn widget_at(ptr: NativePtr) -> &'static Widget {
    unsafe { ptr.as_ref::<Widget>() }
}

fn size_signature() -> CallSignature {
    CallSignature::builder()
        .optional()
        .named("size", ParamKind::Int(IntKind::I32))
        .build()
        .unwrap()
}

fn construct_size(cx: &mut InitContext<'_>) -> Result<i32> {
    let mut state = ParseState::new();
    match cx.parse(&mut state, &size_signature())? {
        Some(parsed) => Ok(parsed.int::<i32>(0).unwrap_or(0)),
        None => Err(state.no_method(Some(cx.type_name()), "__init__", None)),
    }
}

pub struct WidgetType {
    pub releases: Releases,
}

impl NativeType for WidgetType {
    fn release(&self, ptr: NativePtr, _user_state: Option<UserState>) {
        drop(unsafe { ptr.into_box::<Widget>() });
        self.releases.bump();
    }

    fn copy(&self, ptr: NativePtr) -> Option<NativePtr> {
        Some(NativePtr::from_box(Box::new(widget_at(ptr).clone())))
    }

    fn array_new(&self, len: usize) -> Option<NativePtr> {
        let array = vec![Widget::default(); len].into_boxed_slice();
        NativePtr::new(Box::into_raw(array) as *mut Widget as usize)
    }

    fn array_assign(&self, array: NativePtr, index: usize, value: NativePtr) {
        unsafe {
            let slot = (array.addr() as *mut Widget).add(index);
            *slot = value.as_ref::<Widget>().clone();
        }
    }

    fn array_copy(&self, array: NativePtr, index: usize) -> Option<NativePtr> {
        let element = unsafe { &*(array.addr() as *const Widget).add(index) };
        Some(NativePtr::from_box(Box::new(element.clone())))
    }

    fn array_release(&self, array: NativePtr, len: usize) {
        let slice = std::ptr::slice_from_raw_parts_mut(array.addr() as *mut Widget, len);
        drop(unsafe { Box::from_raw(slice) });
    }

    fn init(&self, cx: &mut InitContext<'_>) -> Result<Constructed> {
        let size = construct_size(cx)?;
        Ok(Constructed::new(widget_ptr(size)))
    }
}

pub struct ButtonType {
    pub releases: Releases,
}

impl NativeType for ButtonType {
    fn release(&self, ptr: NativePtr, _user_state: Option<UserState>) {
        drop(unsafe { ptr.into_box::<Button>() });
        self.releases.bump();
    }

    fn init(&self, cx: &mut InitContext<'_>) -> Result<Constructed> {
        let size = construct_size(cx)?;
        Ok(Constructed::new(button_ptr(size)))
    }
}

pub struct Fixture {
    pub rt: Runtime,
    pub widget: TypeId,
    pub button: TypeId,
    pub releases: Releases,
}

/// `Widget` and its subclass `Button`, with a down-cast convertor that
/// reads the kind tag.
pub fn fixture() -> Fixture {
    fixture_with(Runtime::new())
}

pub fn fixture_with(rt: Runtime) -> Fixture {
    let releases = Releases::default();
    let widget = rt
        .register_type(TypeDef::class(
            "Widget",
            WidgetType {
                releases: releases.clone(),
            },
        ))
        .unwrap();
    let button = rt
        .register_type(
            TypeDef::class(
                "Button",
                ButtonType {
                    releases: releases.clone(),
                },
            )
            .with_super(widget),
        )
        .unwrap();
    rt.register_subclass_convertor(widget, move |ptr| {
        (widget_at(ptr).kind == KIND_BUTTON).then_some((ptr, button))
    })
    .unwrap();

    Fixture {
        rt,
        widget,
        button,
        releases,
    }
}
