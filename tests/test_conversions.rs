mod common;

use bindery::registry::UserState;
use bindery::{
    parse_overloads, CallArgs, CallSignature, Converted, Error, FormatArg, NativePtr, NativeType, Result, Runtime,
    Transfer, TypeDef, TypeFlags, TypeId, Value,
};
use common::{fixture, widget_at, Fixture, Releases, Widget};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A mapped `Size` type built from an int or a `(w, h)` tuple. `None` is
/// the empty size.
struct SizeType {
    released: Arc<AtomicUsize>,
    checks: Arc<AtomicUsize>,
}

#[derive(Debug, PartialEq)]
struct Size(i64, i64);

impl NativeType for SizeType {
    fn has_convertor(&self) -> bool {
        true
    }

    fn can_convert_to(&self, _rt: &Runtime, value: &Value) -> Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        match value {
            Value::Int(_) => Ok(true),
            Value::Tuple(items) => Ok(items.len() == 2 && items.iter().all(|i| matches!(i, Value::Int(_)))),
            Value::Str(s) if &**s == "explode" => Err(Error::user("RuntimeError", "size check failed")),
            _ => Ok(false),
        }
    }

    fn convert_to(&self, _rt: &Runtime, value: &Value, _transfer: &Transfer) -> Result<Converted> {
        let size = match value {
            Value::None => Size(0, 0),
            Value::Int(n) if *n < 0 => return Err(Error::user("ValueError", "negative size")),
            Value::Int(n) => Size(*n as i64, *n as i64),
            Value::Tuple(items) => match (&items[0], &items[1]) {
                (Value::Int(w), Value::Int(h)) => Size(*w as i64, *h as i64),
                _ => return Err(Error::Type("bad size".into())),
            },
            _ => return Err(Error::Type("bad size".into())),
        };
        Ok(Converted::temporary(NativePtr::from_box(Box::new(size))))
    }

    fn release(&self, ptr: NativePtr, _user_state: Option<UserState>) {
        drop(unsafe { ptr.into_box::<Size>() });
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct Sizes {
    ty: TypeId,
    released: Arc<AtomicUsize>,
    checks: Arc<AtomicUsize>,
}

fn register_size(fx: &Fixture) -> Sizes {
    let released = Arc::new(AtomicUsize::new(0));
    let checks = Arc::new(AtomicUsize::new(0));
    let ty = fx
        .rt
        .register_type(
            TypeDef::mapped(
                "Size",
                SizeType {
                    released: released.clone(),
                    checks: checks.clone(),
                },
            )
            .with_flags(TypeFlags::ALLOW_NONE),
        )
        .unwrap();
    Sizes { ty, released, checks }
}

#[test]
fn test_temporary_released_after_call() {
    let fx = fixture();
    let sizes = register_size(&fx);
    let sig = CallSignature::from_format("J0", &[FormatArg::Type(sizes.ty)], &[]).unwrap();

    let (_, parsed) = parse_overloads(
        &fx.rt,
        &[sig],
        &CallArgs::new().arg(Value::tuple(vec![Value::Int(3), Value::Int(4)])),
        None,
        "resize",
        None,
    )
    .unwrap();
    let ptr = parsed.instance_ptr(0).unwrap();
    assert_eq!(unsafe { ptr.as_ref::<Size>() }, &Size(3, 4));
    assert!(parsed.instance(0).unwrap().is_temporary());
    assert_eq!(sizes.released.load(Ordering::SeqCst), 0);

    drop(parsed);
    assert_eq!(sizes.released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_rejected_candidates_convert_nothing() {
    let fx = fixture();
    let sizes = register_size(&fx);
    let with_text = CallSignature::from_format("J0x", &[FormatArg::Type(sizes.ty)], &[]).unwrap();
    let with_int = CallSignature::from_format("J0i", &[FormatArg::Type(sizes.ty)], &[]).unwrap();

    let (index, parsed) = parse_overloads(
        &fx.rt,
        &[with_text, with_int],
        &CallArgs::new().arg(2).arg(7),
        None,
        "resize",
        None,
    )
    .unwrap();
    assert_eq!(index, 1);
    // Both candidates checked the first argument; only the winner converted it.
    assert_eq!(sizes.checks.load(Ordering::SeqCst), 2);
    drop(parsed);
    assert_eq!(sizes.released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_convertor_error_stops_the_search() {
    let fx = fixture();
    let sizes = register_size(&fx);
    let size = CallSignature::from_format("J0", &[FormatArg::Type(sizes.ty)], &[]).unwrap();
    let any = CallSignature::from_format("P", &[], &[]).unwrap();

    let err = parse_overloads(&fx.rt, &[size.clone(), any.clone()], &CallArgs::new().arg(-1), None, "resize", None)
        .unwrap_err();
    assert_eq!(err, Error::user("ValueError", "negative size"));

    // An exception from the cheap check escalates too.
    let err = parse_overloads(&fx.rt, &[size, any], &CallArgs::new().arg("explode"), None, "resize", None)
        .unwrap_err();
    assert_eq!(err.kind(), "RuntimeError");
    assert_eq!(fx.rt.stats().overload_failures, 0);
}

#[test]
fn test_none_allowed_by_type() {
    let fx = fixture();
    let sizes = register_size(&fx);
    let deref = CallSignature::from_format("J1", &[FormatArg::Type(sizes.ty)], &[]).unwrap();

    // ALLOW_NONE lets the convertor see None even when a value is required.
    let (_, parsed) =
        parse_overloads(&fx.rt, &[deref], &CallArgs::new().arg(Value::None), None, "resize", None).unwrap();
    let ptr = parsed.instance_ptr(0).unwrap();
    assert_eq!(unsafe { ptr.as_ref::<Size>() }, &Size(0, 0));
    assert_eq!(sizes.checks.load(Ordering::SeqCst), 0);
}

#[test]
fn test_no_convertors_flag() {
    let fx = fixture();
    let sizes = register_size(&fx);
    let strict = CallSignature::from_format("J8", &[FormatArg::Type(sizes.ty)], &[]).unwrap();
    let err = parse_overloads(&fx.rt, &[strict], &CallArgs::new().arg(3), None, "resize", None).unwrap_err();
    assert_eq!(err.message(), "resize(): argument 1 has unexpected type 'int'");
    assert_eq!(sizes.checks.load(Ordering::SeqCst), 0);
}

#[test]
fn test_native_to_tuple_copies_elements() {
    let fx = fixture();
    let items = Value::tuple(vec![
        Value::Wrapper(fx.rt.construct(fx.widget, &CallArgs::new().arg(1)).unwrap()),
        Value::Wrapper(fx.rt.construct(fx.widget, &CallArgs::new().arg(2)).unwrap()),
    ]);
    let array = fx.rt.sequence_to_native(&items, fx.widget).unwrap();
    let tuple = fx
        .rt
        .native_array_to_tuple(array.ptr().unwrap(), array.len(), fx.widget)
        .unwrap();
    drop(array);

    let copies = tuple.as_sequence().unwrap();
    assert_eq!(copies.len(), 2);
    let first = copies[0].as_wrapper().unwrap();
    assert_eq!(widget_at(first.address().unwrap()), &Widget { kind: 0, size: 1 });
    assert!(!copies[0].is(&items.as_sequence().unwrap()[0]));

    let before = fx.releases.count();
    drop(tuple);
    assert_eq!(fx.releases.count(), before + 2);
}

#[test]
fn test_releases_counter_is_shared() {
    let fx = fixture();
    let releases: Releases = fx.releases.clone();
    drop(fx.rt.construct(fx.widget, &CallArgs::new()).unwrap());
    assert_eq!(releases.count(), 1);
}

proptest! {
    #[test]
    fn matched_candidates_always_convert(values in prop::collection::vec(
        prop_oneof![
            any::<i32>().prop_map(|i| Value::Int(i as i128)),
            Just(Value::None),
            "[a-z]{0,3}".prop_map(Value::from),
            (any::<u8>(), any::<u8>()).prop_map(|(w, h)| Value::tuple(vec![Value::Int(w as i128), Value::Int(h as i128)])),
        ],
        0..4,
    )) {
        let fx = fixture();
        let sizes = register_size(&fx);
        let candidates = [
            CallSignature::from_format("J0|x", &[FormatArg::Type(sizes.ty)], &[]).unwrap(),
            CallSignature::from_format("xi", &[], &[]).unwrap(),
            CallSignature::from_format("|PPP", &[], &[]).unwrap(),
        ];
        let args = CallArgs::positional(values);
        let mut state = bindery::ParseState::new();
        let mut chosen = None;
        for (index, candidate) in candidates.iter().enumerate() {
            match state.parse(&fx.rt, candidate, &args) {
                Ok(Some(_)) => {
                    chosen = Some(index);
                    break;
                }
                Ok(None) => continue,
                Err(_) => {
                    // Only the convertor itself may still refuse a matched argument.
                    prop_assert!(args.args().first().and_then(Value::as_int).is_some_and(|n| n < 0));
                    return Ok(());
                }
            }
        }
        if let Some(index) = chosen {
            // Order-stable: the same call picks the same candidate again.
            let (again, _) = parse_overloads(&fx.rt, &candidates, &args, None, "f", None).unwrap();
            prop_assert_eq!(again, index);
        }
    }
}
