use super::*;
use crate::error::Error;
use crate::parser::FormatArg;
use crate::runtime::Runtime;
use crate::value::{Callable, NativePtr, Value, ValueKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn ptr(addr: usize) -> NativePtr {
    NativePtr::new(addr).unwrap()
}

#[test]
fn test_compile_formats() {
    let single = ResultFormat::compile("a8", "build_result", "aA").unwrap();
    assert!(!single.tuple);
    assert_eq!(single.items, vec![FormatItem { code: 'a', sub: Some('8') }]);

    let tuple = ResultFormat::compile("(iAL)", "build_result", "aA").unwrap();
    assert!(tuple.tuple);
    assert_eq!(tuple.items.len(), 2);

    assert!(ResultFormat::compile("()", "build_result", "").unwrap().items.is_empty());
    for bad in ["", "ii", "(i", "(i)i", "((i))", "a"] {
        assert!(
            matches!(ResultFormat::compile(bad, "build_result", "aA"), Err(Error::System(_))),
            "{:?} should be rejected",
            bad
        );
    }
}

#[test]
fn test_build_scalars() {
    let rt = Runtime::new();
    assert_eq!(build_result(&rt, "b", vec![NativeArg::Bool(true)]).unwrap(), Value::Bool(true));
    assert_eq!(build_result(&rt, "c", vec![NativeArg::Char(b'q')]).unwrap(), Value::bytes(b"q"));
    assert_eq!(build_result(&rt, "aL", vec![NativeArg::Char(0xe9)]).unwrap(), Value::from("é"));
    assert_eq!(build_result(&rt, "w", vec![NativeArg::WideChar('λ')]).unwrap(), Value::from("λ"));
    assert_eq!(build_result(&rt, "m", vec![NativeArg::Int(u64::MAX as i128)]).unwrap(), Value::Int(u64::MAX as i128));
    assert_eq!(build_result(&rt, "x", vec![NativeArg::Str(None)]).unwrap(), Value::None);
}

#[test]
fn test_build_tuple() {
    let rt = Runtime::new();
    let value = build_result(
        &rt,
        "(isdV)",
        vec![
            NativeArg::Int(3),
            NativeArg::Bytes(Some(b"ab")),
            NativeArg::Float(0.5),
            NativeArg::VoidPtr(Some(ptr(0x40))),
        ],
    )
    .unwrap();
    assert_eq!(
        value,
        Value::tuple(vec![
            Value::Int(3),
            Value::bytes(b"ab"),
            Value::Float(0.5),
            Value::VoidPtr(ptr(0x40)),
        ])
    );
}

#[test]
fn test_build_capsule_carries_name() {
    let rt = Runtime::new();
    let value = build_result(
        &rt,
        "z",
        vec![NativeArg::Capsule {
            ptr: Some(ptr(0x80)),
            name: "Widget::Handle",
        }],
    )
    .unwrap();
    let Value::Capsule(capsule) = value else {
        panic!("expected a capsule");
    };
    assert_eq!(capsule.name.as_deref(), Some("Widget::Handle"));
    assert_eq!(capsule.ptr, ptr(0x80));
}

#[test]
fn test_build_errors() {
    let rt = Runtime::new();
    assert!(matches!(
        build_result(&rt, "L", vec![NativeArg::Int(300)]),
        Err(Error::Overflow(_))
    ));
    assert!(matches!(
        build_result(&rt, "i", vec![NativeArg::Bool(true)]),
        Err(Error::System(_))
    ));
    assert!(matches!(
        build_result(&rt, "(ii)", vec![NativeArg::Int(1)]),
        Err(Error::System(_))
    ));
    assert!(matches!(
        build_result(&rt, "AA", vec![NativeArg::Bytes(Some(&[0xe9]))]),
        Err(Error::Value(_))
    ));
}

#[test]
fn test_parse_tuple() {
    let rt = Runtime::new();
    let value = Value::tuple(vec![Value::Int(7), Value::from("hi"), Value::None]);
    let parsed = parse_result(&rt, None, "size", "(ixN)", &[FormatArg::Kind(ValueKind::List)], &value).unwrap();
    assert!(matches!(parsed[0], ResultValue::Int(7)));
    assert!(matches!(&parsed[1], ResultValue::Text(Some(t)) if t == "hi"));
    assert!(matches!(&parsed[2], ResultValue::Object(Value::None)));
}

#[test]
fn test_parse_void_result() {
    let rt = Runtime::new();
    assert!(parse_result(&rt, None, "update", "Z", &[], &Value::None).unwrap().is_empty());
    assert!(parse_result(&rt, None, "update", "Z", &[], &Value::Int(1)).is_err());
}

#[test]
fn test_parse_arity_mismatch_is_reported() {
    let rt = Runtime::new();
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = reported.clone();
    rt.set_virtual_error_handler(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let value = Value::tuple(vec![Value::Int(1)]);
    let err = parse_result(&rt, None, "size", "(ii)", &[], &value).unwrap_err();
    assert_eq!(
        err,
        Error::Type("invalid result from size(), a tuple of 2 items is expected".into())
    );
    assert_eq!(reported.load(Ordering::SeqCst), 1);
}

#[test]
fn test_parse_element_errors_keep_their_class() {
    let rt = Runtime::new();
    let err = parse_result(&rt, None, "size", "M", &[], &Value::Int(256)).unwrap_err();
    assert_eq!(
        err,
        Error::Overflow("invalid result from size(), value must be in the range 0 to 255".into())
    );

    let err = parse_result(&rt, None, "size", "i", &[], &Value::from("x")).unwrap_err();
    assert_eq!(
        err,
        Error::Type("invalid result from size(), unexpected type 'str'".into())
    );
}

#[test]
fn test_parse_format_errors_are_not_reported() {
    let rt = Runtime::new();
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = reported.clone();
    rt.set_virtual_error_handler(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(matches!(
        parse_result(&rt, None, "size", "Q", &[], &Value::Int(1)),
        Err(Error::System(_))
    ));
    // 'T' needs a kind argument
    assert!(matches!(
        parse_result(&rt, None, "size", "T", &[], &Value::Int(1)),
        Err(Error::System(_))
    ));
    assert_eq!(reported.load(Ordering::SeqCst), 0);
}

#[test]
fn test_call_method_spreads_tuple() {
    let rt = Runtime::new();
    let add = Callable::new("add", |args| match args {
        [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a + b)),
        _ => Err(Error::Type("add() takes two ints".into())),
    });
    let sum = call_method(&rt, &add, "(ii)", vec![NativeArg::Int(2), NativeArg::Int(3)]).unwrap();
    assert_eq!(sum, Value::Int(5));
    assert!(call_method(&rt, &add, "i", vec![NativeArg::Int(2)]).is_err());
}
