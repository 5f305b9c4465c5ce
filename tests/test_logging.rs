mod common;

use bindery::{
    parse_overloads, CallArgs, CallSignature, Error, FormatArg, Ownership, PendingHandoff, Runtime, RuntimeConfig,
    Value,
};
use common::{fixture, fixture_with, widget_ptr, Fixture};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// Collects formatted events in memory.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Runs `f` with a JSON subscriber on this thread and returns what it logged.
fn captured(f: impl FnOnce()) -> String {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(Level::TRACE)
        .with_writer(capture.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    capture.text()
}

fn deleted_receiver_call(fx: &Fixture) -> Error {
    let wrapper = fx.rt.construct(fx.widget, &CallArgs::new().arg(4)).unwrap();
    let ptr = wrapper.address().unwrap();
    fx.rt.instance_destroyed(&wrapper).unwrap();
    fx.rt.release(ptr, fx.widget, None).unwrap();

    let sig = CallSignature::from_format("B", &[FormatArg::Type(fx.widget)], &[]).unwrap();
    parse_overloads(
        &fx.rt,
        &[sig],
        &CallArgs::new().with_receiver(Value::Wrapper(wrapper)),
        Some("Widget"),
        "size",
        None,
    )
    .unwrap_err()
}

#[test]
fn test_attach_and_detach_are_logged() {
    let fx = fixture();
    let parent = fx.rt.construct(fx.widget, &CallArgs::new().arg(1)).unwrap();
    let child = fx.rt.construct(fx.widget, &CallArgs::new().arg(2)).unwrap();

    let out = captured(|| {
        fx.rt.attach(&child, &parent).unwrap();
        fx.rt.detach(&child);
    });
    assert!(out.contains(r#""event":"attach""#), "{out}");
    assert!(out.contains(r#""event":"detach""#), "{out}");
}

#[test]
fn test_detach_without_owner_is_silent() {
    let fx = fixture();
    let loose = fx.rt.construct(fx.widget, &CallArgs::new().arg(1)).unwrap();

    let out = captured(|| fx.rt.detach(&loose));
    assert!(!out.contains(r#""event":"detach""#), "{out}");
}

#[test]
fn test_identity_insert_and_remove_are_logged() {
    let fx = fixture();

    let out = captured(|| {
        let wrapper = fx.rt.construct(fx.widget, &CallArgs::new().arg(3)).unwrap();
        let ptr = wrapper.address().unwrap();
        fx.rt.instance_destroyed(&wrapper).unwrap();
        fx.rt.release(ptr, fx.widget, None).unwrap();
    });
    assert!(out.contains(r#""event":"identity_insert""#), "{out}");
    assert!(out.contains(r#""event":"identity_remove""#), "{out}");
}

#[test]
fn test_pending_handoff_is_logged() {
    let fx = fixture();

    let out = captured(|| {
        let wrapper = fx
            .rt
            .wrap_instance(fx.widget, PendingHandoff::new(widget_ptr(5)).with_ownership(Ownership::DynamicOwned))
            .unwrap();
        drop(wrapper);
    });
    assert!(out.contains(r#""event":"pending_stage""#), "{out}");
    assert!(out.contains(r#""event":"pending_take""#), "{out}");
}

#[test]
fn test_conversion_error_logged_when_enabled() {
    let mut config = RuntimeConfig::default();
    config.diagnostics.log_failures = true;
    let fx = fixture_with(Runtime::with_config(config).unwrap());

    let mut err = None;
    let out = captured(|| err = Some(deleted_receiver_call(&fx)));
    assert!(matches!(err, Some(Error::Runtime(_))));
    assert!(out.contains(r#""event":"parse_conversion_error""#), "{out}");
    assert!(out.contains("has been deleted"), "{out}");
}

#[test]
fn test_conversion_error_quiet_by_default() {
    let fx = fixture();

    let mut err = None;
    let out = captured(|| err = Some(deleted_receiver_call(&fx)));
    assert!(matches!(err, Some(Error::Runtime(_))));
    assert!(!out.contains(r#""event":"parse_conversion_error""#), "{out}");
}
