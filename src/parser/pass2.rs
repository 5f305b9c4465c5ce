//! Second pass - perform the conversions of a matched signature
//!
//! Runs only after the first pass accepted every argument, so the only
//! failures left are errors raised by convertors or deleted native objects.
//! Conversions already done are released when an error unwinds.

use super::pass1::{convert_flags, Matched, ReceiverMatch, Slot};
use super::signature::{CallSignature, ParamFlags, ParamKind};
use super::{Arg, BoundReceiver, ParsedArgs};
use crate::error::Result;
use crate::registry::Transfer;
use crate::runtime::Runtime;

pub(super) fn convert(rt: &Runtime, signature: &CallSignature, matched: Matched<'_>) -> Result<ParsedArgs> {
    let receiver = match matched.receiver {
        ReceiverMatch::None | ReceiverMatch::Class(None) | ReceiverMatch::Constructing(None) => {
            BoundReceiver::None
        }
        ReceiverMatch::Instance(wrapper, ty) => BoundReceiver::Instance {
            ptr: rt.native_ptr(wrapper, ty)?,
            wrapper: wrapper.clone(),
        },
        ReceiverMatch::Class(Some(class)) => BoundReceiver::Class(class),
        ReceiverMatch::Constructing(Some(wrapper)) => BoundReceiver::Constructing(wrapper.clone()),
    };

    let mut args = Vec::new();
    args.try_reserve(matched.slots.len())?;
    let mut owner = None;

    for (param, slot) in signature.params().iter().zip(matched.slots) {
        let arg = match slot {
            Slot::Missing => Arg::Missing,
            Slot::Ready(arg) => arg,
            Slot::Deferred(value) => match &param.kind {
                ParamKind::Instance { ty, flags } => {
                    let transfer = if flags.contains(ParamFlags::TRANSFER) {
                        // Owned by the receiver; static calls hand it to native code.
                        receiver
                            .wrapper()
                            .map_or(Transfer::ToNative, |w| Transfer::To(w.clone()))
                    } else if flags.contains(ParamFlags::TRANSFER_BACK) {
                        Transfer::Back
                    } else {
                        Transfer::Keep
                    };
                    let converted = rt.to_native(value, *ty, &transfer, convert_flags(*flags))?;
                    if flags.contains(ParamFlags::TRANSFER_THIS) && converted.ptr().is_some() {
                        owner = value.as_wrapper().cloned();
                    }
                    Arg::Instance(converted)
                }
                ParamKind::Array(ty) => Arg::Array(rt.sequence_to_native(value, *ty)?),
                _ => Arg::Object(value.clone()),
            },
        };
        args.push(arg);
    }

    Ok(ParsedArgs {
        receiver,
        args,
        owner,
        unused: matched.unused,
    })
}
