//! Pending handoff - a native object waiting for the wrapper being built
//!
//! Design: wrapping an existing native object goes through the normal
//! construction path. The object is staged on a per-thread stack, the
//! constructor takes it instead of creating a new one, and the stage guard
//! restores whatever was pending before, so nested wrapping works.

use crate::logging;
use crate::value::NativePtr;
use crate::wrapper::{Ownership, Wrapper, WrapperFlags};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A native object plus how its wrapper should own it.
pub struct PendingHandoff {
    pub ptr: NativePtr,
    pub owner: Option<Arc<Wrapper>>,
    pub ownership: Ownership,
    pub flags: WrapperFlags,
}

impl PendingHandoff {
    pub fn new(ptr: NativePtr) -> Self {
        Self {
            ptr,
            owner: None,
            ownership: Ownership::NativeOwned,
            flags: WrapperFlags::empty(),
        }
    }

    pub fn with_owner(mut self, owner: Arc<Wrapper>) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_ownership(mut self, ownership: Ownership) -> Self {
        self.ownership = ownership;
        self
    }

    pub fn with_flags(mut self, flags: WrapperFlags) -> Self {
        self.flags |= flags;
        self
    }
}

impl fmt::Debug for PendingHandoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingHandoff")
            .field("ptr", &self.ptr)
            .field("owner", &self.owner.as_ref().map(|o| o.wrapper_type().name().to_string()))
            .field("ownership", &self.ownership)
            .field("flags", &self.flags)
            .finish()
    }
}

thread_local! {
    static PENDING: RefCell<Vec<Option<PendingHandoff>>> = const { RefCell::new(Vec::new()) };
}

/// Restores the previous pending state when dropped. Tied to its thread.
#[must_use = "the handoff is withdrawn when the guard is dropped"]
pub struct HandoffGuard {
    depth: usize,
    _thread: PhantomData<*const ()>,
}

impl Drop for HandoffGuard {
    fn drop(&mut self) {
        let abandoned = PENDING.with(|stack| {
            let mut stack = stack.borrow_mut();
            let keep = self.depth.saturating_sub(1).min(stack.len());
            stack.split_off(keep)
        });
        // Dropped outside the borrow; an owner reference may be the last one.
        drop(abandoned);
    }
}

fn push(entry: Option<PendingHandoff>) -> HandoffGuard {
    let depth = PENDING.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(entry);
        stack.len()
    });
    HandoffGuard {
        depth,
        _thread: PhantomData,
    }
}

/// Make `handoff` the pending object for the next construction on this thread.
pub fn stage(handoff: PendingHandoff) -> HandoffGuard {
    let address = handoff.ptr.addr();
    let guard = push(Some(handoff));
    logging::log_pending_stage(address, guard.depth);
    guard
}

/// Hide any outer pending object until the guard is dropped.
pub fn suspend() -> HandoffGuard {
    push(None)
}

/// Take the innermost pending object, clearing it.
pub fn take() -> Option<PendingHandoff> {
    let taken = PENDING.with(|stack| stack.borrow_mut().last_mut().and_then(Option::take));
    if let Some(handoff) = &taken {
        logging::log_pending_take(handoff.ptr.addr());
    }
    taken
}

pub fn is_pending() -> bool {
    PENDING.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(addr: usize) -> NativePtr {
        NativePtr::new(addr).unwrap()
    }

    #[test]
    fn test_take_clears() {
        let _guard = stage(PendingHandoff::new(ptr(0x10)));
        assert!(is_pending());
        assert_eq!(take().map(|h| h.ptr), Some(ptr(0x10)));
        assert!(take().is_none());
        assert!(!is_pending());
    }

    #[test]
    fn test_nested_restores_outer() {
        let outer = stage(PendingHandoff::new(ptr(0x10)));
        {
            let _inner = stage(PendingHandoff::new(ptr(0x20)));
            assert_eq!(take().map(|h| h.ptr), Some(ptr(0x20)));
        }
        assert_eq!(take().map(|h| h.ptr), Some(ptr(0x10)));
        drop(outer);
        assert!(!is_pending());
    }

    #[test]
    fn test_suspend_hides_outer() {
        let _outer = stage(PendingHandoff::new(ptr(0x10)));
        {
            let _hidden = suspend();
            assert!(!is_pending());
            assert!(take().is_none());
        }
        assert!(is_pending());
    }

    #[test]
    fn test_leaked_inner_guard_is_unwound() {
        let outer = stage(PendingHandoff::new(ptr(0x10)));
        std::mem::forget(stage(PendingHandoff::new(ptr(0x20))));
        drop(outer);
        assert!(!is_pending());
        PENDING.with(|stack| assert!(stack.borrow().is_empty()));
    }

    #[test]
    fn test_threads_are_isolated() {
        let _guard = stage(PendingHandoff::new(ptr(0x10)));
        let seen = std::thread::spawn(is_pending).join().unwrap();
        assert!(!seen);
        assert!(is_pending());
    }
}
