//! Reference-counted handle to a native source object.
//!
//! One atomic word holds the logical reference count plus a CLOSING bit. The
//! owner holds one reference; every in-flight boundary call holds another through
//! a [`HandleGuard`]. `release()` sets CLOSING (no new guards) and drops the
//! owner's reference. Whoever drops the count to zero issues the native
//! `remove_ref`, exactly once, guarded by a compare-and-swap on `released`.
//! A release racing with an in-flight call therefore runs when that call returns.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::ffi::guard_void;
use super::api::{NativeHandle, NativeSourceApi};

const CLOSING: usize = 1 << (usize::BITS - 1);
const COUNT_MASK: usize = !CLOSING;

pub struct BoundaryHandle {
    raw: NativeHandle,
    state: AtomicUsize,
    released: AtomicBool,
    api: Arc<dyn NativeSourceApi>,
}

impl BoundaryHandle {
    /// Take ownership of one native reference. A null `raw` gives an invalid
    /// handle that never reaches the native layer.
    pub fn from_raw(raw: NativeHandle, api: Arc<dyn NativeSourceApi>) -> Self {
        let initial = if raw.is_null() { CLOSING } else { 1 };
        Self {
            raw,
            state: AtomicUsize::new(initial),
            released: AtomicBool::new(false),
            api,
        }
    }

    /// True if the handle references a native object (it may already be closed).
    pub fn is_valid(&self) -> bool {
        !self.raw.is_null()
    }

    /// True once the native reference has been given back.
    pub fn is_closed(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// True once `release()` was called, even if in-flight calls still hold the object.
    pub fn is_closing(&self) -> bool {
        self.state.load(Ordering::SeqCst) & CLOSING != 0
    }

    /// Raw value, for logging and identity checks only.
    pub fn raw(&self) -> NativeHandle {
        self.raw
    }

    /// Current logical reference count (owner + in-flight guards).
    pub fn ref_count(&self) -> usize {
        self.state.load(Ordering::SeqCst) & COUNT_MASK
    }

    /// Pin the native object for the duration of a boundary call.
    /// `None` once the handle is closing, closed or invalid.
    pub fn acquire(&self) -> Option<HandleGuard<'_>> {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current & CLOSING != 0 || current & COUNT_MASK == 0 {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(HandleGuard { handle: self }),
                Err(actual) => current = actual,
            }
        }
    }

    /// Give up the owner's reference. Idempotent.
    pub fn release(&self) {
        let previous = self.state.fetch_or(CLOSING, Ordering::SeqCst);
        if previous & CLOSING != 0 {
            return;
        }
        self.drop_ref();
    }

    /// Create an independent owner of the same native object (native AddRef).
    pub fn duplicate(&self) -> Option<BoundaryHandle> {
        let guard = self.acquire()?;
        self.api.add_ref(guard.raw());
        Some(BoundaryHandle::from_raw(self.raw, self.api.clone()))
    }

    fn drop_ref(&self) {
        let previous = self.state.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous & COUNT_MASK > 0, "handle reference count underflow");
        if previous & COUNT_MASK == 1 {
            self.release_native();
        }
    }

    fn release_native(&self) {
        if self
            .released
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        // Best effort: a leak is preferable to a second release
        let api = &self.api;
        let raw = self.raw;
        guard_void("BoundaryHandle::release_native", || api.remove_ref(raw));
        log::trace!("native handle {:p} released", raw.0);
    }
}

impl Drop for BoundaryHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for BoundaryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryHandle")
            .field("raw", &self.raw.0)
            .field("refs", &self.ref_count())
            .field("closing", &self.is_closing())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Keeps the native object alive while a boundary call is in progress.
pub struct HandleGuard<'a> {
    handle: &'a BoundaryHandle,
}

impl HandleGuard<'_> {
    pub fn raw(&self) -> NativeHandle {
        self.handle.raw
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        self.handle.drop_ref();
    }
}
