//! Panic guards for code reachable from the C boundary.
//!
//! Unwinding out of an `extern` function is undefined behaviour, so every exported
//! function and every trampoline runs its body through one of these.

use std::panic::{catch_unwind, AssertUnwindSafe};

use super::EXTSRC_ERROR_UNKNOWN;

/// Extract a human-readable message from a panic payload.
pub fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

/// Run `f`, turning a panic into `EXTSRC_ERROR_UNKNOWN`.
pub fn guard_status(op: &'static str, f: impl FnOnce() -> i32) -> i32 {
    guard_with_default(op, EXTSRC_ERROR_UNKNOWN, f)
}

/// Run `f`, logging a panic. There is nothing to return to the caller.
pub fn guard_void(op: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        log::error!("panic in `{}`: {}", op, panic_message(payload));
    }
}

/// Run `f`, returning `default` if it panics.
pub fn guard_with_default<T>(op: &'static str, default: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            log::error!("panic in `{}`: {}", op, panic_message(payload));
            default
        }
    }
}
