//! webrtc-external-source: audio track source fed by the application instead of
//! a capture device.
//!
//! A native source object issues frame requests on its own capture thread; the
//! application answers each one, possibly later and from another thread, with a
//! PCM frame that is delivered to every attached track.
//!
//! ## Layers
//!
//! - **`native`**: the reference-counted source object exported through the
//!   `WEBRTC_EXTSRC_*` C functions below
//! - **`interop`**: the application-side wrapper (`ExternalAudioTrackSource`,
//!   `LocalAudioTrack`) that reaches the native object only through those calls
//! - **`ffi`**: C types, status codes and panic guards shared by both

#![allow(non_snake_case)]

use std::ffi::c_void;

pub mod ffi;
pub mod interop;
pub mod native;

use ffi::*;
use native::{FrameSink, NativeAudioSource};

pub use interop::{
    AudioFrame, AudioFrameRequest, ExtSourceError, ExternalAudioTrackSource, LocalAudioTrack,
    SourceState,
};

// ============================================================================
// Creation
// ============================================================================

/// Create an external audio source.
///
/// The source does not issue requests until `WEBRTC_EXTSRC_FinishCreation`.
///
/// # Arguments
/// * `callback` - Frame request callback, invoked on the capture thread
/// * `user_data` - Passed back verbatim to `callback`
/// * `config` - Request cadence configuration (null for defaults)
/// * `handle_out` - Receives the handle, owning one reference
///
/// # Returns
/// EXTSRC_OK or an error code
#[no_mangle]
pub unsafe extern "system" fn WEBRTC_EXTSRC_CreateFromCallback(
    callback: Option<RequestFrameCallback>,
    user_data: *mut c_void,
    config: *const ExtSourceConfigFFI,
    handle_out: *mut ExtSourceHandle,
) -> i32 {
    guard_status("WEBRTC_EXTSRC_CreateFromCallback", || {
        if handle_out.is_null() {
            return EXTSRC_ERROR_INVALID_PARAMETER;
        }
        *handle_out = std::ptr::null_mut();

        let Some(callback) = callback else {
            log::warn!("WEBRTC_EXTSRC_CreateFromCallback: null callback");
            return EXTSRC_ERROR_INVALID_PARAMETER;
        };
        let cfg = if config.is_null() {
            ExtSourceConfigFFI::default()
        } else {
            *config
        };

        let source = NativeAudioSource::create(callback, user_data, cfg);
        *handle_out = NativeAudioSource::into_handle(source);
        log::debug!("external audio source {:p} created", *handle_out);
        EXTSRC_OK
    })
}

/// Allow the source to start issuing frame requests.
#[no_mangle]
pub unsafe extern "system" fn WEBRTC_EXTSRC_FinishCreation(handle: ExtSourceHandle) {
    guard_void("WEBRTC_EXTSRC_FinishCreation", || {
        match NativeAudioSource::clone_from_handle(handle) {
            Some(source) => source.finish_creation(),
            None => log::warn!("WEBRTC_EXTSRC_FinishCreation: null handle"),
        }
    })
}

// ============================================================================
// Reference counting
// ============================================================================

#[no_mangle]
pub unsafe extern "system" fn WEBRTC_EXTSRC_AddRef(handle: ExtSourceHandle) {
    guard_void("WEBRTC_EXTSRC_AddRef", || {
        if !handle.is_null() {
            NativeAudioSource::add_ref(handle);
        }
    })
}

/// Drop one reference. The object is freed with its last reference.
#[no_mangle]
pub unsafe extern "system" fn WEBRTC_EXTSRC_RemoveRef(handle: ExtSourceHandle) {
    guard_void("WEBRTC_EXTSRC_RemoveRef", || {
        if !handle.is_null() {
            NativeAudioSource::remove_ref(handle);
        }
    })
}

// ============================================================================
// Frame requests
// ============================================================================

/// Answer a pending frame request.
///
/// The frame is delivered to every sink before this returns, stamped with the
/// time the request was issued; `timestamp_ms` is informational.
///
/// # Returns
/// EXTSRC_OK, EXTSRC_ERROR_STALE_REQUEST for unknown/answered/abandoned ids,
/// or another error code
#[no_mangle]
pub unsafe extern "system" fn WEBRTC_EXTSRC_CompleteFrameRequest(
    handle: ExtSourceHandle,
    request_id: u32,
    timestamp_ms: i64,
    frame: *const AudioFrameFFI,
) -> i32 {
    guard_status("WEBRTC_EXTSRC_CompleteFrameRequest", || {
        let Some(source) = NativeAudioSource::from_handle(handle) else {
            return EXTSRC_ERROR_INVALID_HANDLE;
        };
        if frame.is_null() {
            return EXTSRC_ERROR_INVALID_PARAMETER;
        }
        source.complete_request(request_id, timestamp_ms, &*frame)
    })
}

/// Stop issuing requests, permanently. Pending requests become stale.
#[no_mangle]
pub unsafe extern "system" fn WEBRTC_EXTSRC_Shutdown(handle: ExtSourceHandle) {
    guard_void("WEBRTC_EXTSRC_Shutdown", || {
        if let Some(source) = NativeAudioSource::from_handle(handle) {
            source.shutdown();
        }
    })
}

// ============================================================================
// Sinks
// ============================================================================

/// Register a frame sink. The same (callback, user_data) pair may only be added once.
#[no_mangle]
pub unsafe extern "system" fn WEBRTC_EXTSRC_AddSink(
    handle: ExtSourceHandle,
    callback: Option<AudioFrameCallback>,
    user_data: *mut c_void,
) -> i32 {
    guard_status("WEBRTC_EXTSRC_AddSink", || {
        let Some(source) = NativeAudioSource::from_handle(handle) else {
            return EXTSRC_ERROR_INVALID_HANDLE;
        };
        let Some(callback) = callback else {
            return EXTSRC_ERROR_INVALID_PARAMETER;
        };
        if source.add_sink(FrameSink { callback, user_data }) {
            EXTSRC_OK
        } else {
            EXTSRC_ERROR_INVALID_OPERATION
        }
    })
}

#[no_mangle]
pub unsafe extern "system" fn WEBRTC_EXTSRC_RemoveSink(
    handle: ExtSourceHandle,
    callback: Option<AudioFrameCallback>,
    user_data: *mut c_void,
) -> i32 {
    guard_status("WEBRTC_EXTSRC_RemoveSink", || {
        let Some(source) = NativeAudioSource::from_handle(handle) else {
            return EXTSRC_ERROR_INVALID_HANDLE;
        };
        let Some(callback) = callback else {
            return EXTSRC_ERROR_INVALID_PARAMETER;
        };
        if source.remove_sink(&FrameSink { callback, user_data }) {
            EXTSRC_OK
        } else {
            EXTSRC_ERROR_INVALID_PARAMETER
        }
    })
}

// ============================================================================
// Statistics / misc
// ============================================================================

/// Get source statistics.
#[no_mangle]
pub unsafe extern "system" fn WEBRTC_EXTSRC_GetStats(
    handle: ExtSourceHandle,
    stats: *mut ExtSourceStatsFFI,
) -> i32 {
    guard_status("WEBRTC_EXTSRC_GetStats", || {
        let Some(source) = NativeAudioSource::from_handle(handle) else {
            return EXTSRC_ERROR_INVALID_HANDLE;
        };
        if stats.is_null() {
            return EXTSRC_ERROR_INVALID_PARAMETER;
        }
        *stats = source.stats_snapshot();
        EXTSRC_OK
    })
}

/// API version (major << 8 | minor).
#[no_mangle]
pub extern "system" fn WEBRTC_EXTSRC_GetVersion() -> u32 {
    EXTSRC_VERSION
}

/// Install an `env_logger` logger (RUST_LOG, default level `info`).
///
/// # Returns
/// EXTSRC_OK, or EXTSRC_ERROR_INVALID_OPERATION if a logger is already installed
#[no_mangle]
pub extern "system" fn WEBRTC_EXTSRC_EnableLogging() -> i32 {
    guard_status("WEBRTC_EXTSRC_EnableLogging", || {
        match env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init()
        {
            Ok(()) => EXTSRC_OK,
            Err(_) => EXTSRC_ERROR_INVALID_OPERATION,
        }
    })
}
