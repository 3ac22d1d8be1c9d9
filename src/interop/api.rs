//! Boundary calls made by the application side.
//!
//! The wrapper never touches native objects directly; it goes through
//! [`NativeSourceApi`]. [`EngineApi`] forwards to this crate's exported C
//! functions. Another engine exposing the same entry points can be plugged in by
//! implementing the trait.

use std::ffi::c_void;
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::ffi::{
    AudioFrameCallback, AudioFrameFFI, ExtSourceConfigFFI, ExtSourceHandle, ExtSourceStatsFFI,
    RequestFrameCallback, EXTSRC_ERROR_UNKNOWN, EXTSRC_OK,
};
use super::error::NativeStatus;

/// Raw native handle as seen by the application side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHandle(pub ExtSourceHandle);

// Safety: the handle is an opaque token; the native side synchronizes access
unsafe impl Send for NativeHandle {}
unsafe impl Sync for NativeHandle {}

impl NativeHandle {
    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// The calls the application side makes into the native engine.
///
/// Handles passed in are guaranteed live by the caller (a
/// [`super::handle::HandleGuard`] is held for the duration of the call).
pub trait NativeSourceApi: Send + Sync {
    /// Allocate a native source. It must not issue requests before `finish_creation`.
    fn create_from_callback(
        &self,
        callback: RequestFrameCallback,
        user_data: *mut c_void,
        config: &ExtSourceConfigFFI,
    ) -> Result<NativeHandle, NativeStatus>;

    /// Allow the source to start issuing frame requests.
    fn finish_creation(&self, handle: NativeHandle);

    fn add_ref(&self, handle: NativeHandle);

    /// Drop one reference. The only call made from the handle's release path.
    fn remove_ref(&self, handle: NativeHandle);

    fn complete_frame_request(
        &self,
        handle: NativeHandle,
        request_id: u32,
        timestamp_ms: i64,
        frame: &AudioFrameFFI,
    ) -> NativeStatus;

    /// Irreversibly stop issuing requests.
    fn shutdown(&self, handle: NativeHandle);

    fn add_sink(
        &self,
        handle: NativeHandle,
        callback: AudioFrameCallback,
        user_data: *mut c_void,
    ) -> NativeStatus;

    fn remove_sink(
        &self,
        handle: NativeHandle,
        callback: AudioFrameCallback,
        user_data: *mut c_void,
    ) -> NativeStatus;

    fn stats(&self, handle: NativeHandle) -> Result<ExtSourceStatsFFI, NativeStatus>;
}

/// [`NativeSourceApi`] over the `WEBRTC_EXTSRC_*` C entry points.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineApi;

lazy_static! {
    static ref ENGINE_API: Arc<EngineApi> = Arc::new(EngineApi);
}

/// Shared instance of the in-crate engine API.
pub fn engine_api() -> Arc<dyn NativeSourceApi> {
    ENGINE_API.clone()
}

impl NativeSourceApi for EngineApi {
    fn create_from_callback(
        &self,
        callback: RequestFrameCallback,
        user_data: *mut c_void,
        config: &ExtSourceConfigFFI,
    ) -> Result<NativeHandle, NativeStatus> {
        let mut handle: ExtSourceHandle = std::ptr::null_mut();
        let status = unsafe {
            crate::WEBRTC_EXTSRC_CreateFromCallback(Some(callback), user_data, config, &mut handle)
        };
        match status {
            EXTSRC_OK if !handle.is_null() => Ok(NativeHandle(handle)),
            EXTSRC_OK => Err(NativeStatus(EXTSRC_ERROR_UNKNOWN)),
            code => Err(NativeStatus(code)),
        }
    }

    fn finish_creation(&self, handle: NativeHandle) {
        unsafe { crate::WEBRTC_EXTSRC_FinishCreation(handle.0) }
    }

    fn add_ref(&self, handle: NativeHandle) {
        unsafe { crate::WEBRTC_EXTSRC_AddRef(handle.0) }
    }

    fn remove_ref(&self, handle: NativeHandle) {
        unsafe { crate::WEBRTC_EXTSRC_RemoveRef(handle.0) }
    }

    fn complete_frame_request(
        &self,
        handle: NativeHandle,
        request_id: u32,
        timestamp_ms: i64,
        frame: &AudioFrameFFI,
    ) -> NativeStatus {
        NativeStatus(unsafe {
            crate::WEBRTC_EXTSRC_CompleteFrameRequest(handle.0, request_id, timestamp_ms, frame)
        })
    }

    fn shutdown(&self, handle: NativeHandle) {
        unsafe { crate::WEBRTC_EXTSRC_Shutdown(handle.0) }
    }

    fn add_sink(
        &self,
        handle: NativeHandle,
        callback: AudioFrameCallback,
        user_data: *mut c_void,
    ) -> NativeStatus {
        NativeStatus(unsafe { crate::WEBRTC_EXTSRC_AddSink(handle.0, Some(callback), user_data) })
    }

    fn remove_sink(
        &self,
        handle: NativeHandle,
        callback: AudioFrameCallback,
        user_data: *mut c_void,
    ) -> NativeStatus {
        NativeStatus(unsafe { crate::WEBRTC_EXTSRC_RemoveSink(handle.0, Some(callback), user_data) })
    }

    fn stats(&self, handle: NativeHandle) -> Result<ExtSourceStatsFFI, NativeStatus> {
        let mut stats = ExtSourceStatsFFI::default();
        match unsafe { crate::WEBRTC_EXTSRC_GetStats(handle.0, &mut stats) } {
            EXTSRC_OK => Ok(stats),
            code => Err(NativeStatus(code)),
        }
    }
}
