//! C ABI types shared by the native engine and the application-side wrapper.
//! Everything here is `#[repr(C)]` or a plain integer so it can cross the boundary.

pub mod guard;

use std::ffi::c_void;

pub use guard::{guard_status, guard_void, guard_with_default, panic_message};

// ============================================================================
// Status codes
// ============================================================================

pub const EXTSRC_OK: i32 = 0;
pub const EXTSRC_ERROR_UNKNOWN: i32 = 1;
pub const EXTSRC_ERROR_INVALID_PARAMETER: i32 = 2;
pub const EXTSRC_ERROR_INVALID_HANDLE: i32 = 3;
pub const EXTSRC_ERROR_INVALID_OPERATION: i32 = 4;
pub const EXTSRC_ERROR_STALE_REQUEST: i32 = 5;

/// Library version (major.minor format: 0x0100 = 1.0)
pub const EXTSRC_VERSION: u32 = 0x0100;

/// Symbolic name of a status code, for logs and error messages.
pub fn status_name(code: i32) -> &'static str {
    match code {
        EXTSRC_OK => "EXTSRC_OK",
        EXTSRC_ERROR_UNKNOWN => "EXTSRC_ERROR_UNKNOWN",
        EXTSRC_ERROR_INVALID_PARAMETER => "EXTSRC_ERROR_INVALID_PARAMETER",
        EXTSRC_ERROR_INVALID_HANDLE => "EXTSRC_ERROR_INVALID_HANDLE",
        EXTSRC_ERROR_INVALID_OPERATION => "EXTSRC_ERROR_INVALID_OPERATION",
        EXTSRC_ERROR_STALE_REQUEST => "EXTSRC_ERROR_STALE_REQUEST",
        _ => "EXTSRC_ERROR_<unrecognized>",
    }
}

// ============================================================================
// Handles and callbacks
// ============================================================================

/// Opaque handle to a native external audio source (an `Arc::into_raw` pointer).
pub type ExtSourceHandle = *mut c_void;

/// Callback invoked by the native source whenever it needs a new frame.
///
/// # Arguments
/// * `user_data` - Opaque value given at creation (a registry token)
/// * `source` - Handle of the source issuing the request
/// * `request_id` - Identifier to pass back to `WEBRTC_EXTSRC_CompleteFrameRequest`
/// * `timestamp_ms` - Native clock time when the request was made
pub type RequestFrameCallback = unsafe extern "C" fn(
    user_data: *mut c_void,
    source: ExtSourceHandle,
    request_id: u32,
    timestamp_ms: i64,
);

/// Callback invoked by the native source for every delivered frame (one per sink).
///
/// The frame pointer is only valid for the duration of the call.
pub type AudioFrameCallback =
    unsafe extern "C" fn(user_data: *mut c_void, timestamp_ms: i64, frame: *const AudioFrameFFI);

// ============================================================================
// Frames
// ============================================================================

/// View of an interleaved PCM audio frame.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AudioFrameFFI {
    /// Interleaved samples
    pub data: *const c_void,
    /// Bits per sample (8, 16 or 32)
    pub bits_per_sample: u32,
    /// Sample rate in Hz (e.g. 48000)
    pub sampling_rate_hz: u32,
    /// Number of interleaved channels
    pub channel_count: u32,
    /// Number of samples per channel
    pub sample_count: u32,
}

impl AudioFrameFFI {
    /// Size in bytes of the sample data described by this frame.
    /// `None` if the descriptor's sizes overflow `usize`.
    pub fn byte_len(&self) -> Option<usize> {
        (self.sample_count as usize)
            .checked_mul(self.channel_count as usize)?
            .checked_mul(self.bits_per_sample as usize / 8)
    }

    /// Check that the descriptor is usable. Returns a reason on failure.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.data.is_null() {
            return Err("null sample buffer");
        }
        if !matches!(self.bits_per_sample, 8 | 16 | 32) {
            return Err("bits per sample must be 8, 16 or 32");
        }
        if self.channel_count == 0 {
            return Err("zero channels");
        }
        if self.sampling_rate_hz == 0 {
            return Err("zero sample rate");
        }
        if self.byte_len().is_none() {
            return Err("frame size overflows");
        }
        Ok(())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Native source configuration
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ExtSourceConfigFFI {
    /// Delay before the first frame request after activation, in milliseconds (default 10)
    pub first_request_delay_ms: u32,
    /// Interval between frame requests, in milliseconds (default 10, 1-1000)
    pub request_interval_ms: u32,
    /// Maximum number of outstanding requests before the oldest is dropped (default 64, 1-1024)
    pub max_pending_requests: u32,
    /// Raise the capture thread priority (1 = yes, 0 = no)
    pub raise_thread_priority: u8,
}

impl Default for ExtSourceConfigFFI {
    fn default() -> Self {
        Self {
            first_request_delay_ms: 10,
            request_interval_ms: 10,
            max_pending_requests: 64,
            raise_thread_priority: 1,
        }
    }
}

impl ExtSourceConfigFFI {
    /// Clamp out-of-range values into their supported ranges.
    pub fn sanitized(mut self) -> Self {
        self.first_request_delay_ms = self.first_request_delay_ms.min(10_000);
        self.request_interval_ms = self.request_interval_ms.clamp(1, 1000);
        self.max_pending_requests = self.max_pending_requests.clamp(1, 1024);
        self
    }
}

/// Statistics structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtSourceStatsFFI {
    pub requests_issued: u64,
    pub requests_completed: u64,
    pub requests_evicted: u64,
    pub stale_completions: u64,
    pub frames_delivered: u64,
    pub pending_requests: u32,
    pub sink_count: u32,
    pub is_live: u8,
}
