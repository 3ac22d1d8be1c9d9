//! Frame requests: the native side asks, the application answers once.

use std::ffi::c_void;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::ffi::{guard_void, ExtSourceHandle, RequestFrameCallback};
use super::error::Result;
use super::frame::AudioFrame;
use super::registry::{RegistryToken, FRAME_REQUEST_CALLBACKS};
use super::source::ExternalAudioTrackSource;

/// Application callback producing frames. Runs on the native capture thread.
pub type AudioFrameRequestHandler = dyn Fn(AudioFrameRequest) + Send + Sync;

/// A pending demand for one audio frame.
///
/// The request may be moved to another thread and completed later. Completing
/// consumes it; completing the same id again through the source is rejected as
/// stale.
pub struct AudioFrameRequest {
    source: Arc<ExternalAudioTrackSource>,
    request_id: u32,
    timestamp_ms: i64,
}

impl AudioFrameRequest {
    pub(crate) fn new(source: Arc<ExternalAudioTrackSource>, request_id: u32, timestamp_ms: i64) -> Self {
        Self {
            source,
            request_id,
            timestamp_ms,
        }
    }

    /// Source this request is associated with.
    pub fn source(&self) -> &Arc<ExternalAudioTrackSource> {
        &self.source
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Time the native source made the request, in milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Answer the request. The frame is delivered to every attached track
    /// before this returns; the buffer is not retained afterwards.
    pub fn complete(self, frame: &AudioFrame<'_>) -> Result<()> {
        self.source
            .complete_frame_request(self.request_id, self.timestamp_ms, frame)
    }
}

impl fmt::Debug for AudioFrameRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioFrameRequest")
            .field("source", &self.source.name())
            .field("request_id", &self.request_id)
            .field("timestamp_ms", &self.timestamp_ms)
            .finish()
    }
}

/// Registry payload for one external source.
pub(crate) struct FrameRequestCallbackArgs {
    /// Weak so the registry never keeps a dropped source alive
    pub source: Weak<ExternalAudioTrackSource>,
    pub callback: Box<AudioFrameRequestHandler>,
    /// Function address handed to the native side alongside the token
    pub trampoline: RequestFrameCallback,
}

/// Native entry point for frame requests. Resolves `user_data` through the
/// registry and runs the application callback on the calling thread.
pub(crate) unsafe extern "C" fn request_frame_trampoline(
    user_data: *mut c_void,
    source_handle: ExtSourceHandle,
    request_id: u32,
    timestamp_ms: i64,
) {
    guard_void("request_frame_trampoline", || {
        let Some(token) = RegistryToken::from_user_data(user_data) else {
            log::warn!("frame request {} with null user data", request_id);
            return;
        };
        let Some(args) = FRAME_REQUEST_CALLBACKS.resolve(token) else {
            log::debug!(
                "frame request {} for unregistered token {} (source {:p})",
                request_id,
                token.value(),
                source_handle
            );
            return;
        };
        debug_assert!(args.trampoline as usize == request_frame_trampoline as usize);
        let Some(source) = args.source.upgrade() else {
            log::debug!("frame request {} for a dropped source", request_id);
            return;
        };

        log::trace!("{}: frame request {} @ {} ms", source, request_id, timestamp_ms);
        (args.callback)(AudioFrameRequest::new(source, request_id, timestamp_ms));
    });
}
