//! Application-side wrapper around one native external audio source.
//!
//! Creation is two-phase: the wrapper and its registry entry exist before the
//! native object is allocated, and the native object is only told to start
//! requesting frames once the wrapper holds its handle. Shutdown runs in the
//! reverse order: stop the native source, detach tracks, unregister the
//! callback, release the handle.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};

use crate::ffi::{ExtSourceConfigFFI, ExtSourceStatsFFI, EXTSRC_ERROR_INVALID_HANDLE};
use super::api::{engine_api, NativeSourceApi};
use super::error::{ExtSourceError, NativeStatus, Result};
use super::frame::AudioFrame;
use super::handle::BoundaryHandle;
use super::registry::{RegistryToken, FRAME_REQUEST_CALLBACKS};
use super::request::{request_frame_trampoline, AudioFrameRequest, FrameRequestCallbackArgs};
use super::track::{audio_frame_trampoline, LocalAudioTrack};

/// Lifecycle of an external source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Registered and (once creation succeeds) holding a native handle; no requests yet
    Created,
    /// Native source is issuing frame requests
    Active,
    /// Shutdown sequence in progress
    ShuttingDown,
    /// Terminal
    Closed,
    /// Native creation was refused; never activated
    Failed,
}

impl SourceState {
    fn accepts_tracks(self) -> bool {
        matches!(self, SourceState::Created | SourceState::Active)
    }
}

/// Audio track source fed by an application callback instead of a capture device.
pub struct ExternalAudioTrackSource {
    /// Debug name, used in logs
    name: RwLock<String>,
    self_weak: Weak<ExternalAudioTrackSource>,
    api: Arc<dyn NativeSourceApi>,
    /// Registry entry holding the frame callback
    token: RegistryToken,
    /// Set once native creation succeeds
    handle: OnceLock<BoundaryHandle>,
    state: RwLock<SourceState>,
    /// Serializes shutdown, attach and detach
    lifecycle: Mutex<()>,
    /// Tracks this source feeds
    tracks: Mutex<Vec<Arc<LocalAudioTrack>>>,
}

impl ExternalAudioTrackSource {
    /// Create a source on the in-crate engine with default configuration.
    pub fn create_from_callback<F>(callback: F) -> Result<Arc<Self>>
    where
        F: Fn(AudioFrameRequest) + Send + Sync + 'static,
    {
        Self::create_with_config(ExtSourceConfigFFI::default(), callback)
    }

    pub fn create_with_config<F>(config: ExtSourceConfigFFI, callback: F) -> Result<Arc<Self>>
    where
        F: Fn(AudioFrameRequest) + Send + Sync + 'static,
    {
        Self::create_with_api(engine_api(), config, callback)
    }

    /// Create a source through an arbitrary engine implementation.
    pub fn create_with_api<F>(
        api: Arc<dyn NativeSourceApi>,
        config: ExtSourceConfigFFI,
        callback: F,
    ) -> Result<Arc<Self>>
    where
        F: Fn(AudioFrameRequest) + Send + Sync + 'static,
    {
        // Phase 1: wrapper + registry entry, so a request can be routed the
        // moment the native side is activated
        let source = Arc::new_cyclic(|weak: &Weak<Self>| {
            let token = FRAME_REQUEST_CALLBACKS.register(FrameRequestCallbackArgs {
                source: weak.clone(),
                callback: Box::new(callback),
                trampoline: request_frame_trampoline,
            });
            Self {
                name: RwLock::new(String::new()),
                self_weak: weak.clone(),
                api: api.clone(),
                token,
                handle: OnceLock::new(),
                state: RwLock::new(SourceState::Created),
                lifecycle: Mutex::new(()),
                tracks: Mutex::new(Vec::new()),
            }
        });

        let created = api
            .create_from_callback(request_frame_trampoline, source.token.as_user_data(), &config)
            .and_then(|raw| {
                if raw.is_null() {
                    Err(NativeStatus(EXTSRC_ERROR_INVALID_HANDLE))
                } else {
                    Ok(raw)
                }
            });

        let raw = match created {
            Ok(raw) => raw,
            Err(status) => {
                FRAME_REQUEST_CALLBACKS.unregister(source.token);
                *source.state.write() = SourceState::Failed;
                log::error!("External audio source creation failed: {}", status);
                return Err(ExtSourceError::CreationFailed(status));
            }
        };

        let handle = source
            .handle
            .get_or_init(|| BoundaryHandle::from_raw(raw, api.clone()));

        // Phase 2: activate
        {
            let _lifecycle = source.lifecycle.lock();
            match handle.acquire() {
                Some(guard) => api.finish_creation(guard.raw()),
                None => return Err(ExtSourceError::Closed),
            }
            *source.state.write() = SourceState::Active;
        }
        log::debug!("{} created (handle {:p})", source, raw.0);
        Ok(source)
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    pub fn state(&self) -> SourceState {
        *self.state.read()
    }

    /// True once the native handle has been released.
    pub fn is_closed(&self) -> bool {
        self.handle.get().map_or(true, |h| h.is_closed())
    }

    /// Tracks currently fed by this source.
    pub fn tracks(&self) -> Vec<Arc<LocalAudioTrack>> {
        self.tracks.lock().clone()
    }

    /// Complete a frame request by id. Prefer [`AudioFrameRequest::complete`].
    ///
    /// Fails with `StaleRequest` for unknown, already completed or abandoned ids,
    /// including every request once the source has been shut down.
    pub fn complete_frame_request(
        &self,
        request_id: u32,
        timestamp_ms: i64,
        frame: &AudioFrame<'_>,
    ) -> Result<()> {
        let stale = || ExtSourceError::StaleRequest { request_id };
        let handle = self.handle.get().ok_or_else(stale)?;
        let guard = handle.acquire().ok_or_else(stale)?;
        let ffi = frame.to_ffi()?;

        let status = self
            .api
            .complete_frame_request(guard.raw(), request_id, timestamp_ms, &ffi);
        drop(guard);

        if status.is_ok() {
            Ok(())
        } else if status.is_stale_request() {
            log::debug!("{}: rejected stale request {}", self, request_id);
            Err(stale())
        } else {
            log::warn!("{}: completing request {} failed: {}", self, request_id, status);
            Err(ExtSourceError::Native(status))
        }
    }

    /// Start feeding `track`. Both sides are updated together or not at all.
    pub fn attach_track(&self, track: &Arc<LocalAudioTrack>) -> Result<()> {
        self.check_accepts_tracks()?;
        let _lifecycle = self.lifecycle.lock();
        self.check_accepts_tracks()?;

        let handle = self.handle.get().ok_or(ExtSourceError::Closed)?;
        let guard = handle.acquire().ok_or(ExtSourceError::Closed)?;

        let sink_token = track.bind(self.self_weak.clone())?;
        let status = self
            .api
            .add_sink(guard.raw(), audio_frame_trampoline, sink_token.as_user_data());
        if !status.is_ok() {
            track.unbind();
            log::warn!("{}: attaching track '{}' failed: {}", self, track.name(), status);
            return Err(ExtSourceError::Native(status));
        }

        self.tracks.lock().push(track.clone());
        log::debug!("{}: attached track '{}'", self, track.name());
        Ok(())
    }

    /// Stop feeding `track`.
    pub fn detach_track(&self, track: &Arc<LocalAudioTrack>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let mut tracks = self.tracks.lock();
        let index = tracks
            .iter()
            .position(|t| Arc::ptr_eq(t, track))
            .ok_or_else(|| ExtSourceError::TrackNotAttached(track.name().to_string()))?;

        self.remove_native_sink(track);
        track.unbind();
        tracks.remove(index);
        log::debug!("{}: detached track '{}'", self, track.name());
        Ok(())
    }

    /// Stop the source and release all its resources. Safe to call repeatedly,
    /// from several threads and from inside the frame callback. A call made
    /// while another shutdown is in progress returns immediately.
    pub fn shutdown(&self) {
        let detached: Vec<Arc<LocalAudioTrack>> = {
            let _lifecycle = self.lifecycle.lock();
            {
                let mut state = self.state.write();
                match *state {
                    SourceState::ShuttingDown | SourceState::Closed | SourceState::Failed => return,
                    SourceState::Created | SourceState::Active => {
                        *state = SourceState::ShuttingDown
                    }
                }
            }
            std::mem::take(&mut *self.tracks.lock())
        };

        // No lock held from here: the native stop waits for a frame callback
        // in progress, and that callback may call back into this source.
        let handle = self.handle.get();

        // (a) no further requests
        if let Some(guard) = handle.and_then(|h| h.acquire()) {
            self.api.shutdown(guard.raw());
        }

        for track in &detached {
            self.remove_native_sink(track);
            track.unbind();
        }

        // (b) callback no longer resolvable
        FRAME_REQUEST_CALLBACKS.unregister(self.token);

        // (c) native reference given back, deferred past any in-flight call
        if let Some(handle) = handle {
            handle.release();
        }

        *self.state.write() = SourceState::Closed;
        log::info!("{} shut down ({} tracks detached)", self, detached.len());
    }

    /// Native statistics for this source.
    pub fn stats(&self) -> Result<ExtSourceStatsFFI> {
        let handle = self.handle.get().ok_or(ExtSourceError::Closed)?;
        let guard = handle.acquire().ok_or(ExtSourceError::Closed)?;
        self.api.stats(guard.raw()).map_err(ExtSourceError::Native)
    }

    /// An independent owning handle to the native object, e.g. for a session
    /// building its own native track on top of this source.
    pub fn native_handle(&self) -> Result<BoundaryHandle> {
        self.handle
            .get()
            .and_then(|h| h.duplicate())
            .ok_or(ExtSourceError::Closed)
    }

    fn check_accepts_tracks(&self) -> Result<()> {
        let state = self.state();
        if state.accepts_tracks() {
            Ok(())
        } else {
            Err(ExtSourceError::InvalidState(state))
        }
    }

    fn remove_native_sink(&self, track: &LocalAudioTrack) {
        let Some(sink_token) = track.sink_token() else {
            return;
        };
        let Some(guard) = self.handle.get().and_then(|h| h.acquire()) else {
            return;
        };
        let status = self
            .api
            .remove_sink(guard.raw(), audio_frame_trampoline, sink_token.as_user_data());
        if !status.is_ok() {
            log::warn!("{}: removing sink for '{}' failed: {}", self, track.name(), status);
        }
    }
}

impl Drop for ExternalAudioTrackSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Display for ExternalAudioTrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(ExternalAudioTrackSource)\"{}\"", self.name.read())
    }
}

impl fmt::Debug for ExternalAudioTrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalAudioTrackSource")
            .field("name", &*self.name.read())
            .field("state", &self.state())
            .field("token", &self.token)
            .field("handle", &self.handle.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::mock::{init_test_logging, MockEngine};
    use std::thread;

    type Requests = Arc<Mutex<Vec<AudioFrameRequest>>>;
    type Deliveries = Arc<Mutex<Vec<(i64, Vec<u8>)>>>;

    fn collecting_source(engine: &Arc<MockEngine>) -> (Arc<ExternalAudioTrackSource>, Requests) {
        init_test_logging();
        let requests: Requests = Arc::new(Mutex::new(Vec::new()));
        let sink = requests.clone();
        let source = ExternalAudioTrackSource::create_with_api(
            engine.clone(),
            ExtSourceConfigFFI::default(),
            move |request| sink.lock().push(request),
        )
        .unwrap();
        source.set_name("test-source");
        (source, requests)
    }

    fn recording_track(name: &str) -> (Arc<LocalAudioTrack>, Deliveries) {
        let track = LocalAudioTrack::new(name);
        let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
        let sink = deliveries.clone();
        track.subscribe(move |ts, frame| sink.lock().push((ts, frame.data.to_vec())));
        (track, deliveries)
    }

    fn take_request(requests: &Requests, request_id: u32) -> AudioFrameRequest {
        let mut requests = requests.lock();
        let index = requests
            .iter()
            .position(|r| r.request_id() == request_id)
            .unwrap();
        requests.remove(index)
    }

    fn samples(value: i16) -> Vec<i16> {
        vec![value; 480]
    }

    #[test]
    fn test_request_completed_reaches_attached_track() {
        let engine = MockEngine::new();
        let (source, requests) = collecting_source(&engine);
        assert_eq!(source.state(), SourceState::Active);
        assert!(engine.is_finished());

        let (track, deliveries) = recording_track("t1");
        source.attach_track(&track).unwrap();

        assert_eq!(engine.issue_request_with_id(1, 1000), Some(1));
        let request = take_request(&requests, 1);
        assert_eq!(request.timestamp_ms(), 1000);
        assert!(Arc::ptr_eq(request.source(), &source));

        let pcm = samples(7);
        request.complete(&AudioFrame::from_i16(&pcm, 48000, 1)).unwrap();

        let deliveries = deliveries.lock();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, 1000);
        assert_eq!(deliveries[0].1.len(), 960);
        drop(deliveries);

        source.shutdown();
    }

    #[test]
    fn test_completion_after_shutdown_is_stale() {
        let engine = MockEngine::new();
        let (source, requests) = collecting_source(&engine);
        engine.issue_request_with_id(7, 70).unwrap();

        source.shutdown();
        assert_eq!(source.state(), SourceState::Closed);
        assert!(source.is_closed());

        let request = take_request(&requests, 7);
        let pcm = samples(1);
        let err = request
            .complete(&AudioFrame::from_i16(&pcm, 48000, 1))
            .unwrap_err();
        assert!(matches!(err, ExtSourceError::StaleRequest { request_id: 7 }));
        assert_eq!(engine.remove_ref_calls(), 1);
    }

    #[test]
    fn test_two_tracks_observe_same_frame() {
        let engine = MockEngine::new();
        let (source, requests) = collecting_source(&engine);
        let (t1, seen1) = recording_track("t1");
        let (t2, seen2) = recording_track("t2");
        source.attach_track(&t1).unwrap();
        source.attach_track(&t2).unwrap();
        assert_eq!(engine.sink_count(), 2);
        assert_eq!(source.tracks().len(), 2);

        let id = engine.issue_request(500).unwrap();
        let pcm = samples(3);
        take_request(&requests, id)
            .complete(&AudioFrame::from_i16(&pcm, 48000, 1))
            .unwrap();

        assert_eq!(*seen1.lock(), *seen2.lock());
        assert_eq!(seen1.lock().len(), 1);
        source.shutdown();
    }

    #[test]
    fn test_out_of_order_completion() {
        let engine = MockEngine::new();
        let (source, requests) = collecting_source(&engine);
        let (track, deliveries) = recording_track("t");
        source.attach_track(&track).unwrap();

        engine.issue_request_with_id(2, 20).unwrap();
        engine.issue_request_with_id(3, 30).unwrap();
        let second = take_request(&requests, 2);
        let third = take_request(&requests, 3);

        let pcm3 = samples(3);
        third.complete(&AudioFrame::from_i16(&pcm3, 48000, 1)).unwrap();
        let pcm2 = samples(2);
        second.complete(&AudioFrame::from_i16(&pcm2, 48000, 1)).unwrap();

        let deliveries = deliveries.lock();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].0, 30);
        assert_eq!(deliveries[0].1[0], 3);
        assert_eq!(deliveries[1].0, 20);
        assert_eq!(deliveries[1].1[0], 2);
        drop(deliveries);
        source.shutdown();
    }

    #[test]
    fn test_concurrent_completion_from_many_threads() {
        let engine = MockEngine::new();
        let (source, requests) = collecting_source(&engine);
        let (track, deliveries) = recording_track("t");
        source.attach_track(&track).unwrap();

        for i in 0..16 {
            engine.issue_request(i * 10).unwrap();
        }
        let pending: Vec<AudioFrameRequest> = requests.lock().drain(..).collect();
        let workers: Vec<_> = pending
            .into_iter()
            .rev()
            .map(|request| {
                thread::spawn(move || {
                    let pcm = samples(request.request_id() as i16);
                    request.complete(&AudioFrame::from_i16(&pcm, 48000, 1)).unwrap();
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let mut timestamps: Vec<i64> = deliveries.lock().iter().map(|d| d.0).collect();
        timestamps.sort_unstable();
        assert_eq!(timestamps, (0..16).map(|i| i * 10).collect::<Vec<_>>());
        assert_eq!(engine.pending_count(), 0);
        source.shutdown();
    }

    #[test]
    fn test_creation_failure_leaves_nothing_registered() {
        let engine = MockEngine::failing();
        let result = ExternalAudioTrackSource::create_with_api(
            engine.clone(),
            ExtSourceConfigFFI::default(),
            |_request| {},
        );
        assert!(matches!(result, Err(ExtSourceError::CreationFailed(_))));

        let token = RegistryToken::from_user_data(engine.last_user_data()).unwrap();
        assert!(!FRAME_REQUEST_CALLBACKS.contains(token));
        assert_eq!(engine.create_calls(), 1);
        assert_eq!(engine.remove_ref_calls(), 0);
        assert_eq!(engine.shutdown_calls(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let engine = MockEngine::new();
        let (source, _requests) = collecting_source(&engine);
        let token = RegistryToken::from_user_data(engine.last_user_data()).unwrap();
        assert!(FRAME_REQUEST_CALLBACKS.contains(token));

        source.shutdown();
        source.shutdown();
        assert!(!FRAME_REQUEST_CALLBACKS.contains(token));
        assert_eq!(engine.shutdown_calls(), 1);
        assert_eq!(engine.remove_ref_calls(), 1);

        drop(source);
        assert_eq!(engine.shutdown_calls(), 1);
        assert_eq!(engine.remove_ref_calls(), 1);
    }

    #[test]
    fn test_drop_shuts_down() {
        let engine = MockEngine::new();
        let source = ExternalAudioTrackSource::create_with_api(
            engine.clone(),
            ExtSourceConfigFFI::default(),
            |_request| {},
        )
        .unwrap();
        drop(source);
        assert_eq!(engine.shutdown_calls(), 1);
        assert_eq!(engine.remove_ref_calls(), 1);
    }

    #[test]
    fn test_second_completion_is_stale() {
        let engine = MockEngine::new();
        let (source, _requests) = collecting_source(&engine);
        let id = engine.issue_request(0).unwrap();
        let pcm = samples(0);
        let frame = AudioFrame::from_i16(&pcm, 48000, 1);

        source.complete_frame_request(id, 0, &frame).unwrap();
        assert!(matches!(
            source.complete_frame_request(id, 0, &frame),
            Err(ExtSourceError::StaleRequest { .. })
        ));
        assert!(matches!(
            source.complete_frame_request(999, 0, &frame),
            Err(ExtSourceError::StaleRequest { request_id: 999 })
        ));
        source.shutdown();
    }

    #[test]
    fn test_invalid_frame_keeps_request_pending() {
        let engine = MockEngine::new();
        let (source, _requests) = collecting_source(&engine);
        let id = engine.issue_request(0).unwrap();

        let pcm = samples(0);
        let mut frame = AudioFrame::from_i16(&pcm, 48000, 1);
        frame.bits_per_sample = 12;
        assert!(matches!(
            source.complete_frame_request(id, 0, &frame),
            Err(ExtSourceError::InvalidFrame(_))
        ));
        assert_eq!(engine.pending_count(), 1);
        source.shutdown();
    }

    #[test]
    fn test_track_attachment_rules() {
        let engine = MockEngine::new();
        let (first, _r1) = collecting_source(&engine);
        let (second, _r2) = collecting_source(&MockEngine::new());
        let (track, _seen) = recording_track("t");

        first.attach_track(&track).unwrap();
        assert!(Arc::ptr_eq(&track.source().unwrap(), &first));
        assert!(matches!(
            first.attach_track(&track),
            Err(ExtSourceError::TrackAlreadyAttached(_))
        ));
        assert!(matches!(
            second.attach_track(&track),
            Err(ExtSourceError::TrackAlreadyAttached(_))
        ));
        assert!(matches!(
            second.detach_track(&track),
            Err(ExtSourceError::TrackNotAttached(_))
        ));

        first.detach_track(&track).unwrap();
        assert!(track.source().is_none());
        assert_eq!(engine.sink_count(), 0);
        assert!(first.tracks().is_empty());

        second.attach_track(&track).unwrap();
        second.shutdown();
        first.shutdown();
    }

    #[test]
    fn test_shutdown_detaches_tracks_and_rejects_attach() {
        let engine = MockEngine::new();
        let (source, _requests) = collecting_source(&engine);
        let (track, _seen) = recording_track("t");
        source.attach_track(&track).unwrap();
        let sink_token = track.sink_token().unwrap();

        source.shutdown();
        assert!(track.source().is_none());
        assert!(!track.is_attached());
        assert!(!crate::interop::registry::TRACK_SINKS.contains(sink_token));
        assert_eq!(engine.sink_count(), 0);
        assert!(matches!(
            source.attach_track(&track),
            Err(ExtSourceError::InvalidState(SourceState::Closed))
        ));
    }

    #[test]
    fn test_shutdown_from_inside_callback() {
        let engine = MockEngine::new();
        let source = ExternalAudioTrackSource::create_with_api(
            engine.clone(),
            ExtSourceConfigFFI::default(),
            |request| request.source().shutdown(),
        )
        .unwrap();

        engine.issue_request(0).unwrap();
        assert_eq!(source.state(), SourceState::Closed);
        assert_eq!(engine.shutdown_calls(), 1);
        assert_eq!(engine.issue_request(10), None);
    }

    #[test]
    fn test_stats_and_native_handle() {
        let engine = MockEngine::new();
        let (source, _requests) = collecting_source(&engine);
        engine.issue_request(0).unwrap();
        let stats = source.stats().unwrap();
        assert_eq!(stats.requests_issued, 1);
        assert_eq!(stats.pending_requests, 1);
        assert_eq!(stats.is_live, 1);

        let extra = source.native_handle().unwrap();
        assert_eq!(engine.add_ref_calls(), 1);
        source.shutdown();
        assert_eq!(engine.remove_ref_calls(), 1);
        drop(extra);
        assert_eq!(engine.remove_ref_calls(), 2);

        assert!(matches!(source.stats(), Err(ExtSourceError::Closed)));
        assert!(source.native_handle().is_err());
    }

    #[test]
    fn test_display_uses_name() {
        let engine = MockEngine::new();
        let (source, _requests) = collecting_source(&engine);
        assert_eq!(source.to_string(), "(ExternalAudioTrackSource)\"test-source\"");
        source.shutdown();
    }
}
