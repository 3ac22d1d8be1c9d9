//! Local audio track fed by an external source.

use std::ffi::c_void;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::ffi::{guard_void, panic_message, AudioFrameFFI};
use super::error::{ExtSourceError, Result};
use super::frame::AudioFrame;
use super::registry::{RegistryToken, TRACK_SINKS};
use super::source::ExternalAudioTrackSource;

/// Frame consumer registered on a track: `(timestamp_ms, frame)`.
pub type FrameSubscriber = dyn Fn(i64, &AudioFrame<'_>) + Send + Sync;

/// Identifies one subscription on a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct TrackBinding {
    source: Weak<ExternalAudioTrackSource>,
    sink_token: RegistryToken,
}

pub struct LocalAudioTrack {
    name: String,
    self_weak: Weak<LocalAudioTrack>,
    enabled: AtomicBool,
    binding: Mutex<Option<TrackBinding>>,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<FrameSubscriber>)>>,
    next_subscription: AtomicU64,
    frames_received: AtomicU64,
}

impl LocalAudioTrack {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            name: name.into(),
            self_weak: weak.clone(),
            enabled: AtomicBool::new(true),
            binding: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            frames_received: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// A disabled track drops delivered frames.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Source currently feeding this track, if any.
    pub fn source(&self) -> Option<Arc<ExternalAudioTrackSource>> {
        self.binding.lock().as_ref().and_then(|b| b.source.upgrade())
    }

    pub fn is_attached(&self) -> bool {
        self.binding.lock().is_some()
    }

    /// Frames delivered to subscribers since creation.
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Register a frame consumer. Subscribers run in registration order on
    /// the thread completing the frame request.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(i64, &AudioFrame<'_>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    /// Record `source` as the provider and register the track as a sink target.
    pub(crate) fn bind(&self, source: Weak<ExternalAudioTrackSource>) -> Result<RegistryToken> {
        let mut binding = self.binding.lock();
        if binding.is_some() {
            return Err(ExtSourceError::TrackAlreadyAttached(self.name.clone()));
        }
        let sink_token = TRACK_SINKS.register(self.self_weak.clone());
        *binding = Some(TrackBinding { source, sink_token });
        Ok(sink_token)
    }

    pub(crate) fn unbind(&self) -> Option<RegistryToken> {
        let binding = self.binding.lock().take()?;
        TRACK_SINKS.unregister(binding.sink_token);
        Some(binding.sink_token)
    }

    pub(crate) fn sink_token(&self) -> Option<RegistryToken> {
        self.binding.lock().as_ref().map(|b| b.sink_token)
    }

    /// Hand a frame to every subscriber. A panicking subscriber is logged and
    /// skipped; the rest still run.
    pub(crate) fn deliver(&self, timestamp_ms: i64, frame: &AudioFrame<'_>) {
        if !self.is_enabled() {
            return;
        }
        self.frames_received.fetch_add(1, Ordering::Relaxed);

        let subscribers: Vec<Arc<FrameSubscriber>> =
            self.subscribers.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in subscribers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(timestamp_ms, frame))) {
                log::error!(
                    "track '{}': subscriber panicked: {}",
                    self.name,
                    panic_message(payload)
                );
            }
        }
    }
}

impl fmt::Debug for LocalAudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAudioTrack")
            .field("name", &self.name)
            .field("enabled", &self.is_enabled())
            .field("attached", &self.is_attached())
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

impl Drop for LocalAudioTrack {
    fn drop(&mut self) {
        // Attached tracks are held by their source, so this is normally empty
        if let Some(binding) = self.binding.get_mut().take() {
            TRACK_SINKS.unregister(binding.sink_token);
        }
    }
}

/// Native sink entry point. Resolves the track through `TRACK_SINKS`.
pub(crate) unsafe extern "C" fn audio_frame_trampoline(
    user_data: *mut c_void,
    timestamp_ms: i64,
    frame: *const AudioFrameFFI,
) {
    guard_void("audio_frame_trampoline", || {
        let Some(token) = RegistryToken::from_user_data(user_data) else {
            return;
        };
        let Some(track) = TRACK_SINKS.resolve(token).and_then(|weak| weak.upgrade()) else {
            log::trace!("frame for unregistered sink {}", token.value());
            return;
        };
        if frame.is_null() {
            log::warn!("track '{}': null frame from native sink", track.name);
            return;
        }
        let frame = AudioFrame::from_ffi(&*frame);
        track.deliver(timestamp_ms, &frame);
    });
}
