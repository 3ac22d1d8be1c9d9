//! Process-wide callback registry.
//!
//! Native code can only carry an opaque pointer-sized value. Callbacks are stored
//! here under a numeric token and the token travels as `user_data`; the trampoline
//! resolves it back to the payload. An entry lives from `register` until
//! `unregister`. Resolving an unregistered token returns `None`, never a stale
//! payload. Tokens are never reused.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use lazy_static::lazy_static;
use parking_lot::RwLock;

use super::request::FrameRequestCallbackArgs;
use super::track::LocalAudioTrack;

/// Opaque registry key, carried across the boundary as `user_data`.
/// Pointer-sized so the round trip through `*mut c_void` is lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryToken(usize);

impl RegistryToken {
    pub fn as_user_data(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    /// Recover a token from `user_data`. Null is never a valid token.
    pub fn from_user_data(user_data: *mut c_void) -> Option<Self> {
        match user_data as usize {
            0 => None,
            value => Some(Self(value)),
        }
    }

    pub fn value(self) -> usize {
        self.0
    }
}

pub struct CallbackRegistry<T> {
    entries: RwLock<HashMap<RegistryToken, Arc<T>>>,
    next_token: AtomicUsize,
}

impl<T> CallbackRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_token: AtomicUsize::new(1),
        }
    }

    /// Store `payload` under a fresh token.
    pub fn register(&self, payload: T) -> RegistryToken {
        let mut value = self.next_token.fetch_add(1, Ordering::Relaxed);
        if value == 0 {
            // Counter wrapped; 0 reads as null on the other side
            value = self.next_token.fetch_add(1, Ordering::Relaxed);
        }
        let token = RegistryToken(value);
        self.entries.write().insert(token, Arc::new(payload));
        token
    }

    /// Look up a live entry. The returned `Arc` keeps the payload alive for the
    /// caller even if the entry is unregistered concurrently.
    pub fn resolve(&self, token: RegistryToken) -> Option<Arc<T>> {
        self.entries.read().get(&token).cloned()
    }

    /// Remove an entry. Returns false if it was already gone.
    pub fn unregister(&self, token: RegistryToken) -> bool {
        self.entries.write().remove(&token).is_some()
    }

    pub fn contains(&self, token: RegistryToken) -> bool {
        self.entries.read().contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T> Default for CallbackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// Frame request callbacks, one entry per external source.
    pub(crate) static ref FRAME_REQUEST_CALLBACKS: CallbackRegistry<FrameRequestCallbackArgs> =
        CallbackRegistry::new();

    /// Track sinks, one entry per attached track.
    pub(crate) static ref TRACK_SINKS: CallbackRegistry<Weak<LocalAudioTrack>> =
        CallbackRegistry::new();
}
