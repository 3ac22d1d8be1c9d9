//! Native external audio source: issues frame requests from a capture thread,
//! validates completions against its pending table and dispatches frames to sinks.
//!
//! The object is always owned through an `Arc`. Its C handle is the
//! `Arc::into_raw` pointer, so AddRef/RemoveRef map directly onto the strong count
//! and deallocation happens when the last reference (handle, capture tick or
//! in-flight call) goes away.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::pending::PendingRequests;
use super::sinks::{FrameSink, SinkSet};
use super::time_millis;
use crate::ffi::{
    AudioFrameFFI, ExtSourceConfigFFI, ExtSourceHandle, ExtSourceStatsFFI, RequestFrameCallback,
    EXTSRC_ERROR_INVALID_PARAMETER, EXTSRC_ERROR_STALE_REQUEST, EXTSRC_OK,
};

/// Longest single sleep of the capture thread, so a stop request is seen quickly.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(5);

const STATE_INITIALIZING: u8 = 0;
const STATE_LIVE: u8 = 1;
const STATE_ENDED: u8 = 2;

/// Native source lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeState {
    /// Created, waiting for FinishCreation
    Initializing,
    /// Capture thread running, requests being issued
    Live,
    /// Shut down; cannot restart
    Ended,
}

impl NativeState {
    fn from_u8(value: u8) -> Self {
        match value {
            STATE_INITIALIZING => NativeState::Initializing,
            STATE_LIVE => NativeState::Live,
            _ => NativeState::Ended,
        }
    }
}

/// Opaque user data given at creation.
#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// Safety: the pointer is an opaque token, never dereferenced on this side
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

/// Source statistics
#[derive(Default)]
pub struct SourceStats {
    pub requests_issued: AtomicU64,
    pub requests_completed: AtomicU64,
    pub requests_evicted: AtomicU64,
    pub stale_completions: AtomicU64,
    pub frames_delivered: AtomicU64,
}

struct CaptureThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl CaptureThread {
    /// Signal the thread to exit and wait for it, unless we are on it.
    fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if thread::current().id() == self.thread_id {
                // Stopping from inside a request callback; the loop exits on its own
                return;
            }
            if handle.join().is_err() {
                log::error!("capture thread panicked");
            }
        }
    }
}

pub struct NativeAudioSource {
    callback: RequestFrameCallback,
    user_data: UserData,
    config: ExtSourceConfigFFI,
    state: AtomicU8,
    pending: Mutex<PendingRequests>,
    sinks: SinkSet,
    capture: Mutex<Option<CaptureThread>>,
    pub stats: SourceStats,
}

impl NativeAudioSource {
    /// Create a new source in the `Initializing` state. No request is issued
    /// until `finish_creation` is called.
    pub fn create(
        callback: RequestFrameCallback,
        user_data: *mut c_void,
        config: ExtSourceConfigFFI,
    ) -> Arc<Self> {
        let config = config.sanitized();
        Arc::new(Self {
            callback,
            user_data: UserData(user_data),
            config,
            state: AtomicU8::new(STATE_INITIALIZING),
            pending: Mutex::new(PendingRequests::new(config.max_pending_requests as usize)),
            sinks: SinkSet::new(),
            capture: Mutex::new(None),
            stats: SourceStats::default(),
        })
    }

    /// Hand ownership of one strong reference to the C side.
    pub fn into_handle(source: Arc<Self>) -> ExtSourceHandle {
        Arc::into_raw(source) as ExtSourceHandle
    }

    /// Borrow the source behind a handle.
    ///
    /// # Safety
    /// `handle` must come from `into_handle` and the caller must hold a reference
    /// for the whole lifetime `'a`.
    pub unsafe fn from_handle<'a>(handle: ExtSourceHandle) -> Option<&'a Self> {
        (handle as *const Self).as_ref()
    }

    /// # Safety
    /// `handle` must be a live handle from `into_handle`.
    pub unsafe fn add_ref(handle: ExtSourceHandle) {
        Arc::increment_strong_count(handle as *const Self);
    }

    /// # Safety
    /// `handle` must be a live handle from `into_handle`, and the caller gives up
    /// one reference.
    pub unsafe fn remove_ref(handle: ExtSourceHandle) {
        Arc::decrement_strong_count(handle as *const Self);
    }

    /// New strong reference to the source behind a handle.
    ///
    /// # Safety
    /// `handle` must be null or a live handle from `into_handle`.
    pub unsafe fn clone_from_handle(handle: ExtSourceHandle) -> Option<Arc<Self>> {
        if handle.is_null() {
            return None;
        }
        Self::add_ref(handle);
        Some(Arc::from_raw(handle as *const Self))
    }

    fn handle(&self) -> ExtSourceHandle {
        self as *const Self as ExtSourceHandle
    }

    pub fn state(&self) -> NativeState {
        NativeState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn config(&self) -> &ExtSourceConfigFFI {
        &self.config
    }

    /// The wrapper side is fully constructed: go live and start issuing requests.
    pub fn finish_creation(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(STATE_INITIALIZING, STATE_LIVE, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!(
                "FinishCreation ignored: source {:p} is {:?}",
                self.handle(),
                self.state()
            );
            return;
        }

        self.pending.lock().clear();
        match self.spawn_capture_thread() {
            Ok(capture) => {
                *self.capture.lock() = Some(capture);
                log::info!(
                    "external audio source {:p} live ({} ms interval)",
                    self.handle(),
                    self.config.request_interval_ms
                );
            }
            Err(e) => {
                log::error!("Failed to spawn capture thread: {}", e);
                self.state.store(STATE_ENDED, Ordering::SeqCst);
            }
        }
    }

    fn spawn_capture_thread(self: &Arc<Self>) -> std::io::Result<CaptureThread> {
        let running = Arc::new(AtomicBool::new(true));
        let weak = Arc::downgrade(self);
        let thread_running = running.clone();
        let first_delay = Duration::from_millis(self.config.first_request_delay_ms as u64);
        let interval = Duration::from_millis(self.config.request_interval_ms as u64);
        let raise_priority = self.config.raise_thread_priority != 0;

        let handle = thread::Builder::new()
            .name("extsrc-capture".to_string())
            .spawn(move || {
                if raise_priority {
                    raise_current_thread_priority();
                }
                capture_loop(weak, thread_running, first_delay, interval);
            })?;

        let thread_id = handle.thread().id();
        Ok(CaptureThread {
            running,
            handle: Some(handle),
            thread_id,
        })
    }

    /// Issue one frame request and invoke the request callback on the calling thread.
    /// Returns the request id, or `None` if the source is not live.
    pub fn issue_request(&self) -> Option<u32> {
        if self.state() != NativeState::Live {
            return None;
        }

        let issued = self.pending.lock().issue(time_millis());
        self.stats.requests_issued.fetch_add(1, Ordering::Relaxed);
        if let Some(evicted) = issued.evicted {
            self.stats.requests_evicted.fetch_add(1, Ordering::Relaxed);
            log::debug!("pending queue full, dropped request {}", evicted);
        }

        // Callback runs without the pending lock so it may complete inline
        unsafe {
            (self.callback)(self.user_data.0, self.handle(), issued.request_id, issued.timestamp_ms);
        }
        Some(issued.request_id)
    }

    /// Complete a pending request with a frame and deliver it to every sink.
    pub fn complete_request(&self, request_id: u32, timestamp_ms: i64, frame: &AudioFrameFFI) -> i32 {
        if let Err(reason) = frame.validate() {
            log::warn!("CompleteFrameRequest {}: invalid frame ({})", request_id, reason);
            return EXTSRC_ERROR_INVALID_PARAMETER;
        }

        let original_ts = match self.pending.lock().complete(request_id) {
            Some(ts) => ts,
            None => {
                self.stats.stale_completions.fetch_add(1, Ordering::Relaxed);
                log::debug!("CompleteFrameRequest: unknown or stale request {}", request_id);
                return EXTSRC_ERROR_STALE_REQUEST;
            }
        };

        if timestamp_ms != original_ts {
            log::trace!(
                "request {}: timestamp {} overridden with issue time {}",
                request_id,
                timestamp_ms,
                original_ts
            );
        }

        let delivered = self.sinks.dispatch(original_ts, frame);
        self.stats.requests_completed.fetch_add(1, Ordering::Relaxed);
        self.stats.frames_delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        EXTSRC_OK
    }

    pub fn add_sink(&self, sink: FrameSink) -> bool {
        self.sinks.add(sink)
    }

    pub fn remove_sink(&self, sink: &FrameSink) -> bool {
        self.sinks.remove(sink)
    }

    /// Irreversibly stop issuing requests. Pending requests are abandoned.
    pub fn shutdown(&self) {
        let previous = self.state.swap(STATE_ENDED, Ordering::SeqCst);
        let capture = self.capture.lock().take();
        if let Some(capture) = capture {
            capture.stop();
        }
        let abandoned = self.pending.lock().clear();
        if previous != STATE_ENDED {
            log::info!(
                "external audio source {:p} shut down ({} pending requests abandoned)",
                self.handle(),
                abandoned
            );
        }
    }

    pub fn stats_snapshot(&self) -> ExtSourceStatsFFI {
        ExtSourceStatsFFI {
            requests_issued: self.stats.requests_issued.load(Ordering::Relaxed),
            requests_completed: self.stats.requests_completed.load(Ordering::Relaxed),
            requests_evicted: self.stats.requests_evicted.load(Ordering::Relaxed),
            stale_completions: self.stats.stale_completions.load(Ordering::Relaxed),
            frames_delivered: self.stats.frames_delivered.load(Ordering::Relaxed),
            pending_requests: self.pending.lock().len() as u32,
            sink_count: self.sinks.len() as u32,
            is_live: (self.state() == NativeState::Live) as u8,
        }
    }
}

impl Drop for NativeAudioSource {
    fn drop(&mut self) {
        if let Some(capture) = self.capture.get_mut().take() {
            capture.stop();
        }
        log::debug!("external audio source {:p} released", self as *const Self);
    }
}

/// Request loop. Holds the source only for the duration of each tick.
fn capture_loop(
    source: Weak<NativeAudioSource>,
    running: Arc<AtomicBool>,
    first_delay: Duration,
    interval: Duration,
) {
    let mut next_request = Instant::now() + first_delay;

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if next_request > now {
            thread::sleep((next_request - now).min(MAX_SLEEP_SLICE));
            continue;
        }

        match source.upgrade() {
            Some(src) => {
                src.issue_request();
            }
            None => break,
        }

        next_request += interval;

        // Reset if fallen too far behind
        if Instant::now() > next_request + interval {
            next_request = Instant::now() + interval;
        }
    }
}

fn raise_current_thread_priority() {
    #[cfg(windows)]
    unsafe {
        use windows_sys::Win32::System::Threading::{
            GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_HIGHEST,
        };
        SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_HIGHEST);
    }

    #[cfg(unix)]
    unsafe {
        // Best effort, fails silently without privileges
        libc::nice(-10);
    }
}
