//! In-memory engine used by the interop tests. Requests are issued by hand
//! instead of by a capture thread.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ffi::{
    AudioFrameCallback, AudioFrameFFI, ExtSourceConfigFFI, ExtSourceStatsFFI, RequestFrameCallback,
    EXTSRC_ERROR_INVALID_OPERATION, EXTSRC_ERROR_INVALID_PARAMETER, EXTSRC_ERROR_STALE_REQUEST,
    EXTSRC_ERROR_UNKNOWN, EXTSRC_OK,
};
use super::api::{NativeHandle, NativeSourceApi};
use super::error::NativeStatus;

/// Route `log` output through the test harness.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct MockState {
    callback: Option<(RequestFrameCallback, usize)>,
    handle: usize,
    finished: bool,
    shut_down: bool,
    next_request_id: u32,
    /// request id -> issue timestamp
    pending: HashMap<u32, i64>,
    sinks: Vec<(AudioFrameCallback, usize)>,
    completed: u64,
    delivered: u64,
}

pub struct MockEngine {
    state: Mutex<MockState>,
    next_handle: AtomicUsize,
    fail_creation: AtomicBool,
    last_user_data: AtomicUsize,
    creates: AtomicUsize,
    add_refs: AtomicUsize,
    remove_refs: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                next_request_id: 1,
                ..Default::default()
            }),
            next_handle: AtomicUsize::new(0x1000),
            fail_creation: AtomicBool::new(false),
            last_user_data: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            add_refs: AtomicUsize::new(0),
            remove_refs: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        let engine = Self::new();
        engine.fail_creation.store(true, Ordering::SeqCst);
        engine
    }

    /// Fake non-null handle value, never dereferenced.
    pub fn allocate_raw(&self) -> NativeHandle {
        let addr = self.next_handle.fetch_add(0x10, Ordering::SeqCst);
        NativeHandle(addr as *mut c_void)
    }

    /// Issue a request with the next id, invoking the registered callback on
    /// the calling thread. `None` before activation or after shutdown.
    pub fn issue_request(&self, timestamp_ms: i64) -> Option<u32> {
        let mut state = self.state.lock();
        let id = state.next_request_id;
        state.next_request_id += 1;
        self.issue_request_locked(state, id, timestamp_ms)
    }

    /// Issue a request with a caller-chosen id.
    pub fn issue_request_with_id(&self, request_id: u32, timestamp_ms: i64) -> Option<u32> {
        let state = self.state.lock();
        self.issue_request_locked(state, request_id, timestamp_ms)
    }

    fn issue_request_locked(
        &self,
        mut state: parking_lot::MutexGuard<'_, MockState>,
        request_id: u32,
        timestamp_ms: i64,
    ) -> Option<u32> {
        if !state.finished || state.shut_down {
            return None;
        }
        let (callback, user_data) = state.callback?;
        let handle = state.handle;
        state.pending.insert(request_id, timestamp_ms);
        drop(state);
        unsafe { callback(user_data as *mut c_void, handle as *mut c_void, request_id, timestamp_ms) };
        Some(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn sink_count(&self) -> usize {
        self.state.lock().sinks.len()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// `user_data` passed to the most recent creation attempt.
    pub fn last_user_data(&self) -> *mut c_void {
        self.last_user_data.load(Ordering::SeqCst) as *mut c_void
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn add_ref_calls(&self) -> usize {
        self.add_refs.load(Ordering::SeqCst)
    }

    pub fn remove_ref_calls(&self) -> usize {
        self.remove_refs.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl NativeSourceApi for MockEngine {
    fn create_from_callback(
        &self,
        callback: RequestFrameCallback,
        user_data: *mut c_void,
        _config: &ExtSourceConfigFFI,
    ) -> Result<NativeHandle, NativeStatus> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.last_user_data.store(user_data as usize, Ordering::SeqCst);
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(NativeStatus(EXTSRC_ERROR_UNKNOWN));
        }
        let raw = self.allocate_raw();
        let mut state = self.state.lock();
        state.callback = Some((callback, user_data as usize));
        state.handle = raw.0 as usize;
        Ok(raw)
    }

    fn finish_creation(&self, _handle: NativeHandle) {
        let mut state = self.state.lock();
        if !state.shut_down {
            state.finished = true;
        }
    }

    fn add_ref(&self, _handle: NativeHandle) {
        self.add_refs.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_ref(&self, _handle: NativeHandle) {
        self.remove_refs.fetch_add(1, Ordering::SeqCst);
    }

    fn complete_frame_request(
        &self,
        _handle: NativeHandle,
        request_id: u32,
        _timestamp_ms: i64,
        frame: &AudioFrameFFI,
    ) -> NativeStatus {
        if frame.validate().is_err() {
            return NativeStatus(EXTSRC_ERROR_INVALID_PARAMETER);
        }
        let mut state = self.state.lock();
        if state.shut_down {
            return NativeStatus(EXTSRC_ERROR_STALE_REQUEST);
        }
        let Some(issued_at) = state.pending.remove(&request_id) else {
            return NativeStatus(EXTSRC_ERROR_STALE_REQUEST);
        };
        state.completed += 1;
        state.delivered += state.sinks.len() as u64;
        let sinks = state.sinks.clone();
        drop(state);

        for (callback, user_data) in sinks {
            unsafe { callback(user_data as *mut c_void, issued_at, frame) };
        }
        NativeStatus(EXTSRC_OK)
    }

    fn shutdown(&self, _handle: NativeHandle) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.shut_down = true;
        state.finished = false;
        state.pending.clear();
    }

    fn add_sink(
        &self,
        _handle: NativeHandle,
        callback: AudioFrameCallback,
        user_data: *mut c_void,
    ) -> NativeStatus {
        let mut state = self.state.lock();
        let entry = (callback, user_data as usize);
        if state.sinks.iter().any(|s| s.0 as usize == entry.0 as usize && s.1 == entry.1) {
            return NativeStatus(EXTSRC_ERROR_INVALID_OPERATION);
        }
        state.sinks.push(entry);
        NativeStatus(EXTSRC_OK)
    }

    fn remove_sink(
        &self,
        _handle: NativeHandle,
        callback: AudioFrameCallback,
        user_data: *mut c_void,
    ) -> NativeStatus {
        let mut state = self.state.lock();
        let before = state.sinks.len();
        state
            .sinks
            .retain(|s| !(s.0 as usize == callback as usize && s.1 == user_data as usize));
        if state.sinks.len() == before {
            NativeStatus(EXTSRC_ERROR_INVALID_PARAMETER)
        } else {
            NativeStatus(EXTSRC_OK)
        }
    }

    fn stats(&self, _handle: NativeHandle) -> Result<ExtSourceStatsFFI, NativeStatus> {
        let state = self.state.lock();
        Ok(ExtSourceStatsFFI {
            requests_issued: (state.next_request_id - 1) as u64,
            requests_completed: state.completed,
            frames_delivered: state.delivered,
            pending_requests: state.pending.len() as u32,
            sink_count: state.sinks.len() as u32,
            is_live: state.finished as u8,
            ..Default::default()
        })
    }
}
