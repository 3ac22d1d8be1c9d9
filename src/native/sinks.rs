//! Frame sinks registered on a native source.

use std::ffi::c_void;

use parking_lot::Mutex;

use crate::ffi::{AudioFrameCallback, AudioFrameFFI};

/// A registered frame consumer: callback + opaque user data.
#[derive(Clone, Copy)]
pub struct FrameSink {
    pub callback: AudioFrameCallback,
    pub user_data: *mut c_void,
}

// Safety: callback is a plain function pointer, user_data is an opaque token
// the registering side owns.
unsafe impl Send for FrameSink {}
unsafe impl Sync for FrameSink {}

impl FrameSink {
    fn same_as(&self, other: &FrameSink) -> bool {
        self.callback as usize == other.callback as usize && self.user_data == other.user_data
    }
}

/// Ordered set of sinks. Dispatch works on a snapshot so a sink may add or
/// remove sinks from inside its own callback.
#[derive(Default)]
pub struct SinkSet {
    sinks: Mutex<Vec<FrameSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink. Returns false if the same (callback, user_data) pair is already present.
    pub fn add(&self, sink: FrameSink) -> bool {
        let mut sinks = self.sinks.lock();
        if sinks.iter().any(|s| s.same_as(&sink)) {
            return false;
        }
        sinks.push(sink);
        true
    }

    /// Remove a sink. Returns false if it was not registered.
    pub fn remove(&self, sink: &FrameSink) -> bool {
        let mut sinks = self.sinks.lock();
        match sinks.iter().position(|s| s.same_as(sink)) {
            Some(index) => {
                sinks.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.lock().is_empty()
    }

    /// Deliver one frame to every sink in registration order.
    /// Returns the number of sinks invoked.
    pub fn dispatch(&self, timestamp_ms: i64, frame: &AudioFrameFFI) -> usize {
        let snapshot: Vec<FrameSink> = self.sinks.lock().clone();
        for sink in &snapshot {
            unsafe {
                (sink.callback)(sink.user_data, timestamp_ms, frame as *const AudioFrameFFI);
            }
        }
        snapshot.len()
    }
}
