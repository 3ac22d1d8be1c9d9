//! Native side of the boundary: the reference-counted source object the C API
//! hands out, its pending-request table and its frame sinks.

pub mod pending;
pub mod sinks;
pub mod source;

use std::time::Instant;

use lazy_static::lazy_static;

pub use pending::{IssuedRequest, PendingRequests};
pub use sinks::{FrameSink, SinkSet};
pub use source::{NativeAudioSource, NativeState, SourceStats};

lazy_static! {
    /// Reference point of the native millisecond clock
    static ref CLOCK_EPOCH: Instant = Instant::now();
}

/// Native clock in milliseconds (monotonic, process-relative).
pub fn time_millis() -> i64 {
    CLOCK_EPOCH.elapsed().as_millis() as i64
}
