//! Error type for the application-side wrapper.

use std::fmt;

use thiserror::Error;

use crate::ffi::{status_name, EXTSRC_OK, EXTSRC_ERROR_STALE_REQUEST};
use super::source::SourceState;

/// Status code returned by a native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeStatus(pub i32);

impl NativeStatus {
    pub fn is_ok(self) -> bool {
        self.0 == EXTSRC_OK
    }

    pub fn is_stale_request(self) -> bool {
        self.0 == EXTSRC_ERROR_STALE_REQUEST
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", status_name(self.0), self.0)
    }
}

/// Errors surfaced by external source operations
#[derive(Error, Debug)]
pub enum ExtSourceError {
    #[error("Native source creation failed: {0}")]
    CreationFailed(NativeStatus),

    #[error("Frame request {request_id} is stale or unknown")]
    StaleRequest { request_id: u32 },

    #[error("Native handle is closed")]
    Closed,

    #[error("Native call failed: {0}")]
    Native(NativeStatus),

    #[error("Operation not permitted while source is {0:?}")]
    InvalidState(SourceState),

    #[error("Track '{0}' is already attached to a source")]
    TrackAlreadyAttached(String),

    #[error("Track '{0}' is not attached to this source")]
    TrackNotAttached(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),
}

pub type Result<T> = std::result::Result<T, ExtSourceError>;
