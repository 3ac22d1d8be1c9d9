//! Application side of the boundary.
//!
//! [`ExternalAudioTrackSource`] wraps one native source: it registers the
//! frame callback in a process-wide registry, owns the reference-counted native
//! handle and feeds attached [`LocalAudioTrack`]s.

pub mod api;
pub mod error;
pub mod frame;
pub mod handle;
pub mod registry;
pub mod request;
pub mod source;
pub mod track;

#[cfg(test)]
mod mock;

pub use api::{engine_api, EngineApi, NativeHandle, NativeSourceApi};
pub use error::{ExtSourceError, NativeStatus, Result};
pub use frame::AudioFrame;
pub use handle::{BoundaryHandle, HandleGuard};
pub use registry::{CallbackRegistry, RegistryToken};
pub use request::{AudioFrameRequest, AudioFrameRequestHandler};
pub use source::{ExternalAudioTrackSource, SourceState};
pub use track::{FrameSubscriber, LocalAudioTrack, SubscriptionId};
