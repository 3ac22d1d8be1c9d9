//! Borrowed audio frame passed to `complete()` and to track subscribers.

use std::ffi::c_void;

use crate::ffi::AudioFrameFFI;
use super::error::{ExtSourceError, Result};

/// Interleaved PCM audio frame borrowing its sample buffer.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    /// Raw interleaved sample bytes
    pub data: &'a [u8],
    /// Bits per sample (8, 16 or 32)
    pub bits_per_sample: u32,
    /// Sample rate in Hz
    pub sampling_rate_hz: u32,
    /// Number of interleaved channels
    pub channel_count: u32,
    /// Samples per channel
    pub sample_count: u32,
}

impl<'a> AudioFrame<'a> {
    /// 16-bit interleaved frame. `sample_count` is derived from the slice length.
    pub fn from_i16(samples: &'a [i16], sampling_rate_hz: u32, channel_count: u32) -> Self {
        // Safety: i16 has no padding and u8 has alignment 1
        let data = unsafe {
            std::slice::from_raw_parts(samples.as_ptr() as *const u8, std::mem::size_of_val(samples))
        };
        Self {
            data,
            bits_per_sample: 16,
            sampling_rate_hz,
            channel_count,
            sample_count: (samples.len() / channel_count.max(1) as usize) as u32,
        }
    }

    /// 32-bit float interleaved frame.
    pub fn from_f32(samples: &'a [f32], sampling_rate_hz: u32, channel_count: u32) -> Self {
        let data = unsafe {
            std::slice::from_raw_parts(samples.as_ptr() as *const u8, std::mem::size_of_val(samples))
        };
        Self {
            data,
            bits_per_sample: 32,
            sampling_rate_hz,
            channel_count,
            sample_count: (samples.len() / channel_count.max(1) as usize) as u32,
        }
    }

    /// Bytes the descriptor claims the buffer holds, `None` on overflow.
    pub fn expected_len(&self) -> Option<usize> {
        (self.sample_count as usize)
            .checked_mul(self.channel_count as usize)?
            .checked_mul(self.bits_per_sample as usize / 8)
    }

    /// Descriptor for the boundary. Valid as long as `self` is borrowed.
    pub fn to_ffi(&self) -> Result<AudioFrameFFI> {
        let ffi = AudioFrameFFI {
            data: self.data.as_ptr() as *const c_void,
            bits_per_sample: self.bits_per_sample,
            sampling_rate_hz: self.sampling_rate_hz,
            channel_count: self.channel_count,
            sample_count: self.sample_count,
        };
        ffi.validate().map_err(ExtSourceError::InvalidFrame)?;
        match self.expected_len() {
            Some(len) if self.data.len() >= len => Ok(ffi),
            Some(_) => Err(ExtSourceError::InvalidFrame("sample buffer shorter than descriptor")),
            None => Err(ExtSourceError::InvalidFrame("frame size overflows")),
        }
    }

    /// Borrow a frame delivered by the native side.
    ///
    /// # Safety
    /// `frame` must point to a valid descriptor whose buffer holds at least
    /// `byte_len()` bytes for the lifetime `'a`.
    pub unsafe fn from_ffi(frame: &'a AudioFrameFFI) -> Self {
        let len = frame.byte_len().unwrap_or(0);
        let data = if frame.data.is_null() || len == 0 {
            &[][..]
        } else {
            std::slice::from_raw_parts(frame.data as *const u8, len)
        };
        Self {
            data,
            bits_per_sample: frame.bits_per_sample,
            sampling_rate_hz: frame.sampling_rate_hz,
            channel_count: frame.channel_count,
            sample_count: frame.sample_count,
        }
    }
}
