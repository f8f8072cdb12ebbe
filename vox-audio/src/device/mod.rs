//! Audio device boundary.
//!
//! An [`AudioBackend`] opens input and output streams that deliver or request
//! exact frames of mono `f32` samples. Device buffers of any size and channel
//! count are re-blocked inside the backend with pre-allocated scratch
//! ([`InputReblocker`], [`OutputReblocker`]), so pipeline code only ever sees
//! whole frames.

mod cpal_backend;
mod virtual_backend;

pub use cpal_backend::CpalBackend;
pub use virtual_backend::VirtualBackend;

use crate::error::{DeviceError, StreamInterrupted};
use std::any::Any;

/// Called with every complete input frame (device callback thread)
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Called to fill every output frame (device callback thread)
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Called when a stream is lost mid-session
pub type ClosedCallback = Box<dyn FnMut(StreamInterrupted) + Send + 'static>;

/// Stream parameters requested from a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub sample_rate: u32,
    /// Samples per callback frame (mono)
    pub frame_size: usize,
    /// Device name, `None` for the host default
    pub device: Option<String>,
}

/// An open stream. Dropping it closes the stream.
pub struct StreamHandle {
    _stream: Box<dyn Any>,
}

impl StreamHandle {
    pub fn new<S: Any>(stream: S) -> Self {
        Self {
            _stream: Box::new(stream),
        }
    }
}

/// Source and sink of audio frames.
///
/// Handles returned by `open_*` may be tied to the thread that opened them;
/// the session keeps them on a dedicated device thread.
pub trait AudioBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Names of available capture devices
    fn input_devices(&self) -> Result<Vec<String>, DeviceError>;

    /// Names of available playback devices
    fn output_devices(&self) -> Result<Vec<String>, DeviceError>;

    /// Start capturing; `on_frame` receives `config.frame_size` mono samples per call
    fn open_input(
        &self,
        config: &StreamConfig,
        on_frame: InputCallback,
        on_closed: ClosedCallback,
    ) -> Result<StreamHandle, DeviceError>;

    /// Start playback; `fill_frame` is asked for `config.frame_size` mono samples per call
    fn open_output(
        &self,
        config: &StreamConfig,
        fill_frame: OutputCallback,
        on_closed: ClosedCallback,
    ) -> Result<StreamHandle, DeviceError>;
}

/// Collects interleaved device buffers into exact mono frames
pub struct InputReblocker {
    channels: usize,
    frame: Vec<f32>,
    filled: usize,
}

impl InputReblocker {
    pub fn new(channels: usize, frame_size: usize) -> Self {
        Self {
            channels: channels.max(1),
            frame: vec![0.0; frame_size.max(1)],
            filled: 0,
        }
    }

    /// Downmix `data` and call `emit` for every completed frame
    pub fn push(&mut self, data: &[f32], mut emit: impl FnMut(&[f32])) {
        let scale = 1.0 / self.channels as f32;
        for chunk in data.chunks_exact(self.channels) {
            self.frame[self.filled] = if self.channels == 1 {
                chunk[0]
            } else {
                chunk.iter().sum::<f32>() * scale
            };
            self.filled += 1;

            if self.filled == self.frame.len() {
                emit(&self.frame);
                self.filled = 0;
            }
        }
    }
}

/// Serves interleaved device buffers from exact mono frames
pub struct OutputReblocker {
    channels: usize,
    frame: Vec<f32>,
    position: usize,
}

impl OutputReblocker {
    pub fn new(channels: usize, frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            channels: channels.max(1),
            frame: vec![0.0; frame_size],
            // Empty: first pull requests a frame
            position: frame_size,
        }
    }

    /// Fill `data`, calling `fill` whenever a new frame is needed
    pub fn pull(&mut self, data: &mut [f32], mut fill: impl FnMut(&mut [f32])) {
        for chunk in data.chunks_mut(self.channels) {
            if self.position == self.frame.len() {
                fill(&mut self.frame);
                self.position = 0;
            }
            chunk.fill(self.frame[self.position]);
            self.position += 1;
        }
    }
}
