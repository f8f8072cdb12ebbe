//! Real-time voice transformation pipeline for VOX
//!
//! This crate provides the capture → transform → playback pipeline:
//! - Device: audio backend trait with cpal and virtual implementations
//! - Ring: lock-free single-producer/single-consumer frame buffers
//! - Scheduler: processing thread moving frames through the transform
//! - Transform: phase vocoder pitch/formant shift and voice presets
//! - Session: start/stop and parameter control surface

pub mod device;
mod error;
mod params;
mod presets;
mod ring;
mod scheduler;
mod session;
mod snapshot;
pub mod transform;

pub use device::{AudioBackend, CpalBackend, StreamConfig, StreamHandle, VirtualBackend};
pub use error::{ConfigError, DeviceError, ParameterError, SessionError, StreamDirection, StreamInterrupted};
pub use params::{semitones_to_ratio, TransformParameters, VoicePreset, MAX_SHIFT_SEMITONES};
pub use presets::{PresetDefinition, PresetStore};
pub use ring::FrameRing;
pub use scheduler::{FrameProcessor, FrameScheduler, PipelineMonitor, SchedulerReport, Tick};
pub use session::{Session, SessionConfig, SessionEvent, SessionStats};
pub use snapshot::{collector_handle, ParameterCell};
pub use transform::{FftSize, TransformEngine};
