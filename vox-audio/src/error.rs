//! Error types for the voice pipeline

use thiserror::Error;

/// Failures opening or enumerating audio devices. Fatal to session start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),
    #[error("Audio device busy or unavailable: {0}")]
    DeviceBusy(String),
    #[error("Unsupported stream format: {0}")]
    FormatUnsupported(String),
    #[error("Audio backend error: {0}")]
    Backend(String),
}

/// Direction of a stream, used in notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Input,
    Output,
}

impl std::fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamDirection::Input => f.write_str("input"),
            StreamDirection::Output => f.write_str("output"),
        }
    }
}

/// Device lost mid-session. Delivered as a notification, never returned from a call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{direction} stream interrupted: {reason}")]
pub struct StreamInterrupted {
    pub direction: StreamDirection,
    pub reason: String,
}

/// Rejected control-surface input
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Pitch {0} semitones is outside [-12, +12]")]
    PitchOutOfRange(f32),
    #[error("Formant shift {0} semitones is outside [-12, +12]")]
    FormantOutOfRange(f32),
    #[error("Unknown voice preset: {0}")]
    UnknownPreset(String),
}

/// Invalid session configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Sample rate {0} Hz is outside 8000..=192000")]
    SampleRate(u32),
    #[error("Frame size {0} is outside 32..=4096")]
    FrameSize(usize),
    #[error("Ring capacity must be at least 2 frames, got {0}")]
    RingCapacity(usize),
    #[error("Unsupported FFT size {0} (expected 512, 1024 or 2048)")]
    FftSize(usize),
}

/// Errors surfaced by the session control surface
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
