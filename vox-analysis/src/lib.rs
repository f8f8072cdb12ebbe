//! Audio analysis module for VOX
//!
//! Provides level metering for the processing thread and spectrum
//! analysis used to verify pitch transforms.

mod level;
mod spectrum;

pub use level::{LevelMeter, Levels};
pub use spectrum::{dominant_frequency, SpectrumAnalyzer};
