//! Simple configuration persistence for VOX
//!
//! Stores audio settings and the startup preset as `key=value` lines.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use vox_audio::{ConfigError, FftSize, SessionConfig, VoicePreset};

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub sample_rate: u32,
    /// Samples per processing frame
    pub frame_size: usize,
    /// Frames buffered per direction
    pub ring_capacity: usize,
    /// Phase vocoder FFT length (512, 1024 or 2048)
    pub fft_size: usize,
    /// Capture device name (default device if unset)
    pub input_device: Option<String>,
    /// Playback device name (default device if unset)
    pub output_device: Option<String>,
    /// Preset applied at startup
    pub preset: VoicePreset,
}

impl Default for Config {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            sample_rate: session.sample_rate,
            frame_size: session.frame_size,
            ring_capacity: session.ring_capacity,
            fft_size: session.fft_size.as_usize(),
            input_device: None,
            output_device: None,
            preset: session.preset,
        }
    }
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if file doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let path = Self::config_path();
        Self::load_from(&path).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to the default location
    pub fn save(&self) -> io::Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = self.serialize();
        fs::write(path, content)
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vox")
            .join("config.txt")
    }

    /// Validated session settings
    pub fn to_session_config(&self) -> Result<SessionConfig, ConfigError> {
        let fft_size =
            FftSize::from_samples(self.fft_size).ok_or(ConfigError::FftSize(self.fft_size))?;
        let config = SessionConfig {
            sample_rate: self.sample_rate,
            frame_size: self.frame_size,
            ring_capacity: self.ring_capacity,
            fft_size,
            input_device: self.input_device.clone(),
            output_device: self.output_device.clone(),
            preset: self.preset,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse config from simple key=value format
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            // Unparsable values keep their defaults
            match key {
                "sample_rate" => set_parsed(&mut config.sample_rate, key, value),
                "frame_size" => set_parsed(&mut config.frame_size, key, value),
                "ring_capacity" => set_parsed(&mut config.ring_capacity, key, value),
                "fft_size" => set_parsed(&mut config.fft_size, key, value),
                "input_device" => config.input_device = non_empty(value),
                "output_device" => config.output_device = non_empty(value),
                "preset" => set_parsed(&mut config.preset, key, value),
                _ => {} // Ignore unknown keys
            }
        }

        config
    }

    /// Serialize config to simple key=value format
    fn serialize(&self) -> String {
        let mut lines = vec![
            "# VOX Configuration".to_string(),
            format!("sample_rate={}", self.sample_rate),
            format!("frame_size={}", self.frame_size),
            format!("ring_capacity={}", self.ring_capacity),
            format!("fft_size={}", self.fft_size),
        ];

        if let Some(ref device) = self.input_device {
            lines.push(format!("input_device={}", device));
        }
        if let Some(ref device) = self.output_device {
            lines.push(format!("output_device={}", device));
        }
        lines.push(format!("preset={}", self.preset.key()));

        lines.join("\n")
    }
}

fn set_parsed<T: std::str::FromStr>(field: &mut T, key: &str, value: &str) {
    match value.parse() {
        Ok(parsed) => *field = parsed,
        Err(_) => tracing::warn!(key, value, "Ignoring invalid config value"),
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
