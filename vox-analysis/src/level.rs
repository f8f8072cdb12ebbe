//! Peak/RMS level metering with release smoothing

/// Instantaneous levels of one block
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Levels {
    /// Absolute peak (0.0 - 1.0, clamped)
    pub peak: f32,
    /// Root mean square
    pub rms: f32,
}

impl Levels {
    /// Measure a block of samples
    pub fn measure(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut peak = 0.0f32;
        let mut sum_sq = 0.0f32;
        for &s in samples {
            peak = peak.max(s.abs());
            sum_sq += s * s;
        }
        Self {
            peak: peak.min(1.0),
            rms: (sum_sq / samples.len() as f32).sqrt(),
        }
    }

    /// Peak in dBFS (floored at -120 dB)
    pub fn peak_db(&self) -> f32 {
        20.0 * self.peak.max(1e-6).log10()
    }
}

/// Level meter with instant attack and exponential release
#[derive(Debug, Clone)]
pub struct LevelMeter {
    release: f32,
    current: Levels,
}

impl LevelMeter {
    /// `release` is the per-block decay factor (0.0 = no hold, 0.99 = slow fall)
    pub fn new(release: f32) -> Self {
        Self {
            release: release.clamp(0.0, 0.999),
            current: Levels::default(),
        }
    }

    /// Feed a block and return the smoothed levels
    pub fn process(&mut self, samples: &[f32]) -> Levels {
        let block = Levels::measure(samples);
        self.current.peak = block.peak.max(self.current.peak * self.release);
        self.current.rms = block.rms.max(self.current.rms * self.release);
        self.current
    }
}
