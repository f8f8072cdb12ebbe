//! FFT-based spectrum analysis for pitch verification and diagnostics

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Magnitude spectrum analyzer with a fixed FFT size
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    fft_size: usize,
    fft: std::sync::Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    /// Pre-allocated FFT buffer to avoid allocation in analyze()
    fft_buffer: Vec<Complex<f32>>,
    /// Magnitudes of the positive-frequency bins from the last analysis
    magnitudes: Vec<f32>,
}

impl SpectrumAnalyzer {
    /// Create a new spectrum analyzer. `fft_size` is rounded up to a power of two.
    pub fn new(sample_rate: u32, fft_size: usize) -> Self {
        let fft_size = fft_size.max(16).next_power_of_two();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Pre-compute Hann window
        let window: Vec<f32> = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / fft_size as f32).cos()))
            .collect();

        Self {
            sample_rate,
            fft_size,
            fft,
            window,
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            magnitudes: vec![0.0; fft_size / 2 + 1],
        }
    }

    /// FFT size in samples
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Width of one frequency bin in Hz
    pub fn bin_width(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Analyze the first `fft_size` samples (zero padded if shorter) and
    /// return the magnitude of every positive-frequency bin.
    pub fn analyze(&mut self, samples: &[f32]) -> &[f32] {
        let sample_count = samples.len().min(self.fft_size);
        for (i, &sample) in samples.iter().enumerate().take(sample_count) {
            self.fft_buffer[i] = Complex::new(sample * self.window[i], 0.0);
        }
        // Zero pad the rest
        for buf in self.fft_buffer.iter_mut().skip(sample_count) {
            *buf = Complex::new(0.0, 0.0);
        }

        self.fft.process(&mut self.fft_buffer);

        for (mag, bin) in self.magnitudes.iter_mut().zip(self.fft_buffer.iter()) {
            *mag = bin.norm();
        }
        &self.magnitudes
    }

    /// Frequency (Hz) of the strongest spectral peak, refined with parabolic
    /// interpolation. Returns `None` for silence.
    pub fn dominant_frequency(&mut self, samples: &[f32]) -> Option<f32> {
        let bin_width = self.bin_width();
        let mags = self.analyze(samples);

        // Skip DC
        let (peak_bin, peak_mag) = mags
            .iter()
            .enumerate()
            .skip(1)
            .fold((0usize, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best });

        if peak_bin == 0 || peak_mag <= 1e-6 {
            return None;
        }

        let offset = if peak_bin + 1 < mags.len() {
            let (a, b, c) = (mags[peak_bin - 1], mags[peak_bin], mags[peak_bin + 1]);
            let denom = a - 2.0 * b + c;
            if denom.abs() > f32::EPSILON {
                (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
            } else {
                0.0
            }
        } else {
            0.0
        };

        Some((peak_bin as f32 + offset) * bin_width)
    }
}

/// One-shot dominant frequency estimate over a whole buffer.
///
/// Uses the largest power-of-two window that fits in `samples` (at most 16384).
pub fn dominant_frequency(samples: &[f32], sample_rate: u32) -> Option<f32> {
    if samples.len() < 16 {
        return None;
    }
    let mut size = 16usize;
    while size * 2 <= samples.len() && size < 16384 {
        size *= 2;
    }
    let start = samples.len() - size;
    SpectrumAnalyzer::new(sample_rate, size).dominant_frequency(&samples[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_dominant_frequency_of_sine() {
        for &freq in &[220.0f32, 1000.0, 2500.0] {
            let samples = sine(freq, 48000, 8192);
            let detected = dominant_frequency(&samples, 48000).unwrap();
            assert!(
                (detected - freq).abs() < 5.0,
                "expected {} Hz, got {} Hz",
                freq,
                detected
            );
        }
    }

    #[test]
    fn test_silence_has_no_dominant_frequency() {
        let samples = vec![0.0f32; 4096];
        assert!(dominant_frequency(&samples, 48000).is_none());
    }

    #[test]
    fn test_fft_size_rounds_to_power_of_two() {
        let analyzer = SpectrumAnalyzer::new(48000, 1000);
        assert_eq!(analyzer.fft_size(), 1024);
        assert!((analyzer.bin_width() - 46.875).abs() < 1e-3);
    }
}
