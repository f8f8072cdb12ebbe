//! Short-Time Fourier Transform primitives for real-time voice processing.
//!
//! Features:
//! - Pre-planned rustfft forward/inverse transforms
//! - Pre-computed periodic Hann window (75% overlap, constant overlap-add gain)
//! - Zero-allocation processing (scratch buffers sized at construction)

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Analysis frames per FFT length (75% overlap)
pub const OVERSAMPLING: usize = 4;

/// Sum of squared Hann windows at 75% overlap
const HANN_OLA_GAIN: f32 = 1.5;

/// FFT size options for the voice transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FftSize {
    /// 512 samples - lowest latency, coarse low-frequency resolution
    Small = 512,
    /// 1024 samples - balanced (recommended for voice at 44.1/48 kHz)
    #[default]
    Medium = 1024,
    /// 2048 samples - best resolution, more latency
    Large = 2048,
}

impl FftSize {
    #[inline]
    pub fn as_usize(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn hop_size(self) -> usize {
        self.as_usize() / OVERSAMPLING
    }

    /// Look up a size by sample count
    pub fn from_samples(samples: usize) -> Option<Self> {
        match samples {
            512 => Some(FftSize::Small),
            1024 => Some(FftSize::Medium),
            2048 => Some(FftSize::Large),
            _ => None,
        }
    }
}

/// Windowed FFT/IFFT pair with overlap-add synthesis
pub struct Stft {
    size: usize,
    hop_size: usize,
    /// Pre-computed Hann window
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    /// Working buffer for the transform (avoid allocation)
    work: Vec<Complex<f32>>,
    /// rustfft scratch space
    scratch: Vec<Complex<f32>>,
    /// Output scale: inverse FFT is unnormalized, window applied twice
    norm_factor: f32,
}

impl Stft {
    /// Create new STFT processor
    pub fn new(fft_size: FftSize) -> Self {
        let size = fft_size.as_usize();

        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        // Periodic Hann (raised cosine, constant overlap-add at 75% overlap)
        let window: Vec<f32> = (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
            .collect();

        Self {
            size,
            hop_size: fft_size.hop_size(),
            window,
            forward,
            inverse,
            work: vec![Complex::new(0.0, 0.0); size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            norm_factor: 1.0 / (size as f32 * HANN_OLA_GAIN),
        }
    }

    /// Get FFT size
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get hop size
    #[inline]
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Get number of positive frequency bins (size/2 + 1)
    #[inline]
    pub fn num_bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Window `frame` (time-ordered, `size` samples) and write its
    /// positive-frequency bins into `bins`.
    pub fn analyze(&mut self, frame: &[f32], bins: &mut [Complex<f32>]) {
        debug_assert!(frame.len() >= self.size);
        debug_assert!(bins.len() >= self.num_bins());

        for ((w, &x), &win) in self.work.iter_mut().zip(frame).zip(&self.window) {
            *w = Complex::new(x * win, 0.0);
        }

        self.forward
            .process_with_scratch(&mut self.work, &mut self.scratch);

        let num_bins = self.num_bins();
        bins[..num_bins].copy_from_slice(&self.work[..num_bins]);
    }

    /// Inverse-transform positive-frequency `bins`, window the result and
    /// add it into `accum` (at least `size` samples).
    pub fn synthesize(&mut self, bins: &[Complex<f32>], accum: &mut [f32]) {
        debug_assert!(bins.len() >= self.num_bins());
        debug_assert!(accum.len() >= self.size);

        // Reconstruct full spectrum from positive frequencies (Hermitian symmetry)
        let num_bins = self.num_bins();
        self.work[..num_bins].copy_from_slice(&bins[..num_bins]);
        for i in 1..self.size / 2 {
            self.work[self.size - i] = bins[i].conj();
        }

        self.inverse
            .process_with_scratch(&mut self.work, &mut self.scratch);

        for ((out, w), &win) in accum.iter_mut().zip(&self.work).zip(&self.window) {
            *out += w.re * win * self.norm_factor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_size_lookup() {
        assert_eq!(FftSize::from_samples(1024), Some(FftSize::Medium));
        assert_eq!(FftSize::from_samples(1000), None);
        assert_eq!(FftSize::Large.hop_size(), 512);
    }

    #[test]
    fn test_overlap_add_reconstructs_signal() {
        let mut stft = Stft::new(FftSize::Small);
        let size = stft.size();
        let hop = stft.hop_size();
        let mut bins = vec![Complex::new(0.0, 0.0); stft.num_bins()];

        let signal: Vec<f32> = (0..size * 4)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / 48000.0).sin() * 0.5)
            .collect();
        let mut output = vec![0.0f32; signal.len() + size];

        let mut start = 0;
        while start + size <= signal.len() {
            stft.analyze(&signal[start..start + size], &mut bins);
            stft.synthesize(&bins, &mut output[start..start + size]);
            start += hop;
        }

        // Fully overlapped region reproduces the input
        for i in size..signal.len() - size {
            assert!(
                (output[i] - signal[i]).abs() < 1e-3,
                "sample {}: {} vs {}",
                i,
                output[i],
                signal[i]
            );
        }
    }
}
