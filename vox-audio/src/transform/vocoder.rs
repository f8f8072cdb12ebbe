//! Phase vocoder pitch shifting with optional formant warping.
//!
//! Analysis tracks the true frequency of every bin from the phase advance
//! between hops and splits the spectrum into regions around its peaks. Each
//! synthesis [`Voice`] moves every region so that its peak lands on the
//! shifted frequency, keeping the region's magnitudes and the phases of the
//! bins relative to the peak. Only the peak phase is accumulated from hop to
//! hop, so the mainlobe of a partial stays coherent and the level does not
//! depend on the shift amount.
//!
//! Formant warping uses the spectral envelope through the peak magnitudes.
//! A voice with a formant ratio other than 1.0 re-weights each bin by
//! `envelope(k / ratio) / envelope(k)` before the pitch shift, moving
//! resonances independently of the pitch.

use super::stft::{Stft, OVERSAMPLING};
use crate::params::TransformParameters;
use rustfft::num_complex::Complex;
use std::f32::consts::{PI, SQRT_2};

const TWO_PI: f32 = 2.0 * PI;

/// A peak must be the largest bin within this many bins on either side
const PEAK_RADIUS: usize = 2;

/// Peaks quieter than this fraction of the loudest bin are ignored (-60 dB)
const PEAK_THRESHOLD: f32 = 1e-3;

/// Bound on formant re-weighting gain (+24 dB)
const MAX_FORMANT_GAIN: f32 = 16.0;

/// Envelope values below this are treated as silence
const ENVELOPE_FLOOR: f32 = 1e-9;

/// Ring modulation halves the power; the carrier is scaled to restore it
const RING_MOD_GAIN: f32 = SQRT_2;

/// Spectral peak and the bins it carries along when shifted
#[derive(Debug, Clone, Copy, PartialEq)]
struct Peak {
    bin: usize,
    /// First bin of the region
    start: usize,
    /// One past the last bin of the region
    end: usize,
}

/// Per-hop spectral analysis shared by all synthesis voices
pub struct Analyzer {
    num_bins: usize,
    /// Expected phase advance per hop, per bin index
    expected_advance: f32,
    bins: Vec<Complex<f32>>,
    /// Bin phases of the latest hop
    phase: Vec<f32>,
    /// Magnitude per bin
    magnitude: Vec<f32>,
    /// True frequency per bin, in (fractional) bin units
    frequency: Vec<f32>,
    /// Phase of each bin relative to its region's peak
    relative_phase: Vec<f32>,
    /// Peaks in ascending bin order; their regions tile the spectrum
    peaks: Vec<Peak>,
    /// Magnitude envelope through the peaks
    envelope: Vec<f32>,
    envelope_valid: bool,
}

impl Analyzer {
    pub fn new(num_bins: usize) -> Self {
        Self {
            num_bins,
            expected_advance: TWO_PI / OVERSAMPLING as f32,
            bins: vec![Complex::new(0.0, 0.0); num_bins],
            phase: vec![0.0; num_bins],
            magnitude: vec![0.0; num_bins],
            frequency: vec![0.0; num_bins],
            relative_phase: vec![0.0; num_bins],
            peaks: Vec::with_capacity(num_bins),
            envelope: vec![0.0; num_bins],
            envelope_valid: false,
        }
    }

    /// Analyze one FFT frame of time-ordered input
    pub fn analyze(&mut self, stft: &mut Stft, frame: &[f32]) {
        stft.analyze(frame, &mut self.bins);

        for k in 0..self.num_bins {
            let bin = self.bins[k];
            let phase = bin.im.atan2(bin.re);

            // Deviation from the bin centre frequency, wrapped to [-pi, pi]
            let mut delta = phase - self.phase[k];
            self.phase[k] = phase;
            delta -= k as f32 * self.expected_advance;
            delta -= TWO_PI * (delta / TWO_PI).round();

            self.magnitude[k] = bin.norm();
            self.frequency[k] = k as f32 + delta * OVERSAMPLING as f32 / TWO_PI;
        }

        self.find_peaks();
    }

    /// Locate peaks, split the spectrum into one region per peak and record
    /// each bin's phase relative to its peak
    fn find_peaks(&mut self) {
        self.peaks.clear();
        self.envelope_valid = false;

        let n = self.num_bins;
        let loudest = self.magnitude.iter().fold(0.0f32, |max, &m| max.max(m));
        let threshold = loudest * PEAK_THRESHOLD;
        let magnitude = &self.magnitude;

        for k in 0..n {
            let m = magnitude[k];
            if m <= threshold {
                continue;
            }
            let lo = k.saturating_sub(PEAK_RADIUS);
            let hi = (k + PEAK_RADIUS + 1).min(n);
            let is_peak = magnitude[lo..k].iter().all(|&v| v < m)
                && magnitude[k + 1..hi].iter().all(|&v| v <= m);
            if !is_peak {
                continue;
            }

            // Regions meet at the quietest bin between neighbouring peaks
            let mut start = 0;
            if let Some(previous) = self.peaks.last_mut() {
                start = (previous.bin + 1..k)
                    .min_by(|&a, &b| magnitude[a].total_cmp(&magnitude[b]))
                    .unwrap_or(k);
                previous.end = start;
            }
            self.peaks.push(Peak { bin: k, start, end: n });
        }

        for peak in &self.peaks {
            let reference = self.phase[peak.bin];
            for k in peak.start..peak.end {
                // Adjacent bins of a Hann-windowed partial differ by pi
                let relative = self.phase[k] - reference + PI * (k as f32 - peak.bin as f32);
                self.relative_phase[k] = relative.rem_euclid(TWO_PI);
            }
        }
    }

    /// Compute the spectral envelope if a voice needs it this hop
    fn ensure_envelope(&mut self) {
        if self.envelope_valid {
            return;
        }
        self.envelope_valid = true;

        let (Some(first), Some(last)) = (self.peaks.first(), self.peaks.last()) else {
            self.envelope.fill(0.0);
            return;
        };

        // Flat outside the outermost peaks, linear between neighbours
        self.envelope[..=first.bin].fill(self.magnitude[first.bin]);
        for pair in self.peaks.windows(2) {
            let (a, b) = (pair[0].bin, pair[1].bin);
            let (from, to) = (self.magnitude[a], self.magnitude[b]);
            let span = (b - a) as f32;
            for k in a..=b {
                self.envelope[k] = from + (to - from) * (k - a) as f32 / span;
            }
        }
        self.envelope[last.bin..].fill(self.magnitude[last.bin]);
    }

    /// Envelope at a fractional bin position (linear interpolation)
    fn envelope_at(&self, position: f32) -> f32 {
        if position <= 0.0 {
            return self.envelope[0];
        }
        let last = self.num_bins - 1;
        let index = position.floor() as usize;
        if index >= last {
            return self.envelope[last];
        }
        let frac = position - index as f32;
        self.envelope[index] * (1.0 - frac) + self.envelope[index + 1] * frac
    }

    /// Re-weighting gain that moves the envelope of bin `k` by `ratio`
    fn formant_gain(&self, k: usize, ratio: f32) -> f32 {
        let source = self.envelope[k];
        if source <= ENVELOPE_FLOOR {
            return 1.0;
        }
        (self.envelope_at(k as f32 / ratio) / source).min(MAX_FORMANT_GAIN)
    }

    pub fn reset(&mut self) {
        self.phase.fill(0.0);
        self.magnitude.fill(0.0);
        self.frequency.fill(0.0);
        self.relative_phase.fill(0.0);
        self.peaks.clear();
        self.envelope.fill(0.0);
        self.envelope_valid = false;
    }
}

/// One synthesis path: parameters plus all state that must stay continuous
pub struct Voice {
    params: TransformParameters,
    pitch_ratio: f32,
    formant_ratio: f32,
    /// Accumulated phase of the partial last synthesized in each bin's region
    sum_phase: Vec<f32>,
    /// Phase of every peak for the hop being synthesized
    peak_phase: Vec<f32>,
    syn_bins: Vec<Complex<f32>>,
    /// Overlap-add accumulator (fft size)
    accum: Vec<f32>,
    /// Finished output samples for the current hop
    out_fifo: Vec<f32>,
    /// Ring modulator carrier phase in radians
    carrier_phase: f32,
    /// Carrier phase increment per sample (0 when no modulation)
    carrier_increment: f32,
    sample_rate: f32,
}

impl Voice {
    pub fn new(params: TransformParameters, num_bins: usize, fft_size: usize, sample_rate: f32) -> Self {
        let mut voice = Self {
            params,
            pitch_ratio: 1.0,
            formant_ratio: 1.0,
            sum_phase: vec![0.0; num_bins],
            peak_phase: Vec::with_capacity(num_bins),
            syn_bins: vec![Complex::new(0.0, 0.0); num_bins],
            accum: vec![0.0; fft_size],
            out_fifo: vec![0.0; fft_size / OVERSAMPLING],
            carrier_phase: 0.0,
            carrier_increment: 0.0,
            sample_rate,
        };
        voice.set_params(params);
        voice
    }

    #[inline]
    pub fn params(&self) -> &TransformParameters {
        &self.params
    }

    /// Switch parameters, keeping all carried state
    pub fn set_params(&mut self, params: TransformParameters) {
        self.params = params;
        self.pitch_ratio = params.pitch_ratio();
        self.formant_ratio = params.formant_ratio();
        self.carrier_increment = params
            .preset
            .ring_modulation_hz()
            .map(|hz| TWO_PI * hz / self.sample_rate)
            .unwrap_or(0.0);
    }

    /// Take over another voice's carried state (no allocation)
    pub fn copy_state_from(&mut self, other: &Voice) {
        self.sum_phase.copy_from_slice(&other.sum_phase);
        self.accum.copy_from_slice(&other.accum);
        self.out_fifo.copy_from_slice(&other.out_fifo);
        self.carrier_phase = other.carrier_phase;
    }

    /// Output for one sample. `dry` is the undelayed input, `fifo_index`
    /// the position within the current hop.
    #[inline]
    pub fn render(&mut self, dry: f32, fifo_index: usize) -> f32 {
        let shifted = if self.params.is_unshifted() {
            dry
        } else {
            self.out_fifo[fifo_index]
        };

        if self.carrier_increment == 0.0 {
            return shifted;
        }

        let out = shifted * self.carrier_phase.sin() * RING_MOD_GAIN;
        self.carrier_phase += self.carrier_increment;
        if self.carrier_phase >= TWO_PI {
            self.carrier_phase -= TWO_PI;
        }
        out
    }

    /// Synthesize one hop from the shared analysis
    pub fn synthesize(&mut self, analysis: &mut Analyzer, stft: &mut Stft) {
        let warp_formants = self.formant_ratio != 1.0;
        if warp_formants {
            analysis.ensure_envelope();
        }
        let analysis = &*analysis;
        let num_bins = analysis.num_bins;
        let advance_per_bin = TWO_PI / OVERSAMPLING as f32;

        // Advance every partial before any region overwrites the phase it
        // continues from
        self.peak_phase.clear();
        for peak in &analysis.peaks {
            let target = analysis.frequency[peak.bin] * self.pitch_ratio;
            let slot = (target.round().max(0.0) as usize).min(num_bins - 1);
            let phase = (self.sum_phase[slot] + target * advance_per_bin).rem_euclid(TWO_PI);
            self.peak_phase.push(phase);
        }

        self.syn_bins.fill(Complex::new(0.0, 0.0));

        for (peak, &phase) in analysis.peaks.iter().zip(&self.peak_phase) {
            let source = analysis.frequency[peak.bin];
            let target = source * self.pitch_ratio;
            let offset = target - source;

            let first = (peak.start as f32 + offset).ceil().max(0.0) as usize;
            let last = (peak.end as f32 - 1.0 + offset).floor();
            if last < 0.0 {
                continue;
            }
            let last = (last as usize).min(num_bins - 1);
            let edge = peak.end - 1;

            for k in first..=last {
                // Position in the source region, between two bins
                let position = (k as f32 - offset).max(peak.start as f32);
                let lower = (position.floor() as usize).min(edge);
                let upper = (lower + 1).min(edge);
                let frac = position - lower as f32;
                let nearest = (position.round() as usize).min(edge);

                let mut magnitude =
                    analysis.magnitude[lower] * (1.0 - frac) + analysis.magnitude[upper] * frac;
                if warp_formants {
                    magnitude *= analysis.formant_gain(nearest, self.formant_ratio);
                }

                let bin_phase = phase + PI * (target - k as f32) + analysis.relative_phase[nearest];
                self.syn_bins[k] += Complex::from_polar(magnitude, bin_phase);
                self.sum_phase[k] = phase;
            }
        }

        stft.synthesize(&self.syn_bins, &mut self.accum);

        // Emit the finished hop and shift the accumulator
        let hop = self.out_fifo.len();
        self.out_fifo.copy_from_slice(&self.accum[..hop]);
        self.accum.copy_within(hop.., 0);
        let len = self.accum.len();
        self.accum[len - hop..].fill(0.0);
    }

    pub fn reset(&mut self) {
        self.sum_phase.fill(0.0);
        self.peak_phase.clear();
        self.syn_bins.fill(Complex::new(0.0, 0.0));
        self.accum.fill(0.0);
        self.out_fifo.fill(0.0);
        self.carrier_phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::VoicePreset;
    use crate::transform::stft::FftSize;

    #[test]
    fn test_analysis_recovers_true_frequency() {
        let mut stft = Stft::new(FftSize::Medium);
        let mut analyzer = Analyzer::new(stft.num_bins());
        let size = stft.size();
        let hop = stft.hop_size();
        let sample_rate = 48000.0;
        let freq = 1000.0;

        let signal: Vec<f32> = (0..size + hop * 4)
            .map(|i| (TWO_PI * freq * i as f32 / sample_rate).sin())
            .collect();

        let mut start = 0;
        while start + size <= signal.len() {
            analyzer.analyze(&mut stft, &signal[start..start + size]);
            start += hop;
        }

        // Strongest bin reports the tone frequency
        let peak = (0..analyzer.num_bins)
            .max_by(|&a, &b| analyzer.magnitude[a].total_cmp(&analyzer.magnitude[b]))
            .unwrap();
        let bin_hz = sample_rate / size as f32;
        let estimated = analyzer.frequency[peak] * bin_hz;
        assert!((estimated - freq).abs() < 1.0, "estimated {} Hz", estimated);
    }

    #[test]
    fn test_flat_spectrum_has_unit_formant_gain() {
        let mut analyzer = Analyzer::new(64);
        analyzer.magnitude.fill(2.0);
        analyzer.find_peaks();
        analyzer.ensure_envelope();
        for k in 1..64 {
            assert!((analyzer.formant_gain(k, 1.5) - 1.0).abs() < 1e-5);
        }
    }

    /// Harmonics every 4 bins with a resonance centred on bin 24
    fn resonant_harmonics(analyzer: &mut Analyzer) {
        analyzer.magnitude.fill(0.0);
        let mut k = 4;
        while k + 1 < analyzer.num_bins {
            let distance = (k as f32 - 24.0) / 6.0;
            let amplitude = 0.02 + (-distance * distance).exp();
            analyzer.magnitude[k] = amplitude;
            analyzer.magnitude[k - 1] = 0.5 * amplitude;
            analyzer.magnitude[k + 1] = 0.5 * amplitude;
            k += 4;
        }
        analyzer.find_peaks();
        analyzer.ensure_envelope();
    }

    /// Bin of the loudest harmonic after re-weighting by `ratio`
    fn warped_peak(analyzer: &Analyzer, ratio: f32) -> usize {
        (0..analyzer.num_bins)
            .map(|k| (k, analyzer.magnitude[k] * analyzer.formant_gain(k, ratio)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, _)| k)
            .unwrap()
    }

    #[test]
    fn test_formant_warp_moves_resonance() {
        let mut analyzer = Analyzer::new(129);
        resonant_harmonics(&mut analyzer);

        // Envelope passes through the harmonic peaks
        assert!((analyzer.envelope[24] - 1.02).abs() < 1e-5);
        assert_eq!(warped_peak(&analyzer, 1.0), 24);

        // Strongest harmonic follows the resonance to within half the spacing
        for semitones in [-6.0f32, 6.0] {
            let ratio = 2.0f32.powf(semitones / 12.0);
            let expected = 24.0 * ratio;
            let peak = warped_peak(&analyzer, ratio);
            assert!(
                (peak as f32 - expected).abs() <= 2.5,
                "formant {:+}: resonance at bin {}, expected {:.1}",
                semitones,
                peak,
                expected
            );
        }
    }

    #[test]
    fn test_peak_regions_tile_spectrum() {
        let mut analyzer = Analyzer::new(129);
        resonant_harmonics(&mut analyzer);

        let bins: Vec<usize> = analyzer.peaks.iter().map(|p| p.bin).collect();
        assert_eq!(bins, (1..32).map(|h| h * 4).collect::<Vec<_>>());
        assert_eq!(analyzer.peaks[0].start, 0);
        assert_eq!(analyzer.peaks.last().unwrap().end, 129);
        for pair in analyzer.peaks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].bin < pair[0].end && pair[1].start < pair[1].bin);
        }
    }

    #[test]
    fn test_silence_has_no_peaks() {
        let mut analyzer = Analyzer::new(33);
        analyzer.find_peaks();
        assert!(analyzer.peaks.is_empty());
        analyzer.ensure_envelope();
        assert_eq!(analyzer.formant_gain(10, 2.0), 1.0);
    }

    #[test]
    fn test_robot_voice_modulates_dry_signal() {
        let params = TransformParameters {
            preset: VoicePreset::Robot,
            ..Default::default()
        };
        let mut voice = Voice::new(params, 513, 1024, 48000.0);
        // Carrier starts at phase 0
        assert_eq!(voice.render(1.0, 0), 0.0);
        let second = voice.render(1.0, 1);
        let expected = (TWO_PI * 50.0 / 48000.0).sin() * RING_MOD_GAIN;
        assert!((second - expected).abs() < 1e-6);
    }

    #[test]
    fn test_copy_state_keeps_own_params() {
        let a = Voice::new(TransformParameters::default(), 33, 64, 48000.0);
        let female = TransformParameters {
            pitch_semitones: 4.0,
            preset: VoicePreset::Female,
            formant_shift: -2.0,
        };
        let mut b = Voice::new(female, 33, 64, 48000.0);
        b.copy_state_from(&a);
        assert_eq!(*b.params(), female);
    }
}
