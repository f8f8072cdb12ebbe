//! Frame-by-frame voice transform.
//!
//! [`TransformEngine`] turns one input frame plus the current
//! [`TransformParameters`] into an output frame of the same length. It runs
//! a streaming phase vocoder (see [`vocoder`]) and carries every piece of
//! cross-frame state itself, so any frame length can be fed in.
//!
//! Two synthesis voices are pre-allocated. When the parameters change at a
//! frame boundary, the idle voice takes over the active voice's state with
//! the new parameters and both are rendered for that frame with a linear
//! crossfade.

mod stft;
mod vocoder;

pub use stft::FftSize;

use crate::params::TransformParameters;
use stft::Stft;
use vocoder::{Analyzer, Voice};

/// Streaming pitch/formant/preset transform
pub struct TransformEngine {
    stft: Stft,
    analyzer: Analyzer,
    fft_size: FftSize,
    size: usize,
    hop: usize,
    /// Analysis input FIFO (fft size)
    in_fifo: Vec<f32>,
    /// Write position in `in_fifo`
    rover: usize,
    /// Start of the newest hop in `in_fifo` (size - hop)
    fifo_start: usize,
    voices: [Voice; 2],
    active: usize,
    /// Set for the frame in which a parameter change happened
    crossfading: bool,
}

impl TransformEngine {
    /// Create an engine for `sample_rate` with initial parameters
    pub fn new(sample_rate: u32, fft_size: FftSize, params: TransformParameters) -> Self {
        let stft = Stft::new(fft_size);
        let size = stft.size();
        let hop = stft.hop_size();
        let num_bins = stft.num_bins();
        let rate = sample_rate as f32;

        Self {
            analyzer: Analyzer::new(num_bins),
            stft,
            fft_size,
            size,
            hop,
            in_fifo: vec![0.0; size],
            rover: size - hop,
            fifo_start: size - hop,
            voices: [
                Voice::new(params, num_bins, size, rate),
                Voice::new(params, num_bins, size, rate),
            ],
            active: 0,
            crossfading: false,
        }
    }

    /// Parameters currently applied
    #[inline]
    pub fn parameters(&self) -> &TransformParameters {
        self.voices[self.active].params()
    }

    #[inline]
    pub fn fft_size(&self) -> FftSize {
        self.fft_size
    }

    /// Delay in samples between input and output under the current parameters
    pub fn latency(&self) -> usize {
        if self.parameters().is_unshifted() {
            0
        } else {
            self.size
        }
    }

    /// Transform one frame.
    ///
    /// `output` receives `input.len()` samples; any extra output samples are
    /// zeroed. Never allocates.
    pub fn process(&mut self, input: &[f32], output: &mut [f32], params: &TransformParameters) {
        if params != self.parameters() {
            self.switch_voice(*params);
        }

        let frame_len = input.len().min(output.len());
        let fade_step = if frame_len > 0 { 1.0 / frame_len as f32 } else { 0.0 };

        for (i, (&sample, out)) in input.iter().zip(output.iter_mut()).enumerate() {
            // Keep non-finite input out of the carried state
            self.in_fifo[self.rover] = if sample.is_finite() { sample } else { 0.0 };
            let fifo_index = self.rover - self.fifo_start;

            let current = self.voices[self.active].render(sample, fifo_index);
            *out = if self.crossfading {
                let previous = self.voices[1 - self.active].render(sample, fifo_index);
                let t = i as f32 * fade_step;
                previous + (current - previous) * t
            } else {
                current
            };

            self.rover += 1;
            if self.rover >= self.size {
                self.rover = self.fifo_start;
                self.advance_hop();
            }
        }

        output[frame_len..].fill(0.0);
        self.crossfading = false;
    }

    /// Analyze the full input FIFO and synthesize the next hop
    fn advance_hop(&mut self) {
        self.analyzer.analyze(&mut self.stft, &self.in_fifo);

        // The active voice always runs so that a bypassed voice is warm
        // when a shift is switched on.
        self.voices[self.active].synthesize(&mut self.analyzer, &mut self.stft);
        if self.crossfading {
            self.voices[1 - self.active].synthesize(&mut self.analyzer, &mut self.stft);
        }

        self.in_fifo.copy_within(self.hop.., 0);
    }

    fn switch_voice(&mut self, params: TransformParameters) {
        let (first, second) = self.voices.split_at_mut(1);
        let (from, to) = if self.active == 0 {
            (&first[0], &mut second[0])
        } else {
            (&second[0], &mut first[0])
        };
        to.copy_state_from(from);
        to.set_params(params);

        self.active = 1 - self.active;
        self.crossfading = true;

        tracing::debug!(
            pitch = params.pitch_semitones,
            formant = params.formant_shift,
            preset = %params.preset,
            "Transform parameters changed"
        );
    }

    /// Drop all carried state (session restart)
    pub fn reset(&mut self) {
        self.in_fifo.fill(0.0);
        self.rover = self.fifo_start;
        self.analyzer.reset();
        for voice in &mut self.voices {
            voice.reset();
        }
        self.crossfading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::VoicePreset;
    use crate::presets::PresetStore;
    use std::f32::consts::PI;

    const SAMPLE_RATE: u32 = 48000;
    const FRAME: usize = 256;

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / SAMPLE_RATE as f32).sin())
            .collect()
    }

    /// Deterministic pseudo-random samples in [-1, 1)
    fn noise(len: usize) -> Vec<f32> {
        let mut state = 0x1234_5678u32;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 23) as f32 - 1.0
            })
            .collect()
    }

    fn run(engine: &mut TransformEngine, input: &[f32], params: &TransformParameters) -> Vec<f32> {
        let mut output = vec![0.0; input.len()];
        for (inp, out) in input.chunks(FRAME).zip(output.chunks_mut(FRAME)) {
            engine.process(inp, out, params);
        }
        output
    }

    fn pitched(semitones: f32) -> TransformParameters {
        TransformParameters::new(semitones, VoicePreset::Normal, 0.0).unwrap()
    }

    fn tail_frequency(output: &[f32]) -> f32 {
        let tail = &output[output.len() - 16384..];
        vox_analysis::dominant_frequency(tail, SAMPLE_RATE).unwrap()
    }

    #[test]
    fn test_identity_is_bit_exact() {
        let params = TransformParameters::default();
        let mut engine = TransformEngine::new(SAMPLE_RATE, FftSize::Medium, params);
        let input = noise(FRAME * 40);
        let output = run(&mut engine, &input, &params);
        assert_eq!(input, output);
        assert_eq!(engine.latency(), 0);
    }

    #[test]
    fn test_octave_up_and_down() {
        let input = sine(1000.0, 0.5, SAMPLE_RATE as usize);

        let up = pitched(12.0);
        let mut engine = TransformEngine::new(SAMPLE_RATE, FftSize::Medium, up);
        let freq = tail_frequency(&run(&mut engine, &input, &up));
        assert!((freq - 2000.0).abs() < 2000.0 * 0.02, "+12 gave {} Hz", freq);

        let down = pitched(-12.0);
        let mut engine = TransformEngine::new(SAMPLE_RATE, FftSize::Medium, down);
        let freq = tail_frequency(&run(&mut engine, &input, &down));
        assert!((freq - 500.0).abs() < 500.0 * 0.02, "-12 gave {} Hz", freq);
    }

    #[test]
    fn test_every_semitone_shift() {
        let input = sine(1000.0, 0.5, SAMPLE_RATE as usize);
        for p in -12..=12 {
            let params = pitched(p as f32);
            let mut engine = TransformEngine::new(SAMPLE_RATE, FftSize::Medium, params);
            let freq = tail_frequency(&run(&mut engine, &input, &params));
            let expected = 1000.0 * params.pitch_ratio();
            assert!(
                (freq - expected).abs() < expected * 0.02,
                "pitch {}: expected {} Hz, got {} Hz",
                p,
                expected,
                freq
            );
        }
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_output_level_tracks_input_level() {
        let store = PresetStore::new();
        let input = sine(1000.0, 0.5, SAMPLE_RATE as usize / 2);
        let input_rms = rms(&input);

        let mut cases: Vec<TransformParameters> =
            VoicePreset::ALL.iter().map(|&p| store.parameters(p)).collect();
        cases.extend([-12.0, -7.0, 7.0, 12.0].map(pitched));

        for params in cases {
            let mut engine = TransformEngine::new(SAMPLE_RATE, FftSize::Medium, params);
            let output = run(&mut engine, &input, &params);
            // Steady state, well past the vocoder latency
            let tail = &output[output.len() / 2..];
            let gain_db = 20.0 * (rms(tail) / input_rms).log10();
            assert!(
                gain_db.abs() < 3.0,
                "{} pitch {:+}: output level {:+.1} dB",
                params.preset,
                params.pitch_semitones,
                gain_db
            );
        }
    }

    #[test]
    fn test_silence_stays_silent_under_every_preset() {
        let store = PresetStore::new();
        let input = vec![0.0f32; FRAME * 20];
        for preset in VoicePreset::ALL {
            let params = store.parameters(preset);
            let mut engine = TransformEngine::new(SAMPLE_RATE, FftSize::Medium, params);
            let output = run(&mut engine, &input, &params);
            assert!(output.iter().all(|&s| s == 0.0), "{} produced sound", preset);
        }
    }

    #[test]
    fn test_preset_switches_are_continuous() {
        let store = PresetStore::new();
        let input = sine(300.0, 0.5, FRAME * 200);
        let mut engine = TransformEngine::new(SAMPLE_RATE, FftSize::Medium, TransformParameters::default());

        let mut output = vec![0.0f32; input.len()];
        let cycle = [
            VoicePreset::Normal,
            VoicePreset::Male,
            VoicePreset::Female,
            VoicePreset::Robot,
            VoicePreset::Chipmunk,
            VoicePreset::Deep,
            VoicePreset::Normal,
        ];
        for (k, (inp, out)) in input.chunks(FRAME).zip(output.chunks_mut(FRAME)).enumerate() {
            // Warm up, then change preset every 20 frames
            let preset = cycle[(k / 20) % cycle.len()];
            engine.process(inp, out, &store.parameters(preset));
        }

        // Skip the vocoder fill-in of the first frames
        for k in 8..output.len() / FRAME {
            let last = output[k * FRAME - 1];
            let first = output[k * FRAME];
            assert!(
                (first - last).abs() < 0.35,
                "jump of {} at frame {}",
                (first - last).abs(),
                k
            );
        }
    }

    #[test]
    fn test_processing_is_deterministic() {
        let params = TransformParameters::new(-3.0, VoicePreset::Robot, 1.5).unwrap();
        let input = noise(FRAME * 30);
        let mut a = TransformEngine::new(SAMPLE_RATE, FftSize::Small, params);
        let mut b = TransformEngine::new(SAMPLE_RATE, FftSize::Small, params);
        assert_eq!(run(&mut a, &input, &params), run(&mut b, &input, &params));
    }

    #[test]
    fn test_reset_clears_carried_audio() {
        let params = pitched(5.0);
        let mut engine = TransformEngine::new(SAMPLE_RATE, FftSize::Medium, params);
        run(&mut engine, &sine(440.0, 0.5, FRAME * 20), &params);
        engine.reset();
        let output = run(&mut engine, &vec![0.0; FRAME * 8], &params);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_latency_follows_parameters() {
        let mut engine = TransformEngine::new(SAMPLE_RATE, FftSize::Small, TransformParameters::default());
        assert_eq!(engine.latency(), 0);

        let mut out = vec![0.0; FRAME];
        engine.process(&vec![0.0; FRAME], &mut out, &pitched(2.0));
        assert_eq!(engine.latency(), 512);
        assert_eq!(engine.parameters().pitch_semitones, 2.0);
    }

    #[test]
    fn test_short_input_zero_fills_output() {
        let params = TransformParameters::default();
        let mut engine = TransformEngine::new(SAMPLE_RATE, FftSize::Small, params);
        let mut out = vec![9.0; 8];
        engine.process(&[0.25; 4], &mut out, &params);
        assert_eq!(out, vec![0.25, 0.25, 0.25, 0.25, 0.0, 0.0, 0.0, 0.0]);
    }
}
