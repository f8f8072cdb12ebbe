//! Compiled-in voice presets

use crate::params::{TransformParameters, VoicePreset};

/// Default parameters of one preset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresetDefinition {
    pub preset: VoicePreset,
    pub pitch_semitones: f32,
    pub formant_shift: f32,
}

/// Lookup table, indexed in `VoicePreset::ALL` order
const PRESETS: [PresetDefinition; 6] = [
    PresetDefinition { preset: VoicePreset::Normal, pitch_semitones: 0.0, formant_shift: 0.0 },
    // Formants move less than the pitch for a more natural timbre
    PresetDefinition { preset: VoicePreset::Male, pitch_semitones: -4.0, formant_shift: 2.0 },
    PresetDefinition { preset: VoicePreset::Female, pitch_semitones: 4.0, formant_shift: -2.0 },
    PresetDefinition { preset: VoicePreset::Robot, pitch_semitones: 0.0, formant_shift: 0.0 },
    PresetDefinition { preset: VoicePreset::Chipmunk, pitch_semitones: 8.0, formant_shift: 0.0 },
    PresetDefinition { preset: VoicePreset::Deep, pitch_semitones: -8.0, formant_shift: 0.0 },
];

/// Read-only mapping from preset identifier to default parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct PresetStore;

impl PresetStore {
    pub const fn new() -> Self {
        Self
    }

    /// Definition for a preset
    pub fn definition(&self, preset: VoicePreset) -> &'static PresetDefinition {
        let index = VoicePreset::ALL
            .iter()
            .position(|p| *p == preset)
            .unwrap_or(0);
        &PRESETS[index]
    }

    /// Default transform parameters for a preset
    pub fn parameters(&self, preset: VoicePreset) -> TransformParameters {
        let def = self.definition(preset);
        TransformParameters {
            pitch_semitones: def.pitch_semitones,
            preset,
            formant_shift: def.formant_shift,
        }
    }

    /// All preset definitions in menu order
    pub fn all(&self) -> &'static [PresetDefinition] {
        &PRESETS
    }
}
