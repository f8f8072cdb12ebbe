//! Transform parameters and voice preset identifiers

use crate::error::ParameterError;
use std::str::FromStr;

/// Pitch and formant shift limits in semitones
pub const MAX_SHIFT_SEMITONES: f32 = 12.0;

/// Voice preset identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VoicePreset {
    #[default]
    Normal,
    Male,
    Female,
    Robot,
    Chipmunk,
    Deep,
}

impl VoicePreset {
    /// All presets in menu order
    pub const ALL: [VoicePreset; 6] = [
        VoicePreset::Normal,
        VoicePreset::Male,
        VoicePreset::Female,
        VoicePreset::Robot,
        VoicePreset::Chipmunk,
        VoicePreset::Deep,
    ];

    /// Get display name for the preset
    pub fn display_name(&self) -> &'static str {
        match self {
            VoicePreset::Normal => "Normal",
            VoicePreset::Male => "Male",
            VoicePreset::Female => "Female",
            VoicePreset::Robot => "Robot",
            VoicePreset::Chipmunk => "Chipmunk",
            VoicePreset::Deep => "Deep",
        }
    }

    /// Config-file key for the preset
    pub fn key(&self) -> &'static str {
        match self {
            VoicePreset::Normal => "normal",
            VoicePreset::Male => "male",
            VoicePreset::Female => "female",
            VoicePreset::Robot => "robot",
            VoicePreset::Chipmunk => "chipmunk",
            VoicePreset::Deep => "deep",
        }
    }

    /// Ring modulation carrier frequency applied on top of the pitch shift
    pub fn ring_modulation_hz(&self) -> Option<f32> {
        match self {
            VoicePreset::Robot => Some(50.0),
            _ => None,
        }
    }
}

impl FromStr for VoicePreset {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        VoicePreset::ALL
            .iter()
            .copied()
            .find(|p| p.key().eq_ignore_ascii_case(name))
            .ok_or_else(|| ParameterError::UnknownPreset(name.to_string()))
    }
}

impl std::fmt::Display for VoicePreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Immutable parameter snapshot consumed by the transform engine
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransformParameters {
    /// Pitch shift in semitones (-12 to +12)
    pub pitch_semitones: f32,
    /// Preset the parameters were derived from
    pub preset: VoicePreset,
    /// Extra spectral-envelope shift in semitones (-12 to +12)
    pub formant_shift: f32,
}

impl TransformParameters {
    /// Build a validated parameter set
    pub fn new(
        pitch_semitones: f32,
        preset: VoicePreset,
        formant_shift: f32,
    ) -> Result<Self, ParameterError> {
        validate_pitch(pitch_semitones)?;
        validate_formant(formant_shift)?;
        Ok(Self {
            pitch_semitones,
            preset,
            formant_shift,
        })
    }

    /// Pitch frequency ratio: 2^(semitones/12)
    #[inline]
    pub fn pitch_ratio(&self) -> f32 {
        semitones_to_ratio(self.pitch_semitones)
    }

    /// Envelope frequency ratio: 2^(formant_shift/12)
    #[inline]
    pub fn formant_ratio(&self) -> f32 {
        semitones_to_ratio(self.formant_shift)
    }

    /// True when the shift stage has nothing to do
    #[inline]
    pub fn is_unshifted(&self) -> bool {
        self.pitch_semitones == 0.0 && self.formant_shift == 0.0
    }

    /// True when the whole transform is a passthrough
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.is_unshifted() && self.preset.ring_modulation_hz().is_none()
    }
}

#[inline]
pub fn semitones_to_ratio(semitones: f32) -> f32 {
    2.0f32.powf(semitones / 12.0)
}

/// Reject non-finite or out-of-range pitch values
pub fn validate_pitch(semitones: f32) -> Result<(), ParameterError> {
    if semitones.is_finite() && semitones.abs() <= MAX_SHIFT_SEMITONES {
        Ok(())
    } else {
        Err(ParameterError::PitchOutOfRange(semitones))
    }
}

/// Reject non-finite or out-of-range formant shifts
pub fn validate_formant(semitones: f32) -> Result<(), ParameterError> {
    if semitones.is_finite() && semitones.abs() <= MAX_SHIFT_SEMITONES {
        Ok(())
    } else {
        Err(ParameterError::FormantOutOfRange(semitones))
    }
}
