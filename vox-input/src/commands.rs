//! Command definitions for VOX

pub use vox_audio::VoicePreset;

/// Semitones moved by one pitch or formant key press
pub const SEMITONE_STEP: f32 = 1.0;

/// Commands that can be dispatched from input
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    // Voice
    SelectPreset(VoicePreset),
    AdjustPitch(f32),   // semitones, relative
    AdjustFormant(f32), // semitones, relative
    ResetPitch,         // pitch and formant back to 0

    // Diagnostics
    ShowStats,
    ListPresets,

    // UI
    ToggleHelp,

    // Application
    Quit,
}

impl Command {
    /// Preset bound to a number key (1-6, menu order)
    pub fn preset_for_digit(digit: char) -> Option<Command> {
        let index = digit.to_digit(10)? as usize;
        if index == 0 {
            return None;
        }
        VoicePreset::ALL
            .get(index - 1)
            .map(|preset| Command::SelectPreset(*preset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digit_presets() {
        assert_eq!(
            Command::preset_for_digit('1'),
            Some(Command::SelectPreset(VoicePreset::Normal))
        );
        assert_eq!(
            Command::preset_for_digit('6'),
            Some(Command::SelectPreset(VoicePreset::Deep))
        );
        assert_eq!(Command::preset_for_digit('0'), None);
        assert_eq!(Command::preset_for_digit('7'), None);
        assert_eq!(Command::preset_for_digit('x'), None);
    }
}
