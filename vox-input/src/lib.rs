//! Keyboard input handling for VOX

mod commands;
mod modal;

pub use commands::{Command, VoicePreset, SEMITONE_STEP};
pub use modal::{InputHandler, Mode, KEY_HELP};
