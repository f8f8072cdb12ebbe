//! Key handling state machine

use crate::commands::{Command, SEMITONE_STEP};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// Input modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Help,
}

impl Mode {
    /// Get display name for the mode
    pub fn display_name(&self) -> &'static str {
        match self {
            Mode::Normal => "NORMAL",
            Mode::Help => "HELP",
        }
    }
}

/// Key bindings shown by the help screen
pub const KEY_HELP: &[(&str, &str)] = &[
    ("1-6", "select preset"),
    ("+ / -", "pitch up / down one semitone"),
    ("] / [", "formant up / down one semitone"),
    ("0", "reset pitch and formant"),
    ("p", "list presets"),
    ("s", "show statistics"),
    ("?", "toggle help"),
    ("q / Ctrl-C", "quit"),
];

/// Handles keyboard input and converts to commands
#[derive(Debug, Default)]
pub struct InputHandler {
    mode: Mode,
}

impl InputHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Handle a key event and return a command if applicable
    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Command> {
        // Windows reports releases too
        if key.kind == KeyEventKind::Release {
            return None;
        }

        // Ctrl-C quits from any mode
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Some(Command::Quit);
        }

        match self.mode {
            Mode::Normal => self.handle_normal_mode(key),
            Mode::Help => self.handle_help_mode(key),
        }
    }

    fn handle_normal_mode(&mut self, key: KeyEvent) -> Option<Command> {
        match key.code {
            KeyCode::Char(c @ '1'..='9') => Command::preset_for_digit(c),

            // Pitch
            KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Up => {
                Some(Command::AdjustPitch(SEMITONE_STEP))
            }
            KeyCode::Char('-') | KeyCode::Char('_') | KeyCode::Down => {
                Some(Command::AdjustPitch(-SEMITONE_STEP))
            }
            KeyCode::Char('0') => Some(Command::ResetPitch),

            // Formant
            KeyCode::Char(']') | KeyCode::Right => Some(Command::AdjustFormant(SEMITONE_STEP)),
            KeyCode::Char('[') | KeyCode::Left => Some(Command::AdjustFormant(-SEMITONE_STEP)),

            KeyCode::Char('s') => Some(Command::ShowStats),
            KeyCode::Char('p') => Some(Command::ListPresets),
            KeyCode::Char('?') | KeyCode::Char('h') => {
                self.mode = Mode::Help;
                Some(Command::ToggleHelp)
            }
            KeyCode::Char('q') | KeyCode::Esc => Some(Command::Quit),
            _ => None,
        }
    }

    fn handle_help_mode(&mut self, key: KeyEvent) -> Option<Command> {
        match key.code {
            KeyCode::Char('q') => Some(Command::Quit),
            // Any other key closes help
            _ => {
                self.mode = Mode::Normal;
                Some(Command::ToggleHelp)
            }
        }
    }
}
