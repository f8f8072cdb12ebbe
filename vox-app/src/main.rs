//! VOX - real-time voice changer
//!
//! Captures the microphone, shifts pitch and formants, and plays the result
//! back live. Keyboard controls select presets and adjust the voice.

mod config;

use std::fmt::Display;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use crossterm::event::{self, Event};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing_subscriber::EnvFilter;

use config::Config;
use vox_audio::{
    AudioBackend, CpalBackend, PresetStore, Session, SessionEvent, SessionStats,
    TransformParameters, VoicePreset, MAX_SHIFT_SEMITONES,
};
use vox_input::{Command, InputHandler, Mode, KEY_HELP};

/// Keyboard poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Real-time voice changer
#[derive(Parser, Debug)]
#[command(name = "vox")]
#[command(version, about, long_about = None)]
struct Cli {
    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Startup preset (normal, male, female, robot, chipmunk, deep)
    #[arg(short, long)]
    preset: Option<VoicePreset>,

    /// Capture device name
    #[arg(long)]
    input_device: Option<String>,

    /// Playback device name
    #[arg(long)]
    output_device: Option<String>,

    /// Write the effective configuration to the config file
    #[arg(long)]
    save_config: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let backend: Arc<dyn AudioBackend> = Arc::new(CpalBackend::new());
    if cli.list_devices {
        return list_devices(backend.as_ref());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => Config::load(),
    };
    if let Some(preset) = cli.preset {
        config.preset = preset;
    }
    if let Some(name) = cli.input_device {
        config.input_device = Some(name);
    }
    if let Some(name) = cli.output_device {
        config.output_device = Some(name);
    }
    if cli.save_config {
        let saved = match &cli.config {
            Some(path) => config.save_to(path),
            None => config.save(),
        };
        saved.context("Failed to write config")?;
        tracing::info!("Configuration saved");
    }

    let session_config = config
        .to_session_config()
        .context("Invalid configuration")?;
    let session = Session::new(session_config, backend).context("Failed to create session")?;
    session.start().context("Failed to open audio devices")?;

    println!("VOX - press ? for help, q to quit");
    print_parameters(&session.parameters());

    enable_raw_mode()?;
    let result = run_app(&session);
    disable_raw_mode()?;

    if let Some(report) = session.stop() {
        println!(
            "Processed {} frames ({} silent, {} faults)",
            report.frames_processed, report.silence_frames, report.faults
        );
    }

    result
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vox=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn list_devices(backend: &dyn AudioBackend) -> anyhow::Result<()> {
    println!("Input devices:");
    for name in backend.input_devices().context("Failed to list input devices")? {
        println!("  {}", name);
    }
    println!("Output devices:");
    for name in backend.output_devices().context("Failed to list output devices")? {
        println!("  {}", name);
    }
    Ok(())
}

/// Main event loop: keyboard commands and session notifications
fn run_app(session: &Session) -> anyhow::Result<()> {
    let events = session.events();
    let mut input = InputHandler::new();

    loop {
        for notification in events.try_iter() {
            if let SessionEvent::StreamInterrupted(e) = notification {
                line(format!("Audio device lost: {}", e));
                return Err(anyhow!(e).context("Session stopped"));
            }
        }

        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            let Some(command) = input.handle_key(key) else {
                continue;
            };
            if command == Command::Quit {
                return Ok(());
            }
            apply_command(session, command, input.mode());
        }
    }
}

fn apply_command(session: &Session, command: Command, mode: Mode) {
    let current = session.parameters();
    let result = match command {
        Command::SelectPreset(preset) => Ok(session.set_preset(preset)),
        Command::AdjustPitch(delta) => session.set_pitch(step(current.pitch_semitones, delta)),
        Command::AdjustFormant(delta) => session.set_formant(step(current.formant_shift, delta)),
        Command::ResetPitch => session.set_shift(0.0, 0.0),
        Command::ShowStats => {
            print_stats(&session.stats());
            return;
        }
        Command::ListPresets => {
            for def in PresetStore::new().all() {
                line(format!(
                    "  {:<9} pitch {:+} st, formant {:+} st{}",
                    def.preset.display_name(),
                    def.pitch_semitones,
                    def.formant_shift,
                    def.preset
                        .ring_modulation_hz()
                        .map(|hz| format!(", ring mod {} Hz", hz))
                        .unwrap_or_default()
                ));
            }
            return;
        }
        Command::ToggleHelp => {
            line(format!("-- {} --", mode.display_name()));
            if mode == Mode::Help {
                for (keys, action) in KEY_HELP {
                    line(format!("  {:<12} {}", keys, action));
                }
            }
            return;
        }
        Command::Quit => return,
    };

    match result {
        Ok(params) => print_parameters(&params),
        Err(e) => line(format!("Rejected: {}", e)),
    }
}

/// Move by `delta` semitones, stopping at the range limits
fn step(value: f32, delta: f32) -> f32 {
    (value + delta).clamp(-MAX_SHIFT_SEMITONES, MAX_SHIFT_SEMITONES)
}

fn print_parameters(params: &TransformParameters) {
    line(format!(
        "Preset {} | pitch {:+.0} st | formant {:+.0} st",
        params.preset, params.pitch_semitones, params.formant_shift
    ));
}

fn print_stats(stats: &SessionStats) {
    line(format!(
        "frames {} | silence {} | faults {} | overruns in/out {}/{} | underruns {}",
        stats.frames_processed,
        stats.silence_frames,
        stats.faults,
        stats.input_overruns,
        stats.output_overruns,
        stats.underruns
    ));
    line(format!(
        "level in {:.1} dB | out {:.1} dB | latency {} samples",
        stats.input_level.peak_db(),
        stats.output_level.peak_db(),
        stats.latency_samples
    ));
}

/// Print one line in raw terminal mode
fn line(text: impl Display) {
    let mut stdout = io::stdout();
    let _ = write!(stdout, "{}\r\n", text);
    let _ = stdout.flush();
}
