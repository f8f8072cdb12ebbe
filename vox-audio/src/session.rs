//! Session - the control surface of the voice pipeline.
//!
//! A running session owns two threads:
//! - `vox-device` opens the input and output streams, keeps them alive and
//!   closes them (platform streams are not `Send`)
//! - `vox-scheduler` runs the [`FrameScheduler`] with the transform engine
//!
//! Parameter changes are published through a [`ParameterCell`] and take
//! effect at the next frame boundary.

use crate::device::{AudioBackend, ClosedCallback, StreamConfig};
use crate::error::{ConfigError, DeviceError, SessionError, StreamInterrupted};
use crate::params::{validate_formant, validate_pitch, TransformParameters, VoicePreset};
use crate::presets::PresetStore;
use crate::ring::FrameRing;
use crate::scheduler::{FrameScheduler, PipelineMonitor, SchedulerReport};
use crate::snapshot::{collector_handle, ParameterCell};
use crate::transform::{FftSize, TransformEngine};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use vox_analysis::Levels;

/// How often the device thread checks for interruption
const DEVICE_POLL: Duration = Duration::from_millis(20);

/// Notification queue depth
const EVENT_CAPACITY: usize = 256;

/// Session configuration (validated by [`SessionConfig::validate`])
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub sample_rate: u32,
    /// Samples per frame
    pub frame_size: usize,
    /// Frames per ring buffer
    pub ring_capacity: usize,
    pub fft_size: FftSize,
    /// Capture device name, `None` for the default
    pub input_device: Option<String>,
    /// Playback device name, `None` for the default
    pub output_device: Option<String>,
    /// Preset applied when the session is created
    pub preset: VoicePreset,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frame_size: 256,
            ring_capacity: 8,
            fft_size: FftSize::Medium,
            input_device: None,
            output_device: None,
            preset: VoicePreset::Normal,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if !(32..=4096).contains(&self.frame_size) {
            return Err(ConfigError::FrameSize(self.frame_size));
        }
        if self.ring_capacity < 2 {
            return Err(ConfigError::RingCapacity(self.ring_capacity));
        }
        Ok(())
    }

    /// Duration of one frame in milliseconds
    pub fn frame_ms(&self) -> f64 {
        self.frame_size as f64 * 1000.0 / self.sample_rate as f64
    }

    fn stream_config(&self, device: &Option<String>) -> StreamConfig {
        StreamConfig {
            sample_rate: self.sample_rate,
            frame_size: self.frame_size,
            device: device.clone(),
        }
    }
}

/// Notifications from a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started,
    /// New parameters were published
    ParametersChanged(TransformParameters),
    /// A device was lost; the session stopped itself
    StreamInterrupted(StreamInterrupted),
    /// Pipeline threads were joined
    Stopped(SchedulerReport),
}

/// Notification queue shared by the control surface and the device thread
#[derive(Clone)]
struct EventQueue {
    tx: Sender<SessionEvent>,
    /// Kept to make room for lifecycle events when nobody drains the queue
    rx: Receiver<SessionEvent>,
}

impl EventQueue {
    fn new() -> Self {
        let (tx, rx) = bounded(EVENT_CAPACITY);
        Self { tx, rx }
    }

    /// Queue an event, dropping it if the queue is full
    fn notify(&self, event: SessionEvent) {
        let _ = self.tx.try_send(event);
    }

    /// Queue an event, evicting the oldest queued events until it fits
    fn deliver(&self, mut event: SessionEvent) {
        loop {
            match self.tx.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(returned)) => {
                    event = returned;
                    let _ = self.rx.try_recv();
                }
            }
        }
    }
}

/// Diagnostics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStats {
    pub running: bool,
    pub frames_processed: u64,
    pub silence_frames: u64,
    pub faults: u64,
    /// Input frames evicted because the scheduler fell behind
    pub input_overruns: u64,
    /// Output frames evicted because playback fell behind
    pub output_overruns: u64,
    /// Output callbacks that found no frame ready
    pub underruns: u64,
    pub input_level: Levels,
    pub output_level: Levels,
    /// Transform delay under the current parameters
    pub latency_samples: usize,
}

/// Threads and buffers of a started session
struct Pipeline {
    monitor: Arc<PipelineMonitor>,
    input: Arc<FrameRing>,
    output: Arc<FrameRing>,
    device_stop: Sender<()>,
    device_thread: JoinHandle<()>,
    scheduler_thread: JoinHandle<SchedulerReport>,
}

/// Voice pipeline control surface. All methods are callable from any
/// non-audio thread.
pub struct Session {
    config: SessionConfig,
    backend: Arc<dyn AudioBackend>,
    presets: PresetStore,
    params: Arc<ParameterCell>,
    /// Serializes read-modify-write parameter updates
    current: Mutex<TransformParameters>,
    events: EventQueue,
    pipeline: Mutex<Option<Pipeline>>,
    last_stats: Mutex<SessionStats>,
}

impl Session {
    /// Create a stopped session
    pub fn new(config: SessionConfig, backend: Arc<dyn AudioBackend>) -> Result<Self, SessionError> {
        config.validate()?;

        let presets = PresetStore::new();
        let initial = presets.parameters(config.preset);
        let params = Arc::new(ParameterCell::new(collector_handle()?, initial));

        Ok(Self {
            config,
            backend,
            presets,
            params,
            current: Mutex::new(initial),
            events: EventQueue::new(),
            pipeline: Mutex::new(None),
            last_stats: Mutex::new(SessionStats::default()),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open the devices and start processing
    pub fn start(&self) -> Result<(), SessionError> {
        let mut pipeline = self.pipeline.lock();
        if let Some(running) = pipeline.as_ref() {
            if !running.monitor.should_stop() {
                return Err(SessionError::AlreadyRunning);
            }
        }
        // Reap a pipeline that stopped itself
        if let Some(stale) = pipeline.take() {
            self.shutdown(stale);
        }

        *pipeline = Some(self.launch()?);
        drop(pipeline);

        self.events.notify(SessionEvent::Started);
        tracing::info!(
            backend = self.backend.name(),
            sample_rate = self.config.sample_rate,
            frame_size = self.config.frame_size,
            frame_ms = self.config.frame_ms(),
            preset = %self.parameters().preset,
            "Session started"
        );
        Ok(())
    }

    fn launch(&self) -> Result<Pipeline, SessionError> {
        let monitor = Arc::new(PipelineMonitor::new());
        let input = Arc::new(FrameRing::new(self.config.ring_capacity, self.config.frame_size));
        let output = Arc::new(FrameRing::new(self.config.ring_capacity, self.config.frame_size));

        let (ready_tx, ready_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded(1);

        let device_thread = {
            let backend = self.backend.clone();
            let input_config = self.config.stream_config(&self.config.input_device);
            let output_config = self.config.stream_config(&self.config.output_device);
            let input = input.clone();
            let output = output.clone();
            let monitor = monitor.clone();
            let events = self.events.clone();
            thread::Builder::new()
                .name("vox-device".to_string())
                .spawn(move || {
                    run_device_thread(
                        backend.as_ref(),
                        &input_config,
                        &output_config,
                        input,
                        output,
                        monitor,
                        events,
                        ready_tx,
                        stop_rx,
                    )
                })
                .map_err(|source| SessionError::ThreadSpawn { name: "vox-device", source })?
        };

        let opened = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(DeviceError::Backend("device thread exited during startup".into())));
        if let Err(e) = opened {
            let _ = device_thread.join();
            tracing::warn!("Failed to open audio devices: {}", e);
            return Err(e.into());
        }

        let engine = TransformEngine::new(self.config.sample_rate, self.config.fft_size, self.params.get());
        let scheduler = FrameScheduler::new(
            engine,
            input.clone(),
            output.clone(),
            self.params.clone(),
            monitor.clone(),
            self.config.sample_rate,
        );
        let scheduler_thread = match thread::Builder::new()
            .name("vox-scheduler".to_string())
            .spawn(move || scheduler.run())
        {
            Ok(handle) => handle,
            Err(source) => {
                let _ = stop_tx.send(());
                let _ = device_thread.join();
                return Err(SessionError::ThreadSpawn { name: "vox-scheduler", source });
            }
        };

        Ok(Pipeline {
            monitor,
            input,
            output,
            device_stop: stop_tx,
            device_thread,
            scheduler_thread,
        })
    }

    /// Close the streams and join the pipeline threads.
    ///
    /// Returns the scheduler report, or `None` if the session was not started.
    pub fn stop(&self) -> Option<SchedulerReport> {
        let pipeline = self.pipeline.lock().take()?;
        Some(self.shutdown(pipeline))
    }

    fn shutdown(&self, pipeline: Pipeline) -> SchedulerReport {
        // Streams first, so no callback touches the rings afterwards
        let _ = pipeline.device_stop.send(());
        if pipeline.device_thread.join().is_err() {
            tracing::warn!("Device thread panicked");
        }

        pipeline.monitor.request_stop();
        let report = match pipeline.scheduler_thread.join() {
            Ok(report) => report,
            Err(_) => {
                tracing::warn!("Scheduler thread panicked");
                SchedulerReport::default()
            }
        };

        let mut stats = self.collect_stats(&pipeline.monitor, &pipeline.input, &pipeline.output);
        stats.running = false;
        *self.last_stats.lock() = stats;

        self.events.deliver(SessionEvent::Stopped(report));
        tracing::info!(
            frames = report.frames_processed,
            silence = report.silence_frames,
            faults = report.faults,
            "Session stopped"
        );
        report
    }

    /// True between `start` and `stop`, unless a device was lost
    pub fn is_running(&self) -> bool {
        self.pipeline
            .lock()
            .as_ref()
            .map_or(false, |p| !p.monitor.should_stop())
    }

    /// Parameters currently published
    pub fn parameters(&self) -> TransformParameters {
        *self.current.lock()
    }

    /// Apply a preset's default parameters
    pub fn set_preset(&self, preset: VoicePreset) -> TransformParameters {
        let params = self.presets.parameters(preset);
        let mut current = self.current.lock();
        *current = params;
        self.publish(params);
        params
    }

    /// Apply a preset by name (case-insensitive)
    pub fn set_preset_name(&self, name: &str) -> Result<TransformParameters, SessionError> {
        let preset: VoicePreset = name.parse()?;
        Ok(self.set_preset(preset))
    }

    /// Set the pitch shift, keeping preset and formant
    pub fn set_pitch(&self, semitones: f32) -> Result<TransformParameters, SessionError> {
        validate_pitch(semitones)?;
        let mut current = self.current.lock();
        current.pitch_semitones = semitones;
        let params = *current;
        self.publish(params);
        Ok(params)
    }

    /// Set the formant shift, keeping preset and pitch
    pub fn set_formant(&self, semitones: f32) -> Result<TransformParameters, SessionError> {
        validate_formant(semitones)?;
        let mut current = self.current.lock();
        current.formant_shift = semitones;
        let params = *current;
        self.publish(params);
        Ok(params)
    }

    /// Set pitch and formant together, published as one snapshot
    pub fn set_shift(&self, pitch: f32, formant: f32) -> Result<TransformParameters, SessionError> {
        validate_pitch(pitch)?;
        validate_formant(formant)?;
        let mut current = self.current.lock();
        current.pitch_semitones = pitch;
        current.formant_shift = formant;
        let params = *current;
        self.publish(params);
        Ok(params)
    }

    fn publish(&self, params: TransformParameters) {
        self.params.store(params);
        self.events.notify(SessionEvent::ParametersChanged(params));
        tracing::debug!(
            pitch = params.pitch_semitones,
            formant = params.formant_shift,
            preset = %params.preset,
            "Parameters published"
        );
    }

    /// Live counters, or the final counters of the last run
    pub fn stats(&self) -> SessionStats {
        match self.pipeline.lock().as_ref() {
            Some(p) => self.collect_stats(&p.monitor, &p.input, &p.output),
            None => *self.last_stats.lock(),
        }
    }

    fn collect_stats(&self, monitor: &PipelineMonitor, input: &FrameRing, output: &FrameRing) -> SessionStats {
        let latency_samples = if self.parameters().is_unshifted() {
            0
        } else {
            self.config.fft_size.as_usize()
        };

        SessionStats {
            running: !monitor.should_stop(),
            frames_processed: monitor.frames_processed(),
            silence_frames: monitor.silence_frames(),
            faults: monitor.faults(),
            input_overruns: input.overruns(),
            output_overruns: output.overruns(),
            underruns: monitor.underruns(),
            input_level: monitor.input_levels(),
            output_level: monitor.output_levels(),
            latency_samples,
        }
    }

    /// Notification receiver (cloned; every clone competes for the same events)
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events.rx.clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens both streams, reports the result, then holds them until stopped
#[allow(clippy::too_many_arguments)]
fn run_device_thread(
    backend: &dyn AudioBackend,
    input_config: &StreamConfig,
    output_config: &StreamConfig,
    input: Arc<FrameRing>,
    output: Arc<FrameRing>,
    monitor: Arc<PipelineMonitor>,
    events: EventQueue,
    ready: Sender<Result<(), DeviceError>>,
    stop: Receiver<()>,
) {
    let input_stream = backend.open_input(
        input_config,
        Box::new(move |frame: &[f32]| {
            // Overflow evicts the oldest frame and is counted by the ring
            input.try_write(frame);
        }),
        interruption_notifier(monitor.clone(), events.clone()),
    );
    let input_stream = match input_stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let underrun_monitor = monitor.clone();
    let output_stream = backend.open_output(
        output_config,
        Box::new(move |frame: &mut [f32]| {
            if !output.try_read(frame) {
                frame.fill(0.0);
                underrun_monitor.record_underrun();
            }
        }),
        interruption_notifier(monitor.clone(), events),
    );
    let output_stream = match output_stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let _ = ready.send(Ok(()));

    loop {
        match stop.recv_timeout(DEVICE_POLL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if monitor.is_interrupted() {
                    tracing::warn!("Audio stream interrupted, stopping session");
                    break;
                }
            }
        }
    }

    drop(output_stream);
    drop(input_stream);
}

/// First stream loss marks the pipeline interrupted and notifies listeners
fn interruption_notifier(monitor: Arc<PipelineMonitor>, events: EventQueue) -> ClosedCallback {
    Box::new(move |interrupted: StreamInterrupted| {
        if monitor.mark_interrupted() {
            events.deliver(SessionEvent::StreamInterrupted(interrupted));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::VirtualBackend;
    use crate::error::ParameterError;

    fn session() -> Session {
        Session::new(SessionConfig::default(), Arc::new(VirtualBackend::new())).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());

        let config = SessionConfig { frame_size: 16, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::FrameSize(16)));

        let config = SessionConfig { ring_capacity: 1, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::RingCapacity(1)));

        let config = SessionConfig { sample_rate: 4000, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::SampleRate(4000)));
    }

    #[test]
    fn test_initial_parameters_follow_configured_preset() {
        let config = SessionConfig { preset: VoicePreset::Female, ..Default::default() };
        let session = Session::new(config, Arc::new(VirtualBackend::new())).unwrap();
        assert_eq!(session.parameters().pitch_semitones, 4.0);
        assert!(!session.is_running());
    }

    #[test]
    fn test_parameter_updates_keep_other_fields() {
        let session = session();
        session.set_preset(VoicePreset::Male);
        let params = session.set_pitch(-6.0).unwrap();
        assert_eq!(params.preset, VoicePreset::Male);
        assert_eq!(params.formant_shift, 2.0);

        let params = session.set_formant(-1.0).unwrap();
        assert_eq!(params.pitch_semitones, -6.0);
        assert_eq!(session.parameters(), params);
    }

    #[test]
    fn test_rejected_parameters_leave_state_unchanged() {
        let session = session();
        let before = session.parameters();

        assert!(matches!(
            session.set_pitch(13.0),
            Err(SessionError::Parameter(ParameterError::PitchOutOfRange(_)))
        ));
        assert!(matches!(
            session.set_formant(f32::INFINITY),
            Err(SessionError::Parameter(ParameterError::FormantOutOfRange(_)))
        ));
        assert!(matches!(
            session.set_preset_name("alien"),
            Err(SessionError::Parameter(ParameterError::UnknownPreset(_)))
        ));
        assert_eq!(session.parameters(), before);
    }

    #[test]
    fn test_events_report_parameter_changes() {
        let session = session();
        let events = session.events();
        let params = session.set_preset_name("robot").unwrap();
        assert_eq!(events.try_recv(), Ok(SessionEvent::ParametersChanged(params)));
    }

    #[test]
    fn test_set_shift_publishes_once() {
        let session = session();
        session.set_preset(VoicePreset::Female);
        let events = session.events();
        while events.try_recv().is_ok() {}

        let params = session.set_shift(0.0, 0.0).unwrap();
        assert_eq!(params.preset, VoicePreset::Female);
        assert!(params.is_unshifted());
        assert_eq!(events.try_iter().collect::<Vec<_>>(), vec![SessionEvent::ParametersChanged(params)]);

        // Either value out of range rejects both
        assert!(matches!(
            session.set_shift(3.0, 20.0),
            Err(SessionError::Parameter(ParameterError::FormantOutOfRange(_)))
        ));
        assert_eq!(session.parameters(), params);
    }

    #[test]
    fn test_lifecycle_events_survive_full_queue() {
        let queue = EventQueue::new();
        for _ in 0..EVENT_CAPACITY + 10 {
            queue.notify(SessionEvent::Started);
        }
        let lost = StreamInterrupted {
            direction: crate::error::StreamDirection::Output,
            reason: "unplugged".into(),
        };
        queue.deliver(SessionEvent::StreamInterrupted(lost.clone()));

        let received: Vec<SessionEvent> = queue.rx.try_iter().collect();
        assert_eq!(received.len(), EVENT_CAPACITY);
        assert_eq!(received.last(), Some(&SessionEvent::StreamInterrupted(lost)));
    }

    #[test]
    fn test_stop_without_start() {
        let session = session();
        assert_eq!(session.stop(), None);
        assert!(!session.stats().running);
    }
}
