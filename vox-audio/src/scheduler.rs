//! Frame scheduler - moves frames from the input ring through the transform
//! to the output ring on the processing thread.

use crate::params::TransformParameters;
use crate::ring::FrameRing;
use crate::snapshot::ParameterCell;
use crate::transform::TransformEngine;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use vox_analysis::{LevelMeter, Levels};

/// Level meter release per frame
const METER_RELEASE: f32 = 0.9;

/// Polls per frame duration while waiting for input
const POLLS_PER_FRAME: u32 = 8;

/// Per-frame transform run by the scheduler
pub trait FrameProcessor: Send {
    /// Transform `input` into `output` (same length)
    fn process(&mut self, input: &[f32], output: &mut [f32], params: &TransformParameters);

    /// Drop carried state after a fault
    fn reset(&mut self);
}

impl FrameProcessor for TransformEngine {
    fn process(&mut self, input: &[f32], output: &mut [f32], params: &TransformParameters) {
        TransformEngine::process(self, input, output, params);
    }

    fn reset(&mut self) {
        TransformEngine::reset(self);
    }
}

/// Counters and levels shared between the pipeline threads and the control surface
#[derive(Debug, Default)]
pub struct PipelineMonitor {
    /// Set by `stop()`
    stop: AtomicBool,
    /// Set when a stream reports device loss
    interrupted: AtomicBool,
    frames_processed: AtomicU64,
    silence_frames: AtomicU64,
    faults: AtomicU64,
    underruns: AtomicU64,
    input_peak: AtomicU32,
    input_rms: AtomicU32,
    output_peak: AtomicU32,
    output_rms: AtomicU32,
}

impl PipelineMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Returns true for the first report only
    pub fn mark_interrupted(&self) -> bool {
        !self.interrupted.swap(true, Ordering::AcqRel)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// True once the pipeline should wind down for any reason
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.is_interrupted()
    }

    /// Output callback found the ring empty
    #[inline]
    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn silence_frames(&self) -> u64 {
        self.silence_frames.load(Ordering::Relaxed)
    }

    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn input_levels(&self) -> Levels {
        Levels {
            peak: f32::from_bits(self.input_peak.load(Ordering::Relaxed)),
            rms: f32::from_bits(self.input_rms.load(Ordering::Relaxed)),
        }
    }

    pub fn output_levels(&self) -> Levels {
        Levels {
            peak: f32::from_bits(self.output_peak.load(Ordering::Relaxed)),
            rms: f32::from_bits(self.output_rms.load(Ordering::Relaxed)),
        }
    }

    fn publish_levels(&self, input: Levels, output: Levels) {
        self.input_peak.store(input.peak.to_bits(), Ordering::Relaxed);
        self.input_rms.store(input.rms.to_bits(), Ordering::Relaxed);
        self.output_peak.store(output.peak.to_bits(), Ordering::Relaxed);
        self.output_rms.store(output.rms.to_bits(), Ordering::Relaxed);
    }
}

/// Summary returned when the scheduler thread exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    pub frames_processed: u64,
    pub silence_frames: u64,
    pub faults: u64,
}

/// Outcome of one scheduling step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// An input frame was transformed
    Processed,
    /// No input within one frame duration; silence was emitted
    Silence,
    /// Stop or interruption was signalled
    Stopped,
}

/// Owns the processor and drives it one frame at a time
pub struct FrameScheduler<P: FrameProcessor = TransformEngine> {
    processor: P,
    input: Arc<FrameRing>,
    output: Arc<FrameRing>,
    params: Arc<ParameterCell>,
    monitor: Arc<PipelineMonitor>,
    frame_duration: Duration,
    poll_interval: Duration,
    // Pre-allocated frame buffers
    in_frame: Vec<f32>,
    out_frame: Vec<f32>,
    input_meter: LevelMeter,
    output_meter: LevelMeter,
}

impl<P: FrameProcessor> FrameScheduler<P> {
    pub fn new(
        processor: P,
        input: Arc<FrameRing>,
        output: Arc<FrameRing>,
        params: Arc<ParameterCell>,
        monitor: Arc<PipelineMonitor>,
        sample_rate: u32,
    ) -> Self {
        let frame_len = input.frame_len();
        let frame_duration =
            Duration::from_secs_f64(frame_len as f64 / sample_rate.max(1) as f64);

        Self {
            processor,
            input,
            output,
            params,
            monitor,
            frame_duration,
            poll_interval: (frame_duration / POLLS_PER_FRAME).max(Duration::from_micros(100)),
            in_frame: vec![0.0; frame_len],
            out_frame: vec![0.0; frame_len],
            input_meter: LevelMeter::new(METER_RELEASE),
            output_meter: LevelMeter::new(METER_RELEASE),
        }
    }

    /// Bounded wait for the next input frame
    fn wait_for_input(&mut self) -> bool {
        let deadline = Instant::now() + self.frame_duration;
        loop {
            if self.input.try_read(&mut self.in_frame) {
                return true;
            }
            if self.monitor.should_stop() || Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Process at most one frame
    pub fn tick(&mut self) -> Tick {
        if self.monitor.should_stop() {
            return Tick::Stopped;
        }

        if !self.wait_for_input() {
            if self.monitor.should_stop() {
                return Tick::Stopped;
            }
            // Keep the output cadence
            self.out_frame.fill(0.0);
            self.output.try_write(&self.out_frame);
            self.monitor.silence_frames.fetch_add(1, Ordering::Relaxed);
            let input = self.input_meter.process(&[]);
            let output = self.output_meter.process(&self.out_frame);
            self.monitor.publish_levels(input, output);
            return Tick::Silence;
        }

        let params = self.params.load();
        let processor = &mut self.processor;
        let in_frame = &self.in_frame;
        let out_frame = &mut self.out_frame;
        let result = catch_unwind(AssertUnwindSafe(|| {
            processor.process(in_frame, out_frame, &params);
        }));

        if result.is_err() {
            self.out_frame.fill(0.0);
            self.processor.reset();
            self.monitor.faults.fetch_add(1, Ordering::Relaxed);
        }

        self.output.try_write(&self.out_frame);
        self.monitor.frames_processed.fetch_add(1, Ordering::Relaxed);

        let input = self.input_meter.process(&self.in_frame);
        let output = self.output_meter.process(&self.out_frame);
        self.monitor.publish_levels(input, output);

        Tick::Processed
    }

    /// Run until stopped; returns what happened
    pub fn run(mut self) -> SchedulerReport {
        tracing::debug!(frame_ms = self.frame_duration.as_secs_f64() * 1000.0, "Scheduler started");

        let mut report = SchedulerReport::default();
        loop {
            match self.tick() {
                Tick::Processed => report.frames_processed += 1,
                Tick::Silence => report.silence_frames += 1,
                Tick::Stopped => break,
            }
        }

        report.faults = self.monitor.faults();
        if report.faults > 0 {
            tracing::warn!(faults = report.faults, "Transform faults were replaced with silence");
        }
        tracing::debug!(
            frames = report.frames_processed,
            silence = report.silence_frames,
            overruns = self.input.overruns(),
            underruns = self.monitor.underruns(),
            "Scheduler stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::collector_handle;

    struct Doubler;

    impl FrameProcessor for Doubler {
        fn process(&mut self, input: &[f32], output: &mut [f32], _params: &TransformParameters) {
            for (o, i) in output.iter_mut().zip(input) {
                *o = i * 2.0;
            }
        }

        fn reset(&mut self) {}
    }

    /// Panics on frames whose first sample is negative
    struct Fragile {
        resets: usize,
    }

    impl FrameProcessor for Fragile {
        fn process(&mut self, input: &[f32], output: &mut [f32], _params: &TransformParameters) {
            assert!(input[0] >= 0.0, "negative frame");
            output.copy_from_slice(input);
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    type Fixture<P> = (FrameScheduler<P>, Arc<FrameRing>, Arc<FrameRing>, Arc<PipelineMonitor>);

    fn scheduler<P: FrameProcessor>(processor: P, frame_len: usize) -> Fixture<P> {
        let input = Arc::new(FrameRing::new(8, frame_len));
        let output = Arc::new(FrameRing::new(8, frame_len));
        let params = Arc::new(ParameterCell::new(
            collector_handle().unwrap(),
            TransformParameters::default(),
        ));
        let monitor = Arc::new(PipelineMonitor::new());
        let scheduler = FrameScheduler::new(
            processor,
            input.clone(),
            output.clone(),
            params,
            monitor.clone(),
            48000,
        );
        (scheduler, input, output, monitor)
    }

    #[test]
    fn test_frames_leave_in_capture_order() {
        let (mut sched, input, output, monitor) = scheduler(Doubler, 4);
        for i in 1..=3 {
            input.try_write(&[i as f32; 4]);
        }
        for _ in 0..3 {
            assert_eq!(sched.tick(), Tick::Processed);
        }

        let mut frame = [0.0; 4];
        for i in 1..=3 {
            assert!(output.try_read(&mut frame));
            assert_eq!(frame, [i as f32 * 2.0; 4]);
        }
        assert_eq!(monitor.frames_processed(), 3);
        assert_eq!(monitor.output_levels().peak, 1.0);
    }

    #[test]
    fn test_timeout_emits_silence() {
        let (mut sched, _input, output, monitor) = scheduler(Doubler, 48);
        // 48 samples at 48 kHz: 1 ms wait
        assert_eq!(sched.tick(), Tick::Silence);

        let mut frame = [1.0; 48];
        assert!(output.try_read(&mut frame));
        assert!(frame.iter().all(|&s| s == 0.0));
        assert_eq!(monitor.silence_frames(), 1);
    }

    #[test]
    fn test_fault_becomes_silence_and_resets() {
        let (mut sched, input, output, monitor) = scheduler(Fragile { resets: 0 }, 2);
        input.try_write(&[-1.0, 1.0]);
        input.try_write(&[0.5, 0.5]);

        assert_eq!(sched.tick(), Tick::Processed);
        assert_eq!(sched.tick(), Tick::Processed);

        let mut frame = [9.0; 2];
        assert!(output.try_read(&mut frame));
        assert_eq!(frame, [0.0, 0.0]);
        assert!(output.try_read(&mut frame));
        assert_eq!(frame, [0.5, 0.5]);

        assert_eq!(monitor.faults(), 1);
        assert_eq!(sched.processor.resets, 1);
    }

    #[test]
    fn test_run_exits_on_interruption() {
        let (sched, input, _output, monitor) = scheduler(Doubler, 4);
        input.try_write(&[0.1; 4]);
        let handle = thread::spawn(move || sched.run());

        while monitor.frames_processed() == 0 {
            thread::yield_now();
        }
        monitor.mark_interrupted();

        let report = handle.join().unwrap();
        assert_eq!(report.frames_processed, 1);
        assert_eq!(report.faults, 0);
    }
}
