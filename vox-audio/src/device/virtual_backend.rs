//! In-memory device pair.
//!
//! The caller plays the role of the hardware: [`VirtualBackend::push_input`]
//! delivers captured samples and [`VirtualBackend::pull_output`] requests
//! playback samples, each on the calling thread just like a device callback.
//! Used by tests and for offline rendering.

use super::{
    AudioBackend, ClosedCallback, InputCallback, InputReblocker, OutputCallback, OutputReblocker,
    StreamConfig, StreamHandle,
};
use crate::error::{DeviceError, StreamDirection, StreamInterrupted};
use parking_lot::Mutex;
use std::sync::Arc;

pub const VIRTUAL_INPUT: &str = "Virtual Input";
pub const VIRTUAL_OUTPUT: &str = "Virtual Output";

struct InputSide {
    on_frame: InputCallback,
    on_closed: ClosedCallback,
    reblock: InputReblocker,
}

struct OutputSide {
    fill_frame: OutputCallback,
    on_closed: ClosedCallback,
    reblock: OutputReblocker,
}

struct Shared {
    input_channels: usize,
    output_channels: usize,
    busy: Mutex<bool>,
    input: Mutex<Option<InputSide>>,
    output: Mutex<Option<OutputSide>>,
}

/// Virtual capture/playback device pair
#[derive(Clone)]
pub struct VirtualBackend {
    shared: Arc<Shared>,
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualBackend {
    /// Mono input and mono output
    pub fn new() -> Self {
        Self::with_channels(1, 1)
    }

    /// Device pair with interleaved multi-channel buffers
    pub fn with_channels(input_channels: usize, output_channels: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                input_channels: input_channels.max(1),
                output_channels: output_channels.max(1),
                busy: Mutex::new(false),
                input: Mutex::new(None),
                output: Mutex::new(None),
            }),
        }
    }

    /// Make subsequent opens fail as if another application held the devices
    pub fn set_busy(&self, busy: bool) {
        *self.shared.busy.lock() = busy;
    }

    pub fn input_open(&self) -> bool {
        self.shared.input.lock().is_some()
    }

    pub fn output_open(&self) -> bool {
        self.shared.output.lock().is_some()
    }

    /// Deliver interleaved captured samples. Returns false when no input stream is open.
    pub fn push_input(&self, samples: &[f32]) -> bool {
        let mut guard = self.shared.input.lock();
        match guard.as_mut() {
            Some(side) => {
                let on_frame = &mut side.on_frame;
                side.reblock.push(samples, |frame| on_frame(frame));
                true
            }
            None => false,
        }
    }

    /// Request `frames` interleaved playback frames. Silence when no output stream is open.
    pub fn pull_output(&self, frames: usize) -> Vec<f32> {
        let mut data = vec![0.0; frames * self.shared.output_channels];
        let mut guard = self.shared.output.lock();
        if let Some(side) = guard.as_mut() {
            let fill_frame = &mut side.fill_frame;
            side.reblock.pull(&mut data, |frame| fill_frame(frame));
        }
        data
    }

    /// Simulate the device vanishing: the stream stops and reports interruption
    pub fn disconnect(&self, direction: StreamDirection) {
        let reason = "virtual device disconnected".to_string();
        // Callbacks run outside the lock
        match direction {
            StreamDirection::Input => {
                let side = self.shared.input.lock().take();
                if let Some(mut side) = side {
                    (side.on_closed)(StreamInterrupted { direction, reason });
                }
            }
            StreamDirection::Output => {
                let side = self.shared.output.lock().take();
                if let Some(mut side) = side {
                    (side.on_closed)(StreamInterrupted { direction, reason });
                }
            }
        }
    }

    fn check_open(&self, config: &StreamConfig, expected: &str) -> Result<(), DeviceError> {
        if let Some(name) = config.device.as_deref() {
            if !name.eq_ignore_ascii_case(expected) {
                return Err(DeviceError::DeviceNotFound(name.to_string()));
            }
        }
        if *self.shared.busy.lock() {
            return Err(DeviceError::DeviceBusy(expected.to_string()));
        }
        if config.frame_size == 0 {
            return Err(DeviceError::FormatUnsupported("zero frame size".into()));
        }
        Ok(())
    }
}

/// Closes its side of the virtual pair when dropped
struct VirtualStream {
    shared: Arc<Shared>,
    direction: StreamDirection,
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        match self.direction {
            StreamDirection::Input => drop(self.shared.input.lock().take()),
            StreamDirection::Output => drop(self.shared.output.lock().take()),
        }
    }
}

impl AudioBackend for VirtualBackend {
    fn name(&self) -> &str {
        "virtual"
    }

    fn input_devices(&self) -> Result<Vec<String>, DeviceError> {
        Ok(vec![VIRTUAL_INPUT.to_string()])
    }

    fn output_devices(&self) -> Result<Vec<String>, DeviceError> {
        Ok(vec![VIRTUAL_OUTPUT.to_string()])
    }

    fn open_input(
        &self,
        config: &StreamConfig,
        on_frame: InputCallback,
        on_closed: ClosedCallback,
    ) -> Result<StreamHandle, DeviceError> {
        self.check_open(config, VIRTUAL_INPUT)?;
        let mut slot = self.shared.input.lock();
        if slot.is_some() {
            return Err(DeviceError::DeviceBusy(VIRTUAL_INPUT.to_string()));
        }
        *slot = Some(InputSide {
            on_frame,
            on_closed,
            reblock: InputReblocker::new(self.shared.input_channels, config.frame_size),
        });

        Ok(StreamHandle::new(VirtualStream {
            shared: self.shared.clone(),
            direction: StreamDirection::Input,
        }))
    }

    fn open_output(
        &self,
        config: &StreamConfig,
        fill_frame: OutputCallback,
        on_closed: ClosedCallback,
    ) -> Result<StreamHandle, DeviceError> {
        self.check_open(config, VIRTUAL_OUTPUT)?;
        let mut slot = self.shared.output.lock();
        if slot.is_some() {
            return Err(DeviceError::DeviceBusy(VIRTUAL_OUTPUT.to_string()));
        }
        *slot = Some(OutputSide {
            fill_frame,
            on_closed,
            reblock: OutputReblocker::new(self.shared.output_channels, config.frame_size),
        });

        Ok(StreamHandle::new(VirtualStream {
            shared: self.shared.clone(),
            direction: StreamDirection::Output,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(device: Option<&str>) -> StreamConfig {
        StreamConfig {
            sample_rate: 48000,
            frame_size: 4,
            device: device.map(String::from),
        }
    }

    #[test]
    fn test_input_frames_reach_callback() {
        let backend = VirtualBackend::new();
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = frames.clone();

        let handle = backend
            .open_input(
                &config(None),
                Box::new(move |frame: &[f32]| {
                    assert_eq!(frame.len(), 4);
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                Box::new(|_| {}),
            )
            .unwrap();

        assert!(backend.push_input(&[0.1; 10]));
        assert_eq!(frames.load(Ordering::SeqCst), 2);

        drop(handle);
        assert!(!backend.input_open());
        assert!(!backend.push_input(&[0.1; 4]));
    }

    #[test]
    fn test_open_errors() {
        let backend = VirtualBackend::new();
        let err = backend
            .open_output(&config(Some("Speakers")), Box::new(|_: &mut [f32]| {}), Box::new(|_| {}))
            .err();
        assert_eq!(err, Some(DeviceError::DeviceNotFound("Speakers".into())));

        backend.set_busy(true);
        let err = backend
            .open_input(&config(None), Box::new(|_: &[f32]| {}), Box::new(|_| {}))
            .err();
        assert!(matches!(err, Some(DeviceError::DeviceBusy(_))));
    }

    #[test]
    fn test_disconnect_reports_interruption() {
        let backend = VirtualBackend::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();

        let _handle = backend
            .open_output(
                &config(Some("virtual output")),
                Box::new(|frame: &mut [f32]| frame.fill(0.5)),
                Box::new(move |e| *sink.lock() = Some(e)),
            )
            .unwrap();
        assert_eq!(backend.pull_output(2), vec![0.5, 0.5]);

        backend.disconnect(StreamDirection::Output);
        let event = seen.lock().take().unwrap();
        assert_eq!(event.direction, StreamDirection::Output);
        assert!(!backend.output_open());
        assert_eq!(backend.pull_output(2), vec![0.0, 0.0]);
    }
}
