//! Real audio devices through cpal

use super::{
    AudioBackend, ClosedCallback, InputCallback, InputReblocker, OutputCallback, OutputReblocker,
    StreamConfig, StreamHandle,
};
use crate::error::{DeviceError, StreamDirection, StreamInterrupted};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Backend for the platform's default audio host
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn input_devices(&self) -> Result<Vec<String>, DeviceError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;
        Ok(devices.map(|d| device_name(&d)).collect())
    }

    fn output_devices(&self) -> Result<Vec<String>, DeviceError> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;
        Ok(devices.map(|d| device_name(&d)).collect())
    }

    fn open_input(
        &self,
        config: &StreamConfig,
        mut on_frame: InputCallback,
        on_closed: ClosedCallback,
    ) -> Result<StreamHandle, DeviceError> {
        let host = cpal::default_host();
        let device = match config.device.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => {
                let devices = host
                    .input_devices()
                    .map_err(|e| DeviceError::Backend(e.to_string()))?;
                find_device(devices, name)?
            }
            None => host
                .default_input_device()
                .ok_or_else(|| DeviceError::DeviceNotFound("default input device".into()))?,
        };
        let name = device_name(&device);

        let supported = device
            .supported_input_configs()
            .map_err(map_configs_error)?;
        let stream_config = choose_config(supported, config.sample_rate, &name)?;
        let channels = stream_config.channels as usize;
        let mut reblock = InputReblocker::new(channels, config.frame_size);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // A panicking consumer loses this buffer, never the stream
                    let _ = catch_unwind(AssertUnwindSafe(|| reblock.push(data, &mut on_frame)));
                },
                error_handler(StreamDirection::Input, on_closed),
                None,
            )
            .map_err(|e| map_build_error(e, &name))?;
        stream
            .play()
            .map_err(|e| DeviceError::DeviceBusy(format!("{}: {}", name, e)))?;

        tracing::info!(device = %name, channels, sample_rate = config.sample_rate, "Input stream opened");
        Ok(StreamHandle::new(stream))
    }

    fn open_output(
        &self,
        config: &StreamConfig,
        mut fill_frame: OutputCallback,
        on_closed: ClosedCallback,
    ) -> Result<StreamHandle, DeviceError> {
        let host = cpal::default_host();
        let device = match config.device.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => {
                let devices = host
                    .output_devices()
                    .map_err(|e| DeviceError::Backend(e.to_string()))?;
                find_device(devices, name)?
            }
            None => host
                .default_output_device()
                .ok_or_else(|| DeviceError::DeviceNotFound("default output device".into()))?,
        };
        let name = device_name(&device);

        let supported = device
            .supported_output_configs()
            .map_err(map_configs_error)?;
        let stream_config = choose_config(supported, config.sample_rate, &name)?;
        let channels = stream_config.channels as usize;
        let mut reblock = OutputReblocker::new(channels, config.frame_size);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let result =
                        catch_unwind(AssertUnwindSafe(|| reblock.pull(data, &mut fill_frame)));
                    if result.is_err() {
                        data.fill(0.0);
                    }
                },
                error_handler(StreamDirection::Output, on_closed),
                None,
            )
            .map_err(|e| map_build_error(e, &name))?;
        stream
            .play()
            .map_err(|e| DeviceError::DeviceBusy(format!("{}: {}", name, e)))?;

        tracing::info!(device = %name, channels, sample_rate = config.sample_rate, "Output stream opened");
        Ok(StreamHandle::new(stream))
    }
}

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "unknown".to_string())
}

/// Exact (case-insensitive) name match
fn find_device(
    mut devices: impl Iterator<Item = cpal::Device>,
    name: &str,
) -> Result<cpal::Device, DeviceError> {
    devices
        .find(|d| {
            d.name()
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
        .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))
}

/// Pick an f32 configuration at the requested rate, fewest channels first
fn choose_config(
    supported: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
    sample_rate: u32,
    device: &str,
) -> Result<cpal::StreamConfig, DeviceError> {
    let rate = cpal::SampleRate(sample_rate);
    supported
        .filter(|c| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= rate
                && rate <= c.max_sample_rate()
        })
        .min_by_key(|c| c.channels())
        .map(|c| c.with_sample_rate(rate).config())
        .ok_or_else(|| {
            DeviceError::FormatUnsupported(format!("{}: no f32 stream at {} Hz", device, sample_rate))
        })
}

fn map_configs_error(err: cpal::SupportedStreamConfigsError) -> DeviceError {
    match err {
        cpal::SupportedStreamConfigsError::DeviceNotAvailable => {
            DeviceError::DeviceBusy(err.to_string())
        }
        other => DeviceError::Backend(other.to_string()),
    }
}

fn map_build_error(err: cpal::BuildStreamError, device: &str) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            DeviceError::DeviceBusy(format!("{}: {}", device, err))
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            DeviceError::FormatUnsupported(format!("{}: {}", device, err))
        }
        other => DeviceError::Backend(format!("{}: {}", device, other)),
    }
}

/// Device loss closes the session; other stream errors are only logged
fn error_handler(
    direction: StreamDirection,
    mut on_closed: ClosedCallback,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| match err {
        cpal::StreamError::DeviceNotAvailable => on_closed(StreamInterrupted {
            direction,
            reason: err.to_string(),
        }),
        other => tracing::warn!(%direction, "Audio stream error: {}", other),
    }
}
