//! System audio input via cpal

use std::{
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};

use super::{CaptureBackend, CaptureStream, InputDevice, StereoFeed};
use crate::{Result, ShaderAudioError};

/// Capture backend on top of the default cpal host. Device ids are the
/// device names cpal reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for CpalBackend {
    /// Only checks that a host is compiled in. Device enumeration can block
    /// for a long time on some hosts and runs on the setup thread instead.
    fn is_available(&self) -> bool {
        !cpal::available_hosts().is_empty()
    }

    fn input_devices(&self) -> Result<Vec<InputDevice>> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let devices = host
            .input_devices()
            .map_err(|e| ShaderAudioError::msg(format!("failed to enumerate devices: {e}")))?;

        Ok(devices
            .filter_map(|device| device.name().ok())
            .map(|name| InputDevice {
                is_default: default_name.as_deref() == Some(name.as_str()),
                id: name.clone(),
                label: name,
            })
            .collect())
    }

    fn open_input(&self, device_id: &str, feed: Arc<StereoFeed>) -> Result<Box<dyn CaptureStream>> {
        // cpal::Stream is not Send on every host, so it lives on its own thread
        // for as long as the handle exists.
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let name = device_id.to_string();

        let worker = thread::Builder::new()
            .name(format!("capture:{name}"))
            .spawn(move || match start_stream(&name, feed) {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| ShaderAudioError::msg("capture thread exited before reporting"))??;

        Ok(Box::new(CpalStream {
            sample_rate,
            stop: Some(stop_tx),
            worker: Some(worker),
        }))
    }
}

struct CpalStream {
    sample_rate: u32,
    stop: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn start_stream(name: &str, feed: Arc<StereoFeed>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .input_devices()
        .map_err(|e| ShaderAudioError::msg(format!("failed to enumerate devices: {e}")))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| ShaderAudioError::msg(format!("device '{name}' not found")))?;

    let supported = device
        .default_input_config()
        .map_err(|e| ShaderAudioError::msg(format!("failed to get input config: {e}")))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, feed),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, feed),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, feed),
        other => {
            return Err(ShaderAudioError::msg(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| ShaderAudioError::msg(format!("failed to start stream: {e}")))?;

    Ok((stream, config.sample_rate.0))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    feed: Arc<StereoFeed>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let mut converted = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                converted.clear();
                converted.extend(data.iter().map(|&s| f32::from_sample(s)));
                feed.write_interleaved(&converted, channels);
            },
            |err| tracing::error!(%err, "audio input stream error"),
            None,
        )
        .map_err(|e| ShaderAudioError::msg(format!("failed to build stream: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_follows_compiled_hosts() {
        assert_eq!(CpalBackend::new().is_available(), !cpal::available_hosts().is_empty());
    }
}
