//! System audio devices via CPAL.
//!
//! CPAL streams are not `Send`, so each stream is built and kept alive on a
//! dedicated thread. The thread exits (dropping the stream) when its stop
//! channel is signalled or disconnected.

use std::sync::mpsc as std_mpsc;
use std::thread;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::base::{AudioError, AudioResult, PLAYBACK_SAMPLE_RATE};
use super::capture::{CaptureConstraints, MicrophoneSource, MicrophoneStream};
use super::pcm::append_downmixed;
use super::playback::{AudioStreamer, OutputContext};

/// Frames buffered between the device callback and the capture loop.
const CAPTURE_CHANNEL_CAPACITY: usize = 64;

/// List input device names.
pub fn list_input_devices() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::DeviceUnavailable(format!("no input devices available: {e}")))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// List output device names.
pub fn list_output_devices() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceUnavailable(format!("no output devices available: {e}")))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

fn find_input_device(preferred: Option<&str>) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceUnavailable(format!("input device '{name}' not found"))),
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no default input device".to_string())),
    }
}

fn find_output_device(preferred: Option<&str>) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceUnavailable(format!("output device '{name}' not found"))),
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".to_string())),
    }
}

// =============================================================================
// Microphone
// =============================================================================

/// Microphone backed by a CPAL input device.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    /// Use `device_name`, or the host default when `None`.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl MicrophoneSource for CpalMicrophone {
    async fn open(&self, constraints: &CaptureConstraints) -> AudioResult<MicrophoneStream> {
        if constraints.echo_cancellation || constraints.noise_suppression {
            debug!("Echo cancellation and noise suppression are left to the audio host");
        }

        let (frames_tx, frames_rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_input_stream(device_name, frames_tx, ready_tx, stop_rx))
            .map_err(|e| AudioError::DeviceUnavailable(format!("failed to spawn capture thread: {e}")))?;

        let sample_rate = ready_rx
            .await
            .map_err(|_| AudioError::DeviceUnavailable("capture thread exited".to_string()))??;

        Ok(MicrophoneStream::new(sample_rate, frames_rx).with_release(move || {
            let _ = stop_tx.send(());
        }))
    }
}

fn run_input_stream(
    device_name: Option<String>,
    frames: mpsc::Sender<Vec<f32>>,
    ready: oneshot::Sender<AudioResult<u32>>,
    stop: std_mpsc::Receiver<()>,
) {
    let opened = (|| -> AudioResult<(cpal::Stream, u32)> {
        let device = find_input_device(device_name.as_deref())?;
        let default_config = device
            .default_input_config()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
        let format = default_config.sample_format();
        let config: StreamConfig = default_config.into();
        let sample_rate = config.sample_rate.0;
        let channels = usize::from(config.channels.max(1));

        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            ?format,
            sample_rate,
            channels,
            "Opening input device"
        );

        let err_fn = |err| warn!("audio input stream error: {err}");

        // Convert every supported sample type to mono f32 up front.
        let stream = match format {
            SampleFormat::F32 => {
                let frames = frames.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        let mut buf = Vec::with_capacity(data.len() / channels);
                        append_downmixed(&mut buf, data, channels, |s| s);
                        let _ = frames.try_send(buf);
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::I16 => {
                let frames = frames.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _| {
                        let mut buf = Vec::with_capacity(data.len() / channels);
                        append_downmixed(&mut buf, data, channels, |s| s as f32 / 32_768.0);
                        let _ = frames.try_send(buf);
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::U16 => {
                let frames = frames.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _| {
                        let mut buf = Vec::with_capacity(data.len() / channels);
                        append_downmixed(&mut buf, data, channels, |s| {
                            (s as f32 - 32_768.0) / 32_768.0
                        });
                        let _ = frames.try_send(buf);
                    },
                    err_fn,
                    None,
                )
            }
            other => {
                return Err(AudioError::DeviceUnavailable(format!(
                    "unsupported sample format: {other:?}"
                )));
            }
        }
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
        Ok((stream, sample_rate))
    })();

    match opened {
        Ok((stream, sample_rate)) => {
            if ready.send(Ok(sample_rate)).is_err() {
                return;
            }
            // Blocks until released or the stream handle is dropped.
            let _ = stop.recv();
            drop(stream);
            debug!("Input device released");
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

// =============================================================================
// Speaker
// =============================================================================

/// Speaker output pulling from an [`AudioStreamer`].
pub struct SpeakerOutput {
    streamer: AudioStreamer,
    stop: std_mpsc::Sender<()>,
}

impl SpeakerOutput {
    /// Open the output device and start pulling from a new streamer for
    /// audio declared at `input_sample_rate`.
    pub fn open(device_name: Option<&str>, input_sample_rate: u32) -> AudioResult<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = device_name.map(str::to_string);

        thread::Builder::new()
            .name("speaker-output".to_string())
            .spawn(move || run_output_stream(device_name, input_sample_rate, ready_tx, stop_rx))
            .map_err(|e| AudioError::DeviceUnavailable(format!("failed to spawn output thread: {e}")))?;

        let streamer = ready_rx
            .recv()
            .map_err(|_| AudioError::DeviceUnavailable("output thread exited".to_string()))??;

        Ok(Self {
            streamer,
            stop: stop_tx,
        })
    }

    /// Open with the default declared model audio rate.
    pub fn open_default(device_name: Option<&str>) -> AudioResult<Self> {
        Self::open(device_name, PLAYBACK_SAMPLE_RATE)
    }

    pub fn streamer(&self) -> &AudioStreamer {
        &self.streamer
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.streamer.context().close();
        let _ = self.stop.send(());
    }
}

fn run_output_stream(
    device_name: Option<String>,
    input_sample_rate: u32,
    ready: std_mpsc::Sender<AudioResult<AudioStreamer>>,
    stop: std_mpsc::Receiver<()>,
) {
    let opened = (|| -> AudioResult<(cpal::Stream, AudioStreamer)> {
        let device = find_output_device(device_name.as_deref())?;
        let default_config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
        let format = default_config.sample_format();
        let config: StreamConfig = default_config.into();
        let channels = usize::from(config.channels.max(1));

        let context = OutputContext::new(config.sample_rate.0);
        let streamer = AudioStreamer::new(context, input_sample_rate);

        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            ?format,
            sample_rate = config.sample_rate.0,
            channels,
            "Opening output device"
        );

        let err_fn = |err| warn!("audio output stream error: {err}");

        let stream = match format {
            SampleFormat::F32 => {
                let streamer = streamer.clone();
                let mut mono = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _| {
                        fill_interleaved(&streamer, &mut mono, data, channels, |s| s)
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::I16 => {
                let streamer = streamer.clone();
                let mut mono = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _| {
                        fill_interleaved(&streamer, &mut mono, data, channels, |s| {
                            (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                        })
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::U16 => {
                let streamer = streamer.clone();
                let mut mono = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [u16], _| {
                        fill_interleaved(&streamer, &mut mono, data, channels, |s| {
                            ((s.clamp(-1.0, 1.0) + 1.0) * 32_767.5) as u16
                        })
                    },
                    err_fn,
                    None,
                )
            }
            other => {
                return Err(AudioError::DeviceUnavailable(format!(
                    "unsupported sample format: {other:?}"
                )));
            }
        }
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
        Ok((stream, streamer))
    })();

    match opened {
        Ok((stream, streamer)) => {
            if ready.send(Ok(streamer)).is_err() {
                return;
            }
            let _ = stop.recv();
            drop(stream);
            debug!("Output device released");
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

/// Render mono audio and duplicate it across `channels`.
fn fill_interleaved<T, F>(
    streamer: &AudioStreamer,
    mono: &mut Vec<f32>,
    data: &mut [T],
    channels: usize,
    convert: F,
) where
    T: Copy,
    F: Fn(f32) -> T,
{
    let frames = data.len() / channels;
    mono.resize(frames, 0.0);
    streamer.render(mono);
    for (frame, sample) in data.chunks_exact_mut(channels).zip(mono.iter()) {
        frame.fill(convert(*sample));
    }
}
