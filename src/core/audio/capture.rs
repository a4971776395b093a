//! Microphone capture.
//!
//! [`AudioRecorder`] pulls mono f32 frames from a [`MicrophoneSource`],
//! converts them to 16 kHz PCM16 and publishes two independent streams of
//! notifications:
//!
//! - `data`: base64 PCM16 of everything captured in the last 100 ms
//! - `volume`: RMS level of the samples seen in the last 50 ms

use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::*;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::base::{AudioError, AudioResult, CAPTURE_SAMPLE_RATE, DATA_INTERVAL, VOLUME_INTERVAL};
use super::pcm::{clamp_unit, encode_pcm16_le};
use super::resample::LinearResampler;
use crate::core::events::{EventHub, Notification, Subscription};

// =============================================================================
// Microphone Source
// =============================================================================

/// Requested capture properties.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// An open microphone. Dropping it releases the device.
pub struct MicrophoneStream {
    /// Rate of the frames on `samples` (may differ from the requested rate)
    pub sample_rate: u32,
    /// Mono f32 frames
    pub samples: mpsc::Receiver<Vec<f32>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl MicrophoneStream {
    pub fn new(sample_rate: u32, samples: mpsc::Receiver<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            samples,
            release: None,
        }
    }

    /// Run `release` when the stream is dropped.
    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for MicrophoneStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrophoneStream")
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Something that can open a microphone.
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    /// Open the device. Permission or availability failures map to
    /// [`AudioError::DeviceUnavailable`].
    async fn open(&self, constraints: &CaptureConstraints) -> AudioResult<MicrophoneStream>;
}

// =============================================================================
// Recorder Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecorderEventKind {
    Data,
    Volume,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// Base64 PCM16 LE, mono, 16 kHz
    Data(String),
    /// RMS level in [0, 1]
    Volume(f32),
}

impl Notification for RecorderEvent {
    type Kind = RecorderEventKind;

    fn kind(&self) -> RecorderEventKind {
        match self {
            RecorderEvent::Data(_) => RecorderEventKind::Data,
            RecorderEvent::Volume(_) => RecorderEventKind::Volume,
        }
    }
}

// =============================================================================
// Audio Recorder
// =============================================================================

struct ActiveCapture {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Microphone recorder publishing PCM16 chunks and input levels.
pub struct AudioRecorder {
    source: Arc<dyn MicrophoneSource>,
    constraints: CaptureConstraints,
    hub: Arc<EventHub<RecorderEvent>>,
    active: Mutex<Option<ActiveCapture>>,
}

impl AudioRecorder {
    pub fn new(source: Arc<dyn MicrophoneSource>) -> Self {
        Self::with_constraints(source, CaptureConstraints::default())
    }

    pub fn with_constraints(source: Arc<dyn MicrophoneSource>, constraints: CaptureConstraints) -> Self {
        Self {
            source,
            constraints,
            hub: Arc::new(EventHub::new()),
            active: Mutex::new(None),
        }
    }

    pub fn on<F>(&self, kind: RecorderEventKind, callback: F) -> Subscription
    where
        F: Fn(&RecorderEvent) + Send + Sync + 'static,
    {
        self.hub.subscribe(kind, callback)
    }

    /// Whether a capture loop is running.
    pub fn is_recording(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    /// Open the microphone and start publishing. Restarts if already active.
    pub async fn start(&self) -> AudioResult<()> {
        self.stop();

        let stream = self.source.open(&self.constraints).await.map_err(|e| match e {
            AudioError::DeviceUnavailable(_) => e,
            other => AudioError::DeviceUnavailable(other.to_string()),
        })?;

        info!(device_rate = stream.sample_rate, target_rate = self.constraints.sample_rate, "Microphone capture started");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(capture_loop(
            stream,
            self.constraints.sample_rate,
            self.hub.clone(),
            cancel.clone(),
        ));

        let previous = self.active.lock().replace(ActiveCapture { cancel, task });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        Ok(())
    }

    /// Stop publishing and release the microphone. Idempotent.
    pub fn stop(&self) {
        if let Some(active) = self.active.lock().take() {
            active.cancel.cancel();
            debug!("Microphone capture stopped");
        }
    }
}

impl Drop for AudioRecorder {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

async fn capture_loop(
    mut stream: MicrophoneStream,
    target_rate: u32,
    hub: Arc<EventHub<RecorderEvent>>,
    cancel: CancellationToken,
) {
    let start = Instant::now();
    let mut data_tick = interval_at(start + DATA_INTERVAL, DATA_INTERVAL);
    data_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut volume_tick = interval_at(start + VOLUME_INTERVAL, VOLUME_INTERVAL);
    volume_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut resampler = LinearResampler::new(stream.sample_rate, target_rate);
    let mut pending: Vec<f32> = Vec::new();
    let mut energy = 0.0f64;
    let mut energy_count = 0usize;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            frame = stream.samples.recv() => {
                let Some(frame) = frame else {
                    warn!("Microphone stream ended");
                    break;
                };
                energy += frame.iter().map(|s| f64::from(*s) * f64::from(*s)).sum::<f64>();
                energy_count += frame.len();
                pending.extend(resampler.process(&frame));
            }

            _ = data_tick.tick() => {
                if pending.is_empty() {
                    continue;
                }
                let pcm = encode_pcm16_le(&pending);
                pending.clear();
                hub.emit(&RecorderEvent::Data(BASE64_STANDARD.encode(pcm)));
            }

            _ = volume_tick.tick() => {
                let level = if energy_count == 0 {
                    0.0
                } else {
                    (energy / energy_count as f64).sqrt() as f32
                };
                energy = 0.0;
                energy_count = 0;
                hub.emit(&RecorderEvent::Volume(clamp_unit(level)));
            }
        }
    }

    drop(stream);
    debug!("Capture loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Microphone fed by the test through a channel.
    struct ChannelMicrophone {
        sample_rate: u32,
        feed: Mutex<Option<mpsc::Receiver<Vec<f32>>>>,
        released: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MicrophoneSource for ChannelMicrophone {
        async fn open(&self, _constraints: &CaptureConstraints) -> AudioResult<MicrophoneStream> {
            let rx = self
                .feed
                .lock()
                .take()
                .ok_or_else(|| AudioError::DeviceUnavailable("busy".to_string()))?;
            let released = self.released.clone();
            Ok(MicrophoneStream::new(self.sample_rate, rx)
                .with_release(move || released.store(true, Ordering::SeqCst)))
        }
    }

    struct DeniedMicrophone;

    #[async_trait]
    impl MicrophoneSource for DeniedMicrophone {
        async fn open(&self, _constraints: &CaptureConstraints) -> AudioResult<MicrophoneStream> {
            Err(AudioError::Stream("permission denied".to_string()))
        }
    }

    fn microphone(rate: u32) -> (Arc<ChannelMicrophone>, mpsc::Sender<Vec<f32>>) {
        let (tx, rx) = mpsc::channel(16);
        let mic = Arc::new(ChannelMicrophone {
            sample_rate: rate,
            feed: Mutex::new(Some(rx)),
            released: Arc::new(AtomicBool::new(false)),
        });
        (mic, tx)
    }

    fn collect(recorder: &AudioRecorder) -> (Arc<Mutex<Vec<RecorderEvent>>>, Vec<Subscription>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let d = events.clone();
        let v = events.clone();
        let subs = vec![
            recorder.on(RecorderEventKind::Data, move |e| d.lock().push(e.clone())),
            recorder.on(RecorderEventKind::Volume, move |e| v.lock().push(e.clone())),
        ];
        (events, subs)
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_data_every_100ms() {
        let (mic, feed) = microphone(16000);
        let recorder = AudioRecorder::new(mic);
        let (events, _subs) = collect(&recorder);

        recorder.start().await.unwrap();
        assert!(recorder.is_recording());

        feed.send(vec![0.0; 1600]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(110)).await;

        let events = events.lock();
        let data: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::Data(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(data.len(), 1);
        assert_eq!(BASE64_STANDARD.decode(data[0]).unwrap(), vec![0u8; 3200]);

        let volumes = events
            .iter()
            .filter(|e| matches!(e, RecorderEvent::Volume(_)))
            .count();
        assert_eq!(volumes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn skips_empty_data_windows() {
        let (mic, _feed) = microphone(16000);
        let recorder = AudioRecorder::new(mic);
        let (events, _subs) = collect(&recorder);

        recorder.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(310)).await;

        let events = events.lock();
        assert!(events.iter().all(|e| matches!(e, RecorderEvent::Volume(_))));
        assert_eq!(events.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn volume_is_rms_of_window() {
        let (mic, feed) = microphone(16000);
        let recorder = AudioRecorder::new(mic);
        let (events, _subs) = collect(&recorder);

        recorder.start().await.unwrap();
        feed.send(vec![0.5; 400]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let events = events.lock();
        let level = events
            .iter()
            .find_map(|e| match e {
                RecorderEvent::Volume(v) => Some(*v),
                _ => None,
            })
            .unwrap();
        assert!((level - 0.5).abs() < 1e-4);
    }

    #[tokio::test(start_paused = true)]
    async fn resamples_device_rate_to_16k() {
        let (mic, feed) = microphone(48000);
        let recorder = AudioRecorder::new(mic);
        let (events, _subs) = collect(&recorder);

        recorder.start().await.unwrap();
        feed.send(vec![0.0; 4800]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(105)).await;

        let events = events.lock();
        let bytes = events
            .iter()
            .find_map(|e| match e {
                RecorderEvent::Data(d) => Some(BASE64_STANDARD.decode(d).unwrap()),
                _ => None,
            })
            .unwrap();
        assert_eq!(bytes.len(), 3200);
    }

    #[tokio::test(start_paused = true)]
    async fn device_buffers_resample_without_drift() {
        let (mic, feed) = microphone(48000);
        let recorder = AudioRecorder::new(mic);
        let (events, _subs) = collect(&recorder);

        recorder.start().await.unwrap();
        for _ in 0..30 {
            feed.send(vec![0.1; 512]).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(250)).await;

        let bytes: usize = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::Data(d) => Some(BASE64_STANDARD.decode(d).unwrap().len()),
                _ => None,
            })
            .sum();
        // 15360 samples at 48 kHz -> 5120 samples at 16 kHz
        assert_eq!(bytes, 5120 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_microphone() {
        let (mic, _feed) = microphone(16000);
        let released = mic.released.clone();
        let recorder = AudioRecorder::new(mic);

        recorder.start().await.unwrap();
        recorder.stop();
        recorder.stop();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(released.load(Ordering::SeqCst));
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn open_failure_is_device_unavailable() {
        let recorder = AudioRecorder::new(Arc::new(DeniedMicrophone));
        let err = recorder.start().await.unwrap_err();
        assert!(matches!(err, AudioError::DeviceUnavailable(_)));
        assert!(!recorder.is_recording());
    }
}
