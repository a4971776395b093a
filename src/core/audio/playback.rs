//! Model audio playback.
//!
//! [`OutputContext`] stands in for the audio output device: it has a fixed
//! sample rate and a run state. [`AudioStreamer`] queues decoded model audio
//! and is pulled by whatever drives the output (a device callback, a
//! headless clock, or a test) through [`AudioStreamer::render`].
//!
//! Signal path per render quantum: queued sources (FIFO) -> optional volume
//! meter -> gain.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::base::{AudioError, AudioResult, RENDER_QUANTUM};
use super::meter::VolMeterProcessor;
use super::pcm::{clamp_unit, decode_pcm16_le};
use super::resample::resample_linear;

// =============================================================================
// Output Context
// =============================================================================

/// Run state of an [`OutputContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextState {
    #[default]
    Suspended,
    Running,
    Closed,
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextState::Suspended => write!(f, "suspended"),
            ContextState::Running => write!(f, "running"),
            ContextState::Closed => write!(f, "closed"),
        }
    }
}

/// Audio output context: declared sample rate plus run state.
///
/// Contexts start suspended; audio is only accepted once resumed.
#[derive(Debug)]
pub struct OutputContext {
    sample_rate: u32,
    state: Mutex<ContextState>,
}

impl OutputContext {
    pub fn new(sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            sample_rate,
            state: Mutex::new(ContextState::Suspended),
        })
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> ContextState {
        *self.state.lock()
    }

    /// Start (or keep) running. Fails once closed.
    pub fn resume(&self) -> AudioResult<()> {
        let mut state = self.state.lock();
        match *state {
            ContextState::Closed => Err(AudioError::ContextClosed),
            ContextState::Running => Ok(()),
            ContextState::Suspended => {
                debug!(sample_rate = self.sample_rate, "Output context resumed");
                *state = ContextState::Running;
                Ok(())
            }
        }
    }

    pub fn suspend(&self) {
        let mut state = self.state.lock();
        if *state == ContextState::Running {
            *state = ContextState::Suspended;
        }
    }

    /// Close permanently.
    pub fn close(&self) {
        *self.state.lock() = ContextState::Closed;
    }
}

// =============================================================================
// Audio Streamer
// =============================================================================

/// Callback fired when the playback queue drains.
pub type PlaybackCompleteCallback = Arc<dyn Fn() + Send + Sync>;

struct ScheduledSource {
    samples: Vec<f32>,
    position: usize,
}

impl ScheduledSource {
    #[inline]
    fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

struct StreamerInner {
    queue: VecDeque<ScheduledSource>,
    gain: f32,
    playing: bool,
    completed_sources: u64,
    meter: Option<VolMeterProcessor>,
    on_complete: Option<PlaybackCompleteCallback>,
}

/// Queues PCM16 model audio and renders it through one gain stage.
///
/// Cheap to clone; clones share the queue.
#[derive(Clone)]
pub struct AudioStreamer {
    context: Arc<OutputContext>,
    input_sample_rate: u32,
    inner: Arc<Mutex<StreamerInner>>,
}

impl AudioStreamer {
    /// Create a streamer for audio declared at `input_sample_rate`, played
    /// through `context`.
    pub fn new(context: Arc<OutputContext>, input_sample_rate: u32) -> Self {
        Self {
            context,
            input_sample_rate,
            inner: Arc::new(Mutex::new(StreamerInner {
                queue: VecDeque::new(),
                gain: 1.0,
                playing: false,
                completed_sources: 0,
                meter: None,
                on_complete: None,
            })),
        }
    }

    pub fn context(&self) -> &Arc<OutputContext> {
        &self.context
    }

    /// Resume the output context. Idempotent.
    pub fn resume(&self) -> AudioResult<()> {
        self.context.resume()
    }

    /// Queue little-endian PCM16 audio. Ignored unless the context is running.
    pub fn add_pcm16(&self, data: &[u8]) {
        if self.context.state() != ContextState::Running {
            debug!(state = %self.context.state(), "Dropping audio: output context not running");
            return;
        }

        let samples = decode_pcm16_le(data);
        if samples.is_empty() {
            return;
        }
        let samples = resample_linear(
            &samples,
            self.input_sample_rate,
            self.context.sample_rate(),
        );

        let mut inner = self.inner.lock();
        inner.queue.push_back(ScheduledSource {
            samples,
            position: 0,
        });
        inner.playing = true;
    }

    /// Discard everything queued or playing. Later audio plays normally.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.queue.len();
        inner.queue.clear();
        inner.playing = false;
        if dropped > 0 {
            debug!(dropped, "Playback stopped");
        }
    }

    /// Set the output gain, clamped to [0, 1]. NaN maps to 0.
    pub fn set_volume(&self, level: f32) {
        self.inner.lock().gain = clamp_unit(level);
    }

    pub fn volume(&self) -> f32 {
        self.inner.lock().gain
    }

    /// Whether any source is queued or playing.
    pub fn is_playing(&self) -> bool {
        self.inner.lock().playing
    }

    /// Number of sources waiting or in flight.
    pub fn queued_sources(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Number of sources that have played to the end.
    pub fn completed_sources(&self) -> u64 {
        self.inner.lock().completed_sources
    }

    /// Register a callback fired each time the queue drains by playing out.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.lock().on_complete = Some(Arc::new(callback));
    }

    /// Insert the volume meter into the output path. Returns the receiving end
    /// of its reports. Replaces a previously attached meter.
    pub fn attach_volume_meter(&self) -> AudioResult<mpsc::UnboundedReceiver<f32>> {
        if self.context.state() == ContextState::Closed {
            return Err(AudioError::Processor(
                "cannot attach meter to a closed context".to_string(),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().meter = Some(VolMeterProcessor::new(tx));
        Ok(rx)
    }

    /// Fill `out` with mono samples at the context rate. Writes silence for
    /// anything not covered by queued audio, and when the context is not
    /// running.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        if self.context.state() != ContextState::Running {
            return;
        }

        let mut completed = false;
        let callback = {
            let mut inner = self.inner.lock();
            let mut scratch = [0.0f32; RENDER_QUANTUM];

            for quantum in out.chunks_mut(RENDER_QUANTUM) {
                let was_playing = inner.playing;
                fill_from_queue(&mut inner, quantum);
                if was_playing && inner.queue.is_empty() {
                    inner.playing = false;
                    completed = true;
                }

                let detach = match inner.meter.as_mut() {
                    Some(meter) => {
                        let frames = quantum.len();
                        scratch[..frames].copy_from_slice(quantum);
                        !meter.process(&scratch[..frames], quantum)
                    }
                    None => false,
                };
                if detach {
                    debug!("Volume meter receiver dropped; detaching");
                    inner.meter = None;
                }

                let gain = inner.gain;
                if gain != 1.0 {
                    quantum.iter_mut().for_each(|s| *s *= gain);
                }
            }

            if completed {
                inner.on_complete.clone()
            } else {
                None
            }
        };

        if let Some(callback) = callback {
            callback();
        }
    }
}

fn fill_from_queue(inner: &mut StreamerInner, quantum: &mut [f32]) {
    let mut written = 0;
    while written < quantum.len() {
        let Some(source) = inner.queue.front_mut() else {
            break;
        };
        let take = source.remaining().min(quantum.len() - written);
        quantum[written..written + take]
            .copy_from_slice(&source.samples[source.position..source.position + take]);
        source.position += take;
        written += take;

        if source.remaining() == 0 {
            inner.queue.pop_front();
            inner.completed_sources += 1;
        }
    }
}

impl std::fmt::Debug for AudioStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStreamer")
            .field("context", &self.context)
            .field("input_sample_rate", &self.input_sample_rate)
            .field("queued_sources", &self.queued_sources())
            .finish()
    }
}

/// Attach the meter, logging instead of failing.
pub fn attach_meter_or_warn(streamer: &AudioStreamer) -> Option<mpsc::UnboundedReceiver<f32>> {
    match streamer.attach_volume_meter() {
        Ok(rx) => Some(rx),
        Err(e) => {
            warn!(error = %e, "Failed to attach output volume meter");
            None
        }
    }
}
