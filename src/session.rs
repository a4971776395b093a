//! Voice session orchestration.
//!
//! [`VoiceSession`] wires one [`LiveClient`] to a microphone recorder and a
//! playback backend:
//!
//! - model `audio` -> resume output + queue on the streamer
//! - `interrupted` -> hard stop of playback
//! - recorder `data` -> `realtimeInput` while connected and unmuted
//! - optional greeting sent shortly after the first `setupcomplete`
//!
//! Playback is created lazily, on connect or on the first unmute.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::core::audio::{
    AudioError, AudioRecorder, AudioResult, AudioStreamer, CAPTURE_SAMPLE_RATE, ContextState,
    OutputContext, PLAYBACK_SAMPLE_RATE, RecorderEvent, RecorderEventKind, attach_meter_or_warn,
};
use crate::core::events::Subscription;
use crate::core::live::messages::Part;
use crate::core::live::{
    Blob, LiveClient, LiveConfig, LiveError, LiveEvent, LiveEventKind, base_config,
};

/// Delay between `setupcomplete` and the greeting turn.
pub const GREETING_DELAY: Duration = Duration::from_millis(500);

/// Tick of the headless playback clock.
const HEADLESS_TICK: Duration = Duration::from_millis(20);

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Live(#[from] LiveError),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Playback Backends
// =============================================================================

/// Creates the output a session plays model audio through.
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Open the output and return the streamer feeding it.
    async fn initialize(&self) -> AudioResult<AudioStreamer>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Plays into nothing at real-time pace, so queue timing and completion
/// callbacks behave as with a device.
#[derive(Debug, Clone)]
pub struct HeadlessBackend {
    sample_rate: u32,
}

impl HeadlessBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(PLAYBACK_SAMPLE_RATE)
    }
}

#[async_trait]
impl PlaybackBackend for HeadlessBackend {
    async fn initialize(&self) -> AudioResult<AudioStreamer> {
        let handle = Handle::try_current()
            .map_err(|e| AudioError::DeviceUnavailable(format!("no async runtime: {e}")))?;

        let context = OutputContext::new(self.sample_rate);
        let streamer = AudioStreamer::new(context.clone(), PLAYBACK_SAMPLE_RATE);
        let frames = (u64::from(self.sample_rate) * HEADLESS_TICK.as_millis() as u64 / 1000) as usize;

        let clock = streamer.clone();
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(HEADLESS_TICK);
            let mut buf = vec![0.0f32; frames];
            loop {
                ticker.tick().await;
                if context.state() == ContextState::Closed {
                    break;
                }
                clock.render(&mut buf);
            }
            debug!("Headless playback clock stopped");
        });

        Ok(streamer)
    }

    fn name(&self) -> &'static str {
        "headless"
    }
}

#[cfg_attr(not(feature = "device-audio"), allow(dead_code))]
/// Run a blocking device call on the blocking pool so runtime workers keep
/// serving the connection while a device opens.
async fn run_blocking<T, F>(open: F) -> AudioResult<T>
where
    F: FnOnce() -> AudioResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(open)
        .await
        .map_err(|e| AudioError::DeviceUnavailable(format!("device open task failed: {e}")))?
}

/// Plays through a system output device.
#[cfg(feature = "device-audio")]
pub struct DeviceBackend {
    device_name: Option<String>,
    speaker: Mutex<Option<crate::core::audio::SpeakerOutput>>,
}

#[cfg(feature = "device-audio")]
impl DeviceBackend {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            speaker: Mutex::new(None),
        }
    }
}

#[cfg(feature = "device-audio")]
#[async_trait]
impl PlaybackBackend for DeviceBackend {
    async fn initialize(&self) -> AudioResult<AudioStreamer> {
        let device_name = self.device_name.clone();
        let speaker = run_blocking(move || {
            crate::core::audio::SpeakerOutput::open(device_name.as_deref(), PLAYBACK_SAMPLE_RATE)
        })
        .await?;
        let streamer = speaker.streamer().clone();
        *self.speaker.lock() = Some(speaker);
        Ok(streamer)
    }

    fn name(&self) -> &'static str {
        "device"
    }
}

// =============================================================================
// Session
// =============================================================================

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Text turn sent once per session, after the first `setupcomplete`
    pub greeting: Option<String>,
    pub greeting_delay: Duration,
    /// Initial playback gain in [0, 1]
    pub playback_volume: f32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            greeting: None,
            greeting_delay: GREETING_DELAY,
            playback_volume: 1.0,
        }
    }
}

/// Observable session state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub connected: bool,
    pub muted: bool,
    /// Model audio is arriving for the current turn
    pub speaking: bool,
    pub input_level: f32,
    pub output_level: f32,
    /// Latest text part received from the model
    pub last_message: Option<String>,
}

struct Playback {
    backend: Arc<dyn PlaybackBackend>,
    volume: f32,
    /// Serializes initialization
    init: tokio::sync::Mutex<()>,
    streamer: Mutex<Option<AudioStreamer>>,
    status: Arc<Mutex<SessionStatus>>,
}

impl Playback {
    fn current(&self) -> Option<AudioStreamer> {
        self.streamer.lock().clone()
    }

    /// Create playback once. Failures are logged; text still works without it.
    async fn ensure(&self) -> Option<AudioStreamer> {
        let _init = self.init.lock().await;
        if let Some(streamer) = self.current() {
            return Some(streamer);
        }

        let streamer = match self.backend.initialize().await {
            Ok(streamer) => streamer,
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "Failed to initialize playback");
                return None;
            }
        };

        streamer.set_volume(self.volume);
        streamer.on_complete(|| debug!("Audio playback completed"));

        if let Some(mut levels) = attach_meter_or_warn(&streamer)
            && let Ok(handle) = Handle::try_current()
        {
            let status = self.status.clone();
            handle.spawn(async move {
                while let Some(level) = levels.recv().await {
                    status.lock().output_level = level;
                }
            });
        }

        info!(backend = self.backend.name(), "Playback initialized");
        *self.streamer.lock() = Some(streamer.clone());
        Some(streamer)
    }
}

/// One voice conversation: live client + microphone + speaker.
pub struct VoiceSession {
    client: LiveClient,
    recorder: Arc<AudioRecorder>,
    playback: Arc<Playback>,
    status: Arc<Mutex<SessionStatus>>,
    config: Mutex<LiveConfig>,
    _subscriptions: Vec<Subscription>,
}

impl VoiceSession {
    /// Wire `client`, `recorder` and `backend` together. The session starts
    /// disconnected and muted, with the base session configuration.
    pub fn new(
        client: LiveClient,
        recorder: Arc<AudioRecorder>,
        backend: Arc<dyn PlaybackBackend>,
        options: SessionOptions,
    ) -> Self {
        let status = Arc::new(Mutex::new(SessionStatus {
            muted: true,
            ..Default::default()
        }));
        let playback = Arc::new(Playback {
            backend,
            volume: options.playback_volume,
            init: tokio::sync::Mutex::new(()),
            streamer: Mutex::new(None),
            status: status.clone(),
        });

        let mut subscriptions = Vec::new();

        let p = playback.clone();
        let s = status.clone();
        subscriptions.push(client.on(LiveEventKind::Audio, move |event| {
            let LiveEvent::Audio(pcm) = event else { return };
            s.lock().speaking = true;
            match p.current() {
                Some(streamer) => {
                    if let Err(e) = streamer.resume() {
                        warn!(error = %e, "Failed to resume output");
                    }
                    streamer.add_pcm16(pcm);
                }
                None => warn!(bytes = pcm.len(), "Playback not initialized; audio dropped"),
            }
        }));

        let p = playback.clone();
        let s = status.clone();
        subscriptions.push(client.on(LiveEventKind::Interrupted, move |_| {
            debug!("Stopping playback on interrupt");
            s.lock().speaking = false;
            if let Some(streamer) = p.current() {
                streamer.stop();
            }
        }));

        let s = status.clone();
        subscriptions.push(client.on(LiveEventKind::TurnComplete, move |_| {
            s.lock().speaking = false;
        }));

        let s = status.clone();
        subscriptions.push(client.on(LiveEventKind::Content, move |event| {
            let LiveEvent::Content(content) = event else { return };
            let last_text = content
                .model_turn
                .as_ref()
                .and_then(|turn| turn.parts.iter().rev().find_map(|p| p.text.clone()));
            if let Some(text) = last_text {
                s.lock().last_message = Some(text);
            }
        }));

        let s = status.clone();
        let r = recorder.clone();
        subscriptions.push(client.on(LiveEventKind::Close, move |_| {
            r.stop();
            let mut status = s.lock();
            status.connected = false;
            status.speaking = false;
            status.muted = true;
            status.input_level = 0.0;
        }));

        let s = status.clone();
        let weak = client.downgrade();
        let greeting = options.greeting.clone();
        let delay = options.greeting_delay;
        let greeted = AtomicBool::new(false);
        subscriptions.push(client.on(LiveEventKind::SetupComplete, move |_| {
            s.lock().connected = true;
            // Later acknowledgements (config updates, reconnects) do not greet again.
            let Some(text) = greeting.clone() else { return };
            if greeted.swap(true, Ordering::SeqCst) {
                return;
            }
            let weak = weak.clone();
            let Ok(handle) = Handle::try_current() else { return };
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(client) = weak.upgrade() else { return };
                info!("Sending greeting");
                if let Err(e) = client.send(vec![Part::text(text)]) {
                    warn!(error = %e, "Failed to send greeting");
                }
            });
        }));

        let s = status.clone();
        let c = client.clone();
        subscriptions.push(recorder.on(RecorderEventKind::Data, move |event| {
            let RecorderEvent::Data(chunk) = event else { return };
            let status = s.lock();
            if !status.connected || status.muted {
                return;
            }
            drop(status);
            c.send_realtime_input(vec![Blob::pcm16_base64(chunk.clone(), CAPTURE_SAMPLE_RATE)]);
        }));

        let s = status.clone();
        subscriptions.push(recorder.on(RecorderEventKind::Volume, move |event| {
            if let RecorderEvent::Volume(level) = event {
                s.lock().input_level = *level;
            }
        }));

        Self {
            client,
            recorder,
            playback,
            status,
            config: Mutex::new(base_config()),
            _subscriptions: subscriptions,
        }
    }

    pub fn client(&self) -> &LiveClient {
        &self.client
    }

    pub fn status(&self) -> SessionStatus {
        self.status.lock().clone()
    }

    /// Session configuration used by the next `connect`.
    pub fn config(&self) -> LiveConfig {
        self.config.lock().clone()
    }

    /// Replace the configuration used by the next `connect`.
    pub fn set_config(&self, config: LiveConfig) {
        *self.config.lock() = config;
    }

    /// Overlay `config` on the base configuration and apply it to the open
    /// connection.
    pub fn update_config(&self, config: LiveConfig) -> SessionResult<()> {
        let merged = config.merged_over(&base_config());
        self.client.update_config(merged.clone())?;
        *self.config.lock() = merged;
        Ok(())
    }

    /// (Re)connect with the current configuration, then set up playback.
    pub async fn connect(&self) -> SessionResult<()> {
        self.client.disconnect();

        let config = self.config();
        if let Err(e) = self.client.connect(config).await {
            self.status.lock().connected = false;
            return Err(e.into());
        }
        self.status.lock().connected = true;

        self.playback.ensure().await;
        Ok(())
    }

    pub fn disconnect(&self) {
        self.recorder.stop();
        self.client.disconnect();
        self.status.lock().connected = false;
    }

    /// Send a complete text turn.
    pub fn send_text(&self, text: &str) -> SessionResult<()> {
        self.client.send(vec![Part::text(text)])?;
        Ok(())
    }

    /// Flip the microphone. Unmuting initializes playback and starts capture;
    /// muting stops capture. Returns the new muted state.
    pub async fn toggle_mute(&self) -> SessionResult<bool> {
        let muted = self.status.lock().muted;
        if muted {
            self.playback.ensure().await;
            self.recorder.start().await?;
            self.status.lock().muted = false;
            info!("Microphone unmuted");
            Ok(false)
        } else {
            self.recorder.stop();
            let mut status = self.status.lock();
            status.muted = true;
            status.input_level = 0.0;
            info!("Microphone muted");
            Ok(true)
        }
    }

    /// Playback streamer, once initialized.
    pub fn streamer(&self) -> Option<AudioStreamer> {
        self.playback.current()
    }

    /// Set playback gain (clamped to [0, 1]).
    pub fn set_volume(&self, level: f32) {
        if let Some(streamer) = self.playback.current() {
            streamer.set_volume(level);
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.recorder.stop();
        self.client.disconnect();
        if let Some(streamer) = self.playback.current() {
            streamer.context().close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::{CaptureConstraints, MicrophoneSource, MicrophoneStream};
    use crate::core::live::LiveEndpoint;
    use async_trait::async_trait;

    struct NoMicrophone;

    #[async_trait]
    impl MicrophoneSource for NoMicrophone {
        async fn open(&self, _constraints: &CaptureConstraints) -> AudioResult<MicrophoneStream> {
            Err(AudioError::DeviceUnavailable("no microphone".to_string()))
        }
    }

    fn session() -> VoiceSession {
        let client = LiveClient::new(LiveEndpoint::new("ws://127.0.0.1:9/ws", "k"));
        let recorder = Arc::new(AudioRecorder::new(Arc::new(NoMicrophone)));
        VoiceSession::new(
            client,
            recorder,
            Arc::new(HeadlessBackend::default()),
            SessionOptions::default(),
        )
    }

    #[tokio::test]
    async fn starts_muted_and_disconnected() {
        let session = session();
        let status = session.status();
        assert!(status.muted);
        assert!(!status.connected);
        assert!(session.streamer().is_none());
        assert_eq!(session.config().model, crate::core::live::DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn unmute_initializes_playback_even_if_microphone_fails() {
        let session = session();
        let err = session.toggle_mute().await.unwrap_err();
        assert!(matches!(err, SessionError::Audio(AudioError::DeviceUnavailable(_))));
        assert!(session.status().muted);
        assert!(session.streamer().is_some());
    }

    #[tokio::test]
    async fn update_config_requires_connection() {
        let session = session();
        let err = session
            .update_config(LiveConfig::new("").with_system_instruction("x"))
            .unwrap_err();
        assert!(matches!(err, SessionError::Live(LiveError::InvalidState { .. })));
        assert!(session.config().system_instruction.is_none());
    }

    #[tokio::test]
    async fn blocking_open_leaves_runtime_responsive() {
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let value = run_blocking(|| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(7)
        })
        .await
        .unwrap();
        ticker.abort();

        assert_eq!(value, 7);
        assert!(ticks.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn blocking_open_panic_is_device_unavailable() {
        let err = run_blocking::<(), _>(|| panic!("driver crashed"))
            .await
            .unwrap_err();
        assert!(matches!(err, AudioError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn headless_backend_drains_queue() {
        let streamer = HeadlessBackend::default().initialize().await.unwrap();
        streamer.resume().unwrap();
        streamer.add_pcm16(&[0u8; 480]);
        assert_eq!(streamer.queued_sources(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(streamer.queued_sources(), 0);
        streamer.context().close();
    }
}
