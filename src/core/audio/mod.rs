//! Audio capture and playback units.
//!
//! - Capture: microphone frames -> 16 kHz PCM16 chunks + input level
//! - Playback: PCM16 model audio -> FIFO queue -> meter -> gain -> output
//!
//! The device layer (`device-audio` feature) binds both units to the system
//! audio host through CPAL. Without it, any [`MicrophoneSource`]
//! implementation and any driver of [`AudioStreamer::render`] can be used.

pub mod base;
pub mod capture;
#[cfg(feature = "device-audio")]
pub mod device;
pub mod meter;
pub mod pcm;
pub mod playback;
pub mod resample;

pub use base::{
    AudioError, AudioResult, CAPTURE_SAMPLE_RATE, DATA_INTERVAL, PLAYBACK_SAMPLE_RATE,
    RENDER_QUANTUM, VOLUME_INTERVAL,
};
pub use capture::{
    AudioRecorder, CaptureConstraints, MicrophoneSource, MicrophoneStream, RecorderEvent,
    RecorderEventKind,
};
#[cfg(feature = "device-audio")]
pub use device::{CpalMicrophone, SpeakerOutput, list_input_devices, list_output_devices};
pub use meter::VolMeterProcessor;
pub use playback::{AudioStreamer, ContextState, OutputContext, attach_meter_or_warn};
