//! Output volume meter.
//!
//! A pass-through processor in the playback path: it copies each render
//! quantum unchanged and tracks a decaying peak of the per-quantum RMS.

use tokio::sync::mpsc;

use super::pcm::rms;

/// Frames between volume reports.
pub const METER_UPDATE_INTERVAL_FRAMES: i64 = 512;

/// Per-quantum decay applied to the held volume.
pub const METER_DECAY: f32 = 0.95;

/// Volume meter processor. Reports travel one way over an unbounded channel.
#[derive(Debug)]
pub struct VolMeterProcessor {
    volume: f32,
    next_update_frame: i64,
    reports: mpsc::UnboundedSender<f32>,
}

impl VolMeterProcessor {
    pub fn new(reports: mpsc::UnboundedSender<f32>) -> Self {
        Self {
            volume: 0.0,
            next_update_frame: METER_UPDATE_INTERVAL_FRAMES,
            reports,
        }
    }

    /// Current held volume.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Copy `input` to `output` and update the meter.
    ///
    /// Returns `false` once the receiving side is gone; the caller should
    /// detach the processor.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> bool {
        if input.is_empty() {
            return true;
        }

        let frames = input.len().min(output.len());
        output[..frames].copy_from_slice(&input[..frames]);

        self.volume = (self.volume * METER_DECAY).max(rms(input));

        self.next_update_frame -= input.len() as i64;
        if self.next_update_frame < 0 {
            self.next_update_frame += METER_UPDATE_INTERVAL_FRAMES;
            return self.reports.send(self.volume).is_ok();
        }
        true
    }
}
