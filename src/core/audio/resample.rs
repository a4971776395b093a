//! Linear sample-rate conversion.
//!
//! Good enough for speech, where latency matters more than phase accuracy.
//! [`resample_linear`] converts one self-contained buffer (a model audio
//! chunk). [`LinearResampler`] converts a continuous stream split into device
//! callback buffers, carrying the read position and the last sample across
//! calls so the output length tracks the exact rate ratio.

/// Streaming linear resampler.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    /// Input samples advanced per output sample
    step: f64,
    /// Read position of the next output sample. Index 0 is `previous` when
    /// it is set, otherwise the first sample of the next buffer.
    position: f64,
    previous: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let step = if to_rate == 0 {
            1.0
        } else {
            from_rate as f64 / to_rate as f64
        };
        Self {
            from_rate,
            to_rate,
            step,
            position: 0.0,
            previous: None,
        }
    }

    fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate || self.from_rate == 0 || self.to_rate == 0
    }

    /// Convert the next buffer of the stream.
    ///
    /// Output for the tail of `input` is produced once the following buffer
    /// arrives (one input sample of latency).
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        let Some(&last) = input.last() else {
            return Vec::new();
        };

        let offset = usize::from(self.previous.is_some());
        let previous = self.previous.unwrap_or(0.0);
        let len = input.len() + offset;
        let sample = |i: usize| if i < offset { previous } else { input[i - offset] };

        let end = (len - 1) as f64;
        let mut output = Vec::with_capacity((input.len() as f64 / self.step).ceil() as usize + 1);
        while self.position < end {
            let idx = self.position as usize;
            let frac = (self.position - idx as f64) as f32;
            output.push(sample(idx) * (1.0 - frac) + sample(idx + 1) * frac);
            self.position += self.step;
        }

        self.position -= end;
        self.previous = Some(last);
        output
    }

    /// Forget stream history.
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.previous = None;
    }
}

/// Resample `input` from `from_rate` to `to_rate`. Returns the input unchanged
/// when the rates match or either rate is zero.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || input.is_empty() {
        return input.to_vec();
    }

    // Ratio > 1 means upsampling, < 1 means downsampling.
    let ratio = to_rate as f64 / from_rate as f64;
    let input_len = input.len();
    let output_len = (input_len as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = (src_idx - idx as f64) as f32;

        if idx + 1 < input_len {
            output.push(input[idx] * (1.0 - frac) + input[idx + 1] * frac);
        } else {
            output.push(input.last().copied().unwrap_or(0.0));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_identity() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 16000, 16000), input);
    }

    #[test]
    fn downsample_48k_to_16k_thirds_length() {
        let input = vec![0.25; 480];
        let out = resample_linear(&input, 48000, 16000);
        assert_eq!(out.len(), 160);
        assert!(out.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn upsample_interpolates() {
        let out = resample_linear(&[0.0, 1.0], 24000, 48000);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert_eq!(out[3], 1.0);
    }

    #[test]
    fn streaming_length_tracks_rate_ratio() {
        let mut resampler = LinearResampler::new(48000, 16000);
        let total: usize = (0..30)
            .map(|_| resampler.process(&[0.1; 512]).len())
            .sum();
        // 15360 input samples at a 3:1 ratio
        assert_eq!(total, 5120);
    }

    #[test]
    fn streaming_has_no_seams_between_buffers() {
        let mut resampler = LinearResampler::new(48000, 16000);
        let ramp: Vec<f32> = (0..1536).map(|i| i as f32).collect();
        let out: Vec<f32> = ramp
            .chunks(512)
            .flat_map(|chunk| resampler.process(chunk))
            .collect();

        assert_eq!(out.len(), 512);
        for (k, sample) in out.iter().enumerate() {
            assert!((sample - (3 * k) as f32).abs() < 1e-3, "sample {k} = {sample}");
        }
    }

    #[test]
    fn streaming_upsample_interpolates_across_buffers() {
        let mut resampler = LinearResampler::new(16000, 32000);
        let mut out = resampler.process(&[0.0, 1.0]);
        out.extend(resampler.process(&[2.0]));
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5]);

        resampler.reset();
        assert_eq!(resampler.process(&[4.0]), Vec::<f32>::new());
    }

    #[test]
    fn streaming_same_rate_is_identity() {
        let mut resampler = LinearResampler::new(16000, 16000);
        assert_eq!(resampler.process(&[0.1, 0.2]), vec![0.1, 0.2]);
    }

    #[test]
    fn zero_rate_passes_through() {
        assert_eq!(resample_linear(&[0.5], 0, 16000), vec![0.5]);
    }
}
