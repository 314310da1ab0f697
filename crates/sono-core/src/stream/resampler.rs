//! Sample-rate conversion stage
//!
//! Thin wrapper around a rubato sinc resampler working on interleaved
//! frames. Input is staged until a full resampler chunk is available, so
//! callers can feed arbitrary block sizes.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::StreamError;
use crate::types::Sample;

/// Frames fed to the inner resampler per pass
const CHUNK_FRAMES: usize = 1024;

pub struct StreamResampler {
    inner: SincFixedIn<Sample>,
    channels: usize,
    ratio: f64,
    /// Interleaved frames waiting for a full chunk
    pending: Vec<Sample>,
    /// Per-channel staging for the inner resampler
    split: Vec<Vec<Sample>>,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self, StreamError> {
        let ratio = output_rate as f64 / input_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<Sample>::new(ratio, 1.1, params, CHUNK_FRAMES, channels)
            .map_err(|e| StreamError::Resampler(e.to_string()))?;

        log::debug!(
            "resampler {} -> {} Hz, {} channels, ratio {:.6}",
            input_rate,
            output_rate,
            channels,
            ratio
        );

        Ok(Self {
            inner,
            channels,
            ratio,
            pending: Vec::with_capacity(CHUNK_FRAMES * channels * 2),
            split: vec![Vec::with_capacity(CHUNK_FRAMES); channels],
        })
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Frames staged but not yet resampled
    pub fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels
    }

    /// Feed interleaved input and append resampled interleaved output.
    pub fn process(
        &mut self,
        input: &[Sample],
        output: &mut Vec<Sample>,
    ) -> Result<(), StreamError> {
        self.pending.extend_from_slice(input);

        while self.pending.len() >= CHUNK_FRAMES * self.channels {
            for ch in self.split.iter_mut() {
                ch.clear();
            }
            for frame in self.pending[..CHUNK_FRAMES * self.channels].chunks_exact(self.channels) {
                for (ch, &s) in self.split.iter_mut().zip(frame.iter()) {
                    ch.push(s);
                }
            }
            self.pending.drain(..CHUNK_FRAMES * self.channels);

            let resampled = self
                .inner
                .process(&self.split, None)
                .map_err(|e| StreamError::Resampler(e.to_string()))?;

            let out_frames = resampled.first().map(|c| c.len()).unwrap_or(0);
            output.reserve(out_frames * self.channels);
            for i in 0..out_frames {
                for ch in &resampled {
                    output.push(ch[i]);
                }
            }
        }
        Ok(())
    }

    /// Pad staged input with silence up to a chunk boundary and resample it,
    /// so load-time conversion does not lose the tail of a buffer.
    pub fn flush_into(&mut self, output: &mut Vec<Sample>) -> Result<(), StreamError> {
        let staged = self.pending.len();
        if staged == 0 {
            return Ok(());
        }
        let target = CHUNK_FRAMES * self.channels;
        let pad = target - (staged % target);
        if pad != target {
            let zeros = vec![0.0; pad];
            self.process(&zeros, output)?;
        }
        Ok(())
    }

    /// Drop any staged input (seek/flush)
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio() {
        let r = StreamResampler::new(44100, 48000, 2).unwrap();
        assert!((r.ratio() - 48000.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn test_small_input_stays_pending() {
        let mut r = StreamResampler::new(44100, 48000, 2).unwrap();
        let mut out = Vec::new();
        r.process(&[0.0; 64], &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(r.pending_frames(), 32);
    }

    #[test]
    fn test_upsampling_produces_more_frames() {
        let mut r = StreamResampler::new(24000, 48000, 1).unwrap();
        let input: Vec<f32> = (0..CHUNK_FRAMES * 4)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let mut out = Vec::new();
        r.process(&input, &mut out).unwrap();
        // Roughly double, allowing for resampler latency
        assert!(out.len() > input.len());
    }
}
