//! Stream post-processing chain
//!
//! Processors run in order on interleaved float frames after format
//! conversion and resampling, before the remap to the render layout. The
//! chain is appendable and prependable while the stream is live.

use crate::types::Sample;

/// One stage of a stream's post-processing chain
pub trait PostProcessor: Send {
    /// Identifier for log lines
    fn name(&self) -> &str;

    /// Process interleaved frames in place
    fn process(&mut self, samples: &mut [Sample], channels: usize);
}

/// Flat gain stage
pub struct GainProcessor {
    gain: f32,
}

impl GainProcessor {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }
}

impl PostProcessor for GainProcessor {
    fn name(&self) -> &str {
        "gain"
    }

    fn process(&mut self, samples: &mut [Sample], _channels: usize) {
        for s in samples.iter_mut() {
            *s *= self.gain;
        }
    }
}

/// Per-channel polarity flip, useful for wiring fixes
pub struct InvertProcessor {
    channel: usize,
}

impl InvertProcessor {
    pub fn new(channel: usize) -> Self {
        Self { channel }
    }
}

impl PostProcessor for InvertProcessor {
    fn name(&self) -> &str {
        "invert"
    }

    fn process(&mut self, samples: &mut [Sample], channels: usize) {
        if self.channel >= channels {
            return;
        }
        for frame in samples.chunks_exact_mut(channels) {
            frame[self.channel] = -frame[self.channel];
        }
    }
}
