//! Per-source audio stream pipeline
//!
//! A producer pushes raw encoded bytes in with [`AudioStream::add_data`];
//! the mixer pulls render-format packets out with [`AudioStream::get_frame`].
//! Between the two sits the full conversion pipeline: format convert,
//! optional resample, post-processing chain, remap to the render layout,
//! and a bounded queue of quantum-sized packets.
//!
//! Locking: one mutex guards the pipeline state (add_data vs. get_frame),
//! a second guards the producer callbacks. Callbacks are always invoked with
//! the state mutex released, so a data callback may re-enter `add_data`
//! without deadlocking. A callback must not replace the callbacks themselves.

mod postproc;
mod resampler;

pub use postproc::{GainProcessor, InvertProcessor, PostProcessor};
pub use resampler::StreamResampler;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::format;
use crate::remap::{DownmixMatrix, RemapError};
use crate::types::{AudioFormat, ChannelLayout, Sample};

/// Producer notification that the stream wants roughly this many more
/// packets of input. Invoked synchronously from `get_frame`, outside the
/// stream's state lock.
pub type DataCallback = Box<dyn FnMut(usize) + Send>;

/// Invoked exactly once, when a draining stream runs completely dry.
pub type DrainCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Error)]
pub enum StreamError {
    /// Declared format is inconsistent (e.g. channel count vs. layout) or
    /// unusable; the stream is never constructed.
    #[error("invalid stream format: {0}")]
    InvalidFormat(String),

    #[error("resampler: {0}")]
    Resampler(String),

    #[error(transparent)]
    Remap(#[from] RemapError),
}

struct StreamState {
    /// Ingest buffer for exactly one input block
    ingest: Vec<u8>,
    /// Scratch: decoded f32 samples of the current block
    converted: Vec<Sample>,
    /// Scratch: resampler output
    resampled: Vec<Sample>,
    resampler: Option<StreamResampler>,
    chain: Vec<Box<dyn PostProcessor>>,
    matrix: DownmixMatrix,
    /// Render-layout samples not yet filling a whole packet
    partial: Vec<Sample>,
    /// Rendered quantum-sized packets awaiting the mixer
    queue: VecDeque<Vec<Sample>>,
    draining: bool,
    drain_fired: bool,
}

#[derive(Default)]
struct StreamCallbacks {
    data: Option<DataCallback>,
    drain: Option<DrainCallback>,
}

/// One mixable audio source with its own conversion pipeline.
pub struct AudioStream {
    input_format: AudioFormat,
    render_channels: usize,
    /// Frames per rendered packet (the engine quantum)
    quantum: usize,
    /// Buffered-packet threshold for requesting more producer data
    low_water: usize,
    /// Bytes in one input block (quantum frames in the input domain)
    block_bytes: usize,
    volume_bits: AtomicU32,
    paused: AtomicBool,
    destroyed: AtomicBool,
    state: Mutex<StreamState>,
    callbacks: Mutex<StreamCallbacks>,
}

impl AudioStream {
    /// Build a stream pipeline from a declared input format to the engine's
    /// render format. Fails (and constructs nothing) when the input format
    /// is inconsistent or no downmix route exists; such a stream is never
    /// handed to the mixer.
    pub fn new(
        input_format: AudioFormat,
        render_rate: u32,
        render_layout: &ChannelLayout,
        quantum: usize,
        low_water: usize,
        normalize_downmix: bool,
    ) -> Result<Arc<Self>, StreamError> {
        if !input_format.is_valid() {
            return Err(StreamError::InvalidFormat(format!(
                "{} samples/frame vs layout {} ({} ch)",
                input_format.frame_samples,
                input_format.layout,
                input_format.layout.count()
            )));
        }
        if quantum == 0 || low_water == 0 {
            return Err(StreamError::InvalidFormat(
                "quantum and low-water mark must be non-zero".into(),
            ));
        }

        let matrix = DownmixMatrix::build(&input_format.layout, render_layout, true, normalize_downmix)?;
        let resampler = if input_format.sample_rate != render_rate {
            Some(StreamResampler::new(
                input_format.sample_rate,
                render_rate,
                input_format.layout.count(),
            )?)
        } else {
            None
        };

        let block_bytes = quantum * input_format.frame_size;
        log::debug!(
            "stream: {} {} Hz {} -> {} Hz {}, block {} bytes",
            input_format.sample_format.name(),
            input_format.sample_rate,
            input_format.layout,
            render_rate,
            render_layout,
            block_bytes
        );

        Ok(Arc::new(Self {
            render_channels: render_layout.count(),
            quantum,
            low_water,
            block_bytes,
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            paused: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            state: Mutex::new(StreamState {
                ingest: Vec::with_capacity(block_bytes),
                converted: Vec::new(),
                resampled: Vec::new(),
                resampler,
                chain: Vec::new(),
                matrix,
                partial: Vec::new(),
                queue: VecDeque::new(),
                draining: false,
                drain_fired: false,
            }),
            callbacks: Mutex::new(StreamCallbacks::default()),
            input_format,
        }))
    }

    /// Push encoded bytes into the stream.
    ///
    /// Returns the number of bytes consumed. Returns 0 once buffered packets
    /// reach twice the low-water mark (backpressure, not an error). A zero
    /// return below the water level means the input itself was unusable
    /// (empty, or the stream is draining/destroyed).
    pub fn add_data(&self, data: &[u8]) -> usize {
        if data.is_empty() || self.destroyed.load(Ordering::Acquire) {
            return 0;
        }
        let mut st = self.state.lock().unwrap();
        if st.draining {
            return 0;
        }
        if st.queue.len() >= self.low_water * 2 {
            return 0;
        }

        let space = self.block_bytes - st.ingest.len();
        let take = space.min(data.len());
        st.ingest.extend_from_slice(&data[..take]);

        if st.ingest.len() == self.block_bytes {
            if let Err(e) = self.process_block(&mut st) {
                log::warn!("stream: dropping block: {}", e);
            }
            st.ingest.clear();
        }
        take
    }

    /// Run one full ingest block through the pipeline and queue the
    /// resulting packets.
    fn process_block(&self, st: &mut StreamState) -> Result<(), StreamError> {
        let in_channels = self.input_format.frame_samples;
        let sample_count = self.block_bytes / self.input_format.sample_format.bytes_per_sample();

        st.converted.resize(sample_count, 0.0);
        let ingest = std::mem::take(&mut st.ingest);
        format::to_float(self.input_format.sample_format, &ingest, &mut st.converted);
        st.ingest = ingest;

        // Resample into the scratch buffer, or use the converted block as-is
        st.resampled.clear();
        let processed: &mut Vec<Sample> = if st.resampler.is_some() {
            let converted = std::mem::take(&mut st.converted);
            let result = st
                .resampler
                .as_mut()
                .unwrap()
                .process(&converted, &mut st.resampled);
            st.converted = converted;
            result?;
            &mut st.resampled
        } else {
            &mut st.converted
        };

        for stage in st.chain.iter_mut() {
            stage.process(processed, in_channels);
        }

        let frames = processed.len() / in_channels;
        if frames == 0 {
            return Ok(());
        }
        let base = st.partial.len();
        st.partial.resize(base + frames * self.render_channels, 0.0);
        let (_, tail) = st.partial.split_at_mut(base);
        st.matrix.remap(processed.as_slice(), tail, frames);

        self.emit_packets(st);
        Ok(())
    }

    /// Split accumulated render samples into quantum-sized packets.
    fn emit_packets(&self, st: &mut StreamState) {
        let packet_samples = self.quantum * self.render_channels;
        while st.partial.len() >= packet_samples {
            let packet: Vec<Sample> = st.partial.drain(..packet_samples).collect();
            st.queue.push_back(packet);
        }
    }

    /// Pop one rendered packet (quantum frames, render layout interleaved).
    ///
    /// If the queue is empty and the stream is not draining, the data
    /// callback is invoked synchronously (outside the state lock) to request
    /// more input before giving up. While draining, the drain callback fires
    /// exactly once when everything has run dry.
    pub fn get_frame(&self) -> Option<Vec<Sample>> {
        let mut asked = false;
        loop {
            let mut st = self.state.lock().unwrap();
            if let Some(packet) = st.queue.pop_front() {
                let deficit = if !st.draining && st.queue.len() < self.low_water {
                    self.low_water - st.queue.len()
                } else {
                    0
                };
                drop(st);
                if deficit > 0 {
                    self.request_data(deficit);
                }
                return Some(packet);
            }

            if st.draining {
                // Drained: ingest and partials were flushed by drain()
                let fire = !st.drain_fired;
                st.drain_fired = true;
                drop(st);
                if fire {
                    let cb = self.callbacks.lock().unwrap().drain.take();
                    if let Some(cb) = cb {
                        cb();
                    }
                }
                return None;
            }

            if asked {
                return None;
            }
            drop(st);
            self.request_data(self.low_water);
            asked = true;
        }
    }

    fn request_data(&self, packets: usize) {
        let mut callbacks = self.callbacks.lock().unwrap();
        if let Some(cb) = callbacks.data.as_mut() {
            cb(packets);
        }
    }

    /// Switch to draining: no more input is accepted, everything already
    /// accepted plays out. Frames staged inside the resampler are flushed
    /// through the chain and remap, and a trailing partial packet is
    /// zero-padded to a full quantum.
    pub fn drain(&self) {
        let mut st = self.state.lock().unwrap();
        let st = &mut *st;
        if st.draining {
            return;
        }
        st.draining = true;
        // A partial ingest block is less than one frame's worth of usable
        // input at this point; it cannot be converted.
        st.ingest.clear();

        if st.resampler.is_some() {
            let in_channels = self.input_format.frame_samples;
            let mut flushed: Vec<Sample> = Vec::new();
            if let Err(e) = st.resampler.as_mut().unwrap().flush_into(&mut flushed) {
                log::warn!("stream: drain lost resampler tail: {}", e);
            }
            for stage in st.chain.iter_mut() {
                stage.process(&mut flushed, in_channels);
            }
            let frames = flushed.len() / in_channels;
            if frames > 0 {
                let base = st.partial.len();
                st.partial.resize(base + frames * self.render_channels, 0.0);
                let (_, tail) = st.partial.split_at_mut(base);
                st.matrix.remap(&flushed, tail, frames);
                self.emit_packets(st);
            }
        }

        if !st.partial.is_empty() {
            let packet_samples = self.quantum * self.render_channels;
            st.partial.resize(packet_samples, 0.0);
            let packet: Vec<Sample> = st.partial.drain(..).collect();
            st.queue.push_back(packet);
        }
    }

    /// True once draining and fully played out
    pub fn is_drained(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.draining && st.queue.is_empty() && st.partial.is_empty()
    }

    /// Discard all buffered input and output
    pub fn flush(&self) {
        let mut st = self.state.lock().unwrap();
        st.ingest.clear();
        st.partial.clear();
        st.queue.clear();
        if let Some(r) = st.resampler.as_mut() {
            r.reset();
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Mark for removal and discard all buffered audio. Destroyed streams
    /// are never mixed, so the engine drops the stream from its list on the
    /// next quantum.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        let mut st = self.state.lock().unwrap();
        st.ingest.clear();
        st.partial.clear();
        st.queue.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Acquire))
    }

    pub fn input_format(&self) -> &AudioFormat {
        &self.input_format
    }

    /// Rendered packets currently queued
    pub fn buffered_packets(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Bytes of one negotiated input block
    pub fn block_size(&self) -> usize {
        self.block_bytes
    }

    pub fn append_postprocessor(&self, stage: Box<dyn PostProcessor>) {
        log::debug!("stream: appending postproc '{}'", stage.name());
        self.state.lock().unwrap().chain.push(stage);
    }

    pub fn prepend_postprocessor(&self, stage: Box<dyn PostProcessor>) {
        log::debug!("stream: prepending postproc '{}'", stage.name());
        self.state.lock().unwrap().chain.insert(0, stage);
    }

    pub fn set_data_callback(&self, cb: DataCallback) {
        self.callbacks.lock().unwrap().data = Some(cb);
    }

    pub fn set_drain_callback(&self, cb: DrainCallback) {
        self.callbacks.lock().unwrap().drain = Some(cb);
    }
}
