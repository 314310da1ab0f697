//! The mixer engine
//!
//! Owns the hardware sink and runs the real-time mixing loop on one
//! dedicated thread. Streams and sound effects register with an engine
//! instance passed by reference; there is no process-wide singleton.
//!
//! Per quantum the loop: drains converted bytes to the sink in bounded
//! chunks (the pipeline's one blocking point), accumulates sound-effect and
//! stream frames scaled by their volumes, applies master volume with the
//! contributor average, and encodes the result onto the output buffer.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::error::{EngineError, EngineResult};
use crate::config::EngineConfig;
use crate::format;
use crate::sink::Sink;
use crate::sound::{SoundBank, SoundEffect, SoundInstance};
use crate::stream::AudioStream;
use crate::types::{AudioFormat, ChannelLayout, Sample, SampleFormat};

/// Engine lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Sink never opened (or failed to); factories fail closed
    Invalid,
    /// Sink open, mixer thread not running
    Ready,
    Running,
    Stopping,
}

/// Sweep idle bank entries roughly once a second of quanta
const GC_QUANTA: u64 = 200;

/// Quanta the staging buffer may hold while the sink refuses writes; mixing
/// pauses at this bound so a dead sink cannot grow memory without limit
const MAX_STAGED_QUANTA: usize = 8;

struct EngineLists {
    streams: Vec<Arc<AudioStream>>,
    sounds: Vec<SoundInstance>,
}

struct EngineShared {
    config: EngineConfig,
    render_format: AudioFormat,
    state: Mutex<EngineState>,
    running: AtomicBool,
    sink: Mutex<Box<dyn Sink>>,
    lists: Mutex<EngineLists>,
    master_volume_bits: AtomicU32,
    bank: SoundBank,
}

/// Per-thread mixing buffers, allocated once
struct MixContext {
    accum: Vec<Sample>,
    scratch: Vec<Sample>,
    outbuf: Vec<u8>,
    quantum_samples: usize,
    quantum_bytes: usize,
}

impl MixContext {
    fn new(format: &AudioFormat, quantum: usize) -> Self {
        let quantum_samples = quantum * format.layout.count();
        let quantum_bytes = quantum * format.frame_size;
        Self {
            accum: vec![0.0; quantum_samples],
            scratch: vec![0.0; quantum_samples],
            outbuf: Vec::with_capacity(quantum_bytes * 4),
            quantum_samples,
            quantum_bytes,
        }
    }
}

/// The audio engine. Create one, initialize it against a sink, start the
/// mixer thread, then hand out streams and sounds.
pub struct Engine {
    shared: Arc<EngineShared>,
    thread: Option<JoinHandle<()>>,
}

impl Engine {
    /// Build an engine around a sink. The engine stays [`EngineState::Invalid`]
    /// until [`initialize`](Self::initialize) opens the sink.
    pub fn new(config: EngineConfig, sink: Box<dyn Sink>) -> Self {
        let layout = ChannelLayout::preset(config.layout);
        let render_format = AudioFormat::new(SampleFormat::F32, config.sample_rate, layout.clone());
        let bank = SoundBank::new(config.sample_rate, layout, config.normalize_downmix);

        Self {
            shared: Arc::new(EngineShared {
                render_format,
                state: Mutex::new(EngineState::Invalid),
                running: AtomicBool::new(false),
                sink: Mutex::new(sink),
                lists: Mutex::new(EngineLists {
                    streams: Vec::new(),
                    sounds: Vec::new(),
                }),
                master_volume_bits: AtomicU32::new(1.0f32.to_bits()),
                bank,
                config,
            }),
            thread: None,
        }
    }

    /// Open the sink with the negotiated render format. Failure leaves the
    /// engine Invalid; there is no retry.
    pub fn initialize(&self) -> EngineResult<()> {
        let mut state = self.shared.state.lock().unwrap();
        if *state != EngineState::Invalid {
            return Ok(());
        }
        let result = self
            .shared
            .sink
            .lock()
            .unwrap()
            .initialize(&self.shared.render_format, &self.shared.config.device);
        match result {
            Ok(()) => {
                *state = EngineState::Ready;
                log::info!(
                    "engine: ready ({} Hz, {}, quantum {} frames)",
                    self.shared.render_format.sample_rate,
                    self.shared.render_format.layout,
                    self.shared.config.quantum_frames
                );
                Ok(())
            }
            Err(e) => {
                log::error!("engine: sink open failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Spawn the mixer thread
    pub fn start(&mut self) -> EngineResult<()> {
        {
            let mut state = self.shared.state.lock().unwrap();
            match *state {
                EngineState::Invalid => return Err(EngineError::NotReady),
                EngineState::Running | EngineState::Stopping => {
                    return Err(EngineError::AlreadyRunning)
                }
                EngineState::Ready => *state = EngineState::Running,
            }
        }
        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("sono-mixer".to_string())
            .spawn(move || run_loop(shared))
            .expect("spawn mixer thread");
        self.thread = Some(handle);
        Ok(())
    }

    /// Stop the mixer thread and the sink
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != EngineState::Running {
                return;
            }
            *state = EngineState::Stopping;
        }
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.shared.sink.lock().unwrap().stop();
        *self.shared.state.lock().unwrap() = EngineState::Ready;
        log::info!("engine: stopped");
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock().unwrap()
    }

    pub fn render_format(&self) -> &AudioFormat {
        &self.shared.render_format
    }

    /// Create a stream mixed by this engine. Fails closed while the engine
    /// is Invalid, and fails if the declared format cannot be converted to
    /// the render format.
    pub fn create_stream(&self, input_format: AudioFormat) -> EngineResult<Arc<AudioStream>> {
        self.check_usable()?;
        let stream = AudioStream::new(
            input_format,
            self.shared.render_format.sample_rate,
            &self.shared.render_format.layout,
            self.shared.config.quantum_frames,
            self.shared.config.stream_low_water,
            self.shared.config.normalize_downmix,
        )?;
        self.shared.lists.lock().unwrap().streams.push(stream.clone());
        Ok(stream)
    }

    /// Load (or fetch from cache) a sound effect
    pub fn load_sound(&self, path: &Path) -> EngineResult<Arc<SoundEffect>> {
        self.check_usable()?;
        Ok(self.shared.bank.get_or_load(path)?)
    }

    /// Start playing a sound effect at the given volume
    pub fn play_sound(&self, effect: &SoundEffect, volume: f32) -> EngineResult<()> {
        self.check_usable()?;
        self.shared
            .lists
            .lock()
            .unwrap()
            .sounds
            .push(SoundInstance::new(effect, volume));
        Ok(())
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.shared
            .master_volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    pub fn master_volume(&self) -> f32 {
        f32::from_bits(self.shared.master_volume_bits.load(Ordering::Acquire))
    }

    /// Streams currently registered (including ones pending removal)
    pub fn stream_count(&self) -> usize {
        self.shared.lists.lock().unwrap().streams.len()
    }

    /// Sound instances currently playing
    pub fn sound_count(&self) -> usize {
        self.shared.lists.lock().unwrap().sounds.len()
    }

    fn check_usable(&self) -> EngineResult<()> {
        match *self.shared.state.lock().unwrap() {
            EngineState::Invalid => Err(EngineError::NotReady),
            _ => Ok(()),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: Arc<EngineShared>) {
    let quantum = shared.config.quantum_frames;
    let mut ctx = MixContext::new(&shared.render_format, quantum);
    let quantum_secs = quantum as f64 / shared.render_format.sample_rate as f64;
    let mut ticks: u64 = 0;

    log::info!("engine: mixer thread running");
    while shared.running.load(Ordering::Acquire) {
        run_quantum(&shared, &mut ctx);

        ticks += 1;
        if ticks % GC_QUANTA == 0 {
            shared.bank.collect_idle();
        }

        // The sink's add_packets is the real pacemaker; this only prevents
        // spinning far ahead of a deep sink buffer.
        let delay = shared.sink.lock().unwrap().get_delay();
        if delay > quantum_secs * 4.0 {
            thread::sleep(Duration::from_secs_f64(quantum_secs));
        }
    }
    log::info!("engine: mixer thread exiting");
}

/// One iteration of the mixing loop.
fn run_quantum(shared: &EngineShared, ctx: &mut MixContext) {
    let frame_size = shared.render_format.frame_size;

    // 1. Drain converted bytes toward the sink in bounded chunks. This may
    //    block; it is the pipeline's designed flow control.
    {
        let mut sink = shared.sink.lock().unwrap();
        while ctx.outbuf.len() >= ctx.quantum_bytes {
            match sink.add_packets(&ctx.outbuf[..ctx.quantum_bytes]) {
                Ok(0) => break,
                Ok(frames) => {
                    ctx.outbuf.drain(..frames * frame_size);
                }
                Err(e) => {
                    // Skip this quantum's write; retried next time around
                    log::warn!("engine: sink write failed: {}", e);
                    break;
                }
            }
        }
    }

    // Staging bound reached: skip mixing until the sink drains again
    if ctx.outbuf.len() >= ctx.quantum_bytes * MAX_STAGED_QUANTA {
        return;
    }

    ctx.accum[..ctx.quantum_samples].fill(0.0);
    let mut contributors = 0usize;

    // 2. Sound effects, under the list lock (no re-entrancy possible), and
    //    sweep of streams awaiting removal.
    let stream_snapshot: Vec<Arc<AudioStream>> = {
        let mut lists = shared.lists.lock().unwrap();
        lists
            .streams
            .retain(|s| !(s.is_destroyed() && s.buffered_packets() == 0));

        let accum = &mut ctx.accum;
        let scratch = &mut ctx.scratch;
        lists.sounds.retain_mut(|instance| {
            let n = instance.next_frame(&mut scratch[..]);
            if n == 0 {
                return false;
            }
            let volume = instance.volume();
            for i in 0..n {
                accum[i] += scratch[i] * volume;
            }
            contributors += 1;
            !instance.is_finished()
        });

        lists
            .streams
            .iter()
            .filter(|s| !s.is_paused() && !s.is_destroyed())
            .cloned()
            .collect()
    };

    // 3. Streams, pulled outside the engine lock: get_frame may invoke a
    //    producer's data callback, which may re-enter engine APIs.
    for stream in stream_snapshot {
        if let Some(packet) = stream.get_frame() {
            let volume = stream.volume();
            for (a, s) in ctx.accum.iter_mut().zip(packet.iter()) {
                *a += s * volume;
            }
            contributors += 1;
        }
    }

    // 4. Master volume, averaging across contributors when several sources
    //    landed in this quantum.
    let master = f32::from_bits(shared.master_volume_bits.load(Ordering::Acquire));
    let scale = if contributors > 1 {
        master / contributors as f32
    } else {
        master
    };
    if scale != 1.0 {
        for a in ctx.accum.iter_mut() {
            *a *= scale;
        }
    }

    // 5. Encode the mixed quantum onto the output buffer in the sink format
    let base = ctx.outbuf.len();
    ctx.outbuf.resize(base + ctx.quantum_bytes, 0);
    format::from_float(
        shared.render_format.sample_format,
        &ctx.accum[..ctx.quantum_samples],
        &mut ctx.outbuf[base..],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CaptureSink, SinkError, SinkResult};
    use crate::types::LayoutPreset;

    fn test_config(quantum: usize) -> EngineConfig {
        EngineConfig {
            quantum_frames: quantum,
            ..EngineConfig::default()
        }
    }

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn decode_f32(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn stereo_f32_format() -> AudioFormat {
        AudioFormat::new(
            SampleFormat::F32,
            48000,
            ChannelLayout::preset(LayoutPreset::Layout20),
        )
    }

    /// Sink whose initialize always fails
    struct BrokenSink;
    impl Sink for BrokenSink {
        fn initialize(&mut self, _: &AudioFormat, _: &str) -> SinkResult<()> {
            Err(SinkError::OpenFailed("broken".into()))
        }
        fn add_packets(&mut self, _: &[u8]) -> SinkResult<usize> {
            Err(SinkError::NotInitialized)
        }
        fn get_delay(&self) -> f64 {
            0.0
        }
        fn stop(&mut self) {}
    }

    #[test]
    fn test_sink_failure_leaves_engine_invalid() {
        let engine = Engine::new(test_config(4), Box::new(BrokenSink));
        assert!(engine.initialize().is_err());
        assert_eq!(engine.state(), EngineState::Invalid);

        // Factories fail closed
        assert!(matches!(
            engine.create_stream(stereo_f32_format()),
            Err(EngineError::NotReady)
        ));
        assert_eq!(engine.stream_count(), 0);
    }

    #[test]
    fn test_initialize_reaches_ready() {
        let engine = Engine::new(test_config(4), Box::new(CaptureSink::new()));
        engine.initialize().unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[test]
    fn test_two_stream_mix_accumulates_weighted_sum() {
        let quantum = 4;
        let sink = CaptureSink::new();
        let written = sink.data();
        let engine = Engine::new(test_config(quantum), Box::new(sink));
        engine.initialize().unwrap();
        engine.set_master_volume(1.0);

        let s1 = engine.create_stream(stereo_f32_format()).unwrap();
        let s2 = engine.create_stream(stereo_f32_format()).unwrap();
        s1.set_volume(0.5);
        s2.set_volume(0.8);

        let a: Vec<f32> = vec![0.2; quantum * 2];
        let b: Vec<f32> = vec![0.4; quantum * 2];
        assert_eq!(s1.add_data(&f32_bytes(&a)), a.len() * 4);
        assert_eq!(s2.add_data(&f32_bytes(&b)), b.len() * 4);

        let mut ctx = MixContext::new(&engine.shared.render_format, quantum);
        run_quantum(&engine.shared, &mut ctx);
        // First run fills the staging buffer; second run drains it
        run_quantum(&engine.shared, &mut ctx);

        // Pre-master accumulator is s1*0.5 + s2*0.8; with two contributors
        // and master volume 1.0 the written samples carry the /2 average.
        let expected = (0.2 * 0.5 + 0.4 * 0.8) / 2.0;
        let out = decode_f32(&written.lock().unwrap());
        assert_eq!(out.len(), quantum * 2);
        for sample in out {
            assert!((sample - expected).abs() < 1e-6, "{} vs {}", sample, expected);
        }
    }

    #[test]
    fn test_paused_stream_is_skipped() {
        let quantum = 2;
        let engine = Engine::new(test_config(quantum), Box::new(CaptureSink::new()));
        engine.initialize().unwrap();

        let stream = engine.create_stream(stereo_f32_format()).unwrap();
        stream.add_data(&f32_bytes(&[0.5; 4]));
        stream.pause();

        let mut ctx = MixContext::new(&engine.shared.render_format, quantum);
        run_quantum(&engine.shared, &mut ctx);

        // Paused: quantum written as silence
        let first = f32::from_ne_bytes([ctx.outbuf[0], ctx.outbuf[1], ctx.outbuf[2], ctx.outbuf[3]]);
        assert_eq!(first, 0.0);
        assert_eq!(stream.buffered_packets(), 1);
    }

    #[test]
    fn test_destroyed_stream_removed_next_quantum() {
        let quantum = 2;
        let engine = Engine::new(test_config(quantum), Box::new(CaptureSink::new()));
        engine.initialize().unwrap();

        // Destroy with a packet still queued: the queue is discarded and the
        // engine drops the stream on its next sweep, not never.
        let stream = engine.create_stream(stereo_f32_format()).unwrap();
        stream.add_data(&f32_bytes(&[0.1; 4]));
        assert_eq!(stream.buffered_packets(), 1);
        stream.destroy();
        assert_eq!(engine.stream_count(), 1);

        let mut ctx = MixContext::new(&engine.shared.render_format, quantum);
        run_quantum(&engine.shared, &mut ctx);
        assert_eq!(engine.stream_count(), 0);
    }

    #[test]
    fn test_sound_effect_mixes_and_completes() {
        let quantum = 4;
        let engine = Engine::new(test_config(quantum), Box::new(CaptureSink::new()));
        engine.initialize().unwrap();

        // Fixture: stereo 48k wav, exactly one quantum long
        let path = std::env::temp_dir().join(format!("sono-engine-{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..quantum * 2 {
            writer.write_sample(8192i16).unwrap();
        }
        writer.finalize().unwrap();

        let effect = engine.load_sound(&path).unwrap();
        std::fs::remove_file(&path).ok();
        engine.play_sound(&effect, 1.0).unwrap();
        assert_eq!(engine.sound_count(), 1);

        let mut ctx = MixContext::new(&engine.shared.render_format, quantum);
        run_quantum(&engine.shared, &mut ctx);

        let first = f32::from_ne_bytes([ctx.outbuf[0], ctx.outbuf[1], ctx.outbuf[2], ctx.outbuf[3]]);
        assert!((first - 0.25).abs() < 1e-2);
        // Finished after one quantum
        assert_eq!(engine.sound_count(), 0);
    }

    #[test]
    fn test_write_failure_skips_quantum_and_retries() {
        let quantum = 2;
        let sink = CaptureSink::new();
        let written = sink.data();
        let fail = sink.failure_flag();
        let engine = Engine::new(test_config(quantum), Box::new(sink));
        engine.initialize().unwrap();

        let mut ctx = MixContext::new(&engine.shared.render_format, quantum);
        run_quantum(&engine.shared, &mut ctx); // stages one silent quantum

        // Inject a failure: the drain is skipped but nothing is lost
        fail.store(true, Ordering::Release);
        let staged = ctx.outbuf.len();
        run_quantum(&engine.shared, &mut ctx);
        assert!(ctx.outbuf.len() > staged);
        assert!(written.lock().unwrap().is_empty());

        // Recovery on the next quantum drains everything staged so far
        fail.store(false, Ordering::Release);
        run_quantum(&engine.shared, &mut ctx);
        assert_eq!(written.lock().unwrap().len(), 2 * ctx.quantum_bytes);
    }

    #[test]
    fn test_staging_bounded_while_sink_down() {
        let quantum = 2;
        let sink = CaptureSink::new();
        let fail = sink.failure_flag();
        let engine = Engine::new(test_config(quantum), Box::new(sink));
        engine.initialize().unwrap();

        fail.store(true, Ordering::Release);
        let mut ctx = MixContext::new(&engine.shared.render_format, quantum);
        for _ in 0..100 {
            run_quantum(&engine.shared, &mut ctx);
        }
        assert!(ctx.outbuf.len() <= MAX_STAGED_QUANTA * ctx.quantum_bytes);
    }
}
