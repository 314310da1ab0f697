//! Preloaded sound effects
//!
//! Short samples played alongside streams without the full streaming
//! pipeline. A [`SoundBank`] loads WAV files once, converts them to the
//! engine's render format at load time, and hands out reference-counted
//! [`SoundEffect`]s. Effects unreferenced for 30 seconds are garbage
//! collected from the bank; the buffers themselves are freed on a background
//! collector thread so the mixer never pays for deallocation.

mod gc;
mod wav;

pub use gc::collector_handle;
pub use wav::{load_wav, WavData, WavError};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use basedrop::Shared;
use thiserror::Error;

use crate::remap::{DownmixMatrix, RemapError};
use crate::stream::{StreamError, StreamResampler};
use crate::types::{Channel, ChannelLayout, Sample};

/// Bank entries idle longer than this are collected
pub const SOUND_IDLE_EXPIRY: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SoundError {
    #[error(transparent)]
    Wav(#[from] WavError),

    #[error(transparent)]
    Remap(#[from] RemapError),

    #[error(transparent)]
    Resample(#[from] StreamError),
}

/// A loaded sample buffer in the engine's render format.
pub struct SoundEffect {
    name: String,
    samples: Shared<Vec<Sample>>,
    channels: usize,
    last_used: Mutex<Instant>,
}

impl SoundEffect {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used.lock().unwrap().elapsed()
    }
}

/// A playing occurrence of a sound effect. Holds its own reference to the
/// sample buffer, so the bank entry may expire while playback continues.
pub struct SoundInstance {
    samples: Shared<Vec<Sample>>,
    channels: usize,
    position: usize,
    volume: f32,
}

impl SoundInstance {
    pub fn new(effect: &SoundEffect, volume: f32) -> Self {
        effect.touch();
        Self {
            samples: effect.samples.clone(),
            channels: effect.channels,
            position: 0,
            volume: volume.clamp(0.0, 1.0),
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Copy the next frames into `out` (interleaved, render layout) and
    /// advance. Returns the number of samples written; 0 signals
    /// end-of-data.
    pub fn next_frame(&mut self, out: &mut [Sample]) -> usize {
        let remaining = self.samples.len() - self.position;
        let take = remaining.min(out.len());
        // Whole frames only
        let take = take - (take % self.channels);
        out[..take].copy_from_slice(&self.samples[self.position..self.position + take]);
        self.position += take;
        take
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.samples.len()
    }
}

/// Cache of loaded sound effects keyed by path.
pub struct SoundBank {
    render_rate: u32,
    render_layout: ChannelLayout,
    normalize_downmix: bool,
    sounds: Mutex<HashMap<PathBuf, Arc<SoundEffect>>>,
}

impl SoundBank {
    pub fn new(render_rate: u32, render_layout: ChannelLayout, normalize_downmix: bool) -> Self {
        Self {
            render_rate,
            render_layout,
            normalize_downmix,
            sounds: Mutex::new(HashMap::new()),
        }
    }

    /// Load a WAV file into the render format, or return the cached copy.
    pub fn get_or_load(&self, path: &Path) -> Result<Arc<SoundEffect>, SoundError> {
        if let Some(effect) = self.sounds.lock().unwrap().get(path) {
            effect.touch();
            return Ok(effect.clone());
        }

        let wav = load_wav(path)?;
        let samples = self.render_samples(&wav)?;
        let effect = Arc::new(SoundEffect {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            samples: Shared::new(&collector_handle(), samples),
            channels: self.render_layout.count(),
            last_used: Mutex::new(Instant::now()),
        });

        log::info!(
            "sound: loaded '{}' ({} frames at {} Hz)",
            effect.name(),
            effect.frames(),
            self.render_rate
        );
        self.sounds
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), effect.clone());
        Ok(effect)
    }

    /// Convert decoded WAV samples to the render rate and layout.
    fn render_samples(&self, wav: &WavData) -> Result<Vec<Sample>, SoundError> {
        // Mono carries center content; the remapper turns it into dual-mono
        // where the render layout has plain fronts.
        let source_layout = match wav.channels {
            1 => ChannelLayout::new(&[Channel::FC]).unwrap(),
            _ => ChannelLayout::new(&[Channel::FL, Channel::FR]).unwrap(),
        };
        let matrix = DownmixMatrix::build(
            &source_layout,
            &self.render_layout,
            true,
            self.normalize_downmix,
        )?;

        let at_rate: Vec<Sample> = if wav.sample_rate != self.render_rate {
            let mut resampler =
                StreamResampler::new(wav.sample_rate, self.render_rate, wav.channels as usize)?;
            let mut out = Vec::with_capacity(
                (wav.samples.len() as f64 * resampler.ratio()) as usize + 64,
            );
            resampler.process(&wav.samples, &mut out)?;
            resampler.flush_into(&mut out)?;
            out
        } else {
            wav.samples.clone()
        };

        let frames = at_rate.len() / wav.channels as usize;
        let mut rendered = vec![0.0; frames * self.render_layout.count()];
        matrix.remap(&at_rate, &mut rendered, frames);
        Ok(rendered)
    }

    /// Drop bank entries that are unreferenced and idle past the expiry.
    pub fn collect_idle(&self) {
        let mut sounds = self.sounds.lock().unwrap();
        sounds.retain(|path, effect| {
            let expired = Arc::strong_count(effect) == 1 && effect.idle_for() >= SOUND_IDLE_EXPIRY;
            if expired {
                log::debug!("sound: expiring idle '{}' ({:?})", effect.name(), path);
            }
            !expired
        });
    }

    pub fn len(&self) -> usize {
        self.sounds.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sounds.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LayoutPreset;

    fn fixture(name: &str, rate: u32, channels: u16, frames: usize) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "sono-sound-{}-{}.wav",
            std::process::id(),
            name
        ));
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..frames * channels as usize {
            writer.write_sample(((i % 64) as i16) << 8).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn stereo_bank() -> SoundBank {
        SoundBank::new(48000, ChannelLayout::preset(LayoutPreset::Layout20), true)
    }

    #[test]
    fn test_load_and_cache() {
        let bank = stereo_bank();
        let path = fixture("cache", 48000, 2, 128);

        let a = bank.get_or_load(&path).unwrap();
        let b = bank.get_or_load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.frames(), 128);
        assert_eq!(bank.len(), 1);
    }

    #[test]
    fn test_mono_upmixes_to_dual_mono() {
        let bank = stereo_bank();
        let path = fixture("mono", 48000, 1, 16);
        let effect = bank.get_or_load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let mut instance = SoundInstance::new(&effect, 1.0);
        let mut out = vec![0.0f32; 32];
        assert_eq!(instance.next_frame(&mut out), 32);
        for frame in out.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_instance_reports_end_of_data() {
        let bank = stereo_bank();
        let path = fixture("end", 48000, 2, 4);
        let effect = bank.get_or_load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let mut instance = SoundInstance::new(&effect, 0.5);
        let mut out = vec![0.0f32; 6];
        assert_eq!(instance.next_frame(&mut out), 6);
        assert_eq!(instance.next_frame(&mut out), 2);
        assert!(instance.is_finished());
        assert_eq!(instance.next_frame(&mut out), 0);
    }

    #[test]
    fn test_bad_file_retains_nothing() {
        let bank = stereo_bank();
        let path = std::env::temp_dir().join(format!("sono-sound-{}-bad", std::process::id()));
        std::fs::write(&path, b"not audio").unwrap();

        assert!(bank.get_or_load(&path).is_err());
        assert!(bank.is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_collect_keeps_referenced_entries() {
        let bank = stereo_bank();
        let path = fixture("gc", 48000, 2, 8);
        let _held = bank.get_or_load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        bank.collect_idle();
        assert_eq!(bank.len(), 1); // referenced, never expired
    }
}
