//! Hardware sink boundary
//!
//! The engine consumes sinks opaquely through the narrow [`Sink`] trait;
//! platform details stay behind it. `CpalSink` is the cross-platform
//! reference implementation; [`CaptureSink`] records everything written for
//! tests and diagnostics.

mod cpal_backend;

pub use cpal_backend::CpalSink;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::types::AudioFormat;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no audio output device matching '{0}'")]
    DeviceNotFound(String),

    #[error("failed to open sink: {0}")]
    OpenFailed(String),

    #[error("sink is not initialized")]
    NotInitialized,

    #[error("sink write failed: {0}")]
    WriteFailed(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Narrow interface the mixer writes through.
///
/// `add_packets` accepts interleaved bytes in the format negotiated by
/// `initialize` and returns the number of whole frames consumed. It is the
/// one call in the pipeline allowed to block; that blocking is the engine's
/// flow control.
pub trait Sink: Send {
    fn initialize(&mut self, format: &AudioFormat, device: &str) -> SinkResult<()>;

    fn add_packets(&mut self, data: &[u8]) -> SinkResult<usize>;

    /// Seconds of audio buffered downstream
    fn get_delay(&self) -> f64;

    fn stop(&mut self);
}

/// Sink that appends every write to a shared byte buffer. Never blocks.
/// The buffer and failure flag stay reachable through cloned handles after
/// the sink itself is boxed away behind the trait.
#[derive(Default)]
pub struct CaptureSink {
    format: Option<AudioFormat>,
    data: Arc<Mutex<Vec<u8>>>,
    fail_writes: Arc<AtomicBool>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(&self) -> Option<&AudioFormat> {
        self.format.as_ref()
    }

    /// Handle onto everything written so far
    pub fn data(&self) -> Arc<Mutex<Vec<u8>>> {
        self.data.clone()
    }

    /// Handle onto the failure toggle; while set, writes fail without
    /// consuming anything
    pub fn failure_flag(&self) -> Arc<AtomicBool> {
        self.fail_writes.clone()
    }
}

impl Sink for CaptureSink {
    fn initialize(&mut self, format: &AudioFormat, _device: &str) -> SinkResult<()> {
        self.format = Some(format.clone());
        Ok(())
    }

    fn add_packets(&mut self, data: &[u8]) -> SinkResult<usize> {
        let format = self.format.as_ref().ok_or(SinkError::NotInitialized)?;
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(SinkError::WriteFailed("capture sink failure injected".into()));
        }
        let frames = data.len() / format.frame_size;
        self.data
            .lock()
            .unwrap()
            .extend_from_slice(&data[..frames * format.frame_size]);
        Ok(frames)
    }

    fn get_delay(&self) -> f64 {
        0.0
    }

    fn stop(&mut self) {}
}
