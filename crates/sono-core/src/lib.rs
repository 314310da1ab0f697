//! Sono Core - Real-time audio mixing and rendering engine

pub mod config;
pub mod engine;
pub mod format;
pub mod passthrough;
pub mod remap;
pub mod sink;
pub mod sound;
pub mod stream;
pub mod types;

pub use types::*;

pub use config::EngineConfig;
pub use engine::{Engine, EngineError, EngineResult, EngineState};
pub use passthrough::{Iec958Packet, PassthroughPacketizer};
pub use sink::{CaptureSink, CpalSink, Sink, SinkError};
pub use sound::{SoundBank, SoundEffect};
pub use stream::{AudioStream, PostProcessor, StreamError};
