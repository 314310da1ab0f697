//! Engine error types

use thiserror::Error;

use crate::remap::RemapError;
use crate::sink::SinkError;
use crate::sound::SoundError;
use crate::stream::StreamError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine never initialized (or its sink failed to open); all
    /// factory calls fail closed in this state.
    #[error("engine is not initialized")]
    NotReady,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Sound(#[from] SoundError),

    #[error(transparent)]
    Remap(#[from] RemapError),
}

pub type EngineResult<T> = Result<T, EngineError>;
