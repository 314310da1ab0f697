//! Engine orchestration: lifecycle, the mixing loop, and its error type

mod engine;
mod error;

pub use engine::{Engine, EngineState};
pub use error::{EngineError, EngineResult};
