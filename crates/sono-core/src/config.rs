//! Engine configuration
//!
//! Serde-backed YAML configuration with forgiving loading: a missing or
//! unparsable file falls back to defaults with a logged warning, so a bad
//! edit never prevents audio from starting.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::LayoutPreset;

/// Configuration surface of the audio engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output device name; "default" selects the system default
    pub device: String,
    /// Render sample rate in Hz
    pub sample_rate: u32,
    /// Speaker layout preset, 2.0 through 7.1
    pub layout: LayoutPreset,
    /// Scale downmix matrices so no output channel sums past unity
    pub normalize_downmix: bool,
    /// Frames mixed per engine quantum
    pub quantum_frames: usize,
    /// Buffered-packet threshold below which streams request more input
    pub stream_low_water: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: 48000,
            layout: LayoutPreset::Layout20,
            normalize_downmix: true,
            quantum_frames: 256,
            stream_low_water: 4,
        }
    }
}

/// Load a YAML config, falling back to defaults when missing or invalid
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("config: {:?} doesn't exist, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("config: failed to parse {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("config: failed to read {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save a config as YAML, creating parent directories as needed
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating config dir {:?}", parent))?;
    }
    let yaml = serde_yaml::to_string(config).context("serializing config")?;
    std::fs::write(path, yaml).with_context(|| format!("writing config {:?}", path))?;
    Ok(())
}

/// Default location of the engine config file
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sono")
        .join("engine.yaml")
}
