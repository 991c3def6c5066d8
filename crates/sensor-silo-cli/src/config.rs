//! Configuration management.

use anyhow::{Context, Result};
use sensor_silo_core::SamplingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Application configuration, kept apart from the silo document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Silo document name, sanitised and suffixed by the file store
    #[serde(default = "default_silo_file")]
    pub silo_file: String,

    /// Directory holding silo documents
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Pacing applied to every sampled setpoint before a calibration run
    #[serde(default)]
    pub sampling: Option<SamplingConfig>,

    /// Simulated stream configuration
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Stand-in for converter boards when no hardware is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Stream types served by the simulator
    #[serde(default = "default_stream_types")]
    pub stream_types: Vec<String>,

    /// Mean reading in millivolts
    #[serde(default = "default_level")]
    pub level: f64,

    /// Peak ripple around the mean in millivolts
    #[serde(default = "default_ripple")]
    pub ripple: f64,

    /// Conversion time in milliseconds
    #[serde(default = "default_conversion_ms")]
    pub conversion_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            stream_types: default_stream_types(),
            level: default_level(),
            ripple: default_ripple(),
            conversion_ms: default_conversion_ms(),
        }
    }
}

// Default value functions
fn default_silo_file() -> String {
    "deployment".to_string()
}

fn default_data_dir() -> String {
    ".".to_string()
}

fn default_stream_types() -> Vec<String> {
    vec![
        "PhorpSource".to_string(),
        "PhorpStream".to_string(),
        "Simulated".to_string(),
    ]
}

fn default_level() -> f64 {
    0.0
}

fn default_ripple() -> f64 {
    0.5
}

fn default_conversion_ms() -> u64 {
    17
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        if let Some(sampling) = &config.sampling {
            sampling
                .validate()
                .context("Invalid sampling override in configuration")?;
        }
        Ok(config)
    }

    /// Loads the configuration, falling back to defaults when the file is absent.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            debug!(
                "No configuration at {}, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            silo_file: default_silo_file(),
            data_dir: default_data_dir(),
            sampling: None,
            simulator: SimulatorConfig::default(),
        }
    }
}
