//! Deployment settings for unattended streaming.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest allowed update interval in minutes.
pub const MIN_UPDATE_INTERVAL: u32 = 10;
/// Over-sample rate bounds, samples per update interval.
pub const OVER_SAMPLE_RATE_RANGE: (u32, u32) = (1, 100);
/// Largest filter time constant in percent of the update interval.
pub const MAX_FILTER_PERCENT: u32 = 250;

fn default_folder() -> String {
    "folder".to_string()
}

fn default_group() -> String {
    "group".to_string()
}

fn default_key() -> String {
    "key".to_string()
}

fn default_update_interval() -> u32 {
    60
}

fn default_over_sample_rate() -> u32 {
    10
}

fn default_filter_in_percent() -> u32 {
    10
}

/// Where and how often deployed sensors are reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default = "default_folder")]
    folder_name: String,
    #[serde(default = "default_group")]
    group_name: String,
    #[serde(default = "default_key")]
    key_name: String,
    /// Minutes between reports.
    #[serde(default = "default_update_interval")]
    update_interval: u32,
    /// Samples filtered per report.
    #[serde(default = "default_over_sample_rate", alias = "over_sample_rag")]
    over_sample_rate: u32,
    /// Filter time constant in percent of the update interval.
    #[serde(default = "default_filter_in_percent")]
    filter_in_percent: u32,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            folder_name: default_folder(),
            group_name: default_group(),
            key_name: default_key(),
            update_interval: default_update_interval(),
            over_sample_rate: default_over_sample_rate(),
            filter_in_percent: default_filter_in_percent(),
        }
    }
}

fn identifier(name: &str) -> String {
    name.trim().replace(' ', "_")
}

impl Deployment {
    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn update_interval(&self) -> u32 {
        self.update_interval
    }

    pub fn over_sample_rate(&self) -> u32 {
        self.over_sample_rate
    }

    pub fn filter_in_percent(&self) -> u32 {
        self.filter_in_percent
    }

    pub fn set_folder_name(&mut self, name: &str) {
        self.folder_name = identifier(name);
    }

    pub fn set_group_name(&mut self, name: &str) {
        self.group_name = identifier(name);
    }

    pub fn set_key_name(&mut self, name: &str) {
        self.key_name = identifier(name);
    }

    pub fn set_update_interval(&mut self, minutes: u32) {
        self.update_interval = minutes.max(MIN_UPDATE_INTERVAL);
    }

    pub fn set_over_sample_rate(&mut self, rate: u32) {
        let (min, max) = OVER_SAMPLE_RATE_RANGE;
        self.over_sample_rate = rate.clamp(min, max);
    }

    pub fn set_filter_in_percent(&mut self, percent: u32) {
        self.filter_in_percent = percent.min(MAX_FILTER_PERCENT);
    }

    /// Time between reports.
    pub fn stream_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.update_interval) * 60)
    }

    /// Time between filtered samples.
    pub fn sample_period(&self) -> Duration {
        self.stream_period() / self.over_sample_rate.max(1)
    }

    /// Rolling average constant, never below 1.
    pub fn time_constant(&self) -> f64 {
        (f64::from(self.filter_in_percent) / 100.0).max(1.0)
    }
}

/// Exponential rolling average, `value += (sample - value) / n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingAverage {
    n: f64,
    value: f64,
}

impl RollingAverage {
    /// Filter constants below 1 are raised to 1 (no filtering).
    pub fn new(filter_constant: f64, initial_value: f64) -> Self {
        let n = if filter_constant.is_finite() {
            filter_constant.max(1.0)
        } else {
            1.0
        };
        Self {
            n,
            value: initial_value,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        self.value += (sample - self.value) / self.n;
        self.value
    }
}
