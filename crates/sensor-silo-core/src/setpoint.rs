//! Calibration setpoints.
//!
//! A setpoint pairs a known reference (the target quantity, e.g. a pH 7.0
//! buffer) with the sensor's response to it (the measured quantity). Constant
//! setpoints know their response up front; sampled setpoints acquire it by
//! averaging live readings while the probe sits in the reference solution.

use crate::operator::{Operator, BEGIN_KEY, REPEAT_KEY};
use crate::quantity::Quantity;
use crate::sensor::Sensor;
use crate::stats::RunningStats;
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// One calibration reference point.
///
/// Records carry a `type` tag. A bare quantity table without one, as older
/// thermistor procedures wrote their constants, loads as a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(remote = "Self")]
pub enum Setpoint {
    #[serde(rename = "ConstantSetpoint")]
    Constant(ConstantSetpoint),
    #[serde(rename = "SampledSetpoint", alias = "StreamSetpoint")]
    Sampled(SampledSetpoint),
}

impl Serialize for Setpoint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        Setpoint::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for Setpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let record = toml::Value::deserialize(deserializer)?;
        if record.get("type").is_some() {
            Setpoint::deserialize(record).map_err(serde::de::Error::custom)
        } else {
            let quantity: Quantity = record.try_into().map_err(serde::de::Error::custom)?;
            Ok(ConstantSetpoint::of(quantity).into())
        }
    }
}

impl Setpoint {
    /// Parameter key, the lower-cased target name (`sp1`, `beta`, ...).
    pub fn name(&self) -> String {
        self.target().name().to_lowercase()
    }

    pub fn target(&self) -> &Quantity {
        match self {
            Setpoint::Constant(sp) => &sp.target_quantity,
            Setpoint::Sampled(sp) => &sp.target_quantity,
        }
    }

    pub fn target_mut(&mut self) -> &mut Quantity {
        match self {
            Setpoint::Constant(sp) => &mut sp.target_quantity,
            Setpoint::Sampled(sp) => &mut sp.target_quantity,
        }
    }

    pub fn measured(&self) -> &Quantity {
        match self {
            Setpoint::Constant(sp) => &sp.measured_quantity,
            Setpoint::Sampled(sp) => &sp.measured_quantity,
        }
    }

    /// Produces the measured quantity for this reference.
    ///
    /// Returns `Ok(false)` when the operator cancels; errors are stream or
    /// operator I/O failures.
    pub async fn run(&mut self, sensor: &mut Sensor, operator: &mut dyn Operator) -> Result<bool> {
        match self {
            Setpoint::Constant(sp) => Ok(sp.run()),
            Setpoint::Sampled(sp) => sp.run(sensor, operator).await,
        }
    }
}

impl From<ConstantSetpoint> for Setpoint {
    fn from(sp: ConstantSetpoint) -> Self {
        Setpoint::Constant(sp)
    }
}

impl From<SampledSetpoint> for Setpoint {
    fn from(sp: SampledSetpoint) -> Self {
        Setpoint::Sampled(sp)
    }
}

/// Reference whose response is known without sampling, e.g. a zero oxygen
/// solution or a thermistor datasheet constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ConstantRecord")]
pub struct ConstantSetpoint {
    target_quantity: Quantity,
    measured_quantity: Quantity,
}

impl ConstantSetpoint {
    pub fn new(target_quantity: Quantity, measured_quantity: Quantity) -> Self {
        Self {
            target_quantity,
            measured_quantity,
        }
    }

    /// A constant whose response equals its target.
    pub fn of(target_quantity: Quantity) -> Self {
        let measured_quantity = target_quantity.clone();
        Self::new(target_quantity, measured_quantity)
    }

    fn run(&self) -> bool {
        true
    }
}

#[derive(Deserialize)]
struct ConstantRecord {
    target_quantity: Quantity,
    measured_quantity: Option<Quantity>,
}

impl From<ConstantRecord> for ConstantSetpoint {
    fn from(record: ConstantRecord) -> Self {
        match record.measured_quantity {
            Some(measured) => Self::new(record.target_quantity, measured),
            None => Self::of(record.target_quantity),
        }
    }
}

/// Pacing of a sampled setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seconds between samples.
    pub sample_period: f64,
    /// Seconds between progress reports.
    pub update_period: f64,
    /// Samples per attempt.
    pub sample_count: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_period: 0.1,
            update_period: 1.0,
            sample_count: 50,
        }
    }
}

impl SamplingConfig {
    /// Slower pacing used by the pH template.
    pub fn legacy_ph() -> Self {
        Self {
            sample_period: 0.2,
            update_period: 1.0,
            sample_count: 30,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let period_ok = |p: f64| p.is_finite() && p >= 0.0;
        if !period_ok(self.sample_period) || !period_ok(self.update_period) {
            return Err(Error::InvalidValue(
                "sampling periods must be finite and not negative".to_string(),
            ));
        }
        if self.sample_count == 0 {
            return Err(Error::InvalidValue(
                "sample count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn period(seconds: f64) -> Duration {
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
    }
}

fn default_measured() -> Quantity {
    Quantity::unset("Measured", "")
}

/// Reference whose response is averaged from live stream readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledSetpoint {
    target_quantity: Quantity,
    #[serde(default = "default_measured")]
    measured_quantity: Quantity,
    #[serde(default)]
    sampling: SamplingConfig,
    #[serde(skip)]
    stats: RunningStats,
}

impl SampledSetpoint {
    pub fn new(target_quantity: Quantity) -> Self {
        Self::with_sampling(target_quantity, SamplingConfig::default())
    }

    pub fn with_sampling(target_quantity: Quantity, sampling: SamplingConfig) -> Self {
        Self {
            target_quantity,
            measured_quantity: default_measured(),
            sampling,
            stats: RunningStats::new(),
        }
    }

    pub fn sampling(&self) -> &SamplingConfig {
        &self.sampling
    }

    pub fn set_sampling(&mut self, sampling: SamplingConfig) -> Result<()> {
        sampling.validate()?;
        self.sampling = sampling;
        Ok(())
    }

    /// Statistics of the last sampling attempt.
    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    /// Confirm, sample, review; repeats sampling until the operator accepts.
    async fn run(&mut self, sensor: &mut Sensor, operator: &mut dyn Operator) -> Result<bool> {
        self.sampling.validate()?;
        self.measured_quantity = Quantity::unset("Measured", sensor.raw_units()?);

        operator.display(&format!(
            "ready {} reference. press <space> to begin, <x> to cancel",
            self.target_quantity
        ));
        if operator.read_key().await? != BEGIN_KEY {
            operator.display("run canceled");
            info!("Setpoint {} canceled by operator", self.target_quantity.name());
            return Ok(false);
        }

        loop {
            self.sample(sensor, operator).await?;
            operator.display(&format!(
                "{}: {}",
                self.target_quantity,
                self.stats.synopsis()
            ));

            operator.display(&format!(
                "{} reference. <space> to repeat, <enter> to accept",
                self.target_quantity
            ));
            if operator.read_key().await? == REPEAT_KEY {
                debug!("Repeating setpoint {}", self.target_quantity.name());
                continue;
            }

            self.measured_quantity.set_value(self.stats.mean());
            info!(
                "Setpoint {} accepted: {}",
                self.target_quantity.name(),
                self.stats.synopsis()
            );
            return Ok(true);
        }
    }

    /// One sampling attempt paced against wall-clock deadlines.
    ///
    /// Deadlines accumulate from the start of the attempt; when the loop
    /// falls behind, the next deadline restarts from now instead of bursting.
    async fn sample(&mut self, sensor: &mut Sensor, operator: &mut dyn Operator) -> Result<()> {
        let sample_period = SamplingConfig::period(self.sampling.sample_period);
        let update_period = SamplingConfig::period(self.sampling.update_period);

        self.stats.clear();
        let mut sample_time = Instant::now();
        let mut update_time = sample_time;

        for _ in 0..self.sampling.sample_count {
            sensor.update().await?;
            let raw = sensor.raw_value()?;
            self.stats.push(raw);

            let now = Instant::now();
            if now >= update_time {
                operator.progress(raw);
                update_time += update_period;
            }

            sample_time += sample_period;
            if sample_time < now {
                sample_time = now;
            }
            sleep_until(sample_time).await;
        }
        Ok(())
    }
}
