//! Calibration records.
//!
//! A calibration is the persisted result of running a procedure against one
//! sensor: the setpoints that were sampled, the equation fitted from them and
//! the date from which it is trusted.

use crate::equation::Equation;
use crate::setpoint::{SamplingConfig, Setpoint};
use crate::Result;
use chrono::{Local, NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn no_interval() -> TimeDelta {
    TimeDelta::zero()
}

/// Calibration state of a single sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    procedure_type: String,
    scaled_units: String,
    #[serde(default)]
    unit_id: String,
    #[serde(default = "epoch")]
    timestamp: NaiveDate,
    #[serde(with = "days", default = "no_interval")]
    interval: TimeDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    equation: Option<Equation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    parameters: BTreeMap<String, Setpoint>,
}

impl Calibration {
    /// A fresh, never committed calibration.
    pub fn new(procedure_type: &str, scaled_units: &str, unit_id: &str, interval: TimeDelta) -> Self {
        Self {
            procedure_type: procedure_type.to_string(),
            scaled_units: scaled_units.to_string(),
            unit_id: unit_id.to_string(),
            timestamp: epoch(),
            interval,
            equation: None,
            parameters: BTreeMap::new(),
        }
    }

    pub fn procedure_type(&self) -> &str {
        &self.procedure_type
    }

    pub fn scaled_units(&self) -> &str {
        &self.scaled_units
    }

    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// Date of the last commit; the epoch when never committed.
    pub fn timestamp(&self) -> NaiveDate {
        self.timestamp
    }

    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    pub fn set_interval(&mut self, interval: TimeDelta) {
        self.interval = interval;
    }

    pub fn is_committed(&self) -> bool {
        self.timestamp != epoch()
    }

    /// First day the calibration is stale.
    ///
    /// `None` when never committed. A zero interval never expires.
    pub fn due_date(&self) -> Option<NaiveDate> {
        if !self.is_committed() {
            return None;
        }
        if self.interval.is_zero() {
            return Some(NaiveDate::MAX);
        }
        Some(
            self.timestamp
                .checked_add_signed(self.interval)
                .unwrap_or(NaiveDate::MAX),
        )
    }

    /// Whether the calibration is trusted today.
    pub fn is_valid(&self) -> bool {
        self.is_valid_on(Local::now().date_naive())
    }

    /// Whether the calibration is trusted on `today`.
    pub fn is_valid_on(&self, today: NaiveDate) -> bool {
        match self.due_date() {
            Some(due) => today < due,
            None => false,
        }
    }

    /// Marks the calibration as never committed.
    pub fn invalidate(&mut self) {
        debug!("Invalidating {} calibration", self.procedure_type);
        self.timestamp = epoch();
    }

    /// Stamps the calibration as made on `today`.
    pub fn commit(&mut self, today: NaiveDate) {
        self.timestamp = today;
    }

    pub fn equation(&self) -> Option<&Equation> {
        self.equation.as_ref()
    }

    pub fn equation_mut(&mut self) -> Option<&mut Equation> {
        self.equation.as_mut()
    }

    pub fn set_equation(&mut self, equation: Equation) {
        self.equation = Some(equation);
    }

    pub fn parameter(&self, name: &str) -> Option<&Setpoint> {
        self.parameters.get(name)
    }

    pub fn parameters(&self) -> &BTreeMap<String, Setpoint> {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut BTreeMap<String, Setpoint> {
        &mut self.parameters
    }

    /// Applies one sampling pace to every sampled parameter.
    pub fn set_sampling(&mut self, sampling: SamplingConfig) -> Result<()> {
        sampling.validate()?;
        for setpoint in self.parameters.values_mut() {
            if let Setpoint::Sampled(sampled) = setpoint {
                sampled.set_sampling(sampling)?;
            }
        }
        Ok(())
    }

    /// Fits the equation from two named parameters.
    pub fn generate_from(&mut self, a: &str, b: &str) -> bool {
        let Some(equation) = self.equation.as_mut() else {
            warn!("{} calibration has no equation to fit", self.procedure_type);
            return false;
        };
        match (self.parameters.get(a), self.parameters.get(b)) {
            (Some(a), Some(b)) => equation.generate(a, b),
            _ => {
                warn!("{} calibration is missing {} or {}", self.procedure_type, a, b);
                false
            }
        }
    }
}

/// Serializes a `TimeDelta` as whole days.
///
/// Older documents stored the interval as a string; both forms are read.
pub(crate) mod days {
    use chrono::TimeDelta;
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Days {
        Number(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(interval: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(interval.num_days())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TimeDelta, D::Error> {
        let days = match Days::deserialize(deserializer)? {
            Days::Number(days) => days,
            Days::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| de::Error::custom(format!("invalid interval '{}'", text)))?,
        };
        if days < 0 {
            return Err(de::Error::custom(format!("negative interval {}", days)));
        }
        TimeDelta::try_days(days).ok_or_else(|| de::Error::custom(format!("interval {} out of range", days)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation::LinearEquation;
    use crate::quantity::Quantity;
    use crate::setpoint::ConstantSetpoint;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn calibration(days: i64) -> Calibration {
        Calibration::new("PolynomialProcedure", "pH", "pH", TimeDelta::days(days))
    }

    #[test]
    fn test_never_committed_is_invalid() {
        let cal = calibration(180);
        assert!(!cal.is_committed());
        assert_eq!(cal.due_date(), None);
        assert!(!cal.is_valid());
    }

    #[test]
    fn test_validity_boundary() {
        let mut cal = calibration(30);
        cal.commit(date(2024, 1, 1));
        assert_eq!(cal.due_date(), Some(date(2024, 1, 31)));
        assert!(cal.is_valid_on(date(2024, 1, 1)));
        assert!(cal.is_valid_on(date(2024, 1, 30)));
        assert!(!cal.is_valid_on(date(2024, 1, 31)));

        let today = Local::now().date_naive();
        cal.commit(today - TimeDelta::days(30));
        assert!(!cal.is_valid());
        cal.commit(today - TimeDelta::days(29));
        assert!(cal.is_valid());
    }

    #[test]
    fn test_zero_interval_never_expires() {
        let mut cal = calibration(0);
        assert!(!cal.is_valid_on(date(2024, 1, 1)));
        cal.commit(date(2024, 1, 1));
        assert!(cal.is_valid_on(date(2099, 12, 31)));
    }

    #[test]
    fn test_invalidate() {
        let mut cal = calibration(180);
        cal.commit(Local::now().date_naive());
        assert!(cal.is_valid());
        cal.invalidate();
        assert!(!cal.is_valid());
        assert_eq!(cal.timestamp(), NaiveDate::default());
    }

    #[test]
    fn test_generate_from_parameters() {
        let mut cal = calibration(180);
        assert!(!cal.generate_from("sp1", "sp2"));

        cal.set_equation(Equation::Linear(LinearEquation::default()));
        assert!(!cal.generate_from("sp1", "sp2"));

        cal.parameters_mut().insert(
            "sp1".to_string(),
            ConstantSetpoint::new(Quantity::new("SP1", "pH", 4.0), Quantity::new("Measured", "mV", 177.0)).into(),
        );
        cal.parameters_mut().insert(
            "sp2".to_string(),
            ConstantSetpoint::new(Quantity::new("SP2", "pH", 7.0), Quantity::new("Measured", "mV", 0.0)).into(),
        );
        assert!(cal.generate_from("sp1", "sp2"));
        match cal.equation() {
            Some(Equation::Linear(eq)) => {
                approx::assert_relative_eq!(eq.slope(), -59.0);
                approx::assert_relative_eq!(eq.offset(), 413.0);
            }
            other => panic!("unexpected equation {:?}", other),
        }
    }

    #[test]
    fn test_set_sampling() {
        let mut cal = calibration(180);
        cal.parameters_mut().insert(
            "sp1".to_string(),
            ConstantSetpoint::of(Quantity::new("SP1", "mg/L", 0.0)).into(),
        );
        cal.parameters_mut().insert(
            "sp2".to_string(),
            crate::setpoint::SampledSetpoint::new(Quantity::new("SP2", "mg/L", 9.09)).into(),
        );
        let fast = SamplingConfig {
            sample_period: 0.05,
            update_period: 0.5,
            sample_count: 10,
        };
        cal.set_sampling(fast).unwrap();
        match cal.parameter("sp2") {
            Some(Setpoint::Sampled(sampled)) => assert_eq!(sampled.sampling(), &fast),
            other => panic!("unexpected setpoint {:?}", other),
        }

        let broken = SamplingConfig {
            sample_count: 0,
            ..fast
        };
        assert!(cal.set_sampling(broken).is_err());
    }

    #[test]
    fn test_round_trip() {
        let mut cal = calibration(180);
        cal.set_equation(Equation::Linear(LinearEquation::new(-59.0, 413.0)));
        cal.parameters_mut().insert(
            "sp1".to_string(),
            ConstantSetpoint::of(Quantity::new("SP1", "pH", 4.0)).into(),
        );
        cal.commit(date(2024, 3, 15));

        let text = toml::to_string(&cal).unwrap();
        assert!(text.contains("interval = 180"));
        assert!(text.contains("timestamp = \"2024-03-15\""));
        let back: Calibration = toml::from_str(&text).unwrap();
        assert_eq!(back, cal);
    }

    #[test]
    fn test_legacy_interval_string() {
        let text = r#"
            procedure_type = "PhProcedure"
            scaled_units = "pH"
            timestamp = "2023-06-01"
            interval = "90"
        "#;
        let cal: Calibration = toml::from_str(text).unwrap();
        assert_eq!(cal.interval(), TimeDelta::days(90));
        assert_eq!(cal.unit_id(), "");
        assert!(cal.equation().is_none());

        let bad = text.replace("\"90\"", "\"soon\"");
        assert!(toml::from_str::<Calibration>(&bad).is_err());
    }
}
