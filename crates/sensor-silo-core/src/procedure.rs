//! Calibration procedures.
//!
//! A procedure is the template for one sensor kind: which stream the sensor
//! reads, which reference setpoints it is calibrated against and which
//! equation is fitted from them. Procedures prepare sensors, drive a
//! calibration run and commit the result.

use crate::calibration::{days, Calibration};
use crate::equation::{BiasedNtcBetaEquation, Equation, LinearEquation};
use crate::operator::Operator;
use crate::quantity::Quantity;
use crate::sensor::Sensor;
use crate::setpoint::{ConstantSetpoint, SampledSetpoint, SamplingConfig, Setpoint};
use crate::stream::{ChannelAddress, Streams};
use crate::{Error, Result};
use chrono::{Local, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Stream type of the converter boards used by the stock templates.
pub const PHORP_STREAM: &str = "PhorpSource";

/// Default calibration interval in days.
pub const DEFAULT_INTERVAL_DAYS: i64 = 180;

/// Which equation a procedure fits and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcedureType {
    /// Two point linear fit from sampled references.
    #[serde(
        rename = "PolynomialProcedure",
        alias = "PhProcedure",
        alias = "OrpProcedure",
        alias = "DoProcedure"
    )]
    Polynomial,
    /// Thermistor read as a divider voltage.
    #[serde(
        rename = "BiasedNtcBetaProcedure",
        alias = "NtcBetaProcedure",
        alias = "ThermistorProcedure",
        alias = "PhorpNtcBetaProcedure"
    )]
    BiasedNtcBeta,
}

impl ProcedureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureType::Polynomial => "PolynomialProcedure",
            ProcedureType::BiasedNtcBeta => "BiasedNtcBetaProcedure",
        }
    }

    /// Fresh, unfitted equation for this procedure.
    pub fn new_equation(&self) -> Equation {
        match self {
            ProcedureType::Polynomial => Equation::Linear(LinearEquation::default()),
            ProcedureType::BiasedNtcBeta => Equation::BiasedNtcBeta(BiasedNtcBetaEquation::default()),
        }
    }

    /// Whether the equation is fitted from setpoints rather than constants.
    pub fn is_fitted(&self) -> bool {
        matches!(self, ProcedureType::Polynomial)
    }
}

impl std::fmt::Display for ProcedureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcedureType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "PolynomialProcedure" | "PhProcedure" | "OrpProcedure" | "DoProcedure" => {
                Ok(ProcedureType::Polynomial)
            }
            "BiasedNtcBetaProcedure"
            | "NtcBetaProcedure"
            | "ThermistorProcedure"
            | "PhorpNtcBetaProcedure" => {
                Ok(ProcedureType::BiasedNtcBeta)
            }
            other => Err(Error::UnknownProcedure(other.to_string())),
        }
    }
}

/// Result of a calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// New calibration installed and stamped today.
    Committed,
    /// Operator canceled at a confirmation.
    Canceled,
    /// Fit failed; nothing installed.
    Failed,
}

/// Read-only calibration diagnostic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityReport {
    OutOfCalibration,
    /// Slope in raw units per scaled unit and the raw reading expected at
    /// the reference point.
    Linear {
        slope: f64,
        reference: f64,
        raw_at_reference: f64,
    },
    Unsupported,
}

impl std::fmt::Display for QualityReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityReport::OutOfCalibration => write!(f, "sensor out of calibration"),
            QualityReport::Linear {
                slope,
                reference,
                raw_at_reference,
            } => write!(
                f,
                "slope = {:.3} mV/unit, offset = {:.3} mV at {}",
                slope, raw_at_reference, reference
            ),
            QualityReport::Unsupported => {
                write!(f, "calibration equation is unsupported for quality evaluation")
            }
        }
    }
}

fn default_interval() -> TimeDelta {
    TimeDelta::days(DEFAULT_INTERVAL_DAYS)
}

fn default_point_count() -> usize {
    2
}

/// Calibration template for one sensor kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    #[serde(rename = "type")]
    procedure_type: ProcedureType,
    kind: String,
    #[serde(default)]
    property: String,
    scaled_units: String,
    #[serde(default)]
    unit_id: String,
    stream_type: String,
    stream_address: String,
    #[serde(with = "days", default = "default_interval")]
    interval: TimeDelta,
    #[serde(default = "default_point_count")]
    point_count: usize,
    #[serde(default)]
    quality_reference: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    parameters: BTreeMap<String, Setpoint>,
}

impl Procedure {
    fn template(
        procedure_type: ProcedureType,
        kind: &str,
        property: &str,
        scaled_units: &str,
        unit_id: &str,
        stream_address: &str,
    ) -> Self {
        Self {
            procedure_type,
            kind: kind.to_string(),
            property: property.to_string(),
            scaled_units: scaled_units.to_string(),
            unit_id: unit_id.to_string(),
            stream_type: PHORP_STREAM.to_string(),
            stream_address: stream_address.to_string(),
            interval: default_interval(),
            point_count: default_point_count(),
            quality_reference: 0.0,
            parameters: BTreeMap::new(),
        }
    }

    fn with_parameter(mut self, setpoint: impl Into<Setpoint>) -> Self {
        let setpoint = setpoint.into();
        self.parameters.insert(setpoint.name(), setpoint);
        self
    }

    /// pH probe, three buffers with the 4/7 pair fitted by default.
    pub fn ph() -> Self {
        let sp = |name, value| {
            SampledSetpoint::with_sampling(Quantity::new(name, "pH", value), SamplingConfig::legacy_ph())
        };
        let mut procedure = Self::template(ProcedureType::Polynomial, "ph", "pH", "pH", "ph", "a2")
            .with_parameter(sp("SP1", 4.0))
            .with_parameter(sp("SP2", 7.0))
            .with_parameter(sp("SP3", 10.0));
        procedure.quality_reference = 7.0;
        procedure
    }

    /// Redox potential probe.
    pub fn orp() -> Self {
        Self::template(ProcedureType::Polynomial, "orp", "Eh", "mV", "milli_volts", "a2")
            .with_parameter(SampledSetpoint::new(Quantity::new("SP1", "mV", 0.0)))
            .with_parameter(SampledSetpoint::new(Quantity::new("SP2", "mV", 225.0)))
    }

    /// Dissolved oxygen probe; the zero point is a known constant.
    pub fn dissolved_oxygen() -> Self {
        Self::template(ProcedureType::Polynomial, "do", "Dissolved Oxygen", "mg/L", "mg_l", "a2")
            .with_parameter(ConstantSetpoint::of(Quantity::new("SP1", "mg/L", 0.0)))
            .with_parameter(SampledSetpoint::new(Quantity::new("SP2", "mg/L", 9.09)))
    }

    /// NTC thermistor on a biased divider.
    pub fn ntc() -> Self {
        Self::template(
            ProcedureType::BiasedNtcBeta,
            "ntc",
            "Temperature",
            "Celsius",
            "celsius",
            "a1",
        )
        .with_parameter(ConstantSetpoint::of(Quantity::new("Beta", "K", 3574.6)))
        .with_parameter(ConstantSetpoint::of(Quantity::new("R25", "Ohms", 10000.0)))
    }

    pub fn procedure_type(&self) -> ProcedureType {
        self.procedure_type
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn scaled_units(&self) -> &str {
        &self.scaled_units
    }

    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    pub fn stream_address(&self) -> &str {
        &self.stream_address
    }

    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn parameters(&self) -> &BTreeMap<String, Setpoint> {
        &self.parameters
    }

    pub fn set_interval_days(&mut self, days: i64) -> Result<()> {
        let interval = TimeDelta::try_days(days)
            .filter(|_| days >= 0)
            .ok_or_else(|| Error::InvalidValue(format!("interval of {} days", days)))?;
        self.interval = interval;
        Ok(())
    }

    /// Sets the default channel; `ND` is not a usable procedure address.
    pub fn set_stream_address(&mut self, address: &str) -> Result<()> {
        let parsed: ChannelAddress = address.parse()?;
        if !parsed.is_deployed() {
            return Err(Error::InvalidAddress(address.to_string()));
        }
        self.stream_address = parsed.to_string();
        Ok(())
    }

    /// Number of setpoints a linear procedure runs.
    pub fn set_point_count(&mut self, count: usize) -> Result<()> {
        let available = self.setpoint_names().count();
        if !self.procedure_type.is_fitted() || count < 2 || count > available {
            return Err(Error::InvalidValue(format!(
                "{} point calibration for {}",
                count, self.kind
            )));
        }
        self.point_count = count;
        Ok(())
    }

    /// Sets the target of a parameter from operator input.
    pub fn set_parameter(&mut self, name: &str, input: &str) -> Result<()> {
        let key = name.trim().to_lowercase();
        let setpoint = self
            .parameters
            .get_mut(&key)
            .ok_or_else(|| Error::UnknownParameter {
                kind: self.kind.clone(),
                name: key.clone(),
            })?;
        setpoint.target_mut().set_from_str(input)
    }

    fn setpoint_names(&self) -> impl Iterator<Item = &String> {
        self.parameters.keys().filter(|name| name.starts_with("sp"))
    }

    /// Parameters a run executes, in order.
    pub fn active_parameter_names(&self) -> Vec<String> {
        if self.procedure_type.is_fitted() {
            self.setpoint_names().take(self.point_count).cloned().collect()
        } else {
            self.parameters.keys().cloned().collect()
        }
    }

    fn new_calibration(&self) -> Calibration {
        Calibration::new(
            self.procedure_type.as_str(),
            &self.scaled_units,
            &self.unit_id,
            self.interval,
        )
    }

    /// Copies missing active parameters into a calibration.
    fn install_parameters(&self, calibration: &mut Calibration) {
        for name in self.active_parameter_names() {
            if let Some(template) = self.parameters.get(&name) {
                calibration
                    .parameters_mut()
                    .entry(name)
                    .or_insert_with(|| template.clone());
            }
        }
    }

    /// Readies a sensor for this procedure. Safe to repeat.
    pub fn prep(&self, sensor: &mut Sensor, streams: &Streams) -> Result<()> {
        if sensor.kind().is_none() {
            sensor.set_kind(&self.kind);
            sensor.set_name(&format!("{}.{}", self.kind, sensor.id()));
            sensor.set_property(&self.property);
            info!("Sensor {} assigned kind {}", sensor.id(), self.kind);
        }

        if sensor.calibration().is_none() {
            sensor.set_calibration(self.new_calibration());
        }
        if let Some(calibration) = sensor.calibration_mut() {
            if calibration.equation().is_none() {
                calibration.set_equation(self.procedure_type.new_equation());
            }
            self.install_parameters(calibration);
        }

        sensor.set_stream_type(&self.stream_type);
        let stream = streams.create(&self.stream_type)?;
        let address = if sensor.is_deployed() {
            sensor.address().to_string()
        } else {
            self.stream_address.clone()
        };
        sensor.connect(stream, Some(&address))?;
        debug!(
            "Prepared sensor {} on {} at {}",
            sensor.id(),
            self.stream_type,
            address
        );
        Ok(())
    }

    /// Runs every active setpoint and commits the fitted calibration.
    ///
    /// The sensor's calibration is invalidated as soon as the run starts and
    /// stays invalid unless the run commits. The new calibration is built on
    /// a copy and installed wholesale, so a canceled or failed run leaves the
    /// previous equation in place.
    pub async fn run(&self, sensor: &mut Sensor, operator: &mut dyn Operator) -> Result<RunOutcome> {
        let mut working = match sensor.calibration_mut() {
            Some(calibration) => {
                calibration.invalidate();
                calibration.clone()
            }
            None => return Err(Error::NotPrepared(sensor.id().to_string())),
        };
        if working.equation().is_none() {
            working.set_equation(self.procedure_type.new_equation());
        }
        self.install_parameters(&mut working);

        let names = self.active_parameter_names();
        info!(
            "Running {} point {} calibration on sensor {}",
            names.len(),
            self.kind,
            sensor.id()
        );
        operator.display(&format!(
            "running {} point calibration on sensor {}",
            names.len(),
            sensor.id()
        ));

        for name in &names {
            let Some(setpoint) = working.parameters_mut().get_mut(name) else {
                continue;
            };
            if !setpoint.run(sensor, operator).await? {
                info!("Calibration of sensor {} canceled", sensor.id());
                operator.display("sensor calibration canceled.");
                return Ok(RunOutcome::Canceled);
            }
        }

        if !self.save(&mut working) {
            warn!("Calibration of sensor {} failed", sensor.id());
            operator.display("sensor calibration failed. calibration invalidated.");
            return Ok(RunOutcome::Failed);
        }

        working.commit(Local::now().date_naive());
        if let Some(due) = working.due_date() {
            operator.display(&format!("sensor calibration committed. due {}", due));
        }
        info!("Calibration of sensor {} committed", sensor.id());
        sensor.set_calibration(working);
        Ok(RunOutcome::Committed)
    }

    /// Fits or loads the equation from the run's parameters.
    fn save(&self, calibration: &mut Calibration) -> bool {
        if self.procedure_type.is_fitted() {
            return calibration.generate_from("sp1", "sp2");
        }

        for (name, template) in &self.parameters {
            calibration
                .parameters_mut()
                .insert(name.clone(), template.clone());
        }
        let constant = |name: &str| {
            calibration
                .parameter(name)
                .and_then(|setpoint| setpoint.target().value())
        };
        match (constant("beta"), constant("r25")) {
            (Some(beta), Some(r25)) if beta != 0.0 && r25 > 0.0 => calibration
                .equation_mut()
                .is_some_and(|equation| equation.set_constants(beta, r25)),
            _ => {
                warn!("{} procedure is missing usable beta or r25", self.kind);
                false
            }
        }
    }

    /// Reports slope and reference response of a valid linear calibration.
    pub fn quality(&self, sensor: &Sensor) -> QualityReport {
        let Some(calibration) = sensor.calibration().filter(|cal| cal.is_valid()) else {
            return QualityReport::OutOfCalibration;
        };
        let Some(equation) = calibration.equation().filter(|eq| eq.degree() == Some(1)) else {
            return QualityReport::Unsupported;
        };
        match equation {
            Equation::Linear(linear) => QualityReport::Linear {
                slope: linear.slope(),
                reference: self.quality_reference,
                raw_at_reference: linear.evaluate_scaled_to_raw(self.quality_reference),
            },
            _ => QualityReport::Unsupported,
        }
    }
}

/// The procedure templates, keyed by sensor kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Procedures {
    procedures: BTreeMap<String, Procedure>,
}

impl Default for Procedures {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Procedures {
    /// The stock `ph`, `orp`, `do` and `ntc` templates.
    pub fn defaults() -> Self {
        let procedures = [
            Procedure::ph(),
            Procedure::orp(),
            Procedure::dissolved_oxygen(),
            Procedure::ntc(),
        ]
        .into_iter()
        .map(|procedure| (procedure.kind.clone(), procedure))
        .collect();
        Self { procedures }
    }

    pub fn get(&self, kind: &str) -> Result<&Procedure> {
        self.procedures
            .get(kind)
            .ok_or_else(|| Error::UnknownProcedure(kind.to_string()))
    }

    pub fn get_mut(&mut self, kind: &str) -> Result<&mut Procedure> {
        self.procedures
            .get_mut(kind)
            .ok_or_else(|| Error::UnknownProcedure(kind.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.values()
    }

    /// The procedure that handles a sensor's kind.
    pub fn for_sensor(&self, sensor: &Sensor) -> Result<&Procedure> {
        let kind = sensor
            .kind()
            .ok_or_else(|| Error::MissingKind(sensor.id().to_string()))?;
        self.procedures
            .get(kind)
            .ok_or_else(|| Error::UnknownSensorKind {
                id: sensor.id().to_string(),
                kind: kind.to_string(),
            })
    }

    /// Preps a sensor with the procedure for its kind.
    pub fn prep(&self, sensor: &mut Sensor, streams: &Streams) -> Result<()> {
        self.for_sensor(sensor)?.prep(sensor, streams)
    }

    pub fn pack(&self) -> Result<toml::Table> {
        let mut table = toml::Table::new();
        for (kind, procedure) in &self.procedures {
            table.insert(kind.clone(), toml::Value::try_from(procedure)?);
        }
        Ok(table)
    }

    /// Overlays persisted settings on the stock templates.
    ///
    /// The template keeps its procedure type; parameters missing from the
    /// record keep their template defaults. Unknown kinds fail the load.
    pub fn unpack(package: &toml::Table) -> Result<Self> {
        let mut procedures = Self::defaults();
        for (key, value) in package {
            let template = procedures
                .procedures
                .get(key)
                .ok_or_else(|| Error::unpack("procedure", key, Error::UnknownProcedure(key.clone())))?;
            let mut procedure: Procedure = value
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| Error::unpack("procedure", key, e.into()))?;

            procedure.procedure_type = template.procedure_type;
            if procedure.property.is_empty() {
                procedure.property = template.property.clone();
            }
            if value.get("quality_reference").is_none() {
                procedure.quality_reference = template.quality_reference;
            }
            for (name, setpoint) in &template.parameters {
                procedure
                    .parameters
                    .entry(name.clone())
                    .or_insert_with(|| setpoint.clone());
            }
            if procedure.point_count < 2 || procedure.point_count > procedure.setpoint_names().count() {
                procedure.point_count = template.point_count;
            }
            debug!("Loaded {} procedure", key);
            procedures.procedures.insert(key.clone(), procedure);
        }
        Ok(procedures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ReplayStream, ScriptedOperator};
    use approx::assert_relative_eq;

    fn streams(values: Vec<f64>) -> Streams {
        let mut streams = Streams::new();
        streams.register(PHORP_STREAM, move || Box::new(ReplayStream::new(values.clone())));
        streams
    }

    fn prepped(procedure: &Procedure, values: Vec<f64>) -> Sensor {
        let mut sensor = Sensor::new("tank1");
        procedure.prep(&mut sensor, &streams(values)).unwrap();
        sensor
    }

    fn fast_ph() -> Procedure {
        let mut ph = Procedure::ph();
        for setpoint in ph.parameters.values_mut() {
            if let Setpoint::Sampled(sampled) = setpoint {
                sampled
                    .set_sampling(SamplingConfig {
                        sample_period: 0.1,
                        update_period: 1.0,
                        sample_count: 3,
                    })
                    .unwrap();
            }
        }
        ph
    }

    #[test]
    fn test_prep_new_sensor() {
        let sensor = prepped(&Procedure::ph(), vec![0.0]);
        assert_eq!(sensor.kind(), Some("ph"));
        assert_eq!(sensor.name(), "ph.tank1");
        assert_eq!(sensor.property(), "pH");
        assert_eq!(sensor.stream_type(), Some(PHORP_STREAM));
        assert_eq!(sensor.stream().and_then(|s| s.address()), Some("a2"));

        let cal = sensor.calibration().unwrap();
        assert_eq!(cal.procedure_type(), "PolynomialProcedure");
        assert_eq!(cal.interval(), TimeDelta::days(180));
        assert!(!cal.is_valid());
        assert!(matches!(cal.equation(), Some(Equation::Linear(_))));
        assert_eq!(cal.parameters().keys().collect::<Vec<_>>(), vec!["sp1", "sp2"]);
    }

    #[test]
    fn test_prep_is_idempotent() {
        let ph = Procedure::ph();
        let streams = streams(vec![0.0]);
        let mut sensor = Sensor::new("tank1");
        sensor.set_address("b4").unwrap();
        ph.prep(&mut sensor, &streams).unwrap();
        if let Some(cal) = sensor.calibration_mut() {
            cal.parameters_mut()
                .get_mut("sp1")
                .unwrap()
                .target_mut()
                .set_value(4.01);
        }
        ph.prep(&mut sensor, &streams).unwrap();

        let cal = sensor.calibration().unwrap();
        assert_eq!(cal.parameters().len(), 2);
        assert_eq!(cal.parameter("sp1").unwrap().target().value(), Some(4.01));
        assert_eq!(sensor.stream().and_then(|s| s.address()), Some("b4"));
    }

    #[test]
    fn test_prep_unknown_stream() {
        let mut sensor = Sensor::new("tank1");
        assert!(matches!(
            Procedure::orp().prep(&mut sensor, &Streams::new()),
            Err(Error::UnknownStreamType(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_commits_fit() {
        let ph = fast_ph();
        let mut sensor = prepped(&ph, vec![177.0, 177.0, 177.0, 0.0, 0.0, 0.0]);
        let mut operator = ScriptedOperator::new(" \n \n");

        let outcome = ph.run(&mut sensor, &mut operator).await.unwrap();
        assert_eq!(outcome, RunOutcome::Committed);
        assert!(sensor.is_calibrated());
        match sensor.calibration().and_then(Calibration::equation) {
            Some(Equation::Linear(eq)) => {
                assert_relative_eq!(eq.slope(), -59.0);
                assert_relative_eq!(eq.offset(), 413.0);
            }
            other => panic!("unexpected equation {:?}", other),
        }
        assert_relative_eq!(sensor.evaluate(0.0).unwrap(), 7.0, epsilon = 1e-9);

        match ph.quality(&sensor) {
            QualityReport::Linear {
                slope,
                reference,
                raw_at_reference,
            } => {
                assert_relative_eq!(slope, -59.0);
                assert_relative_eq!(reference, 7.0);
                assert_relative_eq!(raw_at_reference, 0.0, epsilon = 1e-9);
            }
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_preserves_identity() {
        let ph = fast_ph();
        let mut sensor = prepped(&ph, vec![177.0, 177.0, 177.0, 0.0, 0.0, 0.0]);
        let mut operator = ScriptedOperator::new(" \n \n");
        ph.run(&mut sensor, &mut operator).await.unwrap();
        let before = sensor.calibration().and_then(Calibration::equation).cloned();

        let mut operator = ScriptedOperator::new("x");
        let outcome = ph.run(&mut sensor, &mut operator).await.unwrap();

        assert_eq!(outcome, RunOutcome::Canceled);
        assert!(operator.saw("sensor calibration canceled."));
        assert_eq!(sensor.id(), "tank1");
        assert_eq!(sensor.kind(), Some("ph"));
        assert_eq!(sensor.calibration().and_then(Calibration::equation).cloned(), before);
        assert!(!sensor.is_calibrated());
        assert_eq!(ph.quality(&sensor), QualityReport::OutOfCalibration);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degenerate_fit_fails() {
        let mut ph = fast_ph();
        ph.set_parameter("sp2", "4.0").unwrap();
        let mut sensor = prepped(&ph, vec![100.0]);
        let mut operator = ScriptedOperator::new(" \n \n");

        let outcome = ph.run(&mut sensor, &mut operator).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed);
        assert!(operator.saw("calibration invalidated"));
        assert!(!sensor.is_calibrated());
        assert_eq!(
            sensor.calibration().and_then(Calibration::equation),
            Some(&Equation::Linear(LinearEquation::default()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dissolved_oxygen_constant_zero() {
        let mut procedure = Procedure::dissolved_oxygen();
        if let Some(Setpoint::Sampled(sampled)) = procedure.parameters.get_mut("sp2") {
            sampled
                .set_sampling(SamplingConfig {
                    sample_period: 0.1,
                    update_period: 1.0,
                    sample_count: 4,
                })
                .unwrap();
        }
        let mut sensor = prepped(&procedure, vec![45.0]);
        let mut operator = ScriptedOperator::new(" \n");

        let outcome = procedure.run(&mut sensor, &mut operator).await.unwrap();
        assert_eq!(outcome, RunOutcome::Committed);
        assert_relative_eq!(sensor.evaluate(45.0).unwrap(), 9.09, epsilon = 1e-9);
        assert_eq!(operator.remaining(), 0);
    }

    #[tokio::test]
    async fn test_ntc_commits_constants() {
        let mut ntc = Procedure::ntc();
        ntc.set_parameter("beta", "3950").unwrap();
        let mut sensor = prepped(&ntc, vec![750.0]);
        assert_eq!(sensor.stream().and_then(|s| s.address()), Some("a1"));

        let mut operator = ScriptedOperator::new("");
        let outcome = ntc.run(&mut sensor, &mut operator).await.unwrap();
        assert_eq!(outcome, RunOutcome::Committed);

        match sensor.calibration().and_then(Calibration::equation) {
            Some(Equation::BiasedNtcBeta(eq)) => {
                assert_relative_eq!(eq.ntc().beta(), 3950.0);
                assert_relative_eq!(eq.ntc().r25_ohms(), 10000.0);
            }
            other => panic!("unexpected equation {:?}", other),
        }
        // 750 mV across a 10k bias from 1.5 V is exactly r25
        assert_relative_eq!(sensor.evaluate(750.0).unwrap(), 25.0, epsilon = 1e-9);
        assert_eq!(ntc.quality(&sensor), QualityReport::Unsupported);
    }

    #[tokio::test]
    async fn test_run_unprepared() {
        let mut sensor = Sensor::new("loose");
        let mut operator = ScriptedOperator::new("");
        assert!(matches!(
            Procedure::ph().run(&mut sensor, &mut operator).await,
            Err(Error::NotPrepared(_))
        ));
    }

    #[test]
    fn test_editing() {
        let mut ph = Procedure::ph();
        assert!(ph.set_parameter("sp1", "four").is_err());
        assert_eq!(ph.parameters()["sp1"].target().value(), Some(4.0));
        assert!(matches!(
            ph.set_parameter("sp9", "1"),
            Err(Error::UnknownParameter { .. })
        ));

        assert!(ph.set_stream_address("nd").is_err());
        assert!(ph.set_stream_address("q1").is_err());
        ph.set_stream_address("C3").unwrap();
        assert_eq!(ph.stream_address(), "c3");

        assert!(ph.set_interval_days(-1).is_err());
        ph.set_interval_days(30).unwrap();
        assert_eq!(ph.interval(), TimeDelta::days(30));

        assert_eq!(ph.active_parameter_names(), vec!["sp1", "sp2"]);
        ph.set_point_count(3).unwrap();
        assert_eq!(ph.active_parameter_names(), vec!["sp1", "sp2", "sp3"]);
        assert!(ph.set_point_count(4).is_err());
        assert!(Procedure::orp().clone().set_point_count(3).is_err());
        assert!(Procedure::ntc().clone().set_point_count(2).is_err());
    }

    #[test]
    fn test_procedure_type_names() {
        assert_eq!("PhProcedure".parse::<ProcedureType>().unwrap(), ProcedureType::Polynomial);
        assert_eq!(
            "ThermistorProcedure".parse::<ProcedureType>().unwrap(),
            ProcedureType::BiasedNtcBeta
        );
        assert!("FooProcedure".parse::<ProcedureType>().is_err());
        assert_eq!(
            "NtcBetaProcedure".parse::<ProcedureType>().unwrap(),
            ProcedureType::BiasedNtcBeta
        );
        assert_eq!(ProcedureType::BiasedNtcBeta.to_string(), "BiasedNtcBetaProcedure");
    }

    #[test]
    fn test_collection_round_trip() {
        let mut procedures = Procedures::defaults();
        procedures.get_mut("orp").unwrap().set_interval_days(90).unwrap();
        procedures.get_mut("ph").unwrap().set_parameter("sp3", "9.18").unwrap();

        let text = toml::to_string(&procedures.pack().unwrap()).unwrap();
        let package: toml::Table = toml::from_str(&text).unwrap();
        let back = Procedures::unpack(&package).unwrap();
        assert_eq!(back, procedures);
        assert_eq!(back.kinds().collect::<Vec<_>>(), vec!["do", "ntc", "orp", "ph"]);
    }

    #[test]
    fn test_unpack_legacy_record() {
        let text = r#"
            [ph]
            type = "PhProcedure"
            kind = "ph"
            scaled_units = "pH"
            unit_id = "ph"
            stream_type = "PhorpSource"
            stream_address = "b1"
            interval = 60
            point_count = 2
        "#;
        let package: toml::Table = toml::from_str(text).unwrap();
        let procedures = Procedures::unpack(&package).unwrap();
        let ph = procedures.get("ph").unwrap();
        assert_eq!(ph.stream_address(), "b1");
        assert_eq!(ph.interval(), TimeDelta::days(60));
        assert_eq!(ph.property(), "pH");
        assert_eq!(ph.parameters().len(), 3);
        assert_eq!(procedures.get("ntc").unwrap(), &Procedure::ntc());

        let mut sensor = prepped(ph, vec![0.0]);
        if let Some(cal) = sensor.calibration_mut() {
            cal.set_equation(Equation::Linear(LinearEquation::new(-59.0, 413.0)));
            cal.commit(Local::now().date_naive());
        }
        assert_eq!(
            ph.quality(&sensor),
            QualityReport::Linear {
                slope: -59.0,
                reference: 7.0,
                raw_at_reference: 0.0,
            }
        );
    }

    #[test]
    fn test_unpack_untagged_ntc_parameters() {
        let text = r#"
            [ntc]
            type = "PhorpNtcBetaProcedure"
            kind = "ntc"
            scaled_units = "Celsius"
            stream_type = "PhorpStream"
            stream_address = "a1"
            interval = "180"

            [ntc.parameters.beta]
            name = "Beta"
            value = 3950.0
            units = "K"
            prefix = "None"

            [ntc.parameters.r25]
            name = "R25"
            value = 10000.0
            units = "Ohms"
            prefix = "None"
        "#;
        let package: toml::Table = toml::from_str(text).unwrap();
        let procedures = Procedures::unpack(&package).unwrap();
        let ntc = procedures.get("ntc").unwrap();
        assert_eq!(ntc.procedure_type(), ProcedureType::BiasedNtcBeta);
        assert_eq!(ntc.stream_type(), "PhorpStream");
        let beta = ntc.parameters().get("beta").unwrap();
        assert!(matches!(beta, Setpoint::Constant(_)));
        assert_eq!(beta.target().value(), Some(3950.0));
        assert_eq!(ntc.active_parameter_names(), vec!["beta", "r25"]);
    }

    #[test]
    fn test_unpack_unknown_kind() {
        let package: toml::Table = toml::from_str(
            "[chlorine]\ntype = \"PolynomialProcedure\"\nkind = \"chlorine\"\nscaled_units = \"ppm\"\nstream_type = \"PhorpSource\"\nstream_address = \"a1\"\n",
        )
        .unwrap();
        match Procedures::unpack(&package) {
            Err(Error::Unpack { entity, source, .. }) => {
                assert_eq!(entity, "procedure");
                assert!(matches!(*source, Error::UnknownProcedure(_)));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_prep_by_kind() {
        let procedures = Procedures::defaults();
        let streams = streams(vec![0.0]);

        let mut orphan = Sensor::new("orphan");
        assert!(matches!(
            procedures.prep(&mut orphan, &streams),
            Err(Error::MissingKind(_))
        ));

        let mut sensor: Sensor = toml::from_str("id = \"x1\"\nkind = \"salinity\"\n").unwrap();
        assert!(matches!(
            procedures.prep(&mut sensor, &streams),
            Err(Error::UnknownSensorKind { .. })
        ));

        let mut sensor: Sensor = toml::from_str("id = \"t1\"\nkind = \"ntc\"\naddress = \"D2\"\n").unwrap();
        procedures.prep(&mut sensor, &streams).unwrap();
        assert_eq!(sensor.stream().and_then(|s| s.address()), Some("d2"));
        assert!(matches!(
            sensor.calibration().and_then(Calibration::equation),
            Some(Equation::BiasedNtcBeta(_))
        ));
    }
}
