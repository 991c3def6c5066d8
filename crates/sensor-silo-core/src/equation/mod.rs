//! Scaling equations.
//!
//! An equation maps raw stream readings to engineering units and back. Linear
//! equations are fitted from two setpoints; thermistor equations carry
//! physical constants copied from procedure parameters.

mod factory;
mod linear;
mod thermistor;

pub use factory::construct;
pub use linear::LinearEquation;
pub use thermistor::{BiasedNtcBetaEquation, NtcBetaEquation, KELVIN_ZERO};

use crate::setpoint::Setpoint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Type tag of [`LinearEquation`] records.
pub const LINEAR_TAG: &str = "LinearEquation";
/// Type tag of [`NtcBetaEquation`] records.
pub const NTC_BETA_TAG: &str = "NtcBetaEquation";
/// Type tag of [`BiasedNtcBetaEquation`] records.
pub const BIASED_NTC_BETA_TAG: &str = "BiasedNtcBetaEquation";

/// A calibration equation, one variant per model.
#[derive(Debug, Clone, PartialEq)]
pub enum Equation {
    Linear(LinearEquation),
    NtcBeta(NtcBetaEquation),
    BiasedNtcBeta(BiasedNtcBetaEquation),
}

impl Equation {
    /// Tag written to the `type` key of the persisted record.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Equation::Linear(_) => LINEAR_TAG,
            Equation::NtcBeta(_) => NTC_BETA_TAG,
            Equation::BiasedNtcBeta(_) => BIASED_NTC_BETA_TAG,
        }
    }

    /// Polynomial degree, `None` for non-polynomial models.
    pub fn degree(&self) -> Option<u32> {
        match self {
            Equation::Linear(eq) => Some(eq.degree()),
            Equation::NtcBeta(_) | Equation::BiasedNtcBeta(_) => None,
        }
    }

    /// Fits the equation from two reference setpoints.
    ///
    /// Thermistor equations have no free parameters and always succeed. A
    /// failed fit leaves the equation evaluable but must not be committed.
    pub fn generate(&mut self, a: &Setpoint, b: &Setpoint) -> bool {
        match self {
            Equation::Linear(eq) => eq.generate(a, b),
            Equation::NtcBeta(_) | Equation::BiasedNtcBeta(_) => true,
        }
    }

    /// Copies thermistor constants; returns false for fitted equations.
    pub fn set_constants(&mut self, beta: f64, r25_ohms: f64) -> bool {
        match self {
            Equation::Linear(_) => false,
            Equation::NtcBeta(eq) => {
                eq.set_constants(beta, r25_ohms);
                true
            }
            Equation::BiasedNtcBeta(eq) => {
                eq.set_constants(beta, r25_ohms);
                true
            }
        }
    }

    pub fn evaluate_raw_to_scaled(&self, x: f64) -> f64 {
        match self {
            Equation::Linear(eq) => eq.evaluate_raw_to_scaled(x),
            Equation::NtcBeta(eq) => eq.evaluate_raw_to_scaled(x),
            Equation::BiasedNtcBeta(eq) => eq.evaluate_raw_to_scaled(x),
        }
    }

    pub fn evaluate_scaled_to_raw(&self, y: f64) -> f64 {
        match self {
            Equation::Linear(eq) => eq.evaluate_scaled_to_raw(y),
            Equation::NtcBeta(eq) => eq.evaluate_scaled_to_raw(y),
            Equation::BiasedNtcBeta(eq) => eq.evaluate_scaled_to_raw(y),
        }
    }

    /// Packs the equation into its persisted record, `type` tag included.
    pub fn pack(&self) -> crate::Result<toml::Table> {
        let mut table = match self {
            Equation::Linear(eq) => to_table(eq)?,
            Equation::NtcBeta(eq) => to_table(eq)?,
            Equation::BiasedNtcBeta(eq) => to_table(eq)?,
        };
        table.insert(
            "type".to_string(),
            toml::Value::String(self.type_tag().to_string()),
        );
        Ok(table)
    }
}

fn to_table<T: Serialize>(value: &T) -> crate::Result<toml::Table> {
    match toml::Value::try_from(value)? {
        toml::Value::Table(table) => Ok(table),
        other => Err(crate::Error::InvalidValue(format!(
            "equation packed to a {}",
            other.type_str()
        ))),
    }
}

impl Serialize for Equation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.pack()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Equation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let package = toml::Table::deserialize(deserializer)?;
        construct(&package).map_err(serde::de::Error::custom)
    }
}
