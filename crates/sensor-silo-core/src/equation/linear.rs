//! Degree-1 polynomial fitted from two calibration setpoints.

use crate::setpoint::Setpoint;
use crate::{Error, SLOPE_EPSILON};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Linear sensor response `raw = slope * scaled + offset`.
///
/// The model is fitted in the direction the samples are taken: the target of
/// each setpoint is the scaled value, the measured quantity is the raw
/// response. Scaling a raw reading therefore inverts the line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "LinearRecord", try_from = "LinearRecord")]
pub struct LinearEquation {
    slope: f64,
    offset: f64,
}

impl Default for LinearEquation {
    fn default() -> Self {
        Self {
            slope: 1.0,
            offset: 0.0,
        }
    }
}

impl LinearEquation {
    pub fn new(slope: f64, offset: f64) -> Self {
        Self { slope, offset }
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Polynomial degree, always 1.
    pub fn degree(&self) -> u32 {
        1
    }

    /// Fits slope and offset through two setpoints.
    ///
    /// Returns false when the setpoints cannot define a line. Identical
    /// targets clamp the equation to `slope = SLOPE_EPSILON, offset = 0` so it
    /// stays evaluable; missing values leave it untouched.
    pub fn generate(&mut self, a: &Setpoint, b: &Setpoint) -> bool {
        let (Some(x1), Some(y1), Some(x2), Some(y2)) = (
            a.target().value(),
            a.measured().value(),
            b.target().value(),
            b.measured().value(),
        ) else {
            warn!(
                "Cannot fit {} / {}: setpoint values missing",
                a.name(),
                b.name()
            );
            return false;
        };

        let dx = x2 - x1;
        if dx == 0.0 {
            warn!("Degenerate fit: {} and {} share target {}", a.name(), b.name(), x1);
            self.slope = SLOPE_EPSILON;
            self.offset = 0.0;
            return false;
        }

        self.slope = (y2 - y1) / dx;
        self.offset = y1 - self.slope * x1;
        debug!("Linear fit: slope={} offset={}", self.slope, self.offset);
        true
    }

    /// Converts a raw reading to engineering units.
    pub fn evaluate_raw_to_scaled(&self, x: f64) -> f64 {
        (x - self.offset) / self.effective_slope()
    }

    /// Converts an engineering value to the expected raw reading.
    pub fn evaluate_scaled_to_raw(&self, y: f64) -> f64 {
        self.slope * y + self.offset
    }

    fn effective_slope(&self) -> f64 {
        if self.slope == 0.0 {
            SLOPE_EPSILON
        } else {
            self.slope
        }
    }
}

/// Persisted form: `degree` plus coefficients keyed by power.
#[derive(Serialize, Deserialize)]
struct LinearRecord {
    degree: i64,
    coefficients: BTreeMap<String, f64>,
}

impl From<LinearEquation> for LinearRecord {
    fn from(eq: LinearEquation) -> Self {
        let mut coefficients = BTreeMap::new();
        coefficients.insert("0".to_string(), eq.offset);
        coefficients.insert("1".to_string(), eq.slope);
        Self {
            degree: 1,
            coefficients,
        }
    }
}

impl TryFrom<LinearRecord> for LinearEquation {
    type Error = Error;

    fn try_from(record: LinearRecord) -> Result<Self, Error> {
        if record.degree != 1 {
            return Err(Error::UnsupportedDegree(record.degree));
        }
        let coefficient = |power: &str| {
            record.coefficients.get(power).copied().ok_or_else(|| {
                Error::InvalidValue(format!("linear equation is missing coefficient {}", power))
            })
        };
        Ok(Self {
            offset: coefficient("0")?,
            slope: coefficient("1")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Quantity;
    use crate::setpoint::ConstantSetpoint;
    use approx::assert_relative_eq;

    fn point(name: &str, target: f64, measured: f64) -> Setpoint {
        Setpoint::Constant(ConstantSetpoint::new(
            Quantity::new(name, "pH", target),
            Quantity::new("Measured", "mV", measured),
        ))
    }

    #[test]
    fn test_two_point_fit() {
        let mut eq = LinearEquation::default();
        assert!(eq.generate(&point("SP1", 4.0, 0.180), &point("SP2", 7.0, -0.061)));

        let slope = (-0.061 - 0.180) / (7.0 - 4.0);
        assert_relative_eq!(eq.slope(), slope);
        assert_relative_eq!(eq.slope(), -0.080333, epsilon = 1e-6);
        assert_relative_eq!(eq.offset(), 0.180 - slope * 4.0);
        assert_relative_eq!(eq.evaluate_raw_to_scaled(eq.offset()), 0.0);
        assert_relative_eq!(eq.evaluate_raw_to_scaled(0.180), 4.0, epsilon = 1e-9);
        assert_relative_eq!(eq.evaluate_scaled_to_raw(7.0), -0.061, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_fit() {
        let mut eq = LinearEquation::new(-59.0, 410.0);
        assert!(!eq.generate(&point("SP1", 4.0, 0.180), &point("SP2", 4.0, -0.061)));
        assert_eq!(eq.slope(), SLOPE_EPSILON);
        assert_eq!(eq.offset(), 0.0);
        assert!(eq.evaluate_raw_to_scaled(12.5).is_finite());
        assert!(eq.evaluate_scaled_to_raw(12.5).is_finite());
    }

    #[test]
    fn test_missing_values_leave_equation() {
        let mut eq = LinearEquation::new(-59.0, 410.0);
        let unsampled = Setpoint::Constant(ConstantSetpoint::new(
            Quantity::new("SP2", "pH", 7.0),
            Quantity::unset("Measured", "mV"),
        ));
        assert!(!eq.generate(&point("SP1", 4.0, 0.180), &unsampled));
        assert_eq!(eq, LinearEquation::new(-59.0, 410.0));
    }

    #[test]
    fn test_zero_slope_evaluates() {
        let eq = LinearEquation::new(0.0, 1.0);
        assert_relative_eq!(eq.evaluate_raw_to_scaled(1.0 + SLOPE_EPSILON), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rejects_higher_degree() {
        let text = "degree = 2\n[coefficients]\n0 = 1.0\n1 = 2.0\n2 = 3.0\n";
        let err = toml::from_str::<LinearEquation>(text).unwrap_err();
        assert!(err.to_string().contains("unsupported equation degree"));
    }
}
