//! Sensor Silo calibration engine
//!
//! Calibrates chemical and physical sensors (pH, redox potential, dissolved
//! oxygen, NTC thermistors) against reference solutions or constants, fits a
//! scaling equation from the samples and converts raw stream readings into
//! engineering units while tracking calibration staleness.

pub mod calibration;
pub mod deploy;
pub mod equation;
pub mod error;
pub mod operator;
pub mod procedure;
pub mod quantity;
pub mod sensor;
pub mod setpoint;
pub mod silo;
pub mod stats;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use calibration::Calibration;
pub use deploy::{Deployment, RollingAverage};
pub use equation::{BiasedNtcBetaEquation, Equation, LinearEquation, NtcBetaEquation};
pub use error::{Error, Result};
pub use operator::Operator;
pub use procedure::{Procedure, ProcedureType, Procedures, QualityReport, RunOutcome};
pub use quantity::Quantity;
pub use sensor::{Sensor, Sensors};
pub use setpoint::{ConstantSetpoint, SampledSetpoint, SamplingConfig, Setpoint};
pub use silo::Silo;
pub use stats::RunningStats;
pub use stream::{ChannelAddress, Stream, Streams};

/// Slope substituted for a degenerate or zero slope so that linear equations
/// stay evaluable.
pub const SLOPE_EPSILON: f64 = 1e-5;

/// Address marking a sensor as not deployed.
pub const NOT_DEPLOYED: &str = "ND";
