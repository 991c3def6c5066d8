//! Reconstructs equations from persisted records.

use super::{
    BiasedNtcBetaEquation, Equation, LinearEquation, NtcBetaEquation, BIASED_NTC_BETA_TAG,
    LINEAR_TAG, NTC_BETA_TAG,
};
use crate::{Error, Result};
use tracing::debug;

/// Builds the equation variant named by the record's `type` tag.
///
/// Older files use `PolynomialEquation` and `PhorpNtcBetaEquation`; both are
/// accepted. Unknown tags are an error, never a default.
pub fn construct(package: &toml::Table) -> Result<Equation> {
    let tag = package
        .get("type")
        .and_then(toml::Value::as_str)
        .ok_or(Error::MissingEquationType)?;

    debug!("Constructing {} equation", tag);
    let record = toml::Value::Table(package.clone());
    let equation = match tag {
        LINEAR_TAG | "PolynomialEquation" => {
            Equation::Linear(record.try_into::<LinearEquation>()?)
        }
        NTC_BETA_TAG => Equation::NtcBeta(record.try_into::<NtcBetaEquation>()?),
        BIASED_NTC_BETA_TAG | "PhorpNtcBetaEquation" => {
            Equation::BiasedNtcBeta(record.try_into::<BiasedNtcBetaEquation>()?)
        }
        other => return Err(Error::UnknownEquation(other.to_string())),
    };
    Ok(equation)
}
