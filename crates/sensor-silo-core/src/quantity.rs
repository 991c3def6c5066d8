//! Named, unit-tagged scalar values.

use serde::{Deserialize, Serialize};

/// A named scalar with units, e.g. `SP1: 4.0 pH`.
///
/// `name` and `units` identify the quantity; `value` is filled in by sampling
/// or operator input and stays `None` until then.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    units: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
}

impl Quantity {
    /// Creates a quantity with a known value.
    pub fn new(name: &str, units: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value: Some(value),
            units: units.to_string(),
            prefix: None,
        }
    }

    /// Creates a quantity whose value is not known yet.
    pub fn unset(name: &str, units: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            units: units.to_string(),
            prefix: None,
        }
    }

    /// Sets the unit prefix (e.g. "m" for milli).
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn set_value(&mut self, value: f64) {
        self.value = Some(value);
    }

    pub fn clear_value(&mut self) {
        self.value = None;
    }

    /// Parses operator input and stores it; the value is left unchanged on error.
    pub fn set_from_str(&mut self, input: &str) -> crate::Result<()> {
        let value: f64 = input
            .trim()
            .parse()
            .map_err(|_| crate::Error::InvalidValue(format!("{} unchanged", self.name)))?;
        if !value.is_finite() {
            return Err(crate::Error::InvalidValue(format!(
                "{} must be finite",
                self.name
            )));
        }
        self.value = Some(value);
        Ok(())
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value {
            Some(value) => write!(f, "{}: {} {}", self.name, value, self.units),
            None => write!(f, "{}: -- {}", self.name, self.units),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Quantity::new("SP1", "pH", 4.0).to_string(), "SP1: 4 pH");
        assert_eq!(Quantity::unset("Measured", "mV").to_string(), "Measured: -- mV");
    }

    #[test]
    fn test_set_from_str_keeps_value_on_error() {
        let mut q = Quantity::new("SP2", "pH", 7.0);
        assert!(q.set_from_str("seven").is_err());
        assert_eq!(q.value(), Some(7.0));
        assert!(q.set_from_str("NaN").is_err());
        assert_eq!(q.value(), Some(7.0));

        q.set_from_str(" 6.86 ").unwrap();
        assert_eq!(q.value(), Some(6.86));
    }

    #[test]
    fn test_round_trip() {
        let quantities = [
            Quantity::new("R25", "Ohms", 10000.0),
            Quantity::unset("Measured", "mV").with_prefix("m"),
        ];
        for q in quantities {
            let text = toml::to_string(&q).unwrap();
            let back: Quantity = toml::from_str(&text).unwrap();
            assert_eq!(back, q);
        }
    }

    #[test]
    fn test_integer_value_accepted() {
        let q: Quantity = toml::from_str("name = \"SP2\"\nvalue = 225\nunits = \"mV\"\n").unwrap();
        assert_eq!(q.value(), Some(225.0));
        assert_eq!(q.prefix(), None);
    }
}
