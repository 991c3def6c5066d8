//! NTC thermistor beta equations.

use serde::{Deserialize, Serialize};

/// Freezing point of water in kelvin.
pub const KELVIN_ZERO: f64 = 273.15;

const DEFAULT_BIAS_VOLTS: f64 = 1.5;
const DEFAULT_BIAS_OHMS: f64 = 10000.0;

fn default_kelvin_zero() -> f64 {
    KELVIN_ZERO
}

fn default_bias_volts() -> f64 {
    DEFAULT_BIAS_VOLTS
}

fn default_bias_ohms() -> f64 {
    DEFAULT_BIAS_OHMS
}

/// Beta-model thermistor converting resistance in ohms to Celsius.
///
/// Pure physical-constant model: nothing is fitted from samples, the
/// constants are copied from the procedure parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NtcBetaEquation {
    beta: f64,
    r25: f64,
    #[serde(default = "default_kelvin_zero")]
    kelvin_zero: f64,
}

impl Default for NtcBetaEquation {
    fn default() -> Self {
        Self {
            beta: 3499.0,
            r25: 9999.0,
            kelvin_zero: KELVIN_ZERO,
        }
    }
}

impl NtcBetaEquation {
    pub fn new(beta: f64, r25_ohms: f64) -> Self {
        Self {
            beta,
            r25: r25_ohms,
            kelvin_zero: KELVIN_ZERO,
        }
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn r25_ohms(&self) -> f64 {
        self.r25
    }

    pub fn kelvin_zero(&self) -> f64 {
        self.kelvin_zero
    }

    pub fn set_constants(&mut self, beta: f64, r25_ohms: f64) {
        self.beta = beta;
        self.r25 = r25_ohms;
    }

    fn t25(&self) -> f64 {
        self.kelvin_zero + 25.0
    }

    /// Temperature in kelvin, or 0 K when `r_ohms / r25` is not positive.
    pub fn to_kelvin(&self, r_ohms: f64) -> f64 {
        let ratio = r_ohms / self.r25;
        if ratio.is_nan() || ratio <= 0.0 {
            return 0.0;
        }
        1.0 / (1.0 / self.t25() + (1.0 / self.beta) * ratio.ln())
    }

    pub fn to_celsius(&self, r_ohms: f64) -> f64 {
        self.to_kelvin(r_ohms) - self.kelvin_zero
    }

    pub fn to_fahrenheit(&self, r_ohms: f64) -> f64 {
        9.0 / 5.0 * self.to_celsius(r_ohms) + 32.0
    }

    /// Resistance at a temperature in Celsius, or 0 ohms at or below absolute zero.
    pub fn to_ohms(&self, celsius: f64) -> f64 {
        let kelvin = celsius + self.kelvin_zero;
        if kelvin.is_nan() || kelvin <= 0.0 {
            return 0.0;
        }
        self.r25 * (self.beta * (1.0 / kelvin - 1.0 / self.t25())).exp()
    }

    pub fn evaluate_raw_to_scaled(&self, r_ohms: f64) -> f64 {
        self.to_celsius(r_ohms)
    }

    pub fn evaluate_scaled_to_raw(&self, celsius: f64) -> f64 {
        self.to_ohms(celsius)
    }
}

/// Thermistor read through a bias divider, raw value in millivolts.
///
/// The divider is `bias_volts -- bias_ohms -- ntc -- ground` with the reading
/// taken across the thermistor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiasedNtcBetaEquation {
    #[serde(flatten)]
    ntc: NtcBetaEquation,
    #[serde(default = "default_bias_volts")]
    bias_volts: f64,
    #[serde(default = "default_bias_ohms")]
    bias_ohms: f64,
}

impl Default for BiasedNtcBetaEquation {
    fn default() -> Self {
        Self {
            ntc: NtcBetaEquation::default(),
            bias_volts: DEFAULT_BIAS_VOLTS,
            bias_ohms: DEFAULT_BIAS_OHMS,
        }
    }
}

impl BiasedNtcBetaEquation {
    pub fn new(ntc: NtcBetaEquation, bias_volts: f64, bias_ohms: f64) -> Self {
        Self {
            ntc,
            bias_volts,
            bias_ohms,
        }
    }

    pub fn ntc(&self) -> &NtcBetaEquation {
        &self.ntc
    }

    pub fn bias_volts(&self) -> f64 {
        self.bias_volts
    }

    pub fn bias_ohms(&self) -> f64 {
        self.bias_ohms
    }

    pub fn set_constants(&mut self, beta: f64, r25_ohms: f64) {
        self.ntc.set_constants(beta, r25_ohms);
    }

    /// Thermistor resistance for a divider reading in millivolts.
    pub fn divider_ohms(&self, millivolts: f64) -> f64 {
        let volts = millivolts / 1000.0;
        let amps = (self.bias_volts - volts) / self.bias_ohms;
        volts / amps
    }

    pub fn evaluate_raw_to_scaled(&self, millivolts: f64) -> f64 {
        self.ntc.to_celsius(self.divider_ohms(millivolts))
    }

    pub fn evaluate_scaled_to_raw(&self, celsius: f64) -> f64 {
        let ohms = self.ntc.to_ohms(celsius);
        1000.0 * self.bias_volts * ohms / (ohms + self.bias_ohms)
    }
}
