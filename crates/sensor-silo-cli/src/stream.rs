//! Simulated converter channel.

use crate::config::SimulatorConfig;
use async_trait::async_trait;
use sensor_silo_core::{Result, Stream, Streams};
use std::time::Duration;

/// Produces a steady millivolt level with a slow sinusoidal ripple.
pub struct SimulatedStream {
    stream_type: String,
    level: f64,
    ripple: f64,
    conversion_time: Duration,
    address: Option<String>,
    samples: u64,
    raw: f64,
}

impl SimulatedStream {
    pub fn new(stream_type: &str, config: &SimulatorConfig) -> Self {
        Self {
            stream_type: stream_type.to_string(),
            level: config.level,
            ripple: config.ripple,
            conversion_time: Duration::from_millis(config.conversion_ms),
            address: None,
            samples: 0,
            raw: config.level,
        }
    }
}

#[async_trait]
impl Stream for SimulatedStream {
    fn stream_type(&self) -> &str {
        &self.stream_type
    }

    fn connect(&mut self, address: &str) -> Result<()> {
        self.validate_address(address)?;
        self.address = Some(address.to_string());
        Ok(())
    }

    fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    async fn update(&mut self) -> Result<()> {
        tokio::time::sleep(self.conversion_time).await;
        let phase = self.samples as f64 * std::f64::consts::PI / 16.0;
        self.raw = self.level + self.ripple * phase.sin();
        self.samples += 1;
        Ok(())
    }

    fn raw_value(&self) -> f64 {
        self.raw
    }

    fn raw_units(&self) -> &str {
        "mV"
    }
}

/// Registers the simulator under every configured stream type.
pub fn simulated_streams(config: &SimulatorConfig) -> Streams {
    let mut streams = Streams::new();
    for stream_type in &config.stream_types {
        let name = stream_type.clone();
        let config = config.clone();
        streams.register(stream_type, move || {
            Box::new(SimulatedStream::new(&name, &config))
        });
    }
    streams
}
