//! The persisted silo document: procedures, sensors and deployment.

use crate::deploy::Deployment;
use crate::procedure::{Procedure, Procedures};
use crate::sensor::{Sensor, Sensors};
use crate::stream::Streams;
use crate::{Error, Result};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Everything the operator configures, saved as one TOML document.
#[derive(Debug, Default)]
pub struct Silo {
    procedures: Procedures,
    sensors: Sensors,
    deployment: Deployment,
}

#[derive(Serialize, Deserialize)]
struct SiloRecord {
    #[serde(default)]
    date: Option<NaiveDate>,
    #[serde(default)]
    procedures: toml::Table,
    #[serde(default)]
    sensors: toml::Table,
    #[serde(default)]
    deployment: Deployment,
}

impl Silo {
    /// Stock procedures, no sensors, default deployment.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn procedures(&self) -> &Procedures {
        &self.procedures
    }

    pub fn procedures_mut(&mut self) -> &mut Procedures {
        &mut self.procedures
    }

    pub fn sensors(&self) -> &Sensors {
        &self.sensors
    }

    pub fn sensors_mut(&mut self) -> &mut Sensors {
        &mut self.sensors
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn deployment_mut(&mut self) -> &mut Deployment {
        &mut self.deployment
    }

    /// Creates and preps a sensor of the given kind.
    pub fn new_sensor(&mut self, id: &str, kind: &str, streams: &Streams) -> Result<&mut Sensor> {
        let key = Sensor::key(id);
        if key.is_empty() {
            return Err(Error::InvalidValue("empty sensor id".to_string()));
        }
        if self.sensors.contains(&key) {
            return Err(Error::DuplicateSensor(key));
        }
        let mut sensor = Sensor::new(&key);
        self.procedures.get(kind)?.prep(&mut sensor, streams)?;
        self.sensors.insert(sensor)?;
        self.sensors.get_mut(&key)
    }

    pub fn remove_sensor(&mut self, id: &str) -> Result<Sensor> {
        self.sensors.remove(id)
    }

    /// Splits the borrow so a sensor can be run by its procedure.
    pub fn sensor_with_procedure(&mut self, id: &str) -> Result<(&mut Sensor, &Procedure)> {
        let sensor = self.sensors.get_mut(id)?;
        let procedure = self.procedures.for_sensor(sensor)?;
        Ok((sensor, procedure))
    }

    /// Renders the document, stamped with today's date.
    pub fn pack(&self) -> Result<String> {
        let record = SiloRecord {
            date: Some(Local::now().date_naive()),
            procedures: self.procedures.pack()?,
            sensors: self.sensors.pack()?,
            deployment: self.deployment.clone(),
        };
        Ok(toml::to_string_pretty(&record)?)
    }

    /// Parses a document and preps every sensor with its procedure.
    ///
    /// Nothing is kept from a document that fails anywhere.
    pub fn unpack(text: &str, streams: &Streams) -> Result<Self> {
        let record: SiloRecord = toml::from_str(text)?;
        let procedures = Procedures::unpack(&record.procedures)?;
        let mut sensors = Sensors::unpack(&record.sensors)?;
        for sensor in sensors.iter_mut() {
            let id = sensor.id().to_string();
            procedures
                .prep(sensor, streams)
                .map_err(|e| Error::unpack("sensor", &id, e))?;
        }
        info!(
            "Loaded silo dated {}: {} sensors",
            record
                .date
                .map(|date| date.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            sensors.len()
        );
        Ok(Self {
            procedures,
            sensors,
            deployment: record.deployment,
        })
    }
}
