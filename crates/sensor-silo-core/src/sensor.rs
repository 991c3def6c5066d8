//! Sensors and the sensor collection.

use crate::calibration::Calibration;
use crate::stream::{ChannelAddress, Stream};
use crate::{Error, Result, NOT_DEPLOYED};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// A physical probe: identity, deployment metadata, bound stream and
/// calibration.
pub struct Sensor {
    id: String,
    kind: Option<String>,
    name: String,
    location: String,
    property: String,
    stream_type: Option<String>,
    address: String,
    stream: Option<Box<dyn Stream>>,
    calibration: Option<Calibration>,
}

impl Sensor {
    pub fn new(id: &str) -> Self {
        Self {
            id: Self::key(id),
            kind: None,
            name: String::new(),
            location: String::new(),
            property: String::new(),
            stream_type: None,
            address: NOT_DEPLOYED.to_string(),
            stream: None,
            calibration: None,
        }
    }

    /// Normalised collection key for a user supplied id.
    pub fn key(id: &str) -> String {
        id.trim().to_lowercase().replace(' ', "_")
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn stream_type(&self) -> Option<&str> {
        self.stream_type.as_deref()
    }

    /// Deployed address, `ND` when not deployed.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn stream(&self) -> Option<&dyn Stream> {
        self.stream.as_deref()
    }

    pub fn is_deployed(&self) -> bool {
        !self.address.eq_ignore_ascii_case(NOT_DEPLOYED)
    }

    /// Has a stream and an equation to evaluate with.
    pub fn is_prepared(&self) -> bool {
        self.stream.is_some()
            && self
                .calibration
                .as_ref()
                .is_some_and(|cal| cal.equation().is_some())
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.as_ref().is_some_and(Calibration::is_valid)
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.trim().to_string();
    }

    pub fn set_location(&mut self, location: &str) {
        self.location = location.trim().to_string();
    }

    /// Sets the deployed address; invalid input leaves it unchanged.
    pub fn set_address(&mut self, address: &str) -> Result<()> {
        let address: ChannelAddress = address.parse()?;
        self.address = address.to_string().to_uppercase();
        debug!("Sensor {} address set to {}", self.id, self.address);
        Ok(())
    }

    pub(crate) fn set_kind(&mut self, kind: &str) {
        self.kind = Some(kind.to_string());
    }

    pub(crate) fn set_property(&mut self, property: &str) {
        self.property = property.to_string();
    }

    pub(crate) fn set_stream_type(&mut self, stream_type: &str) {
        self.stream_type = Some(stream_type.to_string());
    }

    /// Binds a stream, connecting it at `address` or the sensor's own
    /// address. A not deployed address leaves the stream unconnected.
    pub fn connect(&mut self, mut stream: Box<dyn Stream>, address: Option<&str>) -> Result<()> {
        let address: ChannelAddress = address.unwrap_or(&self.address).parse()?;
        if address.is_deployed() {
            stream.connect(&address.to_string())?;
            debug!("Sensor {} connected at {}", self.id, address);
        } else {
            warn!("Sensor {} has no deployed address", self.id);
        }
        self.stream = Some(stream);
        Ok(())
    }

    fn bound_stream(&self) -> Result<&dyn Stream> {
        self.stream
            .as_deref()
            .ok_or_else(|| Error::NotPrepared(self.id.clone()))
    }

    /// Completes one conversion on the bound stream.
    pub async fn update(&mut self) -> Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.update().await,
            None => Err(Error::NotPrepared(self.id.clone())),
        }
    }

    pub fn raw_value(&self) -> Result<f64> {
        Ok(self.bound_stream()?.raw_value())
    }

    pub fn raw_units(&self) -> Result<&str> {
        Ok(self.bound_stream()?.raw_units())
    }

    /// Latest raw reading in engineering units.
    pub fn scaled_value(&self) -> Result<f64> {
        self.evaluate(self.raw_value()?)
    }

    /// Converts a raw reading with the current equation.
    ///
    /// Stale calibrations still evaluate; check [`Sensor::is_calibrated`]
    /// before trusting the result.
    pub fn evaluate(&self, raw_value: f64) -> Result<f64> {
        self.calibration
            .as_ref()
            .and_then(Calibration::equation)
            .map(|eq| eq.evaluate_raw_to_scaled(raw_value))
            .ok_or_else(|| Error::NotPrepared(self.id.clone()))
    }

    pub fn scaled_units(&self) -> &str {
        self.calibration
            .as_ref()
            .map(Calibration::scaled_units)
            .unwrap_or_default()
    }

    pub fn unit_id(&self) -> &str {
        self.calibration
            .as_ref()
            .map(Calibration::unit_id)
            .unwrap_or_default()
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn calibration_mut(&mut self) -> Option<&mut Calibration> {
        self.calibration.as_mut()
    }

    /// Replaces the calibration wholesale.
    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = Some(calibration);
    }

    fn record(&self) -> SensorRef<'_> {
        SensorRef {
            id: &self.id,
            kind: self.kind.as_deref(),
            name: &self.name,
            location: &self.location,
            property: &self.property,
            stream_type: self.stream_type.as_deref(),
            address: &self.address,
            calibration: self.calibration.as_ref().filter(|cal| cal.is_valid()),
        }
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("location", &self.location)
            .field("property", &self.property)
            .field("stream_type", &self.stream_type)
            .field("address", &self.address)
            .field("stream", &self.stream.as_ref().map(|s| s.stream_type().to_string()))
            .field("calibration", &self.calibration)
            .finish()
    }
}

/// Persisted sensor record. The calibration is only written while valid.
#[derive(Serialize)]
struct SensorRef<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'a str>,
    name: &'a str,
    location: &'a str,
    property: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_type: Option<&'a str>,
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    calibration: Option<&'a Calibration>,
}

#[derive(Deserialize)]
struct SensorRecord {
    #[serde(default)]
    id: String,
    kind: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    property: String,
    stream_type: Option<String>,
    #[serde(default = "not_deployed")]
    address: String,
    calibration: Option<Calibration>,
}

fn not_deployed() -> String {
    NOT_DEPLOYED.to_string()
}

impl TryFrom<SensorRecord> for Sensor {
    type Error = Error;

    fn try_from(record: SensorRecord) -> Result<Self> {
        let mut sensor = Sensor::new(&record.id);
        let kind = record.kind.ok_or_else(|| Error::MissingKind(sensor.id.clone()))?;
        sensor.set_address(&record.address)?;
        sensor.kind = Some(kind);
        sensor.name = record.name;
        sensor.location = record.location;
        sensor.property = record.property;
        sensor.stream_type = record.stream_type;
        sensor.calibration = record.calibration;
        Ok(sensor)
    }
}

impl Serialize for Sensor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.record().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Sensor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let record = SensorRecord::deserialize(deserializer)?;
        Sensor::try_from(record).map_err(serde::de::Error::custom)
    }
}

/// Sensors keyed by normalised id.
#[derive(Debug, Default)]
pub struct Sensors {
    sensors: BTreeMap<String, Sensor>,
}

impl Sensors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sensor: Sensor) -> Result<()> {
        if self.sensors.contains_key(sensor.id()) {
            return Err(Error::DuplicateSensor(sensor.id().to_string()));
        }
        info!("Adding sensor {}", sensor.id());
        self.sensors.insert(sensor.id().to_string(), sensor);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Sensor> {
        let key = Sensor::key(id);
        let sensor = self
            .sensors
            .remove(&key)
            .ok_or(Error::UnknownSensor(key))?;
        info!("Removed sensor {}", sensor.id());
        Ok(sensor)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sensors.contains_key(&Sensor::key(id))
    }

    pub fn get(&self, id: &str) -> Result<&Sensor> {
        let key = Sensor::key(id);
        self.sensors.get(&key).ok_or(Error::UnknownSensor(key))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Sensor> {
        let key = Sensor::key(id);
        self.sensors.get_mut(&key).ok_or(Error::UnknownSensor(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Sensor> {
        self.sensors.values_mut()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Packs every sensor into a table keyed by id.
    pub fn pack(&self) -> Result<toml::Table> {
        let mut table = toml::Table::new();
        for (key, sensor) in &self.sensors {
            table.insert(key.clone(), toml::Value::try_from(sensor)?);
        }
        Ok(table)
    }

    /// Rebuilds the collection; any failing sensor aborts the whole load.
    pub fn unpack(package: &toml::Table) -> Result<Self> {
        let mut sensors = Sensors::new();
        for (key, value) in package {
            let mut value = value.clone();
            if let toml::Value::Table(table) = &mut value {
                table
                    .entry("id")
                    .or_insert_with(|| toml::Value::String(key.clone()));
            }
            let sensor: Sensor = value
                .try_into()
                .map_err(|e: toml::de::Error| Error::unpack("sensor", key, e.into()))?;
            if sensors.contains(sensor.id()) {
                warn!("Skipping duplicate sensor {}", sensor.id());
                continue;
            }
            sensors.insert(sensor)?;
        }
        Ok(sensors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation::{Equation, LinearEquation};
    use crate::testing::ReplayStream;
    use chrono::{Local, TimeDelta};

    fn calibrated() -> Sensor {
        let mut sensor = Sensor::new("Tank1");
        sensor.set_kind("ph");
        sensor.set_name("ph.tank1");
        sensor.set_property("pH");
        sensor.set_stream_type("PhorpSource");
        sensor.set_address("b3").unwrap();
        let mut cal = Calibration::new("PolynomialProcedure", "pH", "ph", TimeDelta::days(180));
        cal.set_equation(Equation::Linear(LinearEquation::new(-59.0, 413.0)));
        cal.commit(Local::now().date_naive());
        sensor.set_calibration(cal);
        sensor
    }

    #[test]
    fn test_key_normalisation() {
        assert_eq!(Sensor::key("  Tank 1 "), "tank_1");
        assert_eq!(Sensor::new(" PH2 ").id(), "ph2");
    }

    #[test]
    fn test_address() {
        let mut sensor = Sensor::new("t");
        assert!(!sensor.is_deployed());
        sensor.set_address("c4").unwrap();
        assert_eq!(sensor.address(), "C4");
        assert!(sensor.is_deployed());

        assert!(matches!(sensor.set_address("z9"), Err(Error::InvalidAddress(_))));
        assert_eq!(sensor.address(), "C4");

        sensor.set_address("nd").unwrap();
        assert!(!sensor.is_deployed());
    }

    #[tokio::test]
    async fn test_scaled_value() {
        let mut sensor = calibrated();
        assert!(matches!(sensor.scaled_value(), Err(Error::NotPrepared(_))));

        sensor
            .connect(Box::new(ReplayStream::new(vec![413.0, 177.0])), None)
            .unwrap();
        assert!(sensor.is_prepared());
        assert!(sensor.is_calibrated());

        sensor.update().await.unwrap();
        approx::assert_relative_eq!(sensor.scaled_value().unwrap(), 0.0);
        sensor.update().await.unwrap();
        approx::assert_relative_eq!(sensor.scaled_value().unwrap(), 4.0);
        assert_eq!(sensor.scaled_units(), "pH");
        assert_eq!(sensor.raw_units().unwrap(), "mV");
    }

    #[test]
    fn test_round_trip() {
        let sensor = calibrated();
        let text = toml::to_string(&sensor).unwrap();
        let back: Sensor = toml::from_str(&text).unwrap();

        assert_eq!(back.id(), "tank1");
        assert_eq!(back.kind(), Some("ph"));
        assert_eq!(back.name(), "ph.tank1");
        assert_eq!(back.property(), "pH");
        assert_eq!(back.stream_type(), Some("PhorpSource"));
        assert_eq!(back.address(), "B3");
        assert_eq!(back.calibration(), sensor.calibration());
    }

    #[test]
    fn test_invalid_calibration_not_packed() {
        let mut sensor = calibrated();
        if let Some(cal) = sensor.calibration_mut() {
            cal.invalidate();
        }
        let text = toml::to_string(&sensor).unwrap();
        assert!(!text.contains("calibration"));
        let back: Sensor = toml::from_str(&text).unwrap();
        assert!(back.calibration().is_none());
    }

    #[test]
    fn test_missing_kind() {
        let text = "id = \"tank9\"\naddress = \"ND\"\n";
        assert!(toml::from_str::<Sensor>(text).is_err());
    }

    #[test]
    fn test_collection() {
        let mut sensors = Sensors::new();
        sensors.insert(Sensor::new("Tank1")).unwrap();
        assert!(matches!(
            sensors.insert(Sensor::new("tank1")),
            Err(Error::DuplicateSensor(_))
        ));
        assert!(sensors.get(" TANK1 ").is_ok());
        assert!(matches!(sensors.get("tank2"), Err(Error::UnknownSensor(_))));
        sensors.remove("tank1").unwrap();
        assert!(sensors.is_empty());
        assert!(sensors.remove("tank1").is_err());
    }

    #[test]
    fn test_unpack_is_transactional() {
        let good = calibrated();
        let mut table = toml::Table::new();
        table.insert("tank1".into(), toml::Value::try_from(&good).unwrap());
        let text = toml::to_string(&table).unwrap();
        let package: toml::Table = toml::from_str(&text).unwrap();
        let sensors = Sensors::unpack(&package).unwrap();
        assert_eq!(sensors.len(), 1);

        let mut broken = package.clone();
        broken.insert(
            "tank2".into(),
            toml::Value::Table(toml::from_str("address = \"ND\"").unwrap()),
        );
        match Sensors::unpack(&broken) {
            Err(Error::Unpack { entity, key, .. }) => {
                assert_eq!(entity, "sensor");
                assert_eq!(key, "tank2");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_unpack_skips_duplicates() {
        let mut package = toml::Table::new();
        for key in ["tank1", "TANK1"] {
            let sensor: toml::Table =
                toml::from_str(&format!("id = \"{}\"\nkind = \"ph\"\n", key)).unwrap();
            package.insert(key.into(), toml::Value::Table(sensor));
        }
        let sensors = Sensors::unpack(&package).unwrap();
        assert_eq!(sensors.len(), 1);
    }
}
