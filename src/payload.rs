//! Payload module: the unit of delivery.
//!
//! A [`Payload`] bundles one round of readings with the device identity and
//! a UTC timestamp. It is immutable once built and serializes to the JSON
//! shape the ingest endpoint expects.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sensors::{Readings, SensorSet, COUNT_SENTINEL};

/// Role sent with registration when none is configured.
pub const DEFAULT_ROLE: &str = "operator";

/// Who is sending: the device and the market it is installed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub market_id: String,
    pub role: String,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>, market_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            market_id: market_id.into(),
            role: DEFAULT_ROLE.to_string(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }
}

/// One bundle of readings, the unit of delivery.
///
/// Failed readings are absent (`null` on the wire); failed prices are
/// omitted from the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    timestamp: DateTime<Utc>,
    device_id: String,
    market_id: String,
    temperature: Option<f64>,
    humidity: Option<f64>,
    crowd: Option<i64>,
    prices: BTreeMap<String, f64>,
}

impl Payload {
    /// Build a payload from a round of readings, mapping sentinels to
    /// missing values.
    pub fn new(identity: &DeviceIdentity, readings: Readings, timestamp: DateTime<Utc>) -> Self {
        let prices = readings
            .prices
            .into_iter()
            .filter(|(_, price)| price.is_finite())
            .collect();

        Self {
            timestamp,
            device_id: identity.device_id.clone(),
            market_id: identity.market_id.clone(),
            temperature: finite(readings.temperature),
            humidity: finite(readings.humidity),
            crowd: (readings.crowd > COUNT_SENTINEL).then_some(readings.crowd),
            prices,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn humidity(&self) -> Option<f64> {
        self.humidity
    }

    pub fn crowd(&self) -> Option<i64> {
        self.crowd
    }

    pub fn prices(&self) -> &BTreeMap<String, f64> {
        &self.prices
    }

    /// Serialize to the wire JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a payload previously produced by [`Payload::to_json`].
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Builds payloads from a sensor set for one device.
pub struct PayloadBuilder {
    identity: DeviceIdentity,
    sensors: SensorSet,
}

impl PayloadBuilder {
    pub fn new(identity: DeviceIdentity, sensors: SensorSet) -> Self {
        Self { identity, sensors }
    }

    /// Sample every sensor concurrently and stamp the result.
    ///
    /// Never fails: sentinel readings become missing fields.
    pub async fn build(&self) -> Payload {
        let readings = self.sensors.read_all().await;
        let payload = Payload::new(&self.identity, readings, Utc::now());
        debug!(
            device_id = %payload.device_id,
            temperature = ?payload.temperature,
            humidity = ?payload.humidity,
            crowd = ?payload.crowd,
            prices = payload.prices.len(),
            "Built payload"
        );
        payload
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorMode;
    use crate::sensors::FLOAT_SENTINEL;
    use chrono::TimeZone;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("DEV-001", "PASAR-001")
    }

    fn readings() -> Readings {
        let mut prices = BTreeMap::new();
        prices.insert("beras".to_string(), 12_500.0);
        prices.insert("cabai".to_string(), 21_000.0);
        Readings {
            temperature: 27.35,
            humidity: 61.2,
            crowd: 42,
            prices,
        }
    }

    #[test]
    fn test_payload_wire_format() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap();
        let payload = Payload::new(&identity(), readings(), ts);

        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(value["timestamp"], "2026-10-19T08:30:00Z");
        assert_eq!(value["device_id"], "DEV-001");
        assert_eq!(value["market_id"], "PASAR-001");
        assert_eq!(value["temperature"], 27.35);
        assert_eq!(value["humidity"], 61.2);
        assert_eq!(value["crowd"], 42);
        assert_eq!(value["prices"]["beras"], 12_500.0);
        assert_eq!(value["prices"]["cabai"], 21_000.0);
    }

    #[test]
    fn test_sentinels_become_null() {
        let mut prices = BTreeMap::new();
        prices.insert("beras".to_string(), FLOAT_SENTINEL);
        prices.insert("cabai".to_string(), 9_000.0);
        let readings = Readings {
            temperature: FLOAT_SENTINEL,
            humidity: 70.0,
            crowd: COUNT_SENTINEL,
            prices,
        };

        let payload = Payload::new(&identity(), readings, Utc::now());
        assert_eq!(payload.temperature(), None);
        assert_eq!(payload.humidity(), Some(70.0));
        assert_eq!(payload.crowd(), None);
        assert_eq!(payload.prices().len(), 1);

        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert!(value["temperature"].is_null());
        assert!(value["crowd"].is_null());
        assert!(value["prices"].get("beras").is_none());
    }

    #[test]
    fn test_payload_json_survives_reparse() {
        let payload = Payload::new(&identity(), readings(), Utc::now());
        let parsed = Payload::from_json(&payload.to_json().unwrap()).unwrap();
        assert_eq!(parsed, payload);
    }

    #[tokio::test]
    async fn test_builder_partial_data_still_builds() {
        let builder = PayloadBuilder::new(
            identity(),
            SensorSet::for_mode(SensorMode::Hardware, vec!["beras".to_string()]),
        );

        let payload = builder.build().await;
        assert_eq!(payload.device_id(), "DEV-001");
        assert_eq!(payload.temperature(), None);
        assert!(payload.prices().is_empty());
        assert!(payload.to_json().unwrap().contains("\"timestamp\""));
    }

    #[tokio::test]
    async fn test_builder_timestamp_is_utc_z() {
        let builder = PayloadBuilder::new(
            identity(),
            SensorSet::for_mode(SensorMode::Mock, vec!["cabai".to_string()]),
        );

        let payload = builder.build().await;
        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(value["crowd"].is_i64());
    }

    #[test]
    fn test_identity_role() {
        let id = identity();
        assert_eq!(id.role, "operator");
        assert_eq!(id.with_role("inspector").role, "inspector");
    }
}
