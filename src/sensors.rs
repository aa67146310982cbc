//! Sensor module for market readings.
//!
//! A [`SensorSet`] exposes one async read per measured quantity. Reads never
//! fail outward: a failing reader yields a documented sentinel value and the
//! failure is logged.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rand::Rng;
use tracing::{error, warn};

use crate::config::SensorMode;

/// Sentinel for a failed floating-point reading (temperature, humidity, price).
pub const FLOAT_SENTINEL: f64 = f64::NAN;

/// Sentinel for a failed count reading.
pub const COUNT_SENTINEL: i64 = -1;

// Mock ranges
const TEMPERATURE_RANGE: (f64, f64) = (24.0, 32.0);
const HUMIDITY_RANGE: (f64, f64) = (40.0, 85.0);
const CROWD_MAX: i64 = 120;
const PRICE_RANGE: (f64, f64) = (8_000.0, 25_000.0);

/// The quantities a device measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    Temperature,
    Humidity,
    Crowd,
    Prices,
}

impl ReadingKind {
    /// Get the reading name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            ReadingKind::Temperature => "temperature",
            ReadingKind::Humidity => "humidity",
            ReadingKind::Crowd => "crowd",
            ReadingKind::Prices => "prices",
        }
    }

    /// Get the unit for this reading.
    pub fn unit(&self) -> &'static str {
        match self {
            ReadingKind::Temperature => "celsius",
            ReadingKind::Humidity => "percent",
            ReadingKind::Crowd => "people",
            ReadingKind::Prices => "idr",
        }
    }
}

/// Errors a sensor source can report.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// The source does not support this reading at all.
    #[error("{0} sensor is not supported in hardware mode")]
    Unsupported(&'static str),

    /// A transient read failure; the next read may succeed.
    #[error("{kind} read failed: {reason}")]
    ReadFailed { kind: &'static str, reason: String },
}

/// A backend producing raw readings.
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn temperature(&self) -> Result<f64, SensorError>;

    async fn humidity(&self) -> Result<f64, SensorError>;

    async fn crowd(&self) -> Result<i64, SensorError>;

    async fn prices(&self, commodities: &[String]) -> Result<BTreeMap<String, f64>, SensorError>;
}

/// Bounded pseudo-random readings.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockSensors;

#[async_trait]
impl SensorSource for MockSensors {
    async fn temperature(&self) -> Result<f64, SensorError> {
        let value = rand::thread_rng().gen_range(TEMPERATURE_RANGE.0..=TEMPERATURE_RANGE.1);
        Ok(round2(value))
    }

    async fn humidity(&self) -> Result<f64, SensorError> {
        let value = rand::thread_rng().gen_range(HUMIDITY_RANGE.0..=HUMIDITY_RANGE.1);
        Ok(round2(value))
    }

    async fn crowd(&self) -> Result<i64, SensorError> {
        Ok(rand::thread_rng().gen_range(0..=CROWD_MAX))
    }

    async fn prices(&self, commodities: &[String]) -> Result<BTreeMap<String, f64>, SensorError> {
        let mut rng = rand::thread_rng();
        Ok(commodities
            .iter()
            .map(|c| (c.clone(), rng.gen_range(PRICE_RANGE.0..=PRICE_RANGE.1).round()))
            .collect())
    }
}

/// Physical sensors. Not implemented: every read reports `Unsupported`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardwareSensors;

#[async_trait]
impl SensorSource for HardwareSensors {
    async fn temperature(&self) -> Result<f64, SensorError> {
        Err(SensorError::Unsupported(ReadingKind::Temperature.name()))
    }

    async fn humidity(&self) -> Result<f64, SensorError> {
        Err(SensorError::Unsupported(ReadingKind::Humidity.name()))
    }

    async fn crowd(&self) -> Result<i64, SensorError> {
        Err(SensorError::Unsupported(ReadingKind::Crowd.name()))
    }

    async fn prices(&self, _commodities: &[String]) -> Result<BTreeMap<String, f64>, SensorError> {
        Err(SensorError::Unsupported(ReadingKind::Prices.name()))
    }
}

/// One sampling round. Failed reads hold their sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct Readings {
    pub temperature: f64,
    pub humidity: f64,
    pub crowd: i64,
    pub prices: BTreeMap<String, f64>,
}

/// The set of readers a device samples every tick.
pub struct SensorSet {
    source: Box<dyn SensorSource>,
    commodities: Vec<String>,
}

impl SensorSet {
    /// Create a sensor set over an arbitrary source.
    pub fn new(source: Box<dyn SensorSource>, commodities: Vec<String>) -> Self {
        Self {
            source,
            commodities,
        }
    }

    /// Create the sensor set matching a configured mode.
    pub fn for_mode(mode: SensorMode, commodities: Vec<String>) -> Self {
        match mode {
            SensorMode::Mock => Self::new(Box::new(MockSensors), commodities),
            SensorMode::Hardware => Self::new(Box::new(HardwareSensors), commodities),
        }
    }

    pub async fn read_temperature(&self) -> f64 {
        let result = self.source.temperature().await;
        or_sentinel(ReadingKind::Temperature, result, FLOAT_SENTINEL)
    }

    pub async fn read_humidity(&self) -> f64 {
        let result = self.source.humidity().await;
        or_sentinel(ReadingKind::Humidity, result, FLOAT_SENTINEL)
    }

    pub async fn read_crowd(&self) -> i64 {
        let result = self.source.crowd().await;
        or_sentinel(ReadingKind::Crowd, result, COUNT_SENTINEL)
    }

    /// Read all commodity prices; on failure every commodity maps to the
    /// float sentinel.
    pub async fn read_prices(&self) -> BTreeMap<String, f64> {
        let result = self.source.prices(&self.commodities).await;
        let fallback = self
            .commodities
            .iter()
            .map(|c| (c.clone(), FLOAT_SENTINEL))
            .collect();
        or_sentinel(ReadingKind::Prices, result, fallback)
    }

    /// Read every quantity concurrently.
    pub async fn read_all(&self) -> Readings {
        let (temperature, humidity, crowd, prices) = tokio::join!(
            self.read_temperature(),
            self.read_humidity(),
            self.read_crowd(),
            self.read_prices(),
        );

        Readings {
            temperature,
            humidity,
            crowd,
            prices,
        }
    }

    pub fn commodities(&self) -> &[String] {
        &self.commodities
    }
}

fn or_sentinel<T>(kind: ReadingKind, result: Result<T, SensorError>, sentinel: T) -> T {
    match result {
        Ok(value) => value,
        Err(e @ SensorError::Unsupported(_)) => {
            error!(reading = kind.name(), error = %e, "Sensor unsupported, using sentinel");
            sentinel
        }
        Err(e) => {
            warn!(reading = kind.name(), error = %e, "Sensor read failed, using sentinel");
            sentinel
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
