//! Data structures binding sensors to readings.

use std::fmt;
use std::str::FromStr;

use chrono::Local;
use serde::{Deserialize, Serialize};

/// Stable identifier assigned to a sensor on first registration.
pub type SensorId = i64;

/// The enumerated hardware family of a sensor.
///
/// The kind determines whether the sensor needs a GPIO pin assignment and
/// which fields of a [`Reading`] are populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorKind {
    /// AM2302/DHT22 temperature and humidity sensor on a single-wire GPIO bus.
    Dht22,
}

impl SensorKind {
    /// Whether sensors of this kind are addressed by a GPIO pin.
    pub fn requires_pin(&self) -> bool {
        match self {
            SensorKind::Dht22 => true,
        }
    }

    /// Canonical name as stored in the `sensors` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Dht22 => "DHT22",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("dht22") {
            Ok(SensorKind::Dht22)
        } else {
            Err(format!("unknown sensor kind: {s}"))
        }
    }
}

/// A registered sensor's identity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    /// Identifier assigned on first registration; immutable afterwards
    pub id: SensorId,
    /// Unique human-readable name (e.g. "inside")
    pub name: String,
    /// Hardware family
    pub kind: SensorKind,
    /// GPIO pin, present iff the kind requires addressing
    pub pin: Option<u8>,
}

/// What a sensor driver returns from one successful sample call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Temperature in degrees Celsius
    pub temperature_c: f64,
    /// Relative humidity in percent
    pub humidity: f64,
}

/// The shared date/time captured once at round start.
///
/// Every reading in a round carries the same stamp, so the round is logically
/// atomic for correlation purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStamp {
    /// Calendar date, `%Y-%m-%d`
    pub date: String,
    /// Wall-clock time, `%H:%M:%S`
    pub time: String,
}

impl RoundStamp {
    /// Capture the current local date and time.
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
        }
    }
}

/// One persisted observation tied to a sensor and a round stamp.
///
/// Append-only: never updated or deleted by this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    /// References a registered sensor
    pub sensor_id: SensorId,
    /// Temperature in degrees Celsius; 0 for a failed sample
    pub temperature: f64,
    /// Relative humidity in percent; 0 for a failed sample
    pub humidity: f64,
    /// Barometric pressure; always absent for the DHT22 family
    pub pressure: Option<f64>,
    /// Round date, `%Y-%m-%d`
    pub date: String,
    /// Round time, `%H:%M:%S`
    pub time: String,
}

/// The result of one poll attempt for one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleOutcome {
    /// The driver returned a measurement
    Success(Measurement),
    /// The sample timed out or the driver reported an error
    Failure {
        /// Human-readable cause, for the operator log
        reason: String,
    },
}

impl SampleOutcome {
    /// Create a failure outcome.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    /// Whether the poll attempt produced a measurement.
    pub fn is_success(&self) -> bool {
        matches!(self, SampleOutcome::Success(_))
    }

    /// Temperature to record and publish; zero for failures.
    pub fn temperature(&self) -> f64 {
        match self {
            SampleOutcome::Success(m) => m.temperature_c,
            SampleOutcome::Failure { .. } => 0.0,
        }
    }

    /// Humidity to record and publish; zero for failures.
    pub fn humidity(&self) -> f64 {
        match self {
            SampleOutcome::Success(m) => m.humidity,
            SampleOutcome::Failure { .. } => 0.0,
        }
    }

    /// Build the log row for this outcome.
    ///
    /// Failures yield a zero-filled reading so every round emits exactly one
    /// row per registered sensor.
    pub fn to_reading(&self, sensor_id: SensorId, stamp: &RoundStamp) -> Reading {
        Reading {
            sensor_id,
            temperature: self.temperature(),
            humidity: self.humidity(),
            pressure: None,
            date: stamp.date.clone(),
            time: stamp.time.clone(),
        }
    }
}
