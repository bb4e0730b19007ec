//! Typed device readings, one shape per [`Capability`](crate::capability::Capability).
//!
//! These mirror the request/response messages of the device protocol; the
//! engine never looks inside them except through automation decision logic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::time::Timestamp;

/// Occupancy as reported by a presence sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyState {
    #[default]
    Unknown,
    Occupied,
    Unoccupied,
    /// Presence detected recently but not right now.
    Idle,
}

impl fmt::Display for OccupancyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Occupied => f.write_str("occupied"),
            Self::Unoccupied => f.write_str("unoccupied"),
            Self::Idle => f.write_str("idle"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Occupancy {
    pub state: OccupancyState,
    /// When the sensor last changed `state`, if it reports it.
    #[serde(default)]
    pub state_changed_at: Option<Timestamp>,
    #[serde(default)]
    pub people_count: Option<u32>,
}

impl Occupancy {
    #[must_use]
    pub fn new(state: OccupancyState, state_changed_at: Timestamp) -> Self {
        Self {
            state,
            state_changed_at: Some(state_changed_at),
            people_count: None,
        }
    }
}

/// Output level of a dimmable light, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Brightness {
    pub level_percent: f32,
}

impl Brightness {
    /// Build a brightness, rejecting levels outside `0..=100`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::LevelOutOfRange`] for levels below 0,
    /// above 100, or NaN.
    pub fn new(level_percent: f32) -> Result<Self, ValidationError> {
        if !(0.0..=100.0).contains(&level_percent) {
            return Err(ValidationError::LevelOutOfRange {
                value: level_percent,
            });
        }
        Ok(Self { level_percent })
    }

    #[must_use]
    pub fn off() -> Self {
        Self { level_percent: 0.0 }
    }

    #[must_use]
    pub fn is_on(self) -> bool {
        self.level_percent > 0.0
    }
}

impl fmt::Display for Brightness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.level_percent)
    }
}

/// Thermostat reading. Either field may be absent depending on the device.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AirTemperature {
    #[serde(default)]
    pub ambient_celsius: Option<f64>,
    #[serde(default)]
    pub setpoint_celsius: Option<f64>,
}

impl AirTemperature {
    #[must_use]
    pub fn setpoint(celsius: f64) -> Self {
        Self {
            ambient_celsius: None,
            setpoint_celsius: Some(celsius),
        }
    }
}

impl fmt::Display for AirTemperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.ambient_celsius, self.setpoint_celsius) {
            (Some(a), Some(s)) => write!(f, "ambient={a}°C setpoint={s}°C"),
            (Some(a), None) => write!(f, "ambient={a}°C"),
            (None, Some(s)) => write!(f, "setpoint={s}°C"),
            (None, None) => f.write_str("empty"),
        }
    }
}

/// Named device modes, e.g. `{"occupancy": "unoccupied", "fan": "auto"}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Modes(pub BTreeMap<String, String>);

impl Modes {
    /// Single-entry modes.
    pub fn one(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self(BTreeMap::from([(key.into(), value.into())]))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Modes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}
