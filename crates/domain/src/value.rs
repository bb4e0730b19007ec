//! Recorded values: what was read from, or written to, a device and when.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::time::Timestamp;

/// Tolerance used when comparing floating point levels and setpoints.
pub const FLOAT_EPSILON: f64 = 0.01;

/// A value together with the time it was recorded.
///
/// `err` is only set on the write side, where a failed write is remembered
/// alongside the value that was attempted. `hit_count` counts how many
/// times the record answered a write without touching the device.
#[derive(Debug, Clone)]
pub struct Value<T> {
    pub value: T,
    pub at: Timestamp,
    pub err: Option<DeviceError>,
    pub hit_count: u64,
}

impl<T> Value<T> {
    #[must_use]
    pub fn new(value: T, at: Timestamp) -> Self {
        Self {
            value,
            at,
            err: None,
            hit_count: 0,
        }
    }

    /// A value whose recording coincided with a failure.
    #[must_use]
    pub fn failed(value: T, at: Timestamp, err: DeviceError) -> Self {
        Self {
            value,
            at,
            err: Some(err),
            hit_count: 0,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }
}

/// A single value the engine may write to a device.
///
/// Writes are compared with [`WriteValue::same_as`] so that float levels
/// which only differ by rounding do not trigger another device call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum WriteValue {
    /// Light output in percent.
    Level(f32),
    /// Thermostat setpoint in °C.
    Setpoint(f64),
    /// Value for one mode key.
    Mode(String),
}

impl WriteValue {
    /// Equality with [`FLOAT_EPSILON`] tolerance for numeric variants.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Level(a), Self::Level(b)) => {
                (f64::from(*a) - f64::from(*b)).abs() < FLOAT_EPSILON
            }
            (Self::Setpoint(a), Self::Setpoint(b)) => (a - b).abs() < FLOAT_EPSILON,
            (Self::Mode(a), Self::Mode(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for WriteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level(level) => write!(f, "level={level}%"),
            Self::Setpoint(celsius) => write!(f, "setpoint={celsius}°C"),
            Self::Mode(value) => write!(f, "mode={value}"),
        }
    }
}
