//! Virtual node configuration.
//!
//! ```toml
//! [[virtual.devices]]
//! name = "pir-1"
//! kind = "occupancy_sensor"
//!
//! [[virtual.devices]]
//! name = "light-1"
//! kind = "light"
//! ```

use buildhub_domain::capability::Capability;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VirtualConfig {
    pub devices: Vec<VirtualDeviceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualDeviceConfig {
    pub name: String,
    pub kind: DeviceKind,
    /// Start the device unreachable.
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Light,
    OccupancySensor,
    Thermostat,
}

impl DeviceKind {
    /// The capability this kind of device primarily serves.
    #[must_use]
    pub fn capability(self) -> Capability {
        match self {
            Self::Light => Capability::Brightness,
            Self::OccupancySensor => Capability::Occupancy,
            Self::Thermostat => Capability::AirTemperature,
        }
    }
}
