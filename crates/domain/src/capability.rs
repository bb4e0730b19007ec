//! Device capabilities the engine knows how to read and write.

use serde::{Deserialize, Serialize};

/// A device trait, e.g. "reports occupancy" or "has a dimmable output".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Occupancy,
    Brightness,
    AirTemperature,
    Mode,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Occupancy => f.write_str("occupancy"),
            Self::Brightness => f.write_str("brightness"),
            Self::AirTemperature => f.write_str("air_temperature"),
            Self::Mode => f.write_str("mode"),
        }
    }
}
