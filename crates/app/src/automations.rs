//! Example automations built on the kernel.
//!
//! Each one is a config type implementing
//! [`AutomationConfig`](crate::automation::AutomationConfig) and a decision
//! implementing [`Decide`](crate::automation::Decide). Nothing else is
//! automation specific.

pub mod hvac_occupancy;
pub mod occupancy_lights;

pub use hvac_occupancy::{HvacOccupancy, HvacOccupancyConfig};
pub use occupancy_lights::{OccupancyLights, OccupancyLightsConfig};

use std::collections::BTreeSet;

use buildhub_domain::capability::Capability;
use buildhub_domain::error::ValidationError;
use buildhub_domain::reading::{Occupancy, OccupancyState};
use buildhub_domain::time::Timestamp;

use crate::state::ReadState;

/// Combined occupancy of a group of sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// No sensor has reported a usable state yet.
    Unknown,
    /// At least one sensor reports occupied.
    Occupied,
    /// No sensor reports occupied; the latest one became vacant at this time.
    VacantSince(Timestamp),
}

impl Presence {
    #[must_use]
    pub fn of<C>(read: &ReadState<C>, sensors: &[String]) -> Self {
        let mut vacant_since: Option<Timestamp> = None;
        for sensor in sensors {
            let Some(reading) = read.get::<Occupancy>(sensor) else {
                continue;
            };
            match reading.value.state {
                OccupancyState::Occupied => return Self::Occupied,
                OccupancyState::Unoccupied | OccupancyState::Idle => {
                    let since = reading.value.state_changed_at.unwrap_or(reading.at);
                    vacant_since = Some(vacant_since.map_or(since, |latest| latest.max(since)));
                }
                OccupancyState::Unknown => {}
            }
        }
        vacant_since.map_or(Self::Unknown, Self::VacantSince)
    }
}

/// Reject empty names and devices listed twice.
pub(crate) fn validate_devices(
    capability: Capability,
    devices: &[String],
) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    for device in devices {
        if device.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !seen.insert(device.as_str()) {
            return Err(ValidationError::DuplicateDevice {
                capability,
                name: device.clone(),
            });
        }
    }
    Ok(())
}
