//! HVAC occupancy: drive thermostats from the occupancy of a zone.
//!
//! Each thermostat gets its occupancy mode key and setpoint set to the
//! occupied or unoccupied values. Nothing is written until at least one
//! sensor has reported.

use buildhub_domain::capability::Capability;
use buildhub_domain::error::{HubError, ValidationError};
use buildhub_domain::reading::{AirTemperature, Modes};
use buildhub_domain::settings::WriteSettings;
use serde::Deserialize;

use super::{Presence, validate_devices};
use crate::actions::{Actions, CachedActions};
use crate::automation::{AutomationConfig, Decide};
use crate::scheduler::Ttl;
use crate::state::ReadState;

const OCCUPIED: &str = "occupied";
const UNOCCUPIED: &str = "unoccupied";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HvacOccupancyConfig {
    pub name: String,
    pub occupancy_sensors: Vec<String>,
    pub thermostats: Vec<String>,
    /// Mode key receiving `"occupied"` / `"unoccupied"`.
    pub mode_key: String,
    pub occupied_setpoint_celsius: f64,
    pub unoccupied_setpoint_celsius: f64,
    pub dry_run: bool,
    #[serde(flatten)]
    pub write: WriteSettings,
}

impl Default for HvacOccupancyConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            occupancy_sensors: Vec::new(),
            thermostats: Vec::new(),
            mode_key: "occupancy".to_string(),
            occupied_setpoint_celsius: 21.0,
            unoccupied_setpoint_celsius: 16.0,
            dry_run: false,
            write: WriteSettings::default(),
        }
    }
}

impl HvacOccupancyConfig {
    /// Check invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for an empty name or mode key,
    /// duplicate devices or invalid write settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() || self.mode_key.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        validate_devices(Capability::Occupancy, &self.occupancy_sensors)?;
        validate_devices(Capability::AirTemperature, &self.thermostats)?;
        self.write.validate()
    }
}

impl AutomationConfig for HvacOccupancyConfig {
    fn settings(&self) -> &WriteSettings {
        &self.write
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HvacOccupancy;

impl Decide<HvacOccupancyConfig> for HvacOccupancy {
    async fn decide<A: Actions>(
        &mut self,
        read: &ReadState<HvacOccupancyConfig>,
        actions: &mut CachedActions<A>,
    ) -> Result<Ttl, HubError> {
        let config = read.config.as_ref();
        let (mode, setpoint) = match Presence::of(read, &config.occupancy_sensors) {
            Presence::Unknown => {
                tracing::debug!("no occupancy reading yet");
                return Ok(None);
            }
            Presence::Occupied => (OCCUPIED, config.occupied_setpoint_celsius),
            Presence::VacantSince(_) => (UNOCCUPIED, config.unoccupied_setpoint_celsius),
        };

        let mut first_err = None;
        for thermostat in &config.thermostats {
            let modes = Modes::one(config.mode_key.as_str(), mode);
            if let Err(err) = actions.update_modes(thermostat, modes).await {
                first_err.get_or_insert(err);
            }
            let target = AirTemperature::setpoint(setpoint);
            if let Err(err) = actions.update_air_temperature(thermostat, target).await {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(None),
        }
    }
}
