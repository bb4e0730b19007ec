//! Occupancy lights: switch lights with the occupancy of a zone.
//!
//! Lights go to `occupied_level_percent` as soon as any sensor reports
//! occupied, and to `unoccupied_level_percent` once every sensor has been
//! vacant for `unoccupied_off_delay_secs`. While waiting out the delay the
//! decision asks to be re-run when it elapses.

use std::time::Duration;

use buildhub_domain::capability::Capability;
use buildhub_domain::error::{HubError, ValidationError};
use buildhub_domain::reading::Brightness;
use buildhub_domain::settings::WriteSettings;
use serde::Deserialize;

use super::{Presence, validate_devices};
use crate::actions::{Actions, CachedActions};
use crate::automation::{AutomationConfig, Decide};
use crate::pull::millis;
use crate::scheduler::Ttl;
use crate::state::ReadState;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OccupancyLightsConfig {
    pub name: String,
    pub occupancy_sensors: Vec<String>,
    pub lights: Vec<String>,
    pub occupied_level_percent: f32,
    pub unoccupied_level_percent: f32,
    pub unoccupied_off_delay_secs: u64,
    /// Log writes instead of sending them.
    pub dry_run: bool,
    #[serde(flatten)]
    pub write: WriteSettings,
}

impl Default for OccupancyLightsConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            occupancy_sensors: Vec::new(),
            lights: Vec::new(),
            occupied_level_percent: 100.0,
            unoccupied_level_percent: 0.0,
            unoccupied_off_delay_secs: 600,
            dry_run: false,
            write: WriteSettings::default(),
        }
    }
}

impl OccupancyLightsConfig {
    #[must_use]
    pub fn unoccupied_off_delay(&self) -> Duration {
        Duration::from_secs(self.unoccupied_off_delay_secs)
    }

    /// Check invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for an empty name, duplicate devices,
    /// levels outside `0..=100` or invalid write settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        validate_devices(Capability::Occupancy, &self.occupancy_sensors)?;
        validate_devices(Capability::Brightness, &self.lights)?;
        Brightness::new(self.occupied_level_percent)?;
        Brightness::new(self.unoccupied_level_percent)?;
        self.write.validate()
    }
}

impl AutomationConfig for OccupancyLightsConfig {
    fn settings(&self) -> &WriteSettings {
        &self.write
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OccupancyLights;

impl Decide<OccupancyLightsConfig> for OccupancyLights {
    async fn decide<A: Actions>(
        &mut self,
        read: &ReadState<OccupancyLightsConfig>,
        actions: &mut CachedActions<A>,
    ) -> Result<Ttl, HubError> {
        let config = read.config.as_ref();
        match Presence::of(read, &config.occupancy_sensors) {
            Presence::Unknown => {
                tracing::debug!("no occupancy reading yet");
                Ok(None)
            }
            Presence::Occupied => {
                let level = Brightness::new(config.occupied_level_percent)?;
                set_all(actions, &config.lights, level).await?;
                Ok(None)
            }
            Presence::VacantSince(since) => {
                let vacant_for = (read.now() - since).to_std().unwrap_or_default();
                let delay = config.unoccupied_off_delay();
                if vacant_for < delay {
                    let remaining = delay - vacant_for;
                    tracing::debug!(
                        remaining_ms = millis(remaining),
                        "zone vacant, waiting before dimming"
                    );
                    return Ok(Some(remaining));
                }
                let level = Brightness::new(config.unoccupied_level_percent)?;
                set_all(actions, &config.lights, level).await?;
                Ok(None)
            }
        }
    }
}

/// Write `level` to every light, reporting the first failure.
async fn set_all<A: Actions>(
    actions: &mut CachedActions<A>,
    lights: &[String],
    level: Brightness,
) -> Result<(), HubError> {
    let mut first_err = None;
    for light in lights {
        if let Err(err) = actions.update_brightness(light, level).await {
            first_err.get_or_insert(err);
        }
    }
    match first_err {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
